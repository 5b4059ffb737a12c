use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::stream::events::{StreamEvent, StreamEventKind};

pub const ABORTED_MESSAGE: &str = "Stream aborted";
const DEFAULT_ERROR_MESSAGE: &str = "Analysis failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Done,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

/// Everything a caller can observe about one stage run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSessionState {
    pub status: SessionStatus,
    pub events: Vec<StreamEvent>,
    pub percent: f64,
    pub message: String,
    pub result: Option<StreamEvent>,
    pub error: Option<String>,
}

impl StreamSessionState {
    pub fn connecting() -> Self {
        Self {
            status: SessionStatus::Connecting,
            message: "Connecting...".to_string(),
            ..Self::default()
        }
    }

    /// Folds one event into the state. Events after a terminal status are ignored.
    ///
    /// The numeric `percent` is applied first and never moves backwards, so the
    /// per-kind effect (e.g. `stage_complete` forcing 100) has the last word.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if let Some(percent) = event.percent {
            self.percent = self.percent.max(percent.clamp(0.0, 100.0));
        }

        match event.event {
            StreamEventKind::StageStart => {
                let stage = event.stage.as_deref().unwrap_or("analysis");
                self.message = format!("Starting {}", stage);
            }
            StreamEventKind::PayerStart => {
                let payer = event.payer_name.as_deref().unwrap_or("payer");
                self.message = format!("Analyzing {}", payer);
            }
            StreamEventKind::Progress => {
                if let Some(message) = &event.message {
                    self.message = message.clone();
                }
            }
            StreamEventKind::PayerComplete => {
                let payer = event.payer_name.as_deref().unwrap_or("payer");
                self.message = match event.approval_likelihood {
                    Some(likelihood) => format!(
                        "{} complete: {}% approval likelihood",
                        payer,
                        (likelihood * 100.0).round() as i64
                    ),
                    None => format!("{} complete", payer),
                };
            }
            StreamEventKind::StageComplete => {
                if self.result.is_none() {
                    self.result = Some(event.clone());
                }
                self.message = "Analysis complete".to_string();
                self.percent = 100.0;
            }
            StreamEventKind::Error => {
                let message = event
                    .message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
                self.fail(message);
            }
            StreamEventKind::Done => {
                self.status = SessionStatus::Done;
            }
            StreamEventKind::Unknown => {}
        }

        self.events.push(event);
        true
    }

    /// Moves to `error` unless a terminal status was already reached.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        let message = message.into();
        self.status = SessionStatus::Error;
        self.message = message.clone();
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    pub fn finish(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Done;
        }
    }
}
