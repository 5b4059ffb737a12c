use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamEventKind {
    // Lifecycle events
    StageStart,
    Done,

    // Per-payer progress
    PayerStart,
    Progress,
    PayerComplete,

    // Completion events
    StageComplete,

    // Error events
    Error,

    #[serde(other)]
    Unknown,
}

/// One progress record of a stage run, discriminated on `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event: StreamEventKind,
    #[serde(default, deserialize_with = "numeric", skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_status: Option<String>,
    #[serde(default, deserialize_with = "numeric", skip_serializing_if = "Option::is_none")]
    pub approval_likelihood: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_met: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, deserialize_with = "numeric", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_gaps: Option<Value>,
    /// Fields this client does not model, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamEvent {
    pub fn new(event: StreamEventKind) -> Self {
        Self {
            event,
            percent: None,
            message: None,
            payer_name: None,
            coverage_status: None,
            approval_likelihood: None,
            criteria_met: None,
            criteria_total: None,
            stage: None,
            case_id: None,
            timestamp: None,
            reasoning: None,
            confidence: None,
            findings: None,
            recommendations: None,
            warnings: None,
            assessments: None,
            documentation_gaps: None,
            extra: Map::new(),
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_payer(mut self, payer_name: impl Into<String>) -> Self {
        self.payer_name = Some(payer_name.into());
        self
    }

    pub fn with_approval_likelihood(mut self, likelihood: f64) -> Self {
        self.approval_likelihood = Some(likelihood);
        self
    }

    /// `stage_complete` carries the result, `done` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.event, StreamEventKind::Done | StreamEventKind::Error)
    }
}

/// Accepts any JSON value and keeps it only when it is a number.
fn numeric<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_payer_complete() {
        let event: StreamEvent = serde_json::from_value(json!({
            "event": "payer_complete",
            "payer_name": "Aetna",
            "approval_likelihood": 0.82,
            "criteria_met": 4,
            "criteria_total": 5,
            "percent": 60
        }))
        .unwrap();
        assert_eq!(event.event, StreamEventKind::PayerComplete);
        assert_eq!(event.payer_name.as_deref(), Some("Aetna"));
        assert_eq!(event.approval_likelihood, Some(0.82));
        assert_eq!(event.criteria_met, Some(4));
        assert_eq!(event.percent, Some(60.0));
    }

    #[test]
    fn test_extra_fields_are_preserved() {
        let event: StreamEvent = serde_json::from_value(json!({
            "event": "progress",
            "trace_id": "abc",
            "nested": {"k": [1, 2]}
        }))
        .unwrap();
        assert_eq!(event.extra.get("trace_id"), Some(&json!("abc")));

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["nested"], json!({"k": [1, 2]}));
        assert_eq!(back["event"], json!("progress"));
    }

    #[test]
    fn test_non_numeric_percent_is_ignored() {
        let event: StreamEvent =
            serde_json::from_value(json!({"event": "progress", "percent": "half"})).unwrap();
        assert_eq!(event.percent, None);
    }

    #[test]
    fn test_unknown_discriminator() {
        let event: StreamEvent =
            serde_json::from_value(json!({"event": "payer_retry"})).unwrap();
        assert_eq!(event.event, StreamEventKind::Unknown);
    }

    #[test]
    fn test_missing_discriminator_is_rejected() {
        let parsed = serde_json::from_value::<StreamEvent>(json!({"percent": 10}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(StreamEventKind::StageComplete.to_string(), "stage_complete");
        assert!(StreamEvent::new(StreamEventKind::Done).is_terminal());
        assert!(!StreamEvent::new(StreamEventKind::StageComplete).is_terminal());
    }
}
