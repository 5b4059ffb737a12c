use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, EnumString};
use url::Url;

use crate::config::Endpoints;
use crate::error::{Result, require_id};

// ============================================================================
// Topics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Case(String),
    Notifications,
}

impl Topic {
    pub fn case(case_id: &str) -> Result<Self> {
        Ok(Self::Case(require_id("case id", case_id)?.to_string()))
    }

    pub fn url(&self, endpoints: &Endpoints) -> Result<Url> {
        match self {
            Self::Case(case_id) => endpoints.case_socket(case_id),
            Self::Notifications => endpoints.notifications_socket(),
        }
    }

    pub fn case_id(&self) -> Option<&str> {
        match self {
            Self::Case(case_id) => Some(case_id),
            Self::Notifications => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Case(case_id) => write!(f, "cases/{}", case_id),
            Self::Notifications => write!(f, "notifications"),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PushKind {
    StageUpdate,
    ProcessingCompleted,
    ProcessingError,
    Error,
    Heartbeat,
    Connected,
}

/// One server frame. `type` is kept as sent so domain-specific kinds pass
/// through to listeners untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, alias = "entity_id", skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PushMessage {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            case_id: None,
            stage: None,
            status: None,
            message: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    pub fn for_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    /// `None` for kinds this client has no routing for.
    pub fn kind(&self) -> Option<PushKind> {
        PushKind::from_str(&self.message_type).ok()
    }
}
