use chrono::Duration;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Entries of every tier are dropped after this long without being read.
pub const GC_HORIZON_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StalenessTier {
    Infinite,
    Static,
    SemiStatic,
    Dynamic,
    Realtime,
}

impl StalenessTier {
    /// Age after which a value may be refreshed in the background.
    /// `None` means only an explicit invalidation makes it stale.
    pub fn stale_after(&self) -> Option<Duration> {
        match self {
            Self::Infinite | Self::Static => None,
            Self::SemiStatic => Some(Duration::minutes(5)),
            Self::Dynamic => Some(Duration::seconds(30)),
            Self::Realtime => Some(Duration::seconds(5)),
        }
    }

    /// Opt-in active polling interval.
    pub fn poll_interval(&self) -> Option<std::time::Duration> {
        match self {
            Self::Realtime => Some(std::time::Duration::from_secs(10)),
            _ => None,
        }
    }

    pub fn gc_horizon() -> Duration {
        Duration::hours(GC_HORIZON_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_windows() {
        assert_eq!(StalenessTier::Static.stale_after(), None);
        assert_eq!(StalenessTier::Infinite.stale_after(), None);
        assert_eq!(StalenessTier::SemiStatic.stale_after(), Some(Duration::minutes(5)));
        assert_eq!(StalenessTier::Dynamic.stale_after(), Some(Duration::seconds(30)));
        assert_eq!(StalenessTier::Realtime.stale_after(), Some(Duration::seconds(5)));
    }

    #[test]
    fn test_only_realtime_polls() {
        assert!(StalenessTier::Realtime.poll_interval().is_some());
        assert!(StalenessTier::Dynamic.poll_interval().is_none());
    }

    #[test]
    fn test_names() {
        assert_eq!(StalenessTier::SemiStatic.to_string(), "SEMI_STATIC");
        assert_eq!(StalenessTier::from_str("REALTIME").unwrap(), StalenessTier::Realtime);
    }
}
