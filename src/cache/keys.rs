use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::tier::StalenessTier;

pub const CASE: &str = "case";
pub const CASES: &str = "cases";
pub const STRATEGIES: &str = "strategies";
pub const TRACE: &str = "trace";
pub const PATIENT_DATA: &str = "patient-data";
pub const POLICY: &str = "policy";

/// Entity kinds that are never written to durable storage.
const VOLATILE_KINDS: &[&str] = &[CASE, CASES, TRACE];

/// Stable tuple identifying one cached value, e.g. `("case", "42")`.
///
/// Keys compare by exact match only; there is no prefix invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn case(case_id: &str) -> Self {
        Self::new([CASE, case_id])
    }

    pub fn cases() -> Self {
        Self::new([CASES])
    }

    pub fn strategies(case_id: &str) -> Self {
        Self::new([STRATEGIES, case_id])
    }

    pub fn trace(case_id: &str) -> Self {
        Self::new([TRACE, case_id])
    }

    pub fn patient_data(patient_id: &str) -> Self {
        Self::new([PATIENT_DATA, patient_id])
    }

    pub fn digitized_policy(payer: &str, medication: &str) -> Self {
        Self::new([POLICY, "digitized", payer, medication])
    }

    pub fn kind(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Active case state, the case list and the audit trace stay in memory only.
    pub fn is_volatile(&self) -> bool {
        VOLATILE_KINDS.contains(&self.kind())
    }

    pub fn default_tier(&self) -> StalenessTier {
        match self.kind() {
            CASE | CASES => StalenessTier::Dynamic,
            TRACE => StalenessTier::Realtime,
            STRATEGIES | PATIENT_DATA => StalenessTier::SemiStatic,
            POLICY => StalenessTier::Static,
            _ => StalenessTier::Dynamic,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}
