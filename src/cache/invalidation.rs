//! Which keys go stale when the backend reports progress on a case.
//!
//! Shared by push-message routing and by stream sessions reaching a terminal
//! state, so both sources invalidate the same sets.

use crate::cache::keys::CacheKey;

/// A stage moved forward: the case and the case list changed.
pub fn on_stage_update(case_id: &str) -> Vec<CacheKey> {
    vec![CacheKey::case(case_id), CacheKey::cases()]
}

/// Processing finished: strategies derived from the case are outdated too.
pub fn on_stage_completed(case_id: &str) -> Vec<CacheKey> {
    vec![
        CacheKey::case(case_id),
        CacheKey::strategies(case_id),
        CacheKey::cases(),
    ]
}

/// Processing failed: only the case itself needs a refetch.
pub fn on_stage_failed(case_id: &str) -> Vec<CacheKey> {
    vec![CacheKey::case(case_id)]
}
