use std::sync::Arc;

use crate::cache::{CacheCoordinator, CacheKey, invalidation};
use crate::push::channel::{PushChannel, Subscription};
use crate::push::messages::{PushKind, PushMessage};

/// Keys a push message makes stale. Heartbeats, `connected` frames and
/// unrecognized kinds invalidate nothing.
pub fn invalidation_keys(message: &PushMessage) -> Vec<CacheKey> {
    let Some(case_id) = message.case_id.as_deref().filter(|id| !id.trim().is_empty()) else {
        return Vec::new();
    };

    match message.kind() {
        Some(PushKind::StageUpdate) => invalidation::on_stage_update(case_id),
        Some(PushKind::ProcessingCompleted) => invalidation::on_stage_completed(case_id),
        Some(PushKind::ProcessingError | PushKind::Error) => invalidation::on_stage_failed(case_id),
        Some(PushKind::Heartbeat | PushKind::Connected) | None => Vec::new(),
    }
}

pub fn apply_invalidation(cache: &CacheCoordinator, message: &PushMessage) -> usize {
    let keys = invalidation_keys(message);
    if keys.is_empty() {
        return 0;
    }
    log::debug!(
        "Push {} for {:?} invalidates {} keys",
        message.message_type,
        message.case_id,
        keys.len()
    );
    cache.invalidate_many(&keys)
}

/// Subscribes `cache` to `channel` using the routing table above.
pub fn attach_invalidation(channel: &PushChannel, cache: Arc<CacheCoordinator>) -> Subscription {
    channel.on_message(move |message| {
        apply_invalidation(&cache, message);
    })
}
