use std::future::Future;

use serde_json::Value;

use crate::cache::keys::CacheKey;
use crate::cache::store::{CacheCoordinator, CacheEntry};
use crate::error::{AppError, Result};

/// Lifecycle of one optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState {
    /// Request in flight; holds what the target looked like before.
    Pending(Option<CacheEntry>),
    Committed,
    /// Request failed; the snapshot has been written back.
    RolledBack(Option<CacheEntry>),
}

#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub target: CacheKey,
    pub optimistic: Option<Value>,
    pub invalidates: Vec<CacheKey>,
}

impl MutationPlan {
    pub fn new(target: CacheKey) -> Self {
        Self {
            target,
            optimistic: None,
            invalidates: Vec::new(),
        }
    }

    pub fn optimistic(mut self, value: Value) -> Self {
        self.optimistic = Some(value);
        self
    }

    pub fn invalidates(mut self, keys: impl IntoIterator<Item = CacheKey>) -> Self {
        self.invalidates.extend(keys);
        self
    }
}

/// A mutation that has written its speculative value and awaits the outcome.
///
/// Dropping it unsettled (e.g. the request future was cancelled) rolls back.
pub struct PendingMutation<'a> {
    cache: &'a CacheCoordinator,
    plan: MutationPlan,
    state: MutationState,
}

impl<'a> PendingMutation<'a> {
    pub fn state(&self) -> &MutationState {
        &self.state
    }

    pub fn commit(mut self) -> MutationState {
        if self.plan.optimistic.is_some() {
            self.cache.confirm_speculative(&self.plan.target);
        }
        self.state = MutationState::Committed;
        self.settle();
        self.state.clone()
    }

    pub fn rollback(mut self) -> MutationState {
        self.restore();
        self.settle();
        self.state.clone()
    }

    fn restore(&mut self) {
        let state = std::mem::replace(&mut self.state, MutationState::Committed);
        self.state = match state {
            MutationState::Pending(snapshot) => {
                self.cache.restore_entry(&self.plan.target, snapshot.clone());
                log::debug!("↩️  Rolled back {}", self.plan.target);
                MutationState::RolledBack(snapshot)
            }
            other => other,
        };
    }

    /// Invalidation runs on every outcome.
    fn settle(&self) {
        self.cache.invalidate_many(&self.plan.invalidates);
    }
}

impl Drop for PendingMutation<'_> {
    fn drop(&mut self) {
        if matches!(self.state, MutationState::Pending(_)) {
            self.restore();
            self.settle();
        }
    }
}

impl CacheCoordinator {
    /// Snapshots the target and writes the optimistic value, if any.
    pub fn begin_mutation(&self, plan: MutationPlan) -> PendingMutation<'_> {
        let snapshot = self.peek(&plan.target);
        if let Some(value) = &plan.optimistic {
            self.write_speculative(&plan.target, value.clone());
        }
        PendingMutation {
            cache: self,
            plan,
            state: MutationState::Pending(snapshot),
        }
    }

    /// Runs `request` under the optimistic-update protocol: roll back on
    /// failure, then invalidate every dependent key either way.
    pub async fn mutate<T, Fut>(&self, plan: MutationPlan, request: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let target = plan.target.clone();
        let pending = self.begin_mutation(plan);
        match request.await {
            Ok(value) => {
                pending.commit();
                Ok(value)
            }
            Err(e) => {
                pending.rollback();
                log::warn!("Mutation on {} failed: {}", target, e);
                Err(AppError::mutation(e.message.clone())
                    .with_details(serde_json::json!({ "cause": e.code.to_string() })))
            }
        }
    }
}
