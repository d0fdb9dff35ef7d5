//! Durable timer store for reminder workflow instances.
//!
//! An instance records only how many reminders it has completed and, while
//! parked, when it wants to wake up. Everything else is recomputed from the
//! snapshot taken by the fetch step and the configured offsets.

mod memory;
mod postgres;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PgWorkflowStore;

use crate::reminders::SubscriptionSnapshot;
use crate::routes::error_chain_fmt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Parked until `wake_at`. No task exists for the instance meanwhile.
    Suspended { wake_at: DateTime<Utc> },
    /// Claimed by a scheduler and currently executing steps.
    Running,
    Completed,
    /// Stopped early because the subscription was no longer active.
    Terminated,
    /// Gave up after exhausting dispatch attempts.
    Failed,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Suspended { .. } => "suspended",
            InstanceState::Running => "running",
            InstanceState::Completed => "completed",
            InstanceState::Terminated => "terminated",
            InstanceState::Failed => "failed",
        }
    }

    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        match self {
            InstanceState::Suspended { wake_at } => Some(*wake_at),
            _ => None,
        }
    }

    pub fn from_parts(state: &str, wake_at: Option<DateTime<Utc>>) -> Result<Self, String> {
        match (state, wake_at) {
            ("suspended", Some(wake_at)) => Ok(InstanceState::Suspended { wake_at }),
            ("suspended", None) => Err("A suspended workflow has no wake time.".to_string()),
            ("running", _) => Ok(InstanceState::Running),
            ("completed", _) => Ok(InstanceState::Completed),
            ("terminated", _) => Ok(InstanceState::Terminated),
            ("failed", _) => Ok(InstanceState::Failed),
            (other, _) => Err(format!("{} is not a known workflow state.", other)),
        }
    }
}

/// One durable execution of the reminder sequence for a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowInstance {
    pub subscription_id: Uuid,
    pub snapshot: SubscriptionSnapshot,
    /// Number of reminders already dispatched, i.e. the index of the next one.
    pub next_step: usize,
    pub state: InstanceState,
    /// Failed attempts at the current step.
    pub attempts: u32,
    /// Token of the claim this copy was handed out under. Only the holder of
    /// the current token may checkpoint a running instance.
    pub claim: Option<Uuid>,
}

#[derive(thiserror::Error)]
#[error("failed to access the workflow store")]
pub struct StoreError(#[source] pub anyhow::Error);

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Registers a new instance, held under `instance.claim` while it runs.
    /// Returns `false` if the subscription already has one, leaving the
    /// existing instance untouched.
    async fn insert(&self, instance: &WorkflowInstance, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Checkpoints progress and state if `instance.claim` still holds the
    /// instance. A running checkpoint renews the claim; any other state gives
    /// it up. Returns `false`, writing nothing, once another runner has taken
    /// the instance over.
    async fn save(&self, instance: &WorkflowInstance, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn get(&self, subscription_id: Uuid) -> Result<Option<WorkflowInstance>, StoreError>;

    /// Hands over up to `limit` instances under a fresh claim, earliest first:
    /// suspended ones whose wake time has passed, and running ones whose claim
    /// was last renewed before `stale_before`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    /// Puts running instances whose claim was last renewed before
    /// `stale_before` back in the timer queue, due at `now`. Returns how many
    /// were released.
    async fn release_running(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}
