use crate::domain::SubscriptionStatus;
use crate::reminders::{
    reminder_schedule, Clock, Dispatcher, FetchError, InstanceState, ReminderOffsets,
    ScheduledReminder, StoreError, SubscriptionSnapshot, SubscriptionSource, WorkflowInstance,
    WorkflowStore,
};
use crate::routes::error_chain_fmt;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub offsets: ReminderOffsets,
    /// Attempts at one dispatch step before the instance is marked failed.
    pub max_dispatch_attempts: u32,
    /// Delay before the n-th re-attempt is `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Re-fetch the subscription on every wake-up and stop if it is no longer
    /// active. Off by default: the subscription is read once, when the
    /// workflow starts, so a cancellation does not suppress reminders that
    /// were already scheduled.
    pub recheck_status_on_wake: bool,
    /// How long a running instance stays with the runner that claimed it
    /// without a checkpoint before another runner may take it over.
    pub claim_lease: Duration,
}

/// Why a workflow stopped without sending (further) reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    NotFound,
    Inactive(SubscriptionStatus),
    AlreadyExpired,
    InvalidRecord,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::NotFound => "not_found",
            Termination::Inactive(_) => "inactive",
            Termination::AlreadyExpired => "already_expired",
            Termination::InvalidRecord => "invalid_record",
        }
    }
}

/// Where an instance stands after the engine stopped working on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Parked until the next reminder is due.
    Suspended {
        wake_at: DateTime<Utc>,
        reminder: String,
    },
    /// A dispatch failed and will be re-attempted at `wake_at`.
    RetryScheduled { wake_at: DateTime<Utc>, attempts: u32 },
    Completed,
    Terminated(Termination),
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(Progress),
    /// The subscription already has a workflow; nothing was done.
    AlreadyStarted,
    Terminated(Termination),
}

#[derive(thiserror::Error)]
pub enum WorkflowError {
    /// The fetch step could not reach the subscription store. Unlike a
    /// missing subscription this is worth retrying.
    #[error("the subscription store is unavailable")]
    Unavailable(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The claim went stale and another runner took the instance over. The
    /// step that was in flight may be delivered twice; nothing was written.
    #[error("reminder workflow {0} was taken over by another runner")]
    ClaimLost(Uuid),
}

impl std::fmt::Debug for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// The fetch and schedule steps as a pure function of the subscription and
/// the clock: the reminders this workflow should send, earliest first, or
/// the reason it should not run at all.
pub fn plan(
    snapshot: &SubscriptionSnapshot,
    offsets: &ReminderOffsets,
    now: DateTime<Utc>,
) -> Result<Vec<ScheduledReminder>, Termination> {
    let subscription = &snapshot.subscription;
    if !subscription.is_active() {
        return Err(Termination::Inactive(subscription.status));
    }
    if subscription.renewal_date <= now {
        return Err(Termination::AlreadyExpired);
    }
    Ok(reminder_schedule(subscription.renewal_date, offsets))
}

pub struct ReminderEngine {
    subscriptions: Arc<dyn SubscriptionSource>,
    store: Arc<dyn WorkflowStore>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl ReminderEngine {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionSource>,
        store: Arc<dyn WorkflowStore>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            subscriptions,
            store,
            dispatcher,
            clock,
            settings,
        }
    }

    /// Claims up to `limit` instances that are due, or whose previous runner
    /// let its claim go stale, for this runner to resume.
    pub async fn claim_due(&self, limit: usize) -> Result<Vec<WorkflowInstance>, StoreError> {
        let now = self.clock.now();
        self.store
            .claim_due(now, now - self.settings.claim_lease, limit)
            .await
    }

    /// Starts the workflow for a freshly created subscription.
    ///
    /// Reminders that are already due go out before this returns; the
    /// instance is then parked until the next one. Starting twice for the
    /// same subscription is a no-op.
    #[tracing::instrument(name = "Start reminder workflow", skip(self))]
    pub async fn start(&self, subscription_id: Uuid) -> Result<StartOutcome, WorkflowError> {
        let now = self.clock.now();
        let snapshot = match self.fetch(subscription_id, now).await? {
            Ok(snapshot) => snapshot,
            Err(termination) => return Ok(StartOutcome::Terminated(termination)),
        };
        if let Err(termination) = plan(&snapshot, &self.settings.offsets, now) {
            log_termination(subscription_id, termination);
            return Ok(StartOutcome::Terminated(termination));
        }

        let instance = WorkflowInstance {
            subscription_id,
            snapshot,
            next_step: 0,
            state: InstanceState::Running,
            attempts: 0,
            claim: Some(Uuid::new_v4()),
        };
        if !self.store.insert(&instance, now).await? {
            tracing::info!(
                %subscription_id,
                "A reminder workflow already exists for this subscription"
            );
            return Ok(StartOutcome::AlreadyStarted);
        }
        let progress = self.advance(instance).await?;
        Ok(StartOutcome::Started(progress))
    }

    /// Continues an instance the scheduler claimed after its wake time passed.
    #[tracing::instrument(
        name = "Resume reminder workflow",
        skip(self, instance),
        fields(
            subscription_id = %instance.subscription_id,
            next_step = instance.next_step
        )
    )]
    pub async fn resume(&self, mut instance: WorkflowInstance) -> Result<Progress, WorkflowError> {
        if self.settings.recheck_status_on_wake {
            let now = self.clock.now();
            let termination = match self.fetch(instance.subscription_id, now).await {
                Ok(Ok(current)) => {
                    let termination = plan(&current, &self.settings.offsets, now).err();
                    if let Some(termination) = termination {
                        log_termination(instance.subscription_id, termination);
                    }
                    termination
                }
                Ok(Err(termination)) => Some(termination),
                Err(WorkflowError::Unavailable(e)) => {
                    let wake_at = now + self.settings.retry_backoff;
                    tracing::warn!(
                        error.cause_chain = ?e,
                        %wake_at,
                        "Could not re-check the subscription, retrying later"
                    );
                    instance.state = InstanceState::Suspended { wake_at };
                    self.checkpoint(&instance, now).await?;
                    return Ok(Progress::RetryScheduled {
                        wake_at,
                        attempts: instance.attempts,
                    });
                }
                Err(e) => return Err(e),
            };
            if let Some(termination) = termination {
                instance.state = InstanceState::Terminated;
                self.checkpoint(&instance, now).await?;
                return Ok(Progress::Terminated(termination));
            }
        }
        self.advance(instance).await
    }

    /// Returns instances orphaned by a crashed process to the timer queue.
    /// Instances whose claim is still within its lease are left to their
    /// runner.
    pub async fn recover(&self) -> Result<usize, WorkflowError> {
        let now = self.clock.now();
        let released = self
            .store
            .release_running(now, now - self.settings.claim_lease)
            .await?;
        if released > 0 {
            tracing::warn!(
                released,
                "Re-queued reminder workflows interrupted by a previous shutdown"
            );
        }
        Ok(released)
    }

    async fn fetch(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Result<SubscriptionSnapshot, Termination>, WorkflowError> {
        match self.subscriptions.fetch(subscription_id, now).await {
            Ok(Some(snapshot)) => Ok(Ok(snapshot)),
            Ok(None) => {
                log_termination(subscription_id, Termination::NotFound);
                Ok(Err(Termination::NotFound))
            }
            Err(FetchError::Invalid(e)) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    %subscription_id,
                    "Stopping reminder workflow: the subscription record is invalid"
                );
                Ok(Err(Termination::InvalidRecord))
            }
            Err(FetchError::Unavailable(e)) => Err(WorkflowError::Unavailable(e)),
        }
    }

    /// Runs steps in order until the instance has to wait, finishes or gives
    /// up, checkpointing after every dispatch.
    async fn advance(&self, mut instance: WorkflowInstance) -> Result<Progress, WorkflowError> {
        let schedule = reminder_schedule(
            instance.snapshot.subscription.renewal_date,
            &self.settings.offsets,
        );
        loop {
            let now = self.clock.now();
            let reminder = match schedule.get(instance.next_step) {
                Some(reminder) => reminder,
                None => {
                    instance.state = InstanceState::Completed;
                    self.checkpoint(&instance, now).await?;
                    tracing::info!(
                        subscription_id = %instance.subscription_id,
                        "All reminders sent, stopping workflow"
                    );
                    return Ok(Progress::Completed);
                }
            };

            if reminder.due_at > now {
                instance.state = InstanceState::Suspended {
                    wake_at: reminder.due_at,
                };
                self.checkpoint(&instance, now).await?;
                tracing::info!(
                    subscription_id = %instance.subscription_id,
                    wake_at = %reminder.due_at,
                    "Sleeping until {}",
                    reminder.label
                );
                return Ok(Progress::Suspended {
                    wake_at: reminder.due_at,
                    reminder: reminder.label.clone(),
                });
            }

            let dispatched = self
                .dispatcher
                .dispatch(&instance.snapshot.contact, reminder, &instance.snapshot)
                .await;
            match dispatched {
                Ok(()) => {
                    tracing::info!(
                        subscription_id = %instance.subscription_id,
                        "Triggered {}",
                        reminder.label
                    );
                    instance.next_step += 1;
                    instance.attempts = 0;
                    instance.state = InstanceState::Running;
                    self.checkpoint(&instance, self.clock.now()).await?;
                }
                Err(e) => return self.dispatch_failed(instance, reminder, e).await,
            }
        }
    }

    async fn checkpoint(
        &self,
        instance: &WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        if self.store.save(instance, now).await? {
            Ok(())
        } else {
            Err(WorkflowError::ClaimLost(instance.subscription_id))
        }
    }

    async fn dispatch_failed(
        &self,
        mut instance: WorkflowInstance,
        reminder: &ScheduledReminder,
        error: anyhow::Error,
    ) -> Result<Progress, WorkflowError> {
        let now = self.clock.now();
        instance.attempts += 1;
        if instance.attempts >= self.settings.max_dispatch_attempts.max(1) {
            tracing::error!(
                error.cause_chain = ?error,
                subscription_id = %instance.subscription_id,
                attempts = instance.attempts,
                "Giving up on {}",
                reminder.label
            );
            instance.state = InstanceState::Failed;
            self.checkpoint(&instance, now).await?;
            return Ok(Progress::Failed);
        }

        let multiplier = i32::try_from(instance.attempts).unwrap_or(i32::MAX);
        let wake_at = now + self.settings.retry_backoff * multiplier;
        tracing::warn!(
            error.cause_chain = ?error,
            subscription_id = %instance.subscription_id,
            attempts = instance.attempts,
            %wake_at,
            "Failed to dispatch {}, retrying later",
            reminder.label
        );
        instance.state = InstanceState::Suspended { wake_at };
        self.checkpoint(&instance, now).await?;
        Ok(Progress::RetryScheduled {
            wake_at,
            attempts: instance.attempts,
        })
    }
}

fn log_termination(subscription_id: Uuid, termination: Termination) {
    match termination {
        Termination::NotFound => tracing::info!(
            %subscription_id,
            "Stopping reminder workflow: subscription not found"
        ),
        Termination::Inactive(status) => tracing::info!(
            %subscription_id,
            status = status.as_str(),
            "Stopping reminder workflow: subscription is not active"
        ),
        Termination::AlreadyExpired => tracing::info!(
            %subscription_id,
            "Renewal date has passed for subscription, stopping workflow"
        ),
        Termination::InvalidRecord => {}
    }
}
