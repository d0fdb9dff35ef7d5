use crate::reminders::{ReminderEngine, StoreError, WorkflowError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The background loop that wakes parked workflows.
///
/// Sleeping instances exist only as rows in the timer store. Each poll claims
/// the ones whose wake time has passed and resumes every one of them in its
/// own short-lived task, without waiting for the batch to finish.
pub struct ReminderScheduler {
    engine: Arc<ReminderEngine>,
    poll_interval: Duration,
    batch_size: usize,
}

impl ReminderScheduler {
    pub fn new(engine: Arc<ReminderEngine>, poll_interval: Duration, batch_size: usize) -> Self {
        Self {
            engine,
            poll_interval,
            batch_size: batch_size.max(1),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        if let Err(e) = self.engine.recover().await {
            tracing::error!(
                error.cause_chain = ?e,
                "Failed to re-queue interrupted reminder workflows"
            );
        }
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            loop {
                // Resumes run detached; a slow dispatch does not hold up the
                // next poll.
                match self.wake().await {
                    // A full batch means more may be waiting.
                    Ok(resumes) if resumes.len() == self.batch_size => continue,
                    Ok(_) => break,
                    Err(e) => {
                        tracing::error!(
                            error.cause_chain = ?e,
                            "Failed to poll for due reminder workflows"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Claims one batch of due instances and resumes each in its own task.
    async fn wake(&self) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let due = self.engine.claim_due(self.batch_size).await?;
        Ok(due
            .into_iter()
            .map(|instance| {
                let engine = Arc::clone(&self.engine);
                tokio::spawn(async move {
                    match engine.resume(instance).await {
                        Ok(_) => {}
                        Err(e @ WorkflowError::ClaimLost(_)) => tracing::warn!(
                            error.cause_chain = ?e,
                            "Dropped a reminder workflow another runner took over"
                        ),
                        Err(e) => tracing::error!(
                            error.cause_chain = ?e,
                            "Reminder workflow step failed"
                        ),
                    }
                })
            })
            .collect())
    }

    /// Wakes one batch of due instances and waits for them to park again.
    /// Returns how many were woken.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        let resumes = self.wake().await?;
        let woken = resumes.len();
        for resume in resumes {
            if let Err(e) = resume.await {
                tracing::error!(error.cause_chain = ?e, "Reminder workflow task panicked");
            }
        }
        Ok(woken)
    }
}
