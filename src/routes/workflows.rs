use crate::reminders::{Progress, ReminderEngine, StartOutcome, WorkflowError};
use crate::routes::{error_chain_fmt, json_error, ApiResponse};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::response::Responder;
use rocket::serde::json::Json;
use rocket::{Request, State};
use std::sync::Arc;
use uuid::Uuid;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReminderTrigger {
    subscription_id: String,
}

/// What the trigger did, as reported back to the caller.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub subscription_id: Uuid,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reminder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
}

impl TriggerResponse {
    fn new(subscription_id: Uuid, outcome: StartOutcome) -> Self {
        let mut response = TriggerResponse {
            subscription_id,
            outcome: "already_started",
            reason: None,
            next_reminder: None,
            wake_at: None,
        };
        match outcome {
            StartOutcome::AlreadyStarted => {}
            StartOutcome::Terminated(termination) => {
                response.outcome = "terminated";
                response.reason = Some(termination.as_str());
            }
            StartOutcome::Started(Progress::Suspended { wake_at, reminder }) => {
                response.outcome = "suspended";
                response.next_reminder = Some(reminder);
                response.wake_at = Some(wake_at);
            }
            StartOutcome::Started(Progress::RetryScheduled { wake_at, .. }) => {
                response.outcome = "retry_scheduled";
                response.wake_at = Some(wake_at);
            }
            StartOutcome::Started(Progress::Completed) => response.outcome = "completed",
            StartOutcome::Started(Progress::Terminated(termination)) => {
                response.outcome = "terminated";
                response.reason = Some(termination.as_str());
            }
            StartOutcome::Started(Progress::Failed) => response.outcome = "failed",
        }
        response
    }
}

#[derive(thiserror::Error)]
pub enum TriggerError {
    #[error("{0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl std::fmt::Debug for TriggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl<'r> Responder<'r, 'static> for TriggerError {
    fn respond_to(self, _request: &'r Request<'_>) -> rocket::response::Result<'static> {
        match self {
            TriggerError::InvalidPayload(message) => {
                tracing::warn!("Rejected reminder trigger: {}", message);
                json_error(Status::BadRequest, message)
            }
            TriggerError::Workflow(WorkflowError::Unavailable(e)) => {
                tracing::error!(error.cause_chain = ?e, "Reminder trigger failed");
                json_error(
                    Status::ServiceUnavailable,
                    "The subscription store is unavailable, retry later",
                )
            }
            TriggerError::Workflow(e) => {
                tracing::error!(error.cause_chain = ?e, "Reminder trigger failed");
                json_error(Status::InternalServerError, "Internal Server Error")
            }
        }
    }
}

fn parse_trigger(payload: &str) -> Result<Uuid, TriggerError> {
    let trigger: ReminderTrigger = serde_json::from_str(payload)
        .map_err(|e| TriggerError::InvalidPayload(format!("Invalid payload: {}", e)))?;
    Uuid::parse_str(trigger.subscription_id.trim()).map_err(|_| {
        TriggerError::InvalidPayload(format!(
            "{} is not a valid subscription id",
            trigger.subscription_id
        ))
    })
}

/// Workflow entry point. The body is read raw so that malformed payloads get
/// the same JSON error shape as everything else.
#[tracing::instrument(name = "Trigger reminder workflow", skip(payload, engine))]
#[post("/workflows/subscription/reminder", data = "<payload>")]
pub async fn trigger_reminder_workflow(
    payload: String,
    engine: &State<Arc<ReminderEngine>>,
) -> Result<Json<ApiResponse<TriggerResponse>>, TriggerError> {
    let subscription_id = parse_trigger(&payload)?;
    let outcome = engine.start(subscription_id).await?;
    Ok(Json(ApiResponse::new(TriggerResponse::new(
        subscription_id,
        outcome,
    ))))
}
