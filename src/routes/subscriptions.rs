use crate::domain::{
    NewSubscription, Price, Subscription, SubscriptionName, SubscriptionUpdate,
};
use crate::guards::AuthenticatedUser;
use crate::models::{NewSubscriptionRow, SubscriptionChangeset, SubscriptionRow};
use crate::reminders::{ReminderEngine, WorkflowError};
use crate::routes::{error_chain_fmt, json_error, ApiResponse};
use crate::startup::TrackerDbConn;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use rocket::http::Status;
use rocket::response::{status, Responder};
use rocket::serde::json::Json;
use rocket::{Request, State};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

const START_ATTEMPTS: u32 = 4;
const DEFAULT_UPCOMING_DAYS: u32 = 7;
const MAX_UPCOMING_DAYS: u32 = 365;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionForm {
    name: String,
    price: f64,
    currency: Option<String>,
    frequency: String,
    category: Option<String>,
    payment_method: Option<String>,
    status: Option<String>,
    start_date: DateTime<Utc>,
    renewal_date: Option<DateTime<Utc>>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdateForm {
    name: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    category: Option<String>,
    payment_method: Option<String>,
    renewal_date: Option<DateTime<Utc>>,
}

impl SubscriptionForm {
    fn parse(self, user_id: Uuid, now: DateTime<Utc>) -> Result<NewSubscription, String> {
        NewSubscription::parse(
            user_id,
            SubscriptionName::parse(self.name)?,
            Price::parse(self.price)?,
            parse_or_default(self.currency)?,
            self.frequency.parse()?,
            parse_or_default(self.category)?,
            parse_or_default(self.payment_method)?,
            parse_or_default(self.status)?,
            self.start_date,
            self.renewal_date,
            now,
        )
    }
}

impl TryFrom<SubscriptionUpdateForm> for SubscriptionUpdate {
    type Error = String;

    fn try_from(form: SubscriptionUpdateForm) -> Result<Self, Self::Error> {
        Ok(SubscriptionUpdate {
            name: form.name.map(SubscriptionName::parse).transpose()?,
            price: form.price.map(Price::parse).transpose()?,
            currency: form.currency.map(|c| c.parse()).transpose()?,
            category: form.category.map(|c| c.parse()).transpose()?,
            payment_method: form.payment_method.map(|p| p.parse()).transpose()?,
            renewal_date: form.renewal_date,
        })
    }
}

fn parse_or_default<T>(value: Option<String>) -> Result<T, String>
where
    T: std::str::FromStr<Err = String> + Default,
{
    value.map(|v| v.parse()).transpose().map(Option::unwrap_or_default)
}

#[derive(thiserror::Error)]
pub enum SubscriptionError {
    #[error("{0}")]
    ValidationError(String),
    #[error("Subscription not found")]
    NotFound,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl<'r> Responder<'r, 'static> for SubscriptionError {
    fn respond_to(self, _request: &'r Request<'_>) -> rocket::response::Result<'static> {
        tracing::warn!("SubscriptionError: {:?}", self);
        match self {
            SubscriptionError::ValidationError(message) => json_error(Status::BadRequest, message),
            SubscriptionError::NotFound => json_error(Status::NotFound, self.to_string()),
            SubscriptionError::Forbidden(message) => json_error(Status::Forbidden, message),
            SubscriptionError::UnexpectedError(_) => {
                json_error(Status::InternalServerError, "Internal Server Error")
            }
        }
    }
}

type SubscriptionResponse = Json<ApiResponse<Subscription>>;

#[tracing::instrument(
    name = "Adding a new subscription",
    skip(form, user, conn, engine),
    fields(
        request_id = %Uuid::new_v4(),
        user_id = %user.user_id,
        subscription_name = %form.name
    )
)]
#[post("/subscriptions", data = "<form>")]
pub async fn create_subscription(
    form: Json<SubscriptionForm>,
    user: AuthenticatedUser,
    conn: TrackerDbConn,
    engine: &State<Arc<ReminderEngine>>,
) -> Result<status::Created<SubscriptionResponse>, SubscriptionError> {
    let now = Utc::now();
    let subscription = form
        .into_inner()
        .parse(user.user_id, now)
        .map_err(SubscriptionError::ValidationError)?
        .into_subscription(Uuid::new_v4());

    insert_subscription(&conn, subscription.clone(), now)
        .await
        .context("Failed to insert the new subscription in the database.")?;

    spawn_reminder_workflow(engine.inner().clone(), subscription.id);

    Ok(
        status::Created::new(format!("/subscriptions/{}", subscription.id))
            .body(Json(ApiResponse::new(subscription))),
    )
}

#[tracing::instrument(name = "Get a subscription", skip(user, conn))]
#[get("/subscriptions/<id>")]
pub async fn get_subscription(
    id: &str,
    user: AuthenticatedUser,
    conn: TrackerDbConn,
) -> Result<SubscriptionResponse, SubscriptionError> {
    let subscription = load_owned_subscription(&conn, parse_id(id)?, &user).await?;
    Ok(Json(ApiResponse::new(subscription)))
}

#[tracing::instrument(name = "Update a subscription", skip(form, user, conn))]
#[put("/subscriptions/<id>", data = "<form>")]
pub async fn update_subscription(
    id: &str,
    form: Json<SubscriptionUpdateForm>,
    user: AuthenticatedUser,
    conn: TrackerDbConn,
) -> Result<SubscriptionResponse, SubscriptionError> {
    let update: SubscriptionUpdate = form
        .into_inner()
        .try_into()
        .map_err(SubscriptionError::ValidationError)?;
    let mut subscription = load_owned_subscription(&conn, parse_id(id)?, &user).await?;
    let now = Utc::now();
    subscription
        .apply(update, now)
        .map_err(SubscriptionError::ValidationError)?;
    store_subscription(&conn, subscription.clone(), now)
        .await
        .context("Failed to update the subscription.")?;
    Ok(Json(ApiResponse::new(subscription)))
}

#[tracing::instrument(name = "Cancel a subscription", skip(user, conn))]
#[put("/subscriptions/<id>/cancel")]
pub async fn cancel_subscription(
    id: &str,
    user: AuthenticatedUser,
    conn: TrackerDbConn,
) -> Result<SubscriptionResponse, SubscriptionError> {
    let mut subscription = load_owned_subscription(&conn, parse_id(id)?, &user).await?;
    subscription
        .cancel()
        .map_err(SubscriptionError::ValidationError)?;
    store_subscription(&conn, subscription.clone(), Utc::now())
        .await
        .context("Failed to cancel the subscription.")?;
    Ok(Json(ApiResponse::new(subscription)))
}

#[tracing::instrument(name = "Delete a subscription", skip(user, conn))]
#[delete("/subscriptions/<id>")]
pub async fn delete_subscription(
    id: &str,
    user: AuthenticatedUser,
    conn: TrackerDbConn,
) -> Result<SubscriptionResponse, SubscriptionError> {
    let subscription = load_owned_subscription(&conn, parse_id(id)?, &user).await?;
    let subscription_id = subscription.id;
    conn.run(move |c| {
        use crate::schema::subscriptions::dsl::*;
        diesel::delete(subscriptions.find(subscription_id)).execute(c)
    })
    .await
    .context("Failed to delete the subscription.")?;
    Ok(Json(ApiResponse::new(subscription)))
}

#[tracing::instrument(name = "List a user's subscriptions", skip(user, conn))]
#[get("/users/<id>/subscriptions")]
pub async fn get_user_subscriptions(
    id: &str,
    user: AuthenticatedUser,
    conn: TrackerDbConn,
) -> Result<Json<ApiResponse<Vec<Subscription>>>, SubscriptionError> {
    let owner = Uuid::parse_str(id).map_err(|_| SubscriptionError::NotFound)?;
    if owner != user.user_id {
        return Err(SubscriptionError::Forbidden(
            "Unauthorized access to user subscriptions",
        ));
    }
    let rows = conn
        .run(move |c| {
            use crate::schema::subscriptions::dsl::*;
            subscriptions
                .filter(user_id.eq(owner))
                .order(renewal_date.asc())
                .load::<SubscriptionRow>(c)
        })
        .await
        .context("Failed to load the user's subscriptions.")?;
    Ok(Json(ApiResponse::new(from_rows(rows, Utc::now())?)))
}

#[tracing::instrument(name = "List upcoming renewals", skip(user, conn))]
#[get("/subscriptions/upcoming-renewals?<days>")]
pub async fn get_upcoming_renewals(
    days: Option<u32>,
    user: AuthenticatedUser,
    conn: TrackerDbConn,
) -> Result<Json<ApiResponse<Vec<Subscription>>>, SubscriptionError> {
    let days = days.unwrap_or(DEFAULT_UPCOMING_DAYS);
    if days == 0 || days > MAX_UPCOMING_DAYS {
        return Err(SubscriptionError::ValidationError(format!(
            "days must be between 1 and {}",
            MAX_UPCOMING_DAYS
        )));
    }
    let now = Utc::now();
    let until = now + Duration::days(i64::from(days));
    let owner = user.user_id;
    let rows = conn
        .run(move |c| {
            use crate::schema::subscriptions::dsl::*;
            subscriptions
                .filter(user_id.eq(owner))
                .filter(status.eq("active"))
                .filter(renewal_date.ge(now))
                .filter(renewal_date.le(until))
                .order(renewal_date.asc())
                .load::<SubscriptionRow>(c)
        })
        .await
        .context("Failed to load upcoming renewals.")?;
    let upcoming = from_rows(rows, now)?
        .into_iter()
        .filter(Subscription::is_active)
        .collect();
    Ok(Json(ApiResponse::new(upcoming)))
}

fn parse_id(id: &str) -> Result<Uuid, SubscriptionError> {
    Uuid::parse_str(id).map_err(|_| SubscriptionError::NotFound)
}

fn from_rows(
    rows: Vec<SubscriptionRow>,
    now: DateTime<Utc>,
) -> Result<Vec<Subscription>, anyhow::Error> {
    rows.into_iter()
        .map(|row| Subscription::from_row(row, now).map_err(|e| anyhow!(e)))
        .collect::<Result<Vec<_>, _>>()
        .context("A stored subscription is invalid.")
}

async fn load_owned_subscription(
    conn: &TrackerDbConn,
    id: Uuid,
    user: &AuthenticatedUser,
) -> Result<Subscription, SubscriptionError> {
    let row = conn
        .run(move |c| {
            use crate::schema::subscriptions::dsl::subscriptions;
            subscriptions
                .find(id)
                .first::<SubscriptionRow>(c)
                .optional()
        })
        .await
        .context("Failed to load the subscription.")?
        .ok_or(SubscriptionError::NotFound)?;
    if row.user_id != user.user_id {
        return Err(SubscriptionError::Forbidden(
            "Unauthorized access to this subscription",
        ));
    }
    Subscription::from_row(row, Utc::now())
        .map_err(|e| anyhow!(e))
        .context("The stored subscription is invalid.")
        .map_err(SubscriptionError::from)
}

#[tracing::instrument(
    name = "Saving new subscription details in the database",
    skip(conn, subscription, now)
)]
async fn insert_subscription(
    conn: &TrackerDbConn,
    subscription: Subscription,
    now: DateTime<Utc>,
) -> diesel::QueryResult<usize> {
    use crate::schema::subscriptions;
    conn.run(move |c| {
        diesel::insert_into(subscriptions::table)
            .values(NewSubscriptionRow {
                id: &subscription.id,
                user_id: &subscription.user_id,
                name: subscription.name.as_ref(),
                price: subscription.price.value(),
                currency: subscription.currency.as_str(),
                frequency: subscription.frequency.as_str(),
                category: subscription.category.as_str(),
                payment_method: subscription.payment_method.as_str(),
                status: subscription.status.as_str(),
                start_date: &subscription.start_date,
                renewal_date: &subscription.renewal_date,
                created_at: &now,
                updated_at: &now,
            })
            .execute(c)
    })
    .await
}

async fn store_subscription(
    conn: &TrackerDbConn,
    subscription: Subscription,
    now: DateTime<Utc>,
) -> diesel::QueryResult<usize> {
    use crate::schema::subscriptions::dsl::subscriptions;
    conn.run(move |c| {
        diesel::update(subscriptions.find(subscription.id))
            .set(&SubscriptionChangeset {
                name: subscription.name.as_ref(),
                price: subscription.price.value(),
                currency: subscription.currency.as_str(),
                frequency: subscription.frequency.as_str(),
                category: subscription.category.as_str(),
                payment_method: subscription.payment_method.as_str(),
                status: subscription.status.as_str(),
                renewal_date: &subscription.renewal_date,
                updated_at: &now,
            })
            .execute(c)
    })
    .await
}

/// Starts the reminder workflow off the request path. Only an unreachable
/// subscription store is worth retrying; every other outcome is final.
fn spawn_reminder_workflow(engine: Arc<ReminderEngine>, subscription_id: Uuid) {
    let span = tracing::info_span!("Reminder workflow trigger", %subscription_id);
    tokio::spawn(
        async move {
            let mut attempt = 1;
            loop {
                match engine.start(subscription_id).await {
                    Ok(outcome) => {
                        tracing::info!(?outcome, "Reminder workflow triggered");
                        break;
                    }
                    Err(WorkflowError::Unavailable(e)) if attempt < START_ATTEMPTS => {
                        tracing::warn!(
                            error.cause_chain = ?e,
                            attempt,
                            "Subscription store unavailable, retrying the workflow trigger"
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(1 << attempt)).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        tracing::error!(
                            error.cause_chain = ?e,
                            "Failed to trigger the reminder workflow"
                        );
                        break;
                    }
                }
            }
        }
        .instrument(span),
    );
}
