use crate::db::{with_connection, PgPool};
use crate::domain::{SubscriberEmail, Subscription};
use crate::models::SubscriptionRow;
use crate::routes::error_chain_fmt;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use uuid::Uuid;

/// What the fetch step reads: the subscription plus who to remind about it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    pub subscription: Subscription,
    pub subscriber_name: String,
    pub contact: SubscriberEmail,
}

#[derive(thiserror::Error)]
pub enum FetchError {
    /// The store could not be reached. The fetch may succeed if retried.
    #[error("the subscription store is unavailable")]
    Unavailable(#[source] anyhow::Error),
    /// The record exists but cannot be turned into a valid subscription.
    #[error("the stored subscription is invalid")]
    Invalid(#[source] anyhow::Error),
}

impl std::fmt::Debug for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// `Ok(None)` means the id does not resolve to a subscription.
    async fn fetch(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionSnapshot>, FetchError>;
}

pub struct PgSubscriptionSource {
    pool: PgPool,
}

impl PgSubscriptionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionSource for PgSubscriptionSource {
    #[tracing::instrument(name = "Fetch subscription for reminders", skip(self, now))]
    async fn fetch(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionSnapshot>, FetchError> {
        let row = with_connection(&self.pool, move |conn| {
            use crate::schema::{subscriptions, users};
            subscriptions::table
                .inner_join(users::table)
                .filter(subscriptions::id.eq(subscription_id))
                .select((subscriptions::all_columns, users::name, users::email))
                .first::<(SubscriptionRow, String, String)>(conn)
                .optional()
                .context("Failed to load the subscription and its owner.")
        })
        .await
        .map_err(FetchError::Unavailable)?;

        let (row, subscriber_name, email) = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let subscription =
            Subscription::from_row(row, now).map_err(|e| FetchError::Invalid(anyhow!(e)))?;
        let contact = SubscriberEmail::parse(email).map_err(|e| FetchError::Invalid(anyhow!(e)))?;
        Ok(Some(SubscriptionSnapshot {
            subscription,
            subscriber_name,
            contact,
        }))
    }
}
