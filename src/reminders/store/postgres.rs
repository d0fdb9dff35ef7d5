use super::{InstanceState, StoreError, WorkflowInstance, WorkflowStore};
use crate::db::{with_connection, PgPool};
use crate::models::{NewReminderWorkflowRow, ReminderWorkflowRow};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Timestamptz, Uuid as SqlUuid};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use uuid::Uuid;

pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TryFrom<ReminderWorkflowRow> for WorkflowInstance {
    type Error = anyhow::Error;

    fn try_from(row: ReminderWorkflowRow) -> Result<Self, Self::Error> {
        let snapshot = serde_json::from_str(&row.snapshot).with_context(|| {
            format!(
                "Workflow {} has an unreadable subscription snapshot.",
                row.subscription_id
            )
        })?;
        let state = InstanceState::from_parts(&row.state, row.wake_at).map_err(|e| anyhow!(e))?;
        Ok(WorkflowInstance {
            subscription_id: row.subscription_id,
            snapshot,
            next_step: usize::try_from(row.next_step).context("Negative workflow step.")?,
            state,
            attempts: u32::try_from(row.attempts).context("Negative attempt count.")?,
            claim: row.claim_token,
        })
    }
}

fn step_column(instance: &WorkflowInstance) -> Result<i32, anyhow::Error> {
    i32::try_from(instance.next_step).context("Workflow step does not fit in a column.")
}

fn attempts_column(instance: &WorkflowInstance) -> Result<i32, anyhow::Error> {
    i32::try_from(instance.attempts).context("Attempt count does not fit in a column.")
}

/// The claim columns as they should read after writing `instance` at `now`:
/// held and renewed while running, released otherwise.
fn claim_columns(
    instance: &WorkflowInstance,
    now: DateTime<Utc>,
) -> (Option<Uuid>, Option<DateTime<Utc>>) {
    match instance.state {
        InstanceState::Running => (instance.claim, Some(now)),
        _ => (None, None),
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    #[tracing::instrument(
        name = "Register reminder workflow",
        skip(self, instance, now),
        fields(subscription_id = %instance.subscription_id)
    )]
    async fn insert(
        &self,
        instance: &WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let id = instance.subscription_id;
        let snapshot = serde_json::to_string(&instance.snapshot)
            .context("Failed to serialize the subscription snapshot.")
            .map_err(StoreError)?;
        let next_step = step_column(instance).map_err(StoreError)?;
        let attempts = attempts_column(instance).map_err(StoreError)?;
        let state = instance.state;
        let (claim_token, claimed_at) = claim_columns(instance, now);
        let inserted = with_connection(&self.pool, move |conn| {
            use crate::schema::reminder_workflows;
            let wake_at = state.wake_at();
            diesel::insert_into(reminder_workflows::table)
                .values(NewReminderWorkflowRow {
                    subscription_id: &id,
                    snapshot: &snapshot,
                    next_step,
                    state: state.as_str(),
                    wake_at: wake_at.as_ref(),
                    attempts,
                    created_at: &now,
                    updated_at: &now,
                    claim_token: claim_token.as_ref(),
                    claimed_at: claimed_at.as_ref(),
                })
                .on_conflict_do_nothing()
                .execute(conn)
                .context("Failed to insert the reminder workflow.")
        })
        .await
        .map_err(StoreError)?;
        Ok(inserted == 1)
    }

    #[tracing::instrument(
        name = "Checkpoint reminder workflow",
        skip(self, instance, now),
        fields(
            subscription_id = %instance.subscription_id,
            next_step = instance.next_step,
            state = instance.state.as_str()
        )
    )]
    async fn save(&self, instance: &WorkflowInstance, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let id = instance.subscription_id;
        let next_step = step_column(instance).map_err(StoreError)?;
        let attempts = attempts_column(instance).map_err(StoreError)?;
        let state = instance.state;
        let claim = instance.claim;
        let (claim_token, claimed_at) = claim_columns(instance, now);
        let updated = with_connection(&self.pool, move |conn| {
            use crate::schema::reminder_workflows::dsl;
            let changes = (
                dsl::next_step.eq(next_step),
                dsl::state.eq(state.as_str()),
                dsl::wake_at.eq(state.wake_at()),
                dsl::attempts.eq(attempts),
                dsl::claim_token.eq(claim_token),
                dsl::claimed_at.eq(claimed_at),
                dsl::updated_at.eq(now),
            );
            let target = dsl::reminder_workflows.find(id);
            let updated = match claim {
                Some(token) => diesel::update(target.filter(dsl::claim_token.eq(token)))
                    .set(changes)
                    .execute(conn),
                None => diesel::update(target.filter(dsl::claim_token.is_null()))
                    .set(changes)
                    .execute(conn),
            };
            updated.context("Failed to update the reminder workflow.")
        })
        .await
        .map_err(StoreError)?;
        Ok(updated == 1)
    }

    async fn get(&self, subscription_id: Uuid) -> Result<Option<WorkflowInstance>, StoreError> {
        let row = with_connection(&self.pool, move |conn| {
            use crate::schema::reminder_workflows::dsl;
            dsl::reminder_workflows
                .find(subscription_id)
                .first::<ReminderWorkflowRow>(conn)
                .optional()
                .context("Failed to load the reminder workflow.")
        })
        .await
        .map_err(StoreError)?;
        row.map(WorkflowInstance::try_from)
            .transpose()
            .map_err(StoreError)
    }

    #[tracing::instrument(name = "Claim due reminder workflows", skip(self))]
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let limit = i64::try_from(limit)
            .context("Claim limit does not fit in a query parameter.")
            .map_err(StoreError)?;
        let token = Uuid::new_v4();
        let rows = with_connection(&self.pool, move |conn| {
            diesel::sql_query(
                r#"
                UPDATE reminder_workflows
                SET state = 'running', wake_at = NULL,
                    claim_token = $3, claimed_at = $1, updated_at = $1
                WHERE subscription_id IN (
                    SELECT subscription_id
                    FROM reminder_workflows
                    WHERE (state = 'suspended' AND wake_at <= $1)
                       OR (state = 'running' AND claimed_at < $2)
                    ORDER BY COALESCE(wake_at, claimed_at)
                    LIMIT $4
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING *
                "#,
            )
            .bind::<Timestamptz, _>(now)
            .bind::<Timestamptz, _>(stale_before)
            .bind::<SqlUuid, _>(token)
            .bind::<BigInt, _>(limit)
            .load::<ReminderWorkflowRow>(conn)
            .context("Failed to claim due reminder workflows.")
        })
        .await
        .map_err(StoreError)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.subscription_id;
            match WorkflowInstance::try_from(row) {
                Ok(instance) => claimed.push(instance),
                Err(e) => {
                    tracing::error!(
                        error.cause_chain = ?e,
                        subscription_id = %id,
                        "Skipping a reminder workflow that cannot be decoded"
                    );
                    self.mark_failed(id, now).await?;
                }
            }
        }
        Ok(claimed)
    }

    #[tracing::instrument(name = "Release orphaned reminder workflows", skip(self))]
    async fn release_running(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        with_connection(&self.pool, move |conn| {
            use crate::schema::reminder_workflows::dsl;
            let stale = dsl::reminder_workflows
                .filter(dsl::state.eq(InstanceState::Running.as_str()))
                .filter(dsl::claimed_at.lt(stale_before));
            diesel::update(stale)
                .set((
                    dsl::state.eq("suspended"),
                    dsl::wake_at.eq(Some(now)),
                    dsl::claim_token.eq(None::<Uuid>),
                    dsl::claimed_at.eq(None::<DateTime<Utc>>),
                    dsl::updated_at.eq(now),
                ))
                .execute(conn)
                .context("Failed to release running reminder workflows.")
        })
        .await
        .map_err(StoreError)
    }
}

impl PgWorkflowStore {
    async fn mark_failed(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        with_connection(&self.pool, move |conn| {
            use crate::schema::reminder_workflows::dsl;
            diesel::update(dsl::reminder_workflows.find(subscription_id))
                .set((
                    dsl::state.eq(InstanceState::Failed.as_str()),
                    dsl::wake_at.eq(None::<DateTime<Utc>>),
                    dsl::claim_token.eq(None::<Uuid>),
                    dsl::claimed_at.eq(None::<DateTime<Utc>>),
                    dsl::updated_at.eq(now),
                ))
                .execute(conn)
                .context("Failed to mark the reminder workflow as failed.")
                .map(|_| ())
        })
        .await
        .map_err(StoreError)
    }
}
