use crate::schema::reminder_workflows;
use chrono::offset::Utc;
use chrono::DateTime;

#[derive(Queryable, QueryableByName, Debug)]
#[table_name = "reminder_workflows"]
pub struct ReminderWorkflowRow {
    pub subscription_id: uuid::Uuid,
    pub snapshot: String,
    pub next_step: i32,
    pub state: String,
    pub wake_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claim_token: Option<uuid::Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Insertable)]
#[table_name = "reminder_workflows"]
pub struct NewReminderWorkflowRow<'a> {
    pub subscription_id: &'a uuid::Uuid,
    pub snapshot: &'a str,
    pub next_step: i32,
    pub state: &'a str,
    pub wake_at: Option<&'a DateTime<Utc>>,
    pub attempts: i32,
    pub created_at: &'a DateTime<Utc>,
    pub updated_at: &'a DateTime<Utc>,
    pub claim_token: Option<&'a uuid::Uuid>,
    pub claimed_at: Option<&'a DateTime<Utc>>,
}
