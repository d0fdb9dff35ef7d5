use crate::schema::subscriptions;
use chrono::offset::Utc;
use chrono::DateTime;

#[derive(Queryable, Debug, Clone)]
pub struct SubscriptionRow {
    pub id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub frequency: String,
    pub category: String,
    pub payment_method: String,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub renewal_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[table_name = "subscriptions"]
pub struct NewSubscriptionRow<'a> {
    pub id: &'a uuid::Uuid,
    pub user_id: &'a uuid::Uuid,
    pub name: &'a str,
    pub price: f64,
    pub currency: &'a str,
    pub frequency: &'a str,
    pub category: &'a str,
    pub payment_method: &'a str,
    pub status: &'a str,
    pub start_date: &'a DateTime<Utc>,
    pub renewal_date: &'a DateTime<Utc>,
    pub created_at: &'a DateTime<Utc>,
    pub updated_at: &'a DateTime<Utc>,
}

#[derive(AsChangeset)]
#[table_name = "subscriptions"]
pub struct SubscriptionChangeset<'a> {
    pub name: &'a str,
    pub price: f64,
    pub currency: &'a str,
    pub frequency: &'a str,
    pub category: &'a str,
    pub payment_method: &'a str,
    pub status: &'a str,
    pub renewal_date: &'a DateTime<Utc>,
    pub updated_at: &'a DateTime<Utc>,
}
