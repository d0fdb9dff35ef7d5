use crate::domain::{
    Category, Currency, Frequency, PaymentMethod, Price, SubscriptionName, SubscriptionStatus,
};
use crate::models::SubscriptionRow;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A recurring paid service tracked for one user.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: SubscriptionName,
    pub price: Price,
    pub currency: Currency,
    pub frequency: Frequency,
    pub category: Category,
    pub payment_method: PaymentMethod,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub renewal_date: DateTime<Utc>,
}

/// A validated creation request, before an id has been assigned.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub name: SubscriptionName,
    pub price: Price,
    pub currency: Currency,
    pub frequency: Frequency,
    pub category: Category,
    pub payment_method: PaymentMethod,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub renewal_date: DateTime<Utc>,
}

/// Fields a subscription owner may change after creation.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub name: Option<SubscriptionName>,
    pub price: Option<Price>,
    pub currency: Option<Currency>,
    pub category: Option<Category>,
    pub payment_method: Option<PaymentMethod>,
    pub renewal_date: Option<DateTime<Utc>>,
}

/// An active subscription whose renewal has passed is expired.
pub fn coerce_status(
    status: SubscriptionStatus,
    renewal_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SubscriptionStatus {
    if status == SubscriptionStatus::Active && renewal_date < now {
        SubscriptionStatus::Expired
    } else {
        status
    }
}

/// Validates the start/renewal pair, deriving the renewal date from the
/// billing frequency when it is missing.
pub fn resolve_renewal_date(
    start_date: DateTime<Utc>,
    renewal_date: Option<DateTime<Utc>>,
    frequency: Frequency,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, String> {
    if start_date >= now {
        return Err("Start Date must be in the past".to_string());
    }
    let renewal_date = renewal_date.unwrap_or_else(|| start_date + frequency.period());
    if renewal_date <= start_date {
        return Err("Renewal Date must be after Start Date".to_string());
    }
    Ok(renewal_date)
}

impl NewSubscription {
    #[allow(clippy::too_many_arguments)]
    pub fn parse(
        user_id: Uuid,
        name: SubscriptionName,
        price: Price,
        currency: Currency,
        frequency: Frequency,
        category: Category,
        payment_method: PaymentMethod,
        status: SubscriptionStatus,
        start_date: DateTime<Utc>,
        renewal_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<NewSubscription, String> {
        let renewal_date = resolve_renewal_date(start_date, renewal_date, frequency, now)?;
        Ok(NewSubscription {
            user_id,
            name,
            price,
            currency,
            frequency,
            category,
            payment_method,
            status: coerce_status(status, renewal_date, now),
            start_date,
            renewal_date,
        })
    }

    pub fn into_subscription(self, id: Uuid) -> Subscription {
        Subscription {
            id,
            user_id: self.user_id,
            name: self.name,
            price: self.price,
            currency: self.currency,
            frequency: self.frequency,
            category: self.category,
            payment_method: self.payment_method,
            status: self.status,
            start_date: self.start_date,
            renewal_date: self.renewal_date,
        }
    }
}

impl Subscription {
    /// Rebuilds the record from its stored form. The expiry rule is applied on
    /// every load, so callers never observe an active subscription whose
    /// renewal already passed.
    pub fn from_row(row: SubscriptionRow, now: DateTime<Utc>) -> Result<Subscription, String> {
        let status: SubscriptionStatus = row.status.parse()?;
        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            name: SubscriptionName::parse(row.name)?,
            price: Price::parse(row.price)?,
            currency: row.currency.parse()?,
            frequency: row.frequency.parse()?,
            category: row.category.parse()?,
            payment_method: row.payment_method.parse()?,
            status: coerce_status(status, row.renewal_date, now),
            start_date: row.start_date,
            renewal_date: row.renewal_date,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Cancellation is one-way.
    pub fn cancel(&mut self) -> Result<(), String> {
        if self.status == SubscriptionStatus::Canceled {
            return Err("Subscription is already canceled".to_string());
        }
        self.status = SubscriptionStatus::Canceled;
        Ok(())
    }

    pub fn apply(&mut self, update: SubscriptionUpdate, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(renewal_date) = update.renewal_date {
            if renewal_date <= self.start_date {
                return Err("Renewal Date must be after Start Date".to_string());
            }
            self.renewal_date = renewal_date;
        }
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(price) = update.price {
            self.price = price;
        }
        if let Some(currency) = update.currency {
            self.currency = currency;
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(payment_method) = update.payment_method {
            self.payment_method = payment_method;
        }
        self.status = coerce_status(self.status, self.renewal_date, now);
        Ok(())
    }
}
