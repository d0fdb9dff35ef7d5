use crate::domain::SubscriberEmail;
use crate::email::Email;
use crate::reminders::{ScheduledReminder, SubscriptionSnapshot};
use async_trait::async_trait;
use std::sync::Arc;

/// Delivers one reminder notification.
///
/// The engine may call this more than once for the same reminder when a
/// process dies between the send and the checkpoint that follows it.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        contact: &SubscriberEmail,
        reminder: &ScheduledReminder,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<(), anyhow::Error>;
}

pub struct EmailReminderDispatcher {
    email_client: Arc<dyn Email>,
}

impl EmailReminderDispatcher {
    pub fn new(email_client: Arc<dyn Email>) -> Self {
        Self { email_client }
    }
}

#[async_trait]
impl Dispatcher for EmailReminderDispatcher {
    #[tracing::instrument(
        name = "Send a renewal reminder email",
        skip(self, contact, snapshot),
        fields(
            subscription_id = %snapshot.subscription.id,
            reminder = %reminder.label
        )
    )]
    async fn dispatch(
        &self,
        contact: &SubscriberEmail,
        reminder: &ScheduledReminder,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<(), anyhow::Error> {
        let message = ReminderMessage::render(reminder, snapshot);
        self.email_client
            .send_email(
                contact.clone(),
                &message.subject,
                &message.html_body,
                &message.text_body,
            )
            .await
    }
}

pub struct ReminderMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

impl ReminderMessage {
    pub fn render(reminder: &ScheduledReminder, snapshot: &SubscriptionSnapshot) -> Self {
        let subscription = &snapshot.subscription;
        let name = subscription.name.as_ref();
        let renewal = subscription.renewal_date.format("%B %e, %Y");
        let price = format!(
            "{:.2} {}",
            subscription.price.value(),
            subscription.currency.as_str()
        );
        let when = match reminder.days_before {
            1 => "tomorrow".to_string(),
            days => format!("in {} days", days),
        };

        let subject = format!("Your {} subscription renews {}", name, when);
        let html_body = format!(
            "Hi {},<br />\
            Your <strong>{}</strong> subscription renews on {} ({}).<br />\
            You will be charged {} via {}.",
            snapshot.subscriber_name,
            name,
            renewal,
            when,
            price,
            subscription.payment_method.as_str()
        );
        let text_body = format!(
            "Hi {},\nYour {} subscription renews on {} ({}).\nYou will be charged {} via {}.",
            snapshot.subscriber_name,
            name,
            renewal,
            when,
            price,
            subscription.payment_method.as_str()
        );
        Self {
            subject,
            html_body,
            text_body,
        }
    }
}
