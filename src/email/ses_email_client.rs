use crate::configuration::EmailClientSettings;
use crate::domain::SubscriberEmail;
use crate::email::Email;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_config::TimeoutConfig;
use aws_sdk_sesv2 as ses;
use aws_sdk_sesv2::model::{Body, Content, Destination, EmailContent, Message};

pub struct SesEmailClient {
    ses_client: ses::Client,
    sender: SubscriberEmail,
}

impl SesEmailClient {
    pub fn new(ses_client: ses::Client, sender: SubscriberEmail) -> Self {
        Self { ses_client, sender }
    }

    /// Builds a client from the ambient AWS environment (region, credentials)
    /// with the API-call timeout taken from `settings`.
    pub async fn from_settings(settings: &EmailClientSettings) -> Result<Self, anyhow::Error> {
        let sender = settings
            .sender()
            .map_err(|e| anyhow!(e))
            .context("Invalid sender email address.")?;
        let timeout_config = TimeoutConfig::new().with_api_call_timeout(Some(settings.timeout()));
        let shared_config = aws_config::from_env()
            .timeout_config(timeout_config)
            .load()
            .await;
        Ok(Self::new(ses::Client::new(&shared_config), sender))
    }
}

#[async_trait]
impl Email for SesEmailClient {
    #[tracing::instrument(name = "Send email through SES", skip(self, html_content, text_content))]
    async fn send_email(
        &self,
        recipient: SubscriberEmail,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> anyhow::Result<()> {
        let html_content = Content::builder()
            .data(html_content)
            .charset("UTF-8")
            .build();
        let text_content = Content::builder()
            .data(text_content)
            .charset("UTF-8")
            .build();
        let body = Body::builder()
            .html(html_content)
            .text(text_content)
            .build();
        let subject = Content::builder().data(subject).charset("UTF-8").build();
        let message = Message::builder().subject(subject).body(body).build();
        let content = EmailContent::builder().simple(message).build();
        let destination = Destination::builder()
            .to_addresses(recipient.as_ref())
            .build();

        self.ses_client
            .send_email()
            .from_email_address(self.sender.as_ref())
            .destination(destination)
            .content(content)
            .send()
            .await
            .with_context(|| format!("SES rejected the email to {}", recipient))?;
        Ok(())
    }
}
