use anyhow::Context;
use std::sync::Arc;
use subscription_tracker::configuration::get_configuration;
use subscription_tracker::email::SesEmailClient;
use subscription_tracker::startup::Application;
use subscription_tracker::telemetry::{get_subscriber, init_subscriber};

#[rocket::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber(
        "subscription_tracker".into(),
        "info".into(),
        std::io::stdout,
    );
    init_subscriber(subscriber);

    let configuration = get_configuration().context("Failed to read configuration.")?;
    let email_client = SesEmailClient::from_settings(&configuration.email_client).await?;
    let application = Application::build(&configuration, Arc::new(email_client)).await?;
    application
        .server
        .launch()
        .await
        .context("The server stopped unexpectedly.")?;
    Ok(())
}
