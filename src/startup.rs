use crate::catchers::*;
use crate::configuration::Settings;
use crate::db::get_connection_pool;
use crate::email::Email;
use crate::liftoff::{self, Port};
use crate::reminders::{
    EmailReminderDispatcher, PgSubscriptionSource, PgWorkflowStore, ReminderEngine,
    ReminderScheduler, SystemClock,
};
use crate::routes::*;
use anyhow::{anyhow, Context};
use rocket::figment::util::map;
use rocket::{Config, Ignite, Rocket};
use rocket_sync_db_pools::database;
use std::sync::Arc;

#[database("tracker")]
pub struct TrackerDbConn(diesel::PgConnection);

pub struct Application {
    pub server: Rocket<Ignite>,
    pub port: Port,
    pub engine: Arc<ReminderEngine>,
}

impl Application {
    pub async fn build(
        configuration: &Settings,
        email_client: Arc<dyn Email>,
    ) -> Result<Application, anyhow::Error> {
        let engine_settings = configuration
            .reminders
            .engine_settings()
            .map_err(|e| anyhow!(e))
            .context("Invalid reminder configuration.")?;
        let poll_interval = configuration
            .reminders
            .poll_interval()
            .map_err(|e| anyhow!(e))
            .context("Invalid reminder configuration.")?;
        let pool = get_connection_pool(&configuration.database);
        let engine = Arc::new(ReminderEngine::new(
            Arc::new(PgSubscriptionSource::new(pool.clone())),
            Arc::new(PgWorkflowStore::new(pool)),
            Arc::new(EmailReminderDispatcher::new(email_client)),
            Arc::new(SystemClock),
            engine_settings,
        ));
        let scheduler = ReminderScheduler::new(
            Arc::clone(&engine),
            poll_interval,
            configuration.reminders.batch_size,
        );
        let (liftoff, port) = liftoff::create_pair(scheduler);

        let figment = Config::figment()
            .merge(("address", configuration.application.host))
            .merge(("port", configuration.application.port.unwrap_or(0)))
            .merge((
                "databases",
                map!["tracker" => map!["url" => configuration.database.connection_string()]],
            ));
        let server = rocket::custom(figment)
            .attach(TrackerDbConn::fairing())
            .attach(liftoff)
            .manage(Arc::clone(&engine))
            .mount(
                "/",
                routes![
                    health_check,
                    create_subscription,
                    get_upcoming_renewals,
                    get_subscription,
                    update_subscription,
                    cancel_subscription,
                    delete_subscription,
                    get_user_subscriptions,
                    trigger_reminder_workflow,
                ],
            )
            .register(
                "/",
                catchers![
                    not_found::not_found,
                    unauthorized_request_credentials,
                    unprocessable_entity_to_bad_request
                ],
            )
            .ignite()
            .await
            .context("Failed to ignite the server.")?;

        Ok(Application {
            server,
            port,
            engine,
        })
    }
}
