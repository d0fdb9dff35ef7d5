use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::{Connection, PgConnection};
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};
use subscription_tracker::configuration::{get_configuration, Settings};
use subscription_tracker::db::{get_connection_pool, PgPool};
use subscription_tracker::domain::SubscriberEmail;
use subscription_tracker::email::Email;
use subscription_tracker::models::{NewUser, ReminderWorkflowRow};
use subscription_tracker::reminders::{
    Clock, EmailReminderDispatcher, EngineSettings, PgSubscriptionSource, PgWorkflowStore,
    ReminderEngine,
};
use subscription_tracker::schema::{reminder_workflows, users};
use subscription_tracker::startup::Application;
use subscription_tracker::telemetry::{get_subscriber, init_subscriber};
use uuid::Uuid;

static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".into();
    let subscriber_name = "test".into();
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    }
});

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub text_content: String,
}

#[derive(Default)]
pub struct MockEmailClient {
    sent: Mutex<Vec<SentEmail>>,
}

impl MockEmailClient {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Email for MockEmailClient {
    async fn send_email(
        &self,
        recipient: SubscriberEmail,
        subject: &str,
        _html_content: &str,
        text_content: &str,
    ) -> Result<(), anyhow::Error> {
        self.sent.lock().unwrap().push(SentEmail {
            recipient: recipient.as_ref().to_owned(),
            subject: subject.to_owned(),
            text_content: text_content.to_owned(),
        });
        Ok(())
    }
}

/// A clock stopped at one instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub struct TestUser {
    pub user_id: Uuid,
    pub email: String,
    pub password: String,
}

impl TestUser {
    pub fn generate() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4()),
            password: Uuid::new_v4().to_string(),
        }
    }

    fn store(&self, connection: &PgConnection) {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let password_hash = Argon2::default()
            .hash_password(self.password.as_bytes(), &salt)
            .unwrap()
            .to_string();
        diesel::insert_into(users::table)
            .values(NewUser {
                user_id: &self.user_id,
                name: "Ursula",
                email: &self.email,
                password_hash: &password_hash,
            })
            .execute(connection)
            .expect("Failed to store test user.");
    }
}

pub struct TestApp {
    pub address: String,
    pub db_connection: PgConnection,
    pub test_user: TestUser,
    pub email_client: Arc<MockEmailClient>,
    pub api_client: reqwest::Client,
    pub pool: PgPool,
    pub engine_settings: EngineSettings,
}

impl TestApp {
    pub fn add_user(&self) -> TestUser {
        let user = TestUser::generate();
        user.store(&self.db_connection);
        user
    }

    pub async fn post_subscriptions(&self, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/subscriptions", &self.address))
            .basic_auth(&self.test_user.email, Some(&self.test_user.password))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Creates a subscription for the test user and returns its id.
    pub async fn create_subscription(&self, body: &serde_json::Value) -> String {
        let response = self.post_subscriptions(body).await;
        assert_eq!(201, response.status().as_u16());
        let created: serde_json::Value = response.json().await.unwrap();
        created["data"]["id"].as_str().unwrap().to_owned()
    }

    pub async fn get_as(&self, user: &TestUser, path: &str) -> reqwest::Response {
        self.api_client
            .get(&format!("{}{}", &self.address, path))
            .basic_auth(&user.email, Some(&user.password))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.get_as(&self.test_user, path).await
    }

    pub async fn put(&self, path: &str, body: Option<&serde_json::Value>) -> reqwest::Response {
        let mut request = self
            .api_client
            .put(&format!("{}{}", &self.address, path))
            .basic_auth(&self.test_user.email, Some(&self.test_user.password));
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.expect("Failed to execute request.")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.api_client
            .delete(&format!("{}{}", &self.address, path))
            .basic_auth(&self.test_user.email, Some(&self.test_user.password))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_reminder_trigger(
        &self,
        body: impl Into<reqwest::Body>,
        content_type: &str,
    ) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/workflows/subscription/reminder", &self.address))
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// A reminder engine over this app's database and mailbox whose clock is
    /// stopped at `now`.
    pub fn reminder_engine(&self, now: DateTime<Utc>) -> Arc<ReminderEngine> {
        Arc::new(ReminderEngine::new(
            Arc::new(PgSubscriptionSource::new(self.pool.clone())),
            Arc::new(PgWorkflowStore::new(self.pool.clone())),
            Arc::new(EmailReminderDispatcher::new(self.email_client.clone())),
            Arc::new(FixedClock(now)),
            self.engine_settings.clone(),
        ))
    }

    pub fn workflow_row(&self, subscription_id: Uuid) -> Option<ReminderWorkflowRow> {
        reminder_workflows::table
            .find(subscription_id)
            .first::<ReminderWorkflowRow>(&self.db_connection)
            .optional()
            .expect("Failed to load the reminder workflow.")
    }

    /// Waits for the workflow started off the request path to register.
    pub async fn wait_for_workflow(&self, subscription_id: Uuid) -> ReminderWorkflowRow {
        for _ in 0..100 {
            if let Some(row) = self.workflow_row(subscription_id) {
                return row;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("No reminder workflow was registered for {}.", subscription_id);
    }

    /// Waits for the reminder workflow to hand `count` emails to the client.
    pub async fn wait_for_emails(&self, count: usize) -> Vec<SentEmail> {
        for _ in 0..100 {
            let sent = self.email_client.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        self.email_client.sent()
    }
}

pub fn subscription_body(renewal_date: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "name": "Netflix Premium",
        "price": 15.49,
        "currency": "USD",
        "frequency": "monthly",
        "category": "entertainment",
        "paymentMethod": "credit_card",
        "startDate": (renewal_date - Duration::days(30)).to_rfc3339(),
        "renewalDate": renewal_date.to_rfc3339(),
    })
}

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let configuration = {
        let mut c = get_configuration().expect("Failed to read configuration.");
        c.application.port = None;
        c.database.database_name = Uuid::new_v4().to_string();
        c.reminders.poll_interval_milliseconds = 50;
        c
    };

    let db_connection = setup_database(&configuration);
    let pool = get_connection_pool(&configuration.database);
    let engine_settings = configuration
        .reminders
        .engine_settings()
        .expect("Invalid reminder configuration.");
    let test_user = TestUser::generate();
    test_user.store(&db_connection);

    let email_client = Arc::new(MockEmailClient::default());
    let app = Application::build(&configuration, email_client.clone())
        .await
        .expect("Failed to build the application.");
    let port = app.port;
    let _ = tokio::spawn(app.server.launch());
    let port = port.get().await.expect("The server never lifted off.");

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        db_connection,
        test_user,
        email_client,
        api_client: reqwest::Client::new(),
        pool,
        engine_settings,
    }
}

fn setup_database(configuration: &Settings) -> PgConnection {
    let connection = connect_without_database(configuration);

    diesel::sql_query(format!(
        "CREATE DATABASE \"{}\"",
        configuration.database.database_name
    ))
    .execute(&connection)
    .expect("Failed to create database.");

    let connection = connect_to_database(configuration);

    diesel_migrations::run_pending_migrations(&connection).expect("Failed to migrate the database.");
    connection
}

fn connect_to_database(configuration: &Settings) -> PgConnection {
    PgConnection::establish(&configuration.database.connection_string())
        .expect("Failed to connect to Postgres.")
}

fn connect_without_database(configuration: &Settings) -> PgConnection {
    PgConnection::establish(&configuration.database.connection_string_without_database())
        .expect("Failed to connect to Postgres.")
}
