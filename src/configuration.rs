use crate::domain::SubscriberEmail;
use crate::reminders::{EngineSettings, ReminderOffsets};
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use serde_aux::field_attributes::deserialize_option_number_from_string;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

#[derive(serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub email_client: EmailClientSettings,
    pub reminders: ReminderSettings,
}

#[derive(serde::Deserialize)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_option_number_from_string")]
    pub port: Option<u16>,
    pub host: IpAddr,
}

#[derive(serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
}

#[derive(serde::Deserialize)]
pub struct EmailClientSettings {
    pub sender_email: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

#[derive(serde::Deserialize)]
pub struct ReminderSettings {
    pub offsets_days: Vec<u32>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub poll_interval_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_dispatch_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_seconds: i64,
    #[serde(default)]
    pub recheck_status_on_wake: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub claim_lease_seconds: i64,
}

/// Upper bound for any reminder delay setting.
const MAX_DELAY_SECONDS: i64 = 7 * 24 * 60 * 60;

fn delay(name: &str, seconds: i64) -> Result<chrono::Duration, String> {
    if !(1..=MAX_DELAY_SECONDS).contains(&seconds) {
        return Err(format!(
            "{} must be between 1 and {} seconds, got {}.",
            name, MAX_DELAY_SECONDS, seconds
        ));
    }
    Ok(chrono::Duration::seconds(seconds))
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.sender_email.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

impl ReminderSettings {
    pub fn engine_settings(&self) -> Result<EngineSettings, String> {
        Ok(EngineSettings {
            offsets: ReminderOffsets::parse(self.offsets_days.clone())?,
            max_dispatch_attempts: self.max_dispatch_attempts,
            retry_backoff: delay("retry_backoff_seconds", self.retry_backoff_seconds)?,
            recheck_status_on_wake: self.recheck_status_on_wake,
            claim_lease: delay("claim_lease_seconds", self.claim_lease_seconds)?,
        })
    }

    pub fn poll_interval(&self) -> Result<Duration, String> {
        if self.poll_interval_milliseconds == 0 {
            return Err("poll_interval_milliseconds must be positive.".to_string());
        }
        Ok(Duration::from_millis(self.poll_interval_milliseconds))
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either 'local' or 'production'.",
                other
            )),
        }
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database_name,
            ssl_mode(self.require_ssl)
        )
    }

    pub fn connection_string_without_database(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}?sslmode={}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            ssl_mode(self.require_ssl)
        )
    }
}

fn ssl_mode(require_ssl: bool) -> &'static str {
    match require_ssl {
        true => "require",
        false => "prefer",
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let mut settings = config::Config::default();
    settings.merge(config::File::from(configuration_directory.join("base")).required(true))?;
    settings.merge(
        config::File::from(configuration_directory.join(environment.as_str())).required(true),
    )?;
    settings.merge(config::Environment::with_prefix("app").separator("__"))?;
    settings.try_into()
}
