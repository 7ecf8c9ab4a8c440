use crate::error::ConfigError;
use std::{env, fmt::Display, str::FromStr, time::Duration};

/// Width of the name and label columns in the PostgreSQL schema.
pub const MAX_TEXT_COLUMN: usize = 255;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Unset means polls live in process memory.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Snapshots buffered per live subscriber before it is dropped.
    pub subscriber_buffer: usize,
    pub feed_capacity: usize,
    pub recent_limit_default: usize,
    pub recent_limit_max: usize,
    pub max_name_len: usize,
    pub max_option_len: usize,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    /// How long archived polls stay fetchable by id. `None` keeps them forever.
    pub archive_retention: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            db_max_connections: 20,
            subscriber_buffer: 64,
            feed_capacity: 100,
            recent_limit_default: 10,
            recent_limit_max: 50,
            max_name_len: 120,
            max_option_len: 80,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(50),
            archive_retention: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            port: try_load("PORT", defaults.port)?,
            database_url: var("DATABASE_URL"),
            db_max_connections: try_load("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            subscriber_buffer: try_load("SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
            feed_capacity: try_load("FEED_CAPACITY", defaults.feed_capacity)?,
            recent_limit_default: try_load("RECENT_LIMIT_DEFAULT", defaults.recent_limit_default)?,
            recent_limit_max: try_load("RECENT_LIMIT_MAX", defaults.recent_limit_max)?,
            max_name_len: try_load("MAX_NAME_LEN", defaults.max_name_len)?,
            max_option_len: try_load("MAX_OPTION_LEN", defaults.max_option_len)?,
            retry_attempts: try_load("RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_base_delay: match var("RETRY_BASE_MS") {
                Some(raw) => Duration::from_millis(parse("RETRY_BASE_MS", &raw)?),
                None => defaults.retry_base_delay,
            },
            archive_retention: var("ARCHIVE_RETENTION_SECS")
                .map(|raw| parse::<u64>("ARCHIVE_RETENTION_SECS", &raw))
                .transpose()?
                .map(Duration::from_secs),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("SUBSCRIBER_BUFFER", self.subscriber_buffer),
            ("FEED_CAPACITY", self.feed_capacity),
            ("RECENT_LIMIT_MAX", self.recent_limit_max),
            ("MAX_NAME_LEN", self.max_name_len),
            ("MAX_OPTION_LEN", self.max_option_len),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        for (key, value) in [
            ("MAX_NAME_LEN", self.max_name_len),
            ("MAX_OPTION_LEN", self.max_option_len),
        ] {
            if value > MAX_TEXT_COLUMN {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be at most {MAX_TEXT_COLUMN}"),
                });
            }
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRY_ATTEMPTS",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn try_load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => parse(key, &raw),
        None => {
            debug!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}
