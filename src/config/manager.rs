//! Configuration Manager
//!
//! Builds the [`StartupConfig`] from environment variables. Malformed values
//! fail with [`ConfigError::InvalidConfiguration`] instead of aborting.

use super::StartupConfig;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Loads and validates the startup configuration.
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from the process environment.
    pub fn load_from_env() -> Result<StartupConfig, ConfigError> {
        Self::load_from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn load_from_lookup<F>(lookup: F) -> Result<StartupConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = StartupConfig::default();

        let mut config = StartupConfig {
            log_json: env.bool("LOG_JSON", defaults.log_json)?,
            verbose: env.bool("VERBOSE", defaults.verbose)?,
            location: env.parsed("LOCATION", defaults.location, "unknown time zone")?,
            rest_port: env.port("REST_PORT", defaults.rest_port)?,
            encryption_key: env.string("ENCRYPTION_KEY", ""),
            skip_database_cache: env.bool("SKIP_DATABASE_CACHE", defaults.skip_database_cache)?,
            enable_metrics: env.bool("ENABLE_METRICS", defaults.enable_metrics)?,
            metrics_port: env.port("METRICS_PORT", defaults.metrics_port)?,
            queue_mode: env.string("QUEUE_MODE", &defaults.queue_mode),
            database_mode: env.string("DATABASE_MODE", &defaults.database_mode),
            manager_settings_path: PathBuf::from(env.string(
                "MANAGER_SETTINGS_FILENAME",
                "manager-settings.yaml",
            )),
            api_settings_path: PathBuf::from(env.string("API_SETTINGS_FILENAME", "api-settings.yaml")),
            alert_channel_id: env.string("ALERT_CHANNEL_ID", ""),
            ..defaults.clone()
        };

        let aws = &mut config.aws;
        aws.region = env.string("AWS_REGION", "");
        aws.access_key_id = env.string("AWS_ACCESS_KEY_ID", "");
        aws.secret_access_key = env.string("AWS_SECRET_ACCESS_KEY", "");
        aws.session_token = env.string("AWS_SESSION_TOKEN", "");
        aws.assume_role = env.string("AWS_ASSUME_ROLE", "");
        aws.max_retry_attempts = env.int("AWS_MAX_RETRY_ATTEMPTS", defaults.aws.max_retry_attempts)?;
        aws.max_retry_backoff_delay =
            env.seconds("AWS_MAX_RETRY_BACKOFF_DELAY", defaults.aws.max_retry_backoff_delay)?;
        aws.sqs_endpoint = env.string("AWS_SQS_ENDPOINT", "");
        aws.dynamodb.table_name = env.string("AWS_DYNAMODB_TABLE_NAME", "");

        for (prefix, queue) in [
            ("AWS_SQS_ALERT_QUEUE", &mut aws.alert_queue),
            ("AWS_SQS_COMMAND_QUEUE", &mut aws.command_queue),
        ] {
            queue.queue_name = env.string(&format!("{prefix}_NAME"), "");
            queue.visibility_timeout_seconds = env.int(
                &format!("{prefix}_VISIBILITY_TIMEOUT_SECONDS"),
                queue.visibility_timeout_seconds,
            )?;
            queue.max_number_of_messages = env.int(
                &format!("{prefix}_MAX_NUMBER_OF_MESSAGES"),
                queue.max_number_of_messages,
            )?;
            queue.wait_time_seconds =
                env.int(&format!("{prefix}_WAIT_TIME_SECONDS"), queue.wait_time_seconds)?;
        }

        let pg = &mut config.postgres;
        pg.host = env.string("POSTGRES_HOST", "");
        // 0 means "driver default", matching the Postgres convention.
        pg.port = match env.int::<u16>("POSTGRES_PORT", 0)? {
            0 => defaults.postgres.port,
            port => port,
        };
        pg.user = env.string("POSTGRES_USER", "");
        pg.password = env.string("POSTGRES_PASSWORD", "");
        pg.database = env.string("POSTGRES_DATABASE", "");
        pg.ssl_mode = env.string("POSTGRES_SSL_MODE", &defaults.postgres.ssl_mode);
        pg.alerts_table = env.string("POSTGRES_ALERTS_TABLE", &defaults.postgres.alerts_table);
        pg.channel_processing_state_table = env.string(
            "POSTGRES_CHANNEL_PROCESSING_STATE_TABLE",
            &defaults.postgres.channel_processing_state_table,
        );

        config.slack.app_token = env.string("SLACK_APP_TOKEN", "");
        config.slack.bot_token = env.string("SLACK_BOT_TOKEN", "");

        config.redis.addr = env.string("REDIS_ADDR", "");
        config.redis.username = env.string("REDIS_USERNAME", "");
        config.redis.password = env.string("REDIS_PASSWORD", "");
        config.redis.db = env.int("REDIS_DB", 0)?;

        config.validate()?;
        Ok(config)
    }
}

impl StartupConfig {
    /// Validate cross-field constraints not covered by parsing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.encryption_key.is_empty() && self.encryption_key.len() != 32 {
            return Err(ConfigError::invalid(
                "ENCRYPTION_KEY",
                "<redacted>",
                format!("must be exactly 32 characters, got {}", self.encryption_key.len()),
            ));
        }

        if self.enable_metrics && self.metrics_port == self.rest_port {
            return Err(ConfigError::invalid(
                "METRICS_PORT",
                self.metrics_port.to_string(),
                "must differ from REST_PORT",
            ));
        }

        let valid_ssl_modes = ["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];
        if !valid_ssl_modes.contains(&self.postgres.ssl_mode.as_str()) {
            return Err(ConfigError::invalid(
                "POSTGRES_SSL_MODE",
                &self.postgres.ssl_mode,
                format!("must be one of: {}", valid_ssl_modes.join(", ")),
            ));
        }

        for (key, queue) in [
            ("AWS_SQS_ALERT_QUEUE", &self.aws.alert_queue),
            ("AWS_SQS_COMMAND_QUEUE", &self.aws.command_queue),
        ] {
            if !(1..=10).contains(&queue.max_number_of_messages) {
                return Err(ConfigError::invalid(
                    format!("{key}_MAX_NUMBER_OF_MESSAGES"),
                    queue.max_number_of_messages.to_string(),
                    "must be between 1 and 10",
                ));
            }
            if !(0..=20).contains(&queue.wait_time_seconds) {
                return Err(ConfigError::invalid(
                    format!("{key}_WAIT_TIME_SECONDS"),
                    queue.wait_time_seconds.to_string(),
                    "must be between 0 and 20",
                ));
            }
        }

        Ok(())
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// String values keep an explicitly empty setting.
    fn string(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    /// Non-string values treat empty as unset.
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.non_empty(key) {
            Some(value) => parse_bool(&value)
                .ok_or_else(|| ConfigError::invalid(key, &value, "not a boolean")),
            None => Ok(default),
        }
    }

    fn int<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.non_empty(key) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::invalid(key, &value, "not a valid integer")),
            None => Ok(default),
        }
    }

    fn port(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        let port = self.int(key, default)?;
        if port == 0 {
            return Err(ConfigError::invalid(key, "0", "port must be greater than 0"));
        }
        Ok(port)
    }

    /// Plain integers are seconds; humantime strings such as `1m30s` are also accepted.
    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.non_empty(key) {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) => Ok(Duration::from_secs(secs)),
                Err(_) => humantime::parse_duration(value.trim())
                    .map_err(|e| ConfigError::invalid(key, &value, e.to_string())),
            },
            None => Ok(default),
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T, reason: &str) -> Result<T, ConfigError> {
        match self.non_empty(key) {
            Some(value) => value
                .parse::<T>()
                .map_err(|_| ConfigError::invalid(key, &value, reason)),
            None => Ok(default),
        }
    }
}

/// Accepts the same spellings as Go's `strconv.ParseBool`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
