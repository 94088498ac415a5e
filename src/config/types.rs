//! Configuration Types

use std::path::PathBuf;
use std::time::Duration;

/// Startup configuration, populated once from the environment.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub log_json: bool,
    pub verbose: bool,
    pub location: chrono_tz::Tz,
    pub rest_port: u16,
    pub encryption_key: String,
    pub skip_database_cache: bool,
    pub enable_metrics: bool,
    pub metrics_port: u16,
    pub queue_mode: String,
    pub database_mode: String,
    pub manager_settings_path: PathBuf,
    pub api_settings_path: PathBuf,
    pub alert_channel_id: String,
    pub aws: AwsConfig,
    pub postgres: PostgresConfig,
    pub slack: SlackConfig,
    pub redis: RedisConfig,
}

/// AWS credentials and service settings.
#[derive(Debug, Clone, Default)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub assume_role: String,
    pub max_retry_attempts: u32,
    pub max_retry_backoff_delay: Duration,
    pub sqs_endpoint: String,
    pub alert_queue: SqsQueueConfig,
    pub command_queue: SqsQueueConfig,
    pub dynamodb: DynamoDbConfig,
}

/// Per-queue SQS receive settings.
#[derive(Debug, Clone)]
pub struct SqsQueueConfig {
    pub queue_name: String,
    pub visibility_timeout_seconds: i32,
    pub max_number_of_messages: i32,
    pub wait_time_seconds: i32,
}

#[derive(Debug, Clone, Default)]
pub struct DynamoDbConfig {
    pub table_name: String,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub alerts_table: String,
    pub channel_processing_state_table: String,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub app_token: String,
    pub bot_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct RedisConfig {
    pub addr: String,
    pub username: String,
    pub password: String,
    pub db: i64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            log_json: true,
            verbose: false,
            location: chrono_tz::Europe::Oslo,
            rest_port: 8080,
            encryption_key: String::new(),
            skip_database_cache: false,
            enable_metrics: true,
            metrics_port: 9090,
            queue_mode: "redis".to_string(),
            database_mode: "postgres".to_string(),
            manager_settings_path: PathBuf::from("manager-settings.yaml"),
            api_settings_path: PathBuf::from("api-settings.yaml"),
            alert_channel_id: String::new(),
            aws: AwsConfig {
                region: String::new(),
                access_key_id: String::new(),
                secret_access_key: String::new(),
                session_token: String::new(),
                assume_role: String::new(),
                max_retry_attempts: 5,
                max_retry_backoff_delay: Duration::from_secs(30),
                sqs_endpoint: String::new(),
                alert_queue: SqsQueueConfig::default(),
                command_queue: SqsQueueConfig::default(),
                dynamodb: DynamoDbConfig {
                    table_name: String::new(),
                },
            },
            postgres: PostgresConfig {
                host: String::new(),
                port: 5432,
                user: String::new(),
                password: String::new(),
                database: String::new(),
                ssl_mode: "disable".to_string(),
                alerts_table: "alerts".to_string(),
                channel_processing_state_table: "channel_processing_state".to_string(),
            },
            slack: SlackConfig {
                app_token: String::new(),
                bot_token: String::new(),
            },
            redis: RedisConfig::default(),
        }
    }
}

impl Default for SqsQueueConfig {
    fn default() -> Self {
        Self {
            queue_name: String::new(),
            visibility_timeout_seconds: 30,
            max_number_of_messages: 10,
            wait_time_seconds: 20,
        }
    }
}
