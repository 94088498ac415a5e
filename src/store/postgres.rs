//! PostgreSQL alert store

use super::{AlertStore, ChannelProcessingState, StoredAlert};
use crate::config::PostgresConfig;
use crate::error::{BackendError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::time::Duration;
use tracing::info;

pub struct PostgresAlertStore {
    pool: PgPool,
    alerts_table: String,
    channel_state_table: String,
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed.
fn check_identifier(name: &str) -> Result<(), BackendError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(BackendError::Connect {
            backend: "postgres",
            message: format!("invalid table name {name:?}"),
        })
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl PostgresAlertStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, BackendError> {
        check_identifier(&config.alerts_table)?;
        check_identifier(&config.channel_processing_state_table)?;

        let ssl_mode: PgSslMode = config.ssl_mode.parse().map_err(|e: sqlx::Error| BackendError::Connect {
            backend: "postgres",
            message: format!("invalid ssl mode {:?}: {e}", config.ssl_mode),
        })?;

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .ssl_mode(ssl_mode);
        if !config.user.is_empty() {
            options = options.username(&config.user);
        }
        if !config.password.is_empty() {
            options = options.password(&config.password);
        }
        if !config.database.is_empty() {
            options = options.database(&config.database);
        }

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| BackendError::Connect {
                backend: "postgres",
                message: e.to_string(),
            })?;

        info!(host = %config.host, port = config.port, database = %config.database, "Connected to PostgreSQL");

        Ok(Self {
            pool,
            alerts_table: config.alerts_table.clone(),
            channel_state_table: config.channel_processing_state_table.clone(),
        })
    }
}

#[async_trait]
impl AlertStore for PostgresAlertStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn init(&self) -> Result<(), StoreError> {
        let alerts = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                correlation_id TEXT,
                received_at TIMESTAMPTZ NOT NULL,
                body TEXT NOT NULL
            )",
            self.alerts_table
        );
        let channel_state = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                channel_id TEXT PRIMARY KEY,
                created TIMESTAMPTZ NOT NULL,
                last_processed TIMESTAMPTZ NOT NULL,
                processed_alerts BIGINT NOT NULL
            )",
            self.channel_state_table
        );

        sqlx::query(&alerts).execute(&self.pool).await.map_err(db_err)?;
        sqlx::query(&channel_state).execute(&self.pool).await.map_err(db_err)?;

        info!(
            alerts_table = %self.alerts_table,
            channel_state_table = %self.channel_state_table,
            "PostgreSQL tables ready"
        );
        Ok(())
    }

    async fn save_alert(&self, alert: &StoredAlert) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (id, channel_id, correlation_id, received_at, body)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO NOTHING",
            self.alerts_table
        );

        sqlx::query(&sql)
            .bind(&alert.id)
            .bind(&alert.channel_id)
            .bind(&alert.correlation_id)
            .bind(alert.received_at)
            .bind(&alert.body)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn channel_processing_state(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelProcessingState>, StoreError> {
        let sql = format!(
            "SELECT channel_id, created, last_processed, processed_alerts FROM {} WHERE channel_id = $1",
            self.channel_state_table
        );

        let row: Option<(String, DateTime<Utc>, DateTime<Utc>, i64)> = sqlx::query_as(&sql)
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|(channel_id, created, last_processed, processed)| ChannelProcessingState {
            channel_id,
            created,
            last_processed,
            processed_alerts: u64::try_from(processed).unwrap_or(0),
        }))
    }

    async fn save_channel_processing_state(
        &self,
        state: &ChannelProcessingState,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (channel_id, created, last_processed, processed_alerts)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (channel_id) DO UPDATE
             SET last_processed = EXCLUDED.last_processed,
                 processed_alerts = EXCLUDED.processed_alerts",
            self.channel_state_table
        );

        sqlx::query(&sql)
            .bind(&state.channel_id)
            .bind(state.created)
            .bind(state.last_processed)
            .bind(i64::try_from(state.processed_alerts).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }
}
