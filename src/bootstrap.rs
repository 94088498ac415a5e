//! Host Bootstrap
//!
//! Turns a [`StartupConfig`] into running parts: backend clients picked by
//! `QUEUE_MODE` / `DATABASE_MODE`, the initial settings documents, and the
//! two services plus the settings refresher and metrics endpoint.

use crate::api::ApiServer;
use crate::aws;
use crate::config::{RedisConfig, StartupConfig};
use crate::error::{BackendError, ConfigError, SettingsError};
use crate::locker::{ChannelLocker, NoopChannelLocker, RedisChannelLocker};
use crate::manager::{self, AlertManager, ManagerBackends, ManagerOptions};
use crate::metrics::{Metrics, MetricsServer};
use crate::queue::{FifoQueue, InMemoryFifoQueue, QueueKind, RedisFifoQueue, SqsFifoQueue};
use crate::routing::RoutingRules;
use crate::settings::{
    read_settings, ApiSettings, Fingerprint, ManagerSettings, RoutingRule, SettingsKind, SettingsRefresher,
    WatchedSettings,
};
use crate::store::{AlertStore, DatabaseKind, DynamoDbAlertStore, InMemoryAlertStore, PostgresAlertStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use url::Url;

pub const ALERT_QUEUE_NAME: &str = "alerts";
pub const COMMAND_QUEUE_NAME: &str = "commands";

/// Build the connection URL for the configured Redis server.
pub fn redis_url(config: &RedisConfig) -> Result<Url, BackendError> {
    let addr = config.addr.trim();
    if addr.is_empty() {
        return Err(BackendError::MissingParameter {
            backend: "redis",
            parameter: "REDIS_ADDR",
        });
    }

    let invalid = |message: String| BackendError::Connect {
        backend: "redis",
        message,
    };

    let mut url = Url::parse(&format!("redis://{addr}")).map_err(|e| invalid(format!("invalid REDIS_ADDR {addr:?}: {e}")))?;
    if !config.username.is_empty() {
        url.set_username(&config.username)
            .map_err(|_| invalid("REDIS_USERNAME cannot be used in a URL".to_string()))?;
    }
    if !config.password.is_empty() {
        url.set_password(Some(&config.password))
            .map_err(|_| invalid("REDIS_PASSWORD cannot be used in a URL".to_string()))?;
    }
    url.set_path(&config.db.to_string());

    Ok(url)
}

pub fn redis_client(config: &RedisConfig) -> Result<redis::Client, BackendError> {
    let url = redis_url(config)?;
    redis::Client::open(url.as_str()).map_err(|e| BackendError::Connect {
        backend: "redis",
        message: e.to_string(),
    })
}

async fn redis_locker(client: &redis::Client) -> Result<Arc<dyn ChannelLocker>, BackendError> {
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| BackendError::Connect {
            backend: "redis",
            message: e.to_string(),
        })?;
    Ok(Arc::new(RedisChannelLocker::new(conn)))
}

fn require(backend: &'static str, parameter: &'static str, value: &str) -> Result<(), BackendError> {
    if value.trim().is_empty() {
        Err(BackendError::MissingParameter { backend, parameter })
    } else {
        Ok(())
    }
}

/// Construct the queues, store and channel locker selected by configuration.
///
/// The Redis locker is used whenever a Redis server is configured; without
/// one every instance is assumed to be alone and the no-op locker is used.
pub async fn build_backends(config: &StartupConfig) -> Result<ManagerBackends, BackendError> {
    let queue_kind: QueueKind = config.queue_mode.parse()?;
    let database_kind: DatabaseKind = config.database_mode.parse()?;

    let redis = if queue_kind == QueueKind::Redis || !config.redis.addr.trim().is_empty() {
        Some(redis_client(&config.redis)?)
    } else {
        None
    };

    let (alert_queue, command_queue): (Arc<dyn FifoQueue>, Arc<dyn FifoQueue>) = match queue_kind {
        QueueKind::InMemory => (
            Arc::new(InMemoryFifoQueue::with_defaults(ALERT_QUEUE_NAME)),
            Arc::new(InMemoryFifoQueue::with_defaults(COMMAND_QUEUE_NAME)),
        ),
        QueueKind::Redis => {
            let client = redis.as_ref().ok_or(BackendError::MissingParameter {
                backend: "redis",
                parameter: "REDIS_ADDR",
            })?;
            (
                Arc::new(RedisFifoQueue::connect(client, ALERT_QUEUE_NAME).await?),
                Arc::new(RedisFifoQueue::connect(client, COMMAND_QUEUE_NAME).await?),
            )
        }
        QueueKind::Sqs => {
            require("sqs", "AWS_SQS_ALERT_QUEUE_NAME", &config.aws.alert_queue.queue_name)?;
            require("sqs", "AWS_SQS_COMMAND_QUEUE_NAME", &config.aws.command_queue.queue_name)?;
            let sdk_config = aws::load_sdk_config(&config.aws).await?;
            let client = aws::sqs_client(&sdk_config, &config.aws);
            (
                Arc::new(SqsFifoQueue::connect(client.clone(), config.aws.alert_queue.clone()).await?),
                Arc::new(SqsFifoQueue::connect(client, config.aws.command_queue.clone()).await?),
            )
        }
    };

    let store: Arc<dyn AlertStore> = match database_kind {
        DatabaseKind::InMemory => Arc::new(InMemoryAlertStore::new()),
        DatabaseKind::Postgres => {
            require("postgres", "POSTGRES_HOST", &config.postgres.host)?;
            Arc::new(PostgresAlertStore::connect(&config.postgres).await?)
        }
        DatabaseKind::DynamoDb => {
            require("dynamodb", "AWS_DYNAMODB_TABLE_NAME", &config.aws.dynamodb.table_name)?;
            let sdk_config = aws::load_sdk_config(&config.aws).await?;
            let store = DynamoDbAlertStore::new(aws::dynamodb_client(&sdk_config), &config.aws.dynamodb.table_name);
            store.verify().await?;
            Arc::new(store)
        }
    };

    let locker: Arc<dyn ChannelLocker> = match &redis {
        Some(client) => redis_locker(client).await?,
        None => Arc::new(NoopChannelLocker),
    };

    info!(
        queue = %queue_kind,
        database = %database_kind,
        locker = locker.name(),
        "Backends ready"
    );

    Ok(ManagerBackends {
        alert_queue,
        command_queue,
        store,
        locker,
    })
}

/// In-memory queues and store with the no-op locker.
pub fn minimal_backends() -> ManagerBackends {
    ManagerBackends {
        alert_queue: Arc::new(InMemoryFifoQueue::with_defaults(ALERT_QUEUE_NAME)),
        command_queue: Arc::new(InMemoryFifoQueue::with_defaults(COMMAND_QUEUE_NAME)),
        store: Arc::new(InMemoryAlertStore::new()),
        locker: Arc::new(NoopChannelLocker),
    }
}

/// Both settings documents as read at startup.
#[derive(Debug, Clone)]
pub struct InitialSettings {
    pub manager: ManagerSettings,
    pub manager_fingerprint: Fingerprint,
    pub api: ApiSettings,
    pub api_fingerprint: Fingerprint,
}

/// Read both settings files. Any failure here is fatal.
pub fn load_initial_settings(config: &StartupConfig) -> Result<InitialSettings, SettingsError> {
    let (manager, manager_fingerprint) = read_settings::<ManagerSettings>(&config.manager_settings_path)?;
    info!(path = %config.manager_settings_path.display(), "Manager settings loaded");

    let (api, api_fingerprint) = read_settings::<ApiSettings>(&config.api_settings_path)?;
    info!(
        path = %config.api_settings_path.display(),
        rules = api.routing_rules.len(),
        "API settings loaded"
    );

    Ok(InitialSettings {
        manager,
        manager_fingerprint,
        api,
        api_fingerprint,
    })
}

/// Check configuration and both settings documents without connecting to
/// any backend.
pub fn check(config: &StartupConfig) -> crate::Result<InitialSettings> {
    let _: QueueKind = config.queue_mode.parse()?;
    let _: DatabaseKind = config.database_mode.parse()?;

    let settings = load_initial_settings(config)?;
    RoutingRules::from_settings(&settings.api)?;
    manager::validate_settings(&settings.manager)?;
    Ok(settings)
}

/// Settings used by `--minimal`: default manager settings and a single
/// catch-all rule sending everything to `ALERT_CHANNEL_ID`.
pub fn minimal_settings(config: &StartupConfig) -> Result<(ManagerSettings, ApiSettings), ConfigError> {
    if config.alert_channel_id.trim().is_empty() {
        return Err(ConfigError::MissingParameter {
            key: "ALERT_CHANNEL_ID",
            reason: "required by --minimal".to_string(),
        });
    }

    let api = ApiSettings {
        routing_rules: vec![RoutingRule::match_all("all", config.alert_channel_id.trim())],
    };
    Ok((ManagerSettings::default(), api))
}

/// Everything `main` hands to the supervisor.
pub struct Host {
    pub metrics: Arc<Metrics>,
    pub api: Arc<ApiServer>,
    pub manager: Arc<AlertManager>,
    /// Absent in minimal mode.
    pub refresher: Option<SettingsRefresher>,
    /// Absent when metrics are disabled.
    pub metrics_server: Option<MetricsServer>,
}

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

fn manager_options(config: &StartupConfig) -> ManagerOptions {
    ManagerOptions {
        skip_database_cache: config.skip_database_cache,
        location: config.location,
        ..ManagerOptions::default()
    }
}

/// Build the full host from configuration.
pub async fn build_host(config: &StartupConfig) -> crate::Result<Host> {
    let settings = load_initial_settings(config)?;
    let backends = build_backends(config).await?;
    assemble(config, backends, settings.manager, settings.api, |metrics, manager, api| {
        let manager = WatchedSettings::new(
            SettingsKind::Manager,
            config.manager_settings_path.clone(),
            settings.manager_fingerprint,
            manager,
        );
        let api = WatchedSettings::new(
            SettingsKind::Api,
            config.api_settings_path.clone(),
            settings.api_fingerprint,
            api,
        );
        Some(SettingsRefresher::new(manager, api, metrics))
    })
}

/// Build the host on in-memory backends without settings files.
pub fn build_minimal_host(config: &StartupConfig) -> crate::Result<Host> {
    let (manager, api) = minimal_settings(config)?;
    info!(channel = %config.alert_channel_id, "Starting in minimal mode");
    assemble(config, minimal_backends(), manager, api, |_, _, _| None)
}

fn assemble<F>(
    config: &StartupConfig,
    backends: ManagerBackends,
    manager_settings: ManagerSettings,
    api_settings: ApiSettings,
    refresher: F,
) -> crate::Result<Host>
where
    F: FnOnce(Arc<Metrics>, Arc<AlertManager>, Arc<ApiServer>) -> Option<SettingsRefresher>,
{
    let metrics = Arc::new(if config.enable_metrics {
        Metrics::new()
    } else {
        Metrics::disabled()
    });

    let alert_queue = Arc::clone(&backends.alert_queue);
    let manager = Arc::new(AlertManager::new(
        manager_settings,
        backends,
        Arc::clone(&metrics),
        manager_options(config),
    )?);
    let api = Arc::new(ApiServer::new(
        any_addr(config.rest_port),
        &api_settings,
        alert_queue,
        Arc::clone(&metrics),
    )?);

    let refresher = refresher(Arc::clone(&metrics), Arc::clone(&manager), Arc::clone(&api));
    let metrics_server = config
        .enable_metrics
        .then(|| MetricsServer::new(Arc::clone(&metrics), any_addr(config.metrics_port)));

    Ok(Host {
        metrics,
        api,
        manager,
        refresher,
        metrics_server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_config(addr: &str) -> RedisConfig {
        RedisConfig {
            addr: addr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_redis_url() {
        let url = redis_url(&redis_config("localhost:6379")).unwrap();
        assert_eq!(url.as_str(), "redis://localhost:6379/0");

        let url = redis_url(&RedisConfig {
            addr: "cache:6380".to_string(),
            username: "host".to_string(),
            password: "p@ss".to_string(),
            db: 3,
        })
        .unwrap();
        assert_eq!(url.username(), "host");
        assert_eq!(url.password(), Some("p%40ss"));
        assert_eq!(url.path(), "/3");
    }

    #[test]
    fn test_redis_addr_required() {
        let err = redis_url(&redis_config("  ")).unwrap_err();
        assert!(matches!(
            err,
            BackendError::MissingParameter {
                backend: "redis",
                parameter: "REDIS_ADDR"
            }
        ));
    }

    #[tokio::test]
    async fn test_in_memory_backends() {
        let config = StartupConfig {
            queue_mode: "in-memory".to_string(),
            database_mode: "in-memory".to_string(),
            ..Default::default()
        };
        let backends = build_backends(&config).await.unwrap();
        assert_eq!(backends.alert_queue.name(), ALERT_QUEUE_NAME);
        assert_eq!(backends.command_queue.name(), COMMAND_QUEUE_NAME);
        assert_eq!(backends.store.name(), "in-memory");
        assert_eq!(backends.locker.name(), "noop");
    }

    #[tokio::test]
    async fn test_unknown_modes() {
        let config = StartupConfig {
            queue_mode: "kafka".to_string(),
            ..Default::default()
        };
        let err = build_backends(&config).await.err().unwrap();
        assert!(matches!(err, BackendError::UnknownBackendKind { kind: "queue", .. }));

        let config = StartupConfig {
            queue_mode: "in-memory".to_string(),
            database_mode: "mongo".to_string(),
            ..Default::default()
        };
        let err = build_backends(&config).await.err().unwrap();
        assert!(matches!(err, BackendError::UnknownBackendKind { kind: "database", .. }));
    }

    #[tokio::test]
    async fn test_missing_backend_parameters() {
        let config = StartupConfig {
            queue_mode: "redis".to_string(),
            database_mode: "in-memory".to_string(),
            ..Default::default()
        };
        let err = build_backends(&config).await.err().unwrap();
        assert!(matches!(err, BackendError::MissingParameter { parameter: "REDIS_ADDR", .. }));

        let config = StartupConfig {
            queue_mode: "sqs".to_string(),
            database_mode: "in-memory".to_string(),
            ..Default::default()
        };
        let err = build_backends(&config).await.err().unwrap();
        assert!(matches!(
            err,
            BackendError::MissingParameter {
                parameter: "AWS_SQS_ALERT_QUEUE_NAME",
                ..
            }
        ));

        let config = StartupConfig {
            queue_mode: "in-memory".to_string(),
            database_mode: "postgres".to_string(),
            ..Default::default()
        };
        let err = build_backends(&config).await.err().unwrap();
        assert!(matches!(err, BackendError::MissingParameter { parameter: "POSTGRES_HOST", .. }));

        let config = StartupConfig {
            queue_mode: "in-memory".to_string(),
            database_mode: "dynamodb".to_string(),
            ..Default::default()
        };
        let err = build_backends(&config).await.err().unwrap();
        assert!(matches!(
            err,
            BackendError::MissingParameter {
                parameter: "AWS_DYNAMODB_TABLE_NAME",
                ..
            }
        ));
    }

    #[test]
    fn test_minimal_settings() {
        let config = StartupConfig {
            alert_channel_id: "C123".to_string(),
            ..Default::default()
        };
        let (manager, api) = minimal_settings(&config).unwrap();
        assert_eq!(manager, ManagerSettings::default());
        assert_eq!(api.routing_rules.len(), 1);
        assert!(api.routing_rules[0].match_all);
        assert_eq!(api.routing_rules[0].channel, "C123");

        let err = minimal_settings(&StartupConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter { key: "ALERT_CHANNEL_ID", .. }));
    }

    #[test]
    fn test_minimal_host_has_no_refresher() {
        let config = StartupConfig {
            alert_channel_id: "C123".to_string(),
            enable_metrics: false,
            ..Default::default()
        };
        let host = build_minimal_host(&config).unwrap();
        assert!(host.refresher.is_none());
        assert!(host.metrics_server.is_none());
        assert_eq!(host.api.routing_rules().channel_for("anything"), Some("C123"));
    }

    #[test]
    fn test_check_rejects_invalid_routing_rules() {
        let dir = tempfile::tempdir().unwrap();
        let manager_path = dir.path().join("manager.yaml");
        let api_path = dir.path().join("api.yaml");
        std::fs::write(&manager_path, "adminUsers: [U1]\n").unwrap();
        std::fs::write(&api_path, "routingRules:\n  - name: broken\n    channel: C1\n").unwrap();

        let config = StartupConfig {
            manager_settings_path: manager_path,
            api_settings_path: api_path.clone(),
            ..Default::default()
        };
        let err = check(&config).err().unwrap();
        assert!(matches!(err, crate::Error::Service(_)));

        std::fs::write(&api_path, "routingRules:\n  - name: all\n    matchAll: true\n    channel: C1\n").unwrap();
        let settings = check(&config).unwrap();
        assert_eq!(settings.manager.admin_users, vec!["U1".to_string()]);
        assert_eq!(settings.api.routing_rules.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_settings_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = StartupConfig {
            queue_mode: "in-memory".to_string(),
            database_mode: "in-memory".to_string(),
            manager_settings_path: dir.path().join("manager.yaml"),
            api_settings_path: dir.path().join("api.yaml"),
            ..Default::default()
        };
        let err = build_host(&config).await.err().unwrap();
        assert!(matches!(err, crate::Error::Settings(SettingsError::Read { .. })));
    }
}
