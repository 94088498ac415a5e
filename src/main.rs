//! Alert Host
//!
//! Runs the alert API server and the alert manager against the configured
//! backends, reloading their settings files while running.

use clap::Parser;
use tracing::{error, info};

use alert_host::{
    bootstrap, logging,
    supervisor::{catch_panics, catch_panics_sync, exit_code, install_panic_hook},
    ConfigManager, Error, ShutdownCoordinator, StartupConfig, Supervisor,
};

/// CLI arguments for the alert host
#[derive(Parser, Debug)]
#[command(name = "alert-host")]
#[command(about = "Alert host with hot-reloaded API and manager settings")]
#[command(version)]
#[command(long_about = "
Alert host

Accepts alerts over HTTP, routes them to channels using the API settings
file and processes them from the alert queue using the manager settings
file. Both settings files are re-read periodically and applied without a
restart.

All configuration is read from environment variables, for example:
  QUEUE_MODE                 - redis, sqs or in-memory
  DATABASE_MODE              - postgres, dynamodb or in-memory
  MANAGER_SETTINGS_FILENAME  - manager settings YAML file
  API_SETTINGS_FILENAME      - API settings YAML file
  REST_PORT / METRICS_PORT   - listening ports
  RUST_LOG                   - log filter, overrides VERBOSE
")]
pub struct CliArgs {
    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and settings files, then exit
    #[arg(long, help = "Validate configuration and settings files and exit")]
    pub validate_config: bool,

    /// Run on in-memory backends, routing every alert to ALERT_CHANNEL_ID
    #[arg(long, help = "Run with in-memory backends and a single catch-all route")]
    pub minimal: bool,
}

fn main() {
    let args = CliArgs::parse();
    install_panic_hook();

    // A panic anywhere in startup or shutdown still exits with status 1.
    // The panic hook has already reported it on stderr.
    let result = catch_panics_sync(|| start(&args));
    std::process::exit(exit_code(&result));
}

fn start(args: &CliArgs) -> alert_host::Result<()> {
    let config = ConfigManager::load_from_env().map(|mut config| {
        config.verbose |= args.verbose;
        config
    });

    // Startup configuration errors are still logged in the default format.
    let dispatch = match &config {
        Ok(config) => logging::build_dispatch(config),
        Err(_) => logging::build_dispatch(&StartupConfig::default()),
    };
    let _guard = tracing::dispatcher::set_default(&dispatch);

    let result = config.map_err(Error::from).and_then(|config| run(args, config));

    match &result {
        Ok(()) => info!("Alert host stopped"),
        Err(e) if e.is_cancelled() => info!("Alert host stopped after shutdown"),
        Err(e) => error!(error = %e, "Alert host failed"),
    }
    result
}

fn run(args: &CliArgs, config: StartupConfig) -> alert_host::Result<()> {
    if args.validate_config {
        return validate(&config, args.minimal);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::task("runtime", e))?;

    runtime.block_on(catch_panics(serve(config, args.minimal)))
}

fn validate(config: &StartupConfig, minimal: bool) -> alert_host::Result<()> {
    if minimal {
        bootstrap::minimal_settings(config)?;
        info!(channel = %config.alert_channel_id, "Configuration is valid (minimal mode)");
        return Ok(());
    }

    let settings = bootstrap::check(config)?;
    info!(
        queue = %config.queue_mode,
        database = %config.database_mode,
        routing_rules = settings.api.routing_rules.len(),
        admin_users = settings.manager.admin_users.len(),
        "Configuration is valid"
    );
    Ok(())
}

async fn serve(config: StartupConfig, minimal: bool) -> alert_host::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        queue = %config.queue_mode,
        database = %config.database_mode,
        location = %config.location,
        minimal,
        "Starting alert host"
    );

    let host = if minimal {
        bootstrap::build_minimal_host(&config)?
    } else {
        bootstrap::build_host(&config).await?
    };

    let coordinator = ShutdownCoordinator::new();
    let mut supervisor = Supervisor::new(coordinator.clone());

    supervisor.spawn_service(host.api);
    supervisor.spawn_service(host.manager);

    if let Some(refresher) = host.refresher {
        supervisor.spawn("settings-refresher", refresher.run(coordinator.token()));
    } else {
        info!("Settings hot-reload disabled");
    }

    if let Some(server) = host.metrics_server {
        supervisor.spawn_auxiliary("metrics-server", server.run(coordinator.token()));
    }

    info!(rest_port = config.rest_port, "Alert host started");
    supervisor.run().await
}
