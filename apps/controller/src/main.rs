mod relay;
mod schedule;
mod sensor;

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use smoker_presets::{Controller, ControllerConfig, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = env::args_os().nth(1).map(PathBuf::from);
    let config = ControllerConfig::load_or_default(config_path.as_deref())
        .context("loading configuration")?;
    let resolver = config.resolver()?;

    let store = SqliteStore::open(&config.database_path, config.busy_timeout())
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let sensor = sensor::spawn_probe_listener(&config.sensor_bind, config.sensor_stale())?;
    let actuator = relay::RelayActuator::new(&config.core_relay, &config.oven_relay)?;

    info!(
        database = %config.database_path.display(),
        timezone = %config.timezone,
        interval_secs = config.tick_interval_secs,
        deadline_secs = config.tick_deadline_secs,
        "starting smoker controller"
    );
    let controller = Controller::new(store, sensor, actuator, resolver, config.tick_deadline());
    schedule::run(controller, config.tick_interval(), shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
