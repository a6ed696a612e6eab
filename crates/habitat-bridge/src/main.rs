//! Bridge binary for habitat environmental telemetry.
//!
//! This is the main entry point that wires together the sensor hub, the
//! ingestion adapters, the broadcast loop, and the observer server. It
//! loads configuration, initializes all subsystems, and runs until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `habitat-config.yaml` (or `HABITAT_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the registry, the `WebSocket` transport, and the hub
//! 4. Start the observer server (REST, `WebSocket`, direct push)
//! 5. Start the MQTT and log-tail adapters that are enabled
//! 6. Run the broadcast loop
//! 7. On `Ctrl-C`, cancel everything and wait for the tasks to finish

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use habitat_core::config::{LogFormat, LoggingConfig};
use habitat_core::{BridgeConfig, BroadcastLoop};
use habitat_ingest::{Adapter, LogTail, MqttSettings, MqttSubscriber};
use habitat_observer::{AppState, ServerConfig, spawn_observer};
use habitat_registry::Registry;

use crate::error::BridgeError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "habitat-config.yaml";

/// Application entry point for the bridge.
///
/// # Errors
///
/// Returns an error if configuration is invalid, logging cannot be
/// installed, or the observer server cannot bind.
#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!("habitat-bridge starting");
    config.validate()?;
    info!(
        location = config.habitat.location,
        period_secs = config.broadcast.period_secs,
        history_capacity = config.registry.history_capacity,
        mqtt = config.mqtt.enabled,
        log_tail = config.log_tail.enabled,
        "Configuration loaded"
    );

    // 3. Registry, transport, and hub.
    let shutdown = CancellationToken::new();
    let registry = Registry::new(config.hab_info(), config.registry.history_capacity);
    let state = Arc::new(
        AppState::with_registry(registry, shutdown.clone())
            .with_sensor_metadata(config.sensors.clone()),
    );
    let hub = Arc::clone(&state.hub);

    // 4. Observer server.
    let server_config = ServerConfig::from(&config.observer);
    let observer = spawn_observer(&server_config, Arc::clone(&state)).await?;
    info!(
        host = server_config.host,
        port = server_config.port,
        "Observer API server started"
    );

    // 5. Ingestion adapters.
    let mut adapters: Vec<Box<dyn Adapter>> = vec![Box::new(state.direct.clone())];
    if config.mqtt.enabled {
        let settings = MqttSettings::from_config(&config.mqtt, &config.habitat.location);
        adapters.push(Box::new(MqttSubscriber::new(settings)));
    }
    if config.log_tail.enabled {
        adapters.push(Box::new(LogTail::from_config(
            &config.log_tail,
            &config.habitat.location,
        )));
    }
    let handles: Vec<_> = adapters
        .iter()
        .map(|adapter| {
            let handle = adapter.start(Arc::clone(&hub), &shutdown);
            info!(
                adapter = handle.name(),
                tasks = handle.task_count(),
                "Adapter started"
            );
            handle
        })
        .collect();

    // 6. Broadcast loop.
    let broadcast = BroadcastLoop::new(Arc::clone(&hub), config.broadcast.period());
    let broadcast_task = tokio::spawn(broadcast.run(shutdown.clone()));

    // 7. Run until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();

    join_all(handles.into_iter().map(habitat_ingest::AdapterHandle::stop)).await;

    match broadcast_task.await {
        Ok(emitted) => info!(emitted, "Broadcast loop stopped"),
        Err(e) => warn!(error = %e, "Broadcast loop ended abnormally"),
    }
    if let Err(e) = observer.await {
        warn!(error = %e, "Observer server ended abnormally");
    }

    info!("habitat-bridge shutdown complete");
    Ok(())
}

/// Load the bridge configuration.
///
/// Reads the file named by `HABITAT_CONFIG`, or `habitat-config.yaml` in
/// the working directory. A missing file means defaults; environment
/// overrides apply either way.
fn load_config() -> Result<BridgeConfig, BridgeError> {
    let path = std::env::var_os("HABITAT_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(BridgeConfig::from_file(&path)?)
    } else {
        let mut config = BridgeConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(config: &LoggingConfig) -> Result<(), BridgeError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| BridgeError::Logging {
        message: e.to_string(),
    })
}
