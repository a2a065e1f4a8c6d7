//! `veadolink`: runs the peer link standalone and logs what the peer reports.
//!
//! Usage: `veadolink [CONFIG_PATH]`. Without an argument the settings file at
//! `~/.veadolink/config.json` is used, and created with defaults on first run.
//! Edits to the settings file are picked up while running.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use veado_core::{AppPaths, ConfigWatcher, ConnectionConfig, logging};
use veado_model::StateModel;
use veado_network::{Controller, ControllerSettings, ModelEvent};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init_logging(&AppPaths::logs_dir()?)?;
    info!("Starting veadolink v{VERSION}");

    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => AppPaths::config_path()?,
    };
    if !config_path.exists() {
        ConnectionConfig::default()
            .save_to_file(&config_path)
            .context("Failed to write default settings")?;
        info!("Wrote default settings to {}", config_path.display());
    }
    let config = ConnectionConfig::load_or_default(&config_path);

    let controller = Controller::new(ControllerSettings::default());
    let model = StateModel::new(controller.clone());
    let _attached = model.attach(controller.events());
    let _observer = model.subscribe({
        let model = Arc::downgrade(&model);
        move |event| report(&model, event)
    });

    let (config_tx, mut config_rx) = mpsc::unbounded_channel();
    let _config_watcher = match ConfigWatcher::new(&config_path, move |config| {
        let _ = config_tx.send(config);
    }) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Settings will not hot-reload: {e:#}");
            None
        }
    };

    controller.apply_config(config).await;

    loop {
        tokio::select! {
            Some(config) = config_rx.recv() => controller.apply_config(config).await,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl-C: {e}");
                }
                break;
            }
        }
    }

    controller.shutdown().await;
    info!("veadolink stopped");
    Ok(())
}

/// Log a model notification along with what the model now shows.
fn report(model: &Weak<StateModel>, event: &ModelEvent) {
    let Some(model) = model.upgrade() else {
        return;
    };
    match event {
        ModelEvent::Connected(true) => info!("Peer connected"),
        ModelEvent::Connected(false) => info!("Peer disconnected"),
        ModelEvent::AllStates(_) => info!("States: {}", describe(&model)),
        ModelEvent::ActiveState(state_id) => info!("Active state: {state_id}"),
        other => debug!("Model event: {other:?}"),
    }
}

/// One-line summary of every known state, e.g. `happy "Happy" [active]`.
fn describe(model: &StateModel) -> String {
    let states = model.states();
    if states.is_empty() {
        return "(none)".to_string();
    }
    states
        .iter()
        .map(|state_id| {
            let name = model.state_name(state_id).unwrap_or_default();
            let color = model.color_for(state_id);
            format!("{state_id} {name:?} [{}]", format!("{color:?}").to_lowercase())
        })
        .collect::<Vec<_>>()
        .join(", ")
}
