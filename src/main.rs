//! globe-hotkey-daemon: global hotkey capture for push-to-talk recording
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Global hotkey detection via CGEventTap (listen-only)
//! - Bare modifier (fn/globe, ⌘, ⌥, ⇧, ⌃) hold detection and combo toggles
//! - Persisted hotkey configuration with in-place capture of new combos
//! - IPC server for the UI and for trigger subscribers
//!
//! What a trigger starts or stops (audio capture, transcription) lives in
//! the subscribing client, not here.

mod classifier;
mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod session;
mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::classifier::CONFIRM_DELAY;
use crate::config::Config;
use crate::events::Trigger;
use crate::hotkey::{platform_source, AccessibilityPermission, Hotkey};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::session::EventTapSession;
use crate::settings::SettingsStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "globe-hotkey-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.settings_path, "configuration loaded");

    // Register signal handlers before anything long-running starts
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    let store = SettingsStore::new(&config.settings_path);
    let hotkey = Hotkey::load(&store);
    info!(%hotkey, confirm_delay_ms = CONFIRM_DELAY.as_millis() as u64, "hotkey loaded");

    // Session -> IPC subscribers
    let (trigger_tx, _trigger_rx) = broadcast::channel::<Trigger>(64);

    let on_trigger = {
        let trigger_tx = trigger_tx.clone();
        Arc::new(move |trigger: Trigger| {
            info!(%trigger, "hotkey trigger");
            // No subscribers is not an error
            let _ = trigger_tx.send(trigger);
        })
    };

    let session = Arc::new(EventTapSession::new(
        hotkey,
        platform_source(),
        Arc::new(AccessibilityPermission),
        on_trigger,
    ));

    if !session.start_async(false).await {
        warn!("not listening yet - grant Accessibility permission to enable the hotkey");
    }

    let server = Server::new(&config.socket_path, Arc::clone(&session), store, trigger_tx)?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Start listening once permission shows up
        _ = watch_permission(&session, &config) => {}

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    session.stop_async().await;
    server.shutdown().await;

    info!("globe-hotkey-daemon stopped");

    Ok(())
}

/// Poll accessibility permission and keep the tap in step with it
///
/// Permission is granted or revoked in System Settings while the daemon
/// runs, and nothing notifies us of the change.
async fn watch_permission(session: &Arc<EventTapSession>, config: &Config) {
    let mut interval = tokio::time::interval(config.permission_poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        session.sync_with_permission_async().await;
    }
}
