//! Reload controller: the seam between event producers and the supervisor
//!
//! The file watcher and the reload signal only emit events; this loop is
//! the single place that reloads the configuration file and applies it.
//! Duplicate events are harmless since an unchanged config diffs to an
//! empty plan.

use std::path::Path;

use tokio::sync::mpsc;

use fk_core::config::load_config;

use crate::supervisor::Supervisor;

/// Events consumed by the controller loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadEvent {
    /// The configuration should be re-read and applied
    ReloadRequested,
    /// The process should stop
    Shutdown,
}

/// Consume reload events until shutdown.
///
/// A failed reload leaves the active set untouched; the loop just waits
/// for the next event.
pub async fn run_controller(
    supervisor: &Supervisor,
    config_path: &Path,
    mut events: mpsc::UnboundedReceiver<ReloadEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = supervisor.cancel_token().cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ReloadEvent::Shutdown => break,
            ReloadEvent::ReloadRequested => match load_config(config_path) {
                Ok(config) => {
                    tracing::info!("Configuration reloaded successfully");
                    supervisor.apply(&config.forwards).await;
                }
                Err(err) => {
                    supervisor.reload_failed(config_path, &err);
                }
            },
        }
    }
}
