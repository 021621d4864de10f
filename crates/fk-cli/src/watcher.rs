//! Configuration file watcher
//!
//! Watches the config file's parent directory rather than the file itself,
//! matching events by basename, so editors that save via atomic replace
//! still trigger a reload. Debouncing is unnecessary: the supervisor diffs
//! every reload, and an unchanged config diffs to nothing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use fk_supervisor::ReloadEvent;

/// Start watching the configuration file for writes.
///
/// The returned watcher must be kept alive; dropping it stops the
/// notifications.
pub fn watch_config(
    config_path: &Path,
    events: mpsc::UnboundedSender<ReloadEvent>,
) -> Result<RecommendedWatcher> {
    let file_name = config_path
        .file_name()
        .map(PathBuf::from)
        .context("configuration path has no file name")?;

    let watch_dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Config watcher error: {err}");
                return;
            }
        };

        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }

        let is_config_file = event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()));
        if !is_config_file {
            return;
        }

        tracing::info!("Config file changed, reloading");
        let _ = events.send(ReloadEvent::ReloadRequested);
    })
    .context("failed to create config file watcher")?;

    watcher
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch config directory {}", watch_dir.display()))?;

    tracing::info!("Watching config for changes: {}", config_path.display());
    Ok(watcher)
}
