//! Process signal producers
//!
//! Interrupt and termination signals become a shutdown event; on unix,
//! SIGHUP requests a config reload, mirroring the file watcher.

use tokio::sync::mpsc;

use fk_supervisor::ReloadEvent;

/// Spawn the signal listeners feeding the controller's event channel
pub fn spawn_signal_handlers(events: mpsc::UnboundedSender<ReloadEvent>) {
    let shutdown_tx = events.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        let _ = shutdown_tx.send(ReloadEvent::Shutdown);
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .expect("failed to install signal handler");
        while hangup.recv().await.is_some() {
            tracing::info!("Received SIGHUP signal, reloading config");
            if events.send(ReloadEvent::ReloadRequested).is_err() {
                break;
            }
        }
    });

    #[cfg(not(unix))]
    drop(events);
}
