//! Per-forward session: the reconcile loop that keeps one forward alive

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fk_core::{ForwardSpec, ResolveError, RetryConfig};
use fk_kube::{ClusterClient, Tunnel};

use crate::resolver::Resolver;

/// How long a stopped tunnel gets to drain before the session moves on
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One supervised forward.
///
/// Owns the spawned reconcile task and the cancellation scope that stops
/// it; the supervisor holds no references into the session's internals.
pub struct ForwardSession {
    spec: Arc<ForwardSpec>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ForwardSession {
    /// Spawn the reconcile loop for a compiled spec.
    ///
    /// The session's scope is a child of `parent`, so cancelling the parent
    /// cancels every session under it.
    pub fn spawn(
        spec: ForwardSpec,
        client: Arc<dyn ClusterClient>,
        retry: RetryConfig,
        parent: &CancellationToken,
    ) -> Self {
        let spec = Arc::new(spec);
        let cancel = parent.child_token();
        let task = tokio::spawn(reconcile_loop(
            Arc::clone(&spec),
            client,
            retry,
            cancel.clone(),
        ));
        Self { spec, cancel, task }
    }

    /// The spec this session was adopted with
    pub fn spec(&self) -> &ForwardSpec {
        &self.spec
    }

    /// Request termination without waiting
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to finish, bounded by `ceiling`.
    ///
    /// A session that fails to stop within the ceiling is logged as stuck
    /// and abandoned; its task keeps whatever it holds until process exit.
    pub async fn shutdown(self, ceiling: Duration) {
        self.cancel.cancel();
        match tokio::time::timeout(ceiling, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                tracing::error!("Forward {} task failed: {}", self.spec.name, join_err);
            }
            Err(_) => {
                tracing::warn!(
                    "Forward {} is stuck; abandoning its task after {:?}",
                    self.spec.name,
                    ceiling
                );
            }
        }
    }
}

/// The session state machine.
///
/// Every failure path leads back to resolution with an incremented attempt
/// counter; the counter resets only when a tunnel reports Ready. Only
/// cancellation exits the loop.
async fn reconcile_loop(
    spec: Arc<ForwardSpec>,
    client: Arc<dyn ClusterClient>,
    retry: RetryConfig,
    cancel: CancellationToken,
) {
    let resolver = Resolver::new(Arc::clone(&client));
    let mut attempt: u32 = 0;

    tracing::info!("START - Forward {spec}");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Resolving
        let target = tokio::select! {
            _ = cancel.cancelled() => break,
            resolved = resolver.resolve(&spec) => match resolved {
                Ok(target) => target,
                Err(err) => {
                    backoff(&spec, &err, attempt, &retry, &cancel).await;
                    attempt += 1;
                    continue;
                }
            },
        };

        // Opening
        let mut tunnel = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = client.open_tunnel(&spec.namespace, &target.pod_name, &target.ports) => {
                match opened {
                    Ok(tunnel) => tunnel,
                    Err(err) => {
                        backoff(&spec, &err, attempt, &retry, &cancel).await;
                        attempt += 1;
                        continue;
                    }
                }
            },
        };

        let readiness = tokio::select! {
            _ = cancel.cancelled() => {
                drain(&mut tunnel).await;
                break;
            }
            readiness = tunnel.wait_ready() => readiness,
        };
        if let Err(err) = readiness {
            drain(&mut tunnel).await;
            backoff(&spec, &err, attempt, &retry, &cancel).await;
            attempt += 1;
            continue;
        }

        // Ready
        tracing::info!("READY - Forward {spec} -> pod {}", target.pod_name);
        attempt = 0;

        // Running until the tunnel terminates or the session is cancelled
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                drain(&mut tunnel).await;
                break;
            }
            outcome = tunnel.run() => outcome,
        };

        // Draining after the tunnel ended on its own
        drain(&mut tunnel).await;
        let err = match outcome {
            Ok(()) => ResolveError::network_transient_msg("tunnel closed"),
            Err(err) => err,
        };
        backoff(&spec, &err, attempt, &retry, &cancel).await;
        attempt += 1;
    }

    tracing::info!("STOP - Forward {spec}");
}

/// Stop the tunnel and give it a bounded window to release its resources
async fn drain(tunnel: &mut Box<dyn Tunnel>) {
    tunnel.stop();
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, tunnel.run()).await;
}

/// Log a reconcile failure at its kind's level, then sleep the backoff
/// delay unless cancelled first
async fn backoff(
    spec: &ForwardSpec,
    err: &ResolveError,
    attempt: u32,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) {
    let delay = retry.delay(attempt);

    let level = err.kind().log_level();
    if level == tracing::Level::ERROR {
        tracing::error!("ERROR - Forward {spec}: {err} (attempt {attempt}, retry in {delay:?})");
    } else if level == tracing::Level::WARN {
        tracing::warn!("ERROR - Forward {spec}: {err} (attempt {attempt}, retry in {delay:?})");
    } else if level == tracing::Level::INFO {
        tracing::info!("ERROR - Forward {spec}: {err} (attempt {attempt}, retry in {delay:?})");
    } else {
        tracing::debug!("ERROR - Forward {spec}: {err} (attempt {attempt}, retry in {delay:?})");
    }

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}
