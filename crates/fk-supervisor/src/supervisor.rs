//! Supervisor: owns the active set and applies configuration deltas

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use fk_core::config::ForwardConfig;
use fk_core::{ForwardSpec, RetryConfig};
use fk_kube::ClusterClient;

use crate::session::ForwardSession;

/// Per-session teardown ceiling during shutdown and removals
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Returned when one or more forwards could not be constructed at startup
#[derive(Debug, Error)]
#[error("cannot start: {failed} configuration error(s) - see logs above")]
pub struct StartError {
    pub failed: usize,
}

/// The minimal change set between the running sessions and a new config
struct ChangePlan {
    removals: Vec<String>,
    restarts: Vec<ForwardSpec>,
    additions: Vec<ForwardSpec>,
}

/// Mediator around the name → session map.
///
/// Locking is private; the rest of the supervisor works through adopt,
/// remove, plan and drain. Session tasks never touch this.
#[derive(Default)]
struct ActiveSet {
    inner: Mutex<HashMap<String, ForwardSession>>,
}

impl ActiveSet {
    /// Insert a newly spawned session under its name.
    ///
    /// Adopting over a live name is a programming error in the caller's
    /// change plan; the new session is rejected so the running one is not
    /// silently replaced.
    fn adopt(&self, session: ForwardSession) -> Result<(), ForwardSession> {
        let mut map = self.inner.lock().expect("active set poisoned");
        let name = session.spec().name.clone();
        if map.contains_key(&name) {
            debug_assert!(false, "adopted duplicate forward name {name}");
            return Err(session);
        }
        map.insert(name, session);
        Ok(())
    }

    /// Take a session out of the set, if present
    fn remove(&self, name: &str) -> Option<ForwardSession> {
        self.inner.lock().expect("active set poisoned").remove(name)
    }

    /// Take every session out of the set
    fn drain(&self) -> Vec<ForwardSession> {
        let mut map = self.inner.lock().expect("active set poisoned");
        map.drain().map(|(_, session)| session).collect()
    }

    /// Names currently in the set, unordered
    fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("active set poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Diff the running sessions against a new set of compiled specs
    fn plan(&self, new_specs: &[ForwardSpec]) -> ChangePlan {
        let map = self.inner.lock().expect("active set poisoned");

        let removals = map
            .keys()
            .filter(|name| !new_specs.iter().any(|s| s.name == **name))
            .cloned()
            .collect();

        let mut restarts = Vec::new();
        let mut additions = Vec::new();
        for spec in new_specs {
            match map.get(&spec.name) {
                Some(session) if session.spec().config_changed(spec) => {
                    restarts.push(spec.clone());
                }
                Some(_) => {} // unchanged: left untouched
                None => additions.push(spec.clone()),
            }
        }

        ChangePlan {
            removals,
            restarts,
            additions,
        }
    }
}

/// Owns every running forward, the root cancellation scope and the
/// serialisation of configuration applies.
pub struct Supervisor {
    client: Arc<dyn ClusterClient>,
    retry: RetryConfig,
    root: CancellationToken,
    active: ActiveSet,
    apply_gate: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new(client: Arc<dyn ClusterClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry,
            root: CancellationToken::new(),
            active: ActiveSet::default(),
            apply_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The root cancellation scope; cancelling it cascades to every session
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Names of the currently active forwards, unordered
    pub fn active_names(&self) -> Vec<String> {
        self.active.names()
    }

    /// Spawn a session for every configured forward.
    ///
    /// Spec-time failures (bad port literal, unknown workload kind) are
    /// logged per forward and summarised in the returned error; forwards
    /// that did start keep running either way.
    pub fn start(&self, forwards: &[ForwardConfig]) -> Result<(), StartError> {
        let mut failed = 0;

        for cfg in forwards {
            match ForwardSpec::compile(cfg) {
                Ok(spec) => self.adopt(spec),
                Err(err) => {
                    tracing::error!("Cannot configure forward {}: {}", cfg.name, err);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            Err(StartError { failed })
        } else {
            Ok(())
        }
    }

    /// Apply a new configuration against the running set.
    ///
    /// Applies are serialised; within one apply, removals and the
    /// cancel-half of every restart complete before the corresponding
    /// adoption, so local port ownership transfers cleanly. Unchanged
    /// forwards are not disturbed.
    pub async fn apply(&self, forwards: &[ForwardConfig]) {
        let _gate = self.apply_gate.lock().await;

        // A reload racing shutdown must not adopt into a drained set
        if self.root.is_cancelled() {
            return;
        }

        let mut new_specs = Vec::with_capacity(forwards.len());
        for cfg in forwards {
            match ForwardSpec::compile(cfg) {
                Ok(spec) => new_specs.push(spec),
                Err(err) => {
                    tracing::error!("Skipping invalid forward {}: {}", cfg.name, err);
                }
            }
        }

        let plan = self.active.plan(&new_specs);

        for name in plan.removals {
            if let Some(session) = self.active.remove(&name) {
                session.shutdown(SESSION_SHUTDOWN_TIMEOUT).await;
                tracing::info!("Removed forward: {name}");
            }
        }

        for spec in plan.restarts {
            if let Some(session) = self.active.remove(&spec.name) {
                session.shutdown(SESSION_SHUTDOWN_TIMEOUT).await;
            }
            let name = spec.name.clone();
            self.adopt(spec);
            tracing::info!("Restarted forward: {name}");
        }

        for spec in plan.additions {
            let name = spec.name.clone();
            self.adopt(spec);
            tracing::info!("Added forward: {name}");
        }
    }

    /// A reload attempt failed upstream: keep the running set untouched
    pub fn reload_failed(&self, config_path: &std::path::Path, err: &dyn std::error::Error) {
        tracing::error!(
            "Configuration reload failed - keeping previous configuration. \
             Fix {} and try again: {}",
            config_path.display(),
            err
        );
    }

    /// Cancel the root scope and wait for every session to terminate,
    /// bounded per session. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.root.cancel();

        let sessions = self.active.drain();
        let teardowns = sessions
            .into_iter()
            .map(|session| session.shutdown(SESSION_SHUTDOWN_TIMEOUT));
        futures::future::join_all(teardowns).await;
    }

    fn adopt(&self, spec: ForwardSpec) {
        tracing::info!("Starting forward: {}", spec.name);
        let session = ForwardSession::spawn(
            spec,
            Arc::clone(&self.client),
            self.retry.clone(),
            &self.root,
        );
        if let Err(session) = self.active.adopt(session) {
            tracing::error!(
                "Duplicate forward name {} - discarding the new session",
                session.spec().name
            );
            session.cancel();
        }
    }
}
