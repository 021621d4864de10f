//! Capability traits at the cluster seam

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};

use fk_core::{PortPair, ResolveError};

/// Read access to the cluster plus the ability to open tunnels.
///
/// Shared by every session; implementations must be safe to invoke
/// concurrently. All errors come back already classified.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a pod by name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ResolveError>;

    /// Fetch a service by name
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ResolveError>;

    /// Fetch a deployment by name
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Deployment, ResolveError>;

    /// Fetch a statefulset by name
    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ResolveError>;

    /// Fetch a daemonset by name
    async fn get_daemonset(&self, namespace: &str, name: &str)
        -> Result<DaemonSet, ResolveError>;

    /// List pods whose labels satisfy the given equality selector.
    ///
    /// An empty selector matches every pod in the namespace. The returned
    /// order is whatever the API server produced.
    async fn list_pods_by_labels(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ResolveError>;

    /// Open a port-forward tunnel to a concrete pod
    async fn open_tunnel(
        &self,
        namespace: &str,
        pod_name: &str,
        ports: &[PortPair],
    ) -> Result<Box<dyn Tunnel>, ResolveError>;
}

/// One active port-forward tunnel.
///
/// The contract mirrors the three channels of a port-forward dialer:
/// a one-shot readiness signal, a run-to-completion future, and a stop
/// trigger. Stopping must resolve `run` within a bounded time, and
/// dropping the tunnel releases its listening sockets.
#[async_trait]
pub trait Tunnel: Send {
    /// Wait until the local sockets are bound and the pod has accepted a
    /// port-forward. Completes at most once with the outcome; later calls
    /// return Ok immediately.
    async fn wait_ready(&mut self) -> Result<(), ResolveError>;

    /// Wait until the tunnel terminates: `Err` when it collapsed underneath
    /// us, `Ok` when it was stopped. May be polled again after a stop to
    /// drain outstanding work.
    async fn run(&mut self) -> Result<(), ResolveError>;

    /// Request termination. Idempotent.
    fn stop(&self);
}
