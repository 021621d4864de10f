#![allow(dead_code)]

//! In-memory cluster double shared by the integration tests
//!
//! Holds plain k8s objects in a store the tests mutate mid-flight, counts
//! API traffic per operation, and hands out scriptable tunnels.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::apps::v1::{DaemonSetSpec, DeploymentSpec, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tokio_util::sync::CancellationToken;

use fk_core::{PortPair, ResolveError};
use fk_kube::{ClusterClient, Tunnel};

// ── object builders ──────────────────────────────────────────────────────

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn pod(namespace: &str, name: &str, phase: &str, label_pairs: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(label_pairs)),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod_with_named_port(
    namespace: &str,
    name: &str,
    phase: &str,
    label_pairs: &[(&str, &str)],
    port_name: &str,
    port: i32,
) -> Pod {
    let mut p = pod(namespace, name, phase, label_pairs);
    p.spec = Some(PodSpec {
        containers: vec![Container {
            name: "main".to_string(),
            ports: Some(vec![ContainerPort {
                container_port: port,
                name: Some(port_name.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }],
        ..Default::default()
    });
    p
}

pub fn service_port(port: i32, target_port: Option<IntOrString>) -> ServicePort {
    ServicePort {
        port,
        target_port,
        ..Default::default()
    }
}

pub fn service(
    namespace: &str,
    name: &str,
    selector: &[(&str, &str)],
    ports: Vec<ServicePort>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels(selector)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn selector(match_labels: Option<&[(&str, &str)]>) -> LabelSelector {
    LabelSelector {
        match_labels: match_labels.map(labels),
        ..Default::default()
    }
}

pub fn deployment(namespace: &str, name: &str, match_labels: Option<&[(&str, &str)]>) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: selector(match_labels),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn statefulset(
    namespace: &str,
    name: &str,
    match_labels: Option<&[(&str, &str)]>,
) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            selector: selector(match_labels),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn daemonset(namespace: &str, name: &str, match_labels: Option<&[(&str, &str)]>) -> DaemonSet {
    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: selector(match_labels),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ── scriptable tunnels ───────────────────────────────────────────────────

/// What the next opened tunnel should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelScript {
    /// Become ready, then run until stopped
    HoldOpen,
    /// Fail the readiness wait
    FailReady,
    /// Become ready, then collapse immediately
    DropAfterReady,
}

pub struct MockTunnel {
    ready_outcome: Option<Result<(), ResolveError>>,
    drop_after_ready: bool,
    stop: CancellationToken,
}

#[async_trait]
impl Tunnel for MockTunnel {
    async fn wait_ready(&mut self) -> Result<(), ResolveError> {
        self.ready_outcome.take().unwrap_or(Ok(()))
    }

    async fn run(&mut self) -> Result<(), ResolveError> {
        if self.drop_after_ready {
            self.drop_after_ready = false;
            return Err(ResolveError::network_transient_msg("tunnel dropped"));
        }
        self.stop.cancelled().await;
        Ok(())
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}

/// One recorded `open_tunnel` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRecord {
    pub namespace: String,
    pub pod_name: String,
    pub ports: Vec<PortPair>,
}

// ── the cluster double ───────────────────────────────────────────────────

#[derive(Default)]
pub struct ClusterState {
    pub pods: Vec<Pod>,
    pub services: HashMap<(String, String), Service>,
    pub deployments: HashMap<(String, String), Deployment>,
    pub statefulsets: HashMap<(String, String), StatefulSet>,
    pub daemonsets: HashMap<(String, String), DaemonSet>,
}

#[derive(Default)]
pub struct MockClusterClient {
    pub state: Mutex<ClusterState>,
    pub pod_gets: AtomicUsize,
    pub pod_lists: AtomicUsize,
    pub tunnel_opens: AtomicUsize,
    pub tunnels: Mutex<Vec<TunnelRecord>>,
    scripts: Mutex<VecDeque<TunnelScript>>,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, p: Pod) {
        self.state.lock().unwrap().pods.push(p);
    }

    pub fn add_service(&self, s: Service) {
        let key = (
            s.metadata.namespace.clone().unwrap_or_default(),
            s.metadata.name.clone().unwrap_or_default(),
        );
        self.state.lock().unwrap().services.insert(key, s);
    }

    pub fn add_deployment(&self, d: Deployment) {
        let key = (
            d.metadata.namespace.clone().unwrap_or_default(),
            d.metadata.name.clone().unwrap_or_default(),
        );
        self.state.lock().unwrap().deployments.insert(key, d);
    }

    pub fn add_statefulset(&self, s: StatefulSet) {
        let key = (
            s.metadata.namespace.clone().unwrap_or_default(),
            s.metadata.name.clone().unwrap_or_default(),
        );
        self.state.lock().unwrap().statefulsets.insert(key, s);
    }

    pub fn add_daemonset(&self, d: DaemonSet) {
        let key = (
            d.metadata.namespace.clone().unwrap_or_default(),
            d.metadata.name.clone().unwrap_or_default(),
        );
        self.state.lock().unwrap().daemonsets.insert(key, d);
    }

    /// Queue behavior for upcoming tunnels; unqueued opens hold open
    pub fn script_tunnel(&self, script: TunnelScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn tunnel_records(&self) -> Vec<TunnelRecord> {
        self.tunnels.lock().unwrap().clone()
    }

    /// Tunnel opens recorded for one pod
    pub fn opens_for_pod(&self, pod_name: &str) -> usize {
        self.tunnels
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.pod_name == pod_name)
            .count()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ResolveError> {
        self.pod_gets.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .pods
            .iter()
            .find(|p| {
                p.metadata.namespace.as_deref() == Some(namespace)
                    && p.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| ResolveError::resource_not_found("pod", name))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ResolveError> {
        self.state
            .lock()
            .unwrap()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::resource_not_found("service", name))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ResolveError> {
        self.state
            .lock()
            .unwrap()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::resource_not_found("deployment", name))
    }

    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ResolveError> {
        self.state
            .lock()
            .unwrap()
            .statefulsets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::resource_not_found("statefulset", name))
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<DaemonSet, ResolveError> {
        self.state
            .lock()
            .unwrap()
            .daemonsets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::resource_not_found("daemonset", name))
    }

    async fn list_pods_by_labels(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ResolveError> {
        self.pod_lists.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| {
                let empty = BTreeMap::new();
                let pod_labels = p.metadata.labels.as_ref().unwrap_or(&empty);
                selector
                    .iter()
                    .all(|(k, v)| pod_labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn open_tunnel(
        &self,
        namespace: &str,
        pod_name: &str,
        ports: &[PortPair],
    ) -> Result<Box<dyn Tunnel>, ResolveError> {
        self.tunnel_opens.fetch_add(1, Ordering::SeqCst);
        self.tunnels.lock().unwrap().push(TunnelRecord {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            ports: ports.to_vec(),
        });

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TunnelScript::HoldOpen);

        let (ready_outcome, drop_after_ready) = match script {
            TunnelScript::HoldOpen => (Some(Ok(())), false),
            TunnelScript::DropAfterReady => (Some(Ok(())), true),
            TunnelScript::FailReady => (
                Some(Err(ResolveError::network_transient_msg(
                    "tunnel refused to become ready",
                ))),
                false,
            ),
        };

        Ok(Box::new(MockTunnel {
            ready_outcome,
            drop_after_ready,
            stop: CancellationToken::new(),
        }))
    }
}

/// Poll a condition until it holds, failing the test after a (virtual)
/// timeout. Meant for paused-clock tests where sleeps auto-advance.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(120), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for: {what}");
}
