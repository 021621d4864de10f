//! Resolution of resource references to concrete pods and ports

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use fk_core::{ForwardSpec, PortPair, ResolveError, ResolvedTarget, ResourceRef};
use fk_kube::ClusterClient;

/// Maps a forward's resource reference to a running pod and the concrete
/// port pairs to open. Stateless; every invocation queries the cluster
/// afresh so a new pod is picked up after a restart.
pub struct Resolver {
    client: Arc<dyn ClusterClient>,
}

impl Resolver {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Resolve one spec. Failures come back classified for the session's
    /// backoff and logging.
    pub async fn resolve(&self, spec: &ForwardSpec) -> Result<ResolvedTarget, ResolveError> {
        match &spec.resource {
            ResourceRef::Pod(name) => self.resolve_pod(spec, name).await,
            ResourceRef::Service(name) => self.resolve_service(spec, name).await,
            ResourceRef::Deployment(name) => {
                let workload = self
                    .client
                    .get_deployment(&spec.namespace, name)
                    .await?;
                let labels = workload
                    .spec
                    .and_then(|s| s.selector.match_labels)
                    .ok_or_else(|| {
                        ResolveError::config_invalid(format!("deployment {name} has no selector"))
                    })?;
                self.resolve_by_selector(spec, "deployment", name, labels).await
            }
            ResourceRef::StatefulSet(name) => {
                let workload = self
                    .client
                    .get_statefulset(&spec.namespace, name)
                    .await?;
                let labels = workload
                    .spec
                    .and_then(|s| s.selector.match_labels)
                    .ok_or_else(|| {
                        ResolveError::config_invalid(format!("statefulset {name} has no selector"))
                    })?;
                self.resolve_by_selector(spec, "statefulset", name, labels).await
            }
            ResourceRef::DaemonSet(name) => {
                let workload = self.client.get_daemonset(&spec.namespace, name).await?;
                let labels = workload
                    .spec
                    .and_then(|s| s.selector.match_labels)
                    .ok_or_else(|| {
                        ResolveError::config_invalid(format!("daemonset {name} has no selector"))
                    })?;
                self.resolve_by_selector(spec, "daemonset", name, labels).await
            }
        }
    }

    /// Direct pod reference: the pod must exist and be Running
    async fn resolve_pod(
        &self,
        spec: &ForwardSpec,
        name: &str,
    ) -> Result<ResolvedTarget, ResolveError> {
        let pod = self.client.get_pod(&spec.namespace, name).await?;

        match pod_phase(&pod) {
            "Failed" => Err(ResolveError::pod_failed(name)),
            "Running" => Ok(ResolvedTarget {
                pod_name: name.to_string(),
                ports: spec.ports.clone(),
            }),
            phase => Err(ResolveError::pod_not_running(name, phase)),
        }
    }

    /// Service reference: pick the first running endpoint pod and translate
    /// each declared remote port through the service's port list
    async fn resolve_service(
        &self,
        spec: &ForwardSpec,
        name: &str,
    ) -> Result<ResolvedTarget, ResolveError> {
        let service = self.client.get_service(&spec.namespace, name).await?;

        let selector = service
            .spec
            .as_ref()
            .and_then(|s| s.selector.clone())
            .unwrap_or_default();

        let pods = self
            .client
            .list_pods_by_labels(&spec.namespace, &selector)
            .await?;

        let pod = first_running(&pods)
            .ok_or_else(|| ResolveError::no_pod_available("service", name))?;

        let ports = map_service_ports(&service, pod, &spec.ports)?;
        Ok(ResolvedTarget {
            pod_name: pod_name(pod).to_string(),
            ports,
        })
    }

    /// Selector-carrying workload (deployment, statefulset, daemonset):
    /// pick the first running pod behind the selector. Declared ports pass
    /// through untranslated; the remote side is taken as a literal
    /// container port.
    async fn resolve_by_selector(
        &self,
        spec: &ForwardSpec,
        workload_kind: &str,
        workload_name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<ResolvedTarget, ResolveError> {
        let pods = self
            .client
            .list_pods_by_labels(&spec.namespace, &labels)
            .await?;

        let pod = first_running(&pods)
            .ok_or_else(|| ResolveError::no_pod_available(workload_kind, workload_name))?;

        Ok(ResolvedTarget {
            pod_name: pod_name(pod).to_string(),
            ports: spec.ports.clone(),
        })
    }
}

/// First pod in API order whose phase is Running; callers tolerate any member
fn first_running(pods: &[Pod]) -> Option<&Pod> {
    pods.iter().find(|p| pod_phase(p) == "Running")
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// Translate declared pairs through a service's port list.
///
/// The declared remote must match a service-side port. Its target is either
/// a numeric container port, a named container port looked up on the chosen
/// pod, or absent (target defaults to the service port).
fn map_service_ports(
    service: &Service,
    pod: &Pod,
    declared: &[PortPair],
) -> Result<Vec<PortPair>, ResolveError> {
    let service_name = service.metadata.name.as_deref().unwrap_or_default();
    let service_ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut result = Vec::with_capacity(declared.len());
    for pair in declared {
        let service_port = service_ports
            .iter()
            .find(|p| p.port == i32::from(pair.remote))
            .ok_or_else(|| {
                ResolveError::config_invalid(format!(
                    "service {service_name} does not expose port {}",
                    pair.remote
                ))
            })?;

        let remote = match &service_port.target_port {
            None => pair.remote,
            Some(IntOrString::Int(n)) => u16::try_from(*n).map_err(|_| {
                ResolveError::config_invalid(format!(
                    "service {service_name} targets invalid port {n}"
                ))
            })?,
            Some(IntOrString::String(port_name)) => {
                named_container_port(pod, port_name).ok_or_else(|| {
                    ResolveError::config_invalid(format!(
                        "pod {} does not have named port {port_name}",
                        pod_name(pod)
                    ))
                })?
            }
        };

        result.push(PortPair {
            local: pair.local,
            remote,
        });
    }

    Ok(result)
}

/// Look up a named container port across all of the pod's containers
fn named_container_port(pod: &Pod, port_name: &str) -> Option<u16> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .flat_map(|c| c.ports.as_deref().unwrap_or_default())
        .find(|p| p.name.as_deref() == Some(port_name))
        .and_then(|p| u16::try_from(p.container_port).ok())
}
