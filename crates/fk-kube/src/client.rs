//! kube-rs implementation of the cluster capabilities

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use thiserror::Error;

use fk_core::{PortPair, ResolveError};

use crate::classify::{classify_get, classify_list};
use crate::traits::{ClusterClient, Tunnel};
use crate::tunnel::PortForwardTunnel;

/// Where the client credentials came from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Explicit path from the `KUBECONFIG` environment variable
    Env(PathBuf),
    /// The conventional per-user kubeconfig file
    Kubeconfig,
    /// Service-account discovery inside a cluster
    InCluster,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env(path) => write!(f, "KUBECONFIG ({})", path.display()),
            Self::Kubeconfig => write!(f, "kubeconfig"),
            Self::InCluster => write!(f, "in-cluster"),
        }
    }
}

/// Errors constructing the cluster client
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubeconfig file could not be read or interpreted
    #[error("cannot load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// In-cluster discovery failed
    #[error("cannot discover in-cluster configuration: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    /// The client itself could not be built
    #[error("cannot build Kubernetes client: {0}")]
    Client(#[from] kube::Error),
}

/// [`ClusterClient`] over a kube-rs [`Client`]
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Connect using the conventional discovery order: the `KUBECONFIG`
    /// environment variable, then the default kubeconfig location, then
    /// in-cluster service-account discovery.
    pub async fn connect() -> Result<(Self, ConfigSource), ClusterError> {
        let (config, source) = match std::env::var_os("KUBECONFIG") {
            Some(path) if !path.is_empty() => {
                let path = PathBuf::from(path);
                let kubeconfig = Kubeconfig::read_from(&path)?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                (config, ConfigSource::Env(path))
            }
            _ => match Config::from_kubeconfig(&KubeConfigOptions::default()).await {
                Ok(config) => (config, ConfigSource::Kubeconfig),
                Err(_) => (Config::incluster()?, ConfigSource::InCluster),
            },
        };

        let client = Client::try_from(config)?;
        Ok((Self { client }, source))
    }

    /// Wrap an existing kube client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ResolveError> {
        self.api::<Pod>(namespace)
            .get(name)
            .await
            .map_err(|e| classify_get("pod", name, e))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ResolveError> {
        self.api::<Service>(namespace)
            .get(name)
            .await
            .map_err(|e| classify_get("service", name, e))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ResolveError> {
        self.api::<Deployment>(namespace)
            .get(name)
            .await
            .map_err(|e| classify_get("deployment", name, e))
    }

    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, ResolveError> {
        self.api::<StatefulSet>(namespace)
            .get(name)
            .await
            .map_err(|e| classify_get("statefulset", name, e))
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<DaemonSet, ResolveError> {
        self.api::<DaemonSet>(namespace)
            .get(name)
            .await
            .map_err(|e| classify_get("daemonset", name, e))
    }

    async fn list_pods_by_labels(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, ResolveError> {
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let params = ListParams::default().labels(&selector);

        self.api::<Pod>(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| classify_list("pods", e))
    }

    async fn open_tunnel(
        &self,
        namespace: &str,
        pod_name: &str,
        ports: &[PortPair],
    ) -> Result<Box<dyn Tunnel>, ResolveError> {
        let tunnel =
            PortForwardTunnel::open(self.client.clone(), namespace, pod_name, ports).await?;
        Ok(Box::new(tunnel))
    }
}
