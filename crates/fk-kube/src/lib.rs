//! fk-kube: Cluster capabilities for fwkeeper
//!
//! This crate is the edge between the supervisor core and the Kubernetes
//! API. The core depends only on the [`ClusterClient`] and [`Tunnel`]
//! traits; [`KubeClusterClient`] implements them over kube-rs, with local
//! listening sockets bridged into the `pods/<name>/portforward`
//! subresource.

pub mod classify;
pub mod client;
pub mod traits;
pub mod tunnel;

pub use client::{ConfigSource, ClusterError, KubeClusterClient};
pub use traits::{ClusterClient, Tunnel};
pub use tunnel::PortForwardTunnel;
