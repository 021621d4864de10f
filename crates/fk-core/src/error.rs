//! Resolution error taxonomy
//!
//! Every failure on the path from a forward's spec to a running tunnel is
//! classified into a closed set of kinds. The kind selects the log level;
//! all kinds are retried with backoff, since a forward whose spec still
//! exists is never given up on.

use std::error::Error as StdError;

use thiserror::Error;

/// Classification of a resolution or tunnel failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveErrorKind {
    /// The named resource does not exist
    ResourceNotFound,
    /// The resource exists but no running pod backs it
    NoPodAvailable,
    /// The pod exists but its phase is not Running
    PodNotRunning,
    /// The pod is in a terminal Failed phase
    PodFailed,
    /// API timeout, server error or similar
    ApiTransient,
    /// Tunnel drop, connection reset or similar
    NetworkTransient,
    /// Forbidden or unauthorized
    PermissionDenied,
    /// The spec cannot map onto the cluster (unknown service port, bad port literal)
    ConfigInvalid,
}

impl ResolveErrorKind {
    /// Log level used when a reconcile attempt fails with this kind.
    ///
    /// Pod churn during a rollout is expected and stays at debug; transport
    /// trouble is worth a warning; a spec that cannot map onto the cluster
    /// usually requires a config edit and is an error.
    pub fn log_level(self) -> tracing::Level {
        match self {
            Self::ResourceNotFound
            | Self::NoPodAvailable
            | Self::PodNotRunning
            | Self::PodFailed => tracing::Level::DEBUG,
            Self::ApiTransient | Self::NetworkTransient | Self::PermissionDenied => {
                tracing::Level::WARN
            }
            Self::ConfigInvalid => tracing::Level::ERROR,
        }
    }
}

/// A classified failure produced by the resolver or the tunnel layer
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ResolveError {
    kind: ResolveErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ResolveError {
    /// Create an error with an explicit kind and no cause
    pub fn new(kind: ResolveErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error with an explicit kind and an underlying cause
    pub fn with_source(
        kind: ResolveErrorKind,
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Missing resource (pod, service, deployment, ...)
    pub fn resource_not_found(resource_kind: &str, name: &str) -> Self {
        Self::new(
            ResolveErrorKind::ResourceNotFound,
            format!("{resource_kind} {name} not found"),
        )
    }

    /// Resource exists but nothing backing it is Running
    pub fn no_pod_available(resource_kind: &str, name: &str) -> Self {
        Self::new(
            ResolveErrorKind::NoPodAvailable,
            format!("no running pod found for {resource_kind} {name}"),
        )
    }

    /// Pod found in a non-Running, non-terminal phase
    pub fn pod_not_running(pod_name: &str, phase: &str) -> Self {
        Self::new(
            ResolveErrorKind::PodNotRunning,
            format!("pod {pod_name} is not running (phase: {phase})"),
        )
    }

    /// Pod found in a terminal Failed phase
    pub fn pod_failed(pod_name: &str) -> Self {
        Self::new(
            ResolveErrorKind::PodFailed,
            format!("pod {pod_name} is in failed state"),
        )
    }

    /// Forbidden or unauthorized API response
    pub fn permission_denied(operation: &str, resource: &str) -> Self {
        Self::new(
            ResolveErrorKind::PermissionDenied,
            format!("permission denied: cannot {operation} {resource}"),
        )
    }

    /// Spec does not map onto the cluster
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ResolveErrorKind::ConfigInvalid, message)
    }

    /// Transient API failure
    pub fn api_transient(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::with_source(ResolveErrorKind::ApiTransient, message, source)
    }

    /// Transient network/tunnel failure with a cause
    pub fn network_transient(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::with_source(ResolveErrorKind::NetworkTransient, message, source)
    }

    /// Transient network/tunnel failure without a cause
    pub fn network_transient_msg(message: impl Into<String>) -> Self {
        Self::new(ResolveErrorKind::NetworkTransient, message)
    }

    /// The error's kind
    pub fn kind(&self) -> ResolveErrorKind {
        self.kind
    }
}
