//! Core domain types

use std::fmt;
use std::str::FromStr;

use crate::config::ForwardConfig;
use crate::error::ResolveError;

/// Reference to the workload a forward targets.
///
/// Parsed once from the textual `kind/name` form; a bare name is a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Pod(String),
    Service(String),
    Deployment(String),
    StatefulSet(String),
    DaemonSet(String),
}

impl ResourceRef {
    /// The referenced object's name
    pub fn name(&self) -> &str {
        match self {
            Self::Pod(n)
            | Self::Service(n)
            | Self::Deployment(n)
            | Self::StatefulSet(n)
            | Self::DaemonSet(n) => n,
        }
    }

    /// The kind as a lowercase word, for log and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pod(_) => "pod",
            Self::Service(_) => "service",
            Self::Deployment(_) => "deployment",
            Self::StatefulSet(_) => "statefulset",
            Self::DaemonSet(_) => "daemonset",
        }
    }
}

impl FromStr for ResourceRef {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::Pod(name.to_string())),
            (Some(kind), Some(name), None) if !name.is_empty() => match kind {
                "svc" | "service" | "services" => Ok(Self::Service(name.to_string())),
                "dep" | "deployment" | "deployments" => Ok(Self::Deployment(name.to_string())),
                "sts" | "statefulset" | "statefulsets" => Ok(Self::StatefulSet(name.to_string())),
                "ds" | "daemonset" | "daemonsets" => Ok(Self::DaemonSet(name.to_string())),
                _ => Err(ResolveError::config_invalid(format!(
                    "unsupported resource type: {kind} \
                     (supported: pod, svc/service, dep/deployment, sts/statefulset, ds/daemonset)"
                ))),
            },
            _ => Err(ResolveError::config_invalid(format!(
                "invalid resource format: {s} (use 'pod-name', 'svc/service-name', 'dep/deployment-name', etc)"
            ))),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod(n) => write!(f, "{n}"),
            other => write!(f, "{}/{}", other.kind(), other.name()),
        }
    }
}

/// A local/remote port mapping.
///
/// The textual form is `"P"` (local = remote = P) or `"L:R"`, each side in
/// 1..=65535.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub local: u16,
    pub remote: u16,
}

impl PortPair {
    /// Parse a declared port string
    pub fn parse(s: &str) -> Result<Self, ResolveError> {
        let invalid = || ResolveError::config_invalid(format!("invalid port specification: {s}"));

        let (local, remote) = match s.split_once(':') {
            Some((l, r)) => (parse_port(l), parse_port(r)),
            None => {
                let p = parse_port(s);
                (p, p)
            }
        };

        match (local, remote) {
            (Some(local), Some(remote)) => Ok(Self { local, remote }),
            _ => Err(invalid()),
        }
    }
}

/// Parse one side of a port mapping: 1..=65535, plain digits only, no
/// leading zero
fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || s.starts_with('0') || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Some(p as u16),
        _ => None,
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local == self.remote {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{}:{}", self.local, self.remote)
        }
    }
}

/// A compiled forward declaration: one named entry of the configuration
/// with its resource reference and port list parsed into typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub name: String,
    pub namespace: String,
    pub resource: ResourceRef,
    pub ports: Vec<PortPair>,
    /// The declared port strings, kept verbatim for change detection
    port_strings: Vec<String>,
}

impl ForwardSpec {
    /// Compile a decoded configuration entry into a spec.
    ///
    /// Fails with a `ConfigInvalid`-kinded error when the resource string or
    /// any port literal cannot be parsed.
    pub fn compile(cfg: &ForwardConfig) -> Result<Self, ResolveError> {
        let resource: ResourceRef = cfg.resource.parse()?;
        let ports = cfg
            .ports
            .iter()
            .map(|p| PortPair::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: cfg.name.clone(),
            namespace: cfg.namespace.clone(),
            resource,
            ports,
            port_strings: cfg.ports.clone(),
        })
    }

    /// Whether a spec differs from another in a way that requires a restart.
    ///
    /// True iff the namespace, the resource reference or the ordered list of
    /// declared port strings differ. The name is not compared; reordering
    /// ports counts as a change.
    pub fn config_changed(&self, other: &ForwardSpec) -> bool {
        self.namespace != other.namespace
            || self.resource != other.resource
            || self.port_strings != other.port_strings
    }
}

impl fmt::Display for ForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} {}) ports:{:?}",
            self.name, self.namespace, self.resource, self.port_strings
        )
    }
}

/// The outcome of one resolver invocation: a concrete running pod and the
/// concrete port pairs to open. Consumed immediately; never stored across
/// reconciles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub pod_name: String,
    pub ports: Vec<PortPair>,
}
