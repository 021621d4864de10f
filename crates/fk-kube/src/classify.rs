//! Mapping kube-rs errors onto the resolution taxonomy

use fk_core::{ResolveError, ResolveErrorKind};

/// Classify a failure to fetch a named resource.
///
/// 404 means the resource itself is gone; 401/403 is a permission problem;
/// timeouts, throttling and server errors are transient; transport failures
/// are network trouble.
pub fn classify_get(resource_kind: &str, name: &str, err: kube::Error) -> ResolveError {
    let subject = format!("{resource_kind} {name}");
    match api_code(&err) {
        Some(404) => ResolveError::with_source(
            ResolveErrorKind::ResourceNotFound,
            format!("{subject} not found"),
            err,
        ),
        Some(401) | Some(403) => ResolveError::with_source(
            ResolveErrorKind::PermissionDenied,
            format!("permission denied: cannot get {subject}"),
            err,
        ),
        Some(_) => ResolveError::api_transient(format!("failed to get {subject}"), err),
        None if is_transport_error(&err) => {
            ResolveError::network_transient(format!("network error getting {subject}"), err)
        }
        None => ResolveError::api_transient(format!("failed to get {subject}"), err),
    }
}

/// Classify a failure to list pods. A list never produces
/// `ResourceNotFound`; everything that is not a permission problem is
/// transient.
pub fn classify_list(what: &str, err: kube::Error) -> ResolveError {
    match api_code(&err) {
        Some(401) | Some(403) => ResolveError::with_source(
            ResolveErrorKind::PermissionDenied,
            format!("permission denied: cannot list {what}"),
            err,
        ),
        Some(_) => ResolveError::api_transient(format!("failed to list {what}"), err),
        None if is_transport_error(&err) => {
            ResolveError::network_transient(format!("network error listing {what}"), err)
        }
        None => ResolveError::api_transient(format!("failed to list {what}"), err),
    }
}

/// Classify a failure while opening or maintaining a port-forward.
///
/// The pod vanishing mid-tunnel reads as 404; anything else on this path is
/// network trouble, since the resolver has already vetted the spec.
pub fn classify_portforward(pod_name: &str, err: kube::Error) -> ResolveError {
    match api_code(&err) {
        Some(404) => ResolveError::with_source(
            ResolveErrorKind::ResourceNotFound,
            format!("pod {pod_name} not found"),
            err,
        ),
        Some(401) | Some(403) => ResolveError::with_source(
            ResolveErrorKind::PermissionDenied,
            format!("permission denied: cannot port-forward to pod {pod_name}"),
            err,
        ),
        _ => ResolveError::network_transient(
            format!("port-forward to pod {pod_name} failed"),
            err,
        ),
    }
}

/// The HTTP status code when the API server answered with an error status
fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

/// Whether the error happened below the API layer (connection refused,
/// reset, failed upgrade) rather than inside it
fn is_transport_error(err: &kube::Error) -> bool {
    matches!(
        err,
        kube::Error::Service(_) | kube::Error::HyperError(_) | kube::Error::UpgradeConnection(_)
    )
}
