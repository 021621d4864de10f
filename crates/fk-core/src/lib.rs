//! fk-core: Shared types and configuration for fwkeeper
//!
//! This crate provides the domain types, configuration model, error
//! taxonomy and retry policy used by the cluster edge, the supervisor
//! and the CLI.

pub mod backoff;
pub mod config;
pub mod error;
pub mod types;

pub use backoff::RetryConfig;
pub use error::{ResolveError, ResolveErrorKind};
pub use types::{ForwardSpec, PortPair, ResolvedTarget, ResourceRef};
