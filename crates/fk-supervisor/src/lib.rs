//! fk-supervisor: The supervisor core of fwkeeper
//!
//! Keeps a declared set of port-forwards alive: the resolver turns a
//! resource reference into a running pod, each [`ForwardSession`] runs one
//! forward's reconcile loop, and the [`Supervisor`] owns the active set,
//! applies configuration deltas and threads cancellation from its root
//! scope down to every session.

pub mod controller;
pub mod resolver;
pub mod session;
pub mod supervisor;

pub use controller::{run_controller, ReloadEvent};
pub use resolver::Resolver;
pub use session::ForwardSession;
pub use supervisor::{StartError, Supervisor};
