//! # porter-rootless
//!
//! Rootless-mode support for the Porter hook: detecting whether the hook
//! runs inside the rootless supervisor's user namespace, and the clients
//! for the two helper daemons consulted there (the supervisor that forwards
//! host ports into the child namespace, and the bypass4netns daemon that
//! short-cuts TCP connections past the namespace boundary).

#![warn(missing_docs)]

pub mod bypass;
pub mod detect;
pub mod supervisor;

pub use bypass::{BypassClient, BypassDaemon};
pub use detect::is_rootless_child;
pub use supervisor::{Supervisor, SupervisorClient, SupervisorInfo};
