//! # porter-store
//!
//! Persistent ancillary state Porter keeps per container, shared across
//! hook invocations and manager processes:
//! - The hosts store feeding every container's `/etc/hosts` view
//! - The name-reservation store
//! - The per-container lifecycle record
//!
//! All mutation happens under OS-level advisory locks because concurrent
//! hook invocations are separate processes.

#![warn(missing_docs)]

pub mod atomic;
pub mod flock;
pub mod hosts;
pub mod lifecycle;
pub mod names;

pub use atomic::{write_atomically, write_pid_file};
pub use flock::DirLock;
pub use hosts::{HostsStore, Meta};
pub use lifecycle::LifecycleRecord;
pub use names::NameStore;
