//! # porter
//!
//! The Porter container manager binary. The piece that lives here is the
//! OCI runtime lifecycle hook: a short-lived process the runtime invokes at
//! `createRuntime`, `startContainer` and `postStop` to reconcile the
//! manager's view of a container with the namespace and interface state on
//! the host.

pub mod apparmor;
pub mod cli;
pub mod hook;
