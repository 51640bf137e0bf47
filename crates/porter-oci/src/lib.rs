//! # porter-oci
//!
//! OCI (Open Container Initiative) runtime-spec input types for Porter.
//!
//! This crate provides the pieces of the runtime spec the lifecycle hook
//! consumes:
//! - The runtime `state` document delivered on stdin
//! - The bundle `config.json` root-path lookup
//! - The Porter annotation keys and their typed accessors

#![warn(missing_docs)]

pub mod annotations;
pub mod bundle;
pub mod state;

pub use annotations::Annotations;
pub use state::RuntimeState;
