//! # porter-common
//!
//! Shared utilities and types for the Porter container ecosystem.
//!
//! This crate provides common functionality used across all Porter crates:
//! - Common error types
//! - Data-store filesystem layout

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{PorterError, PorterResult};
pub use paths::DataPaths;
