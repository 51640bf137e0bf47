//! Common error types for the Porter ecosystem.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`PorterError`].
pub type PorterResult<T> = Result<T, PorterError>;

/// Common errors across the Porter ecosystem.
#[derive(Error, Diagnostic, Debug)]
pub enum PorterError {
    /// The hook was invoked without one of its required inputs.
    #[error("insufficient args")]
    #[diagnostic(code(porter::hook::insufficient_args))]
    InsufficientArgs,

    /// The runtime reported a lifecycle event the dispatcher does not handle.
    #[error("unexpected event {event:?}")]
    #[diagnostic(code(porter::hook::unexpected_event))]
    UnexpectedEvent {
        /// The event name received from the runtime.
        event: String,
    },

    /// A requested network has no configuration on disk.
    #[error("no such network: {name:?}")]
    #[diagnostic(
        code(porter::net::no_such_network),
        help("run `porter network ls` to list the networks visible in this namespace")
    )]
    NoSuchNetwork {
        /// The unknown network name.
        name: String,
    },

    /// Configuration error (missing or inconsistent runtime annotations).
    #[error("{message}")]
    #[diagnostic(code(porter::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(porter::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    #[diagnostic(code(porter::serialization))]
    Serialization(String),

    /// A CNI plugin invocation failed.
    #[error("{message}")]
    #[diagnostic(code(porter::net::cni))]
    Cni {
        /// The error message.
        message: String,
    },

    /// An RPC to a rootless helper daemon failed.
    #[error("{message}")]
    #[diagnostic(code(porter::rootless::rpc))]
    Rpc {
        /// The error message.
        message: String,
    },

    /// A persistent store operation failed.
    #[error("{message}")]
    #[diagnostic(code(porter::store))]
    Store {
        /// The error message.
        message: String,
    },

    /// Feature not supported on this platform.
    #[error("feature not supported: {feature}")]
    #[diagnostic(code(porter::unsupported))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Internal error (should not happen).
    #[error("internal error: {message}")]
    #[diagnostic(
        code(porter::internal),
        help("this is a bug, please report it at https://github.com/porter-containers/porter/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for PorterError {
    fn from(err: serde_json::Error) -> Self {
        PorterError::Serialization(err.to_string())
    }
}
