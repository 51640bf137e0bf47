//! Runtime state input.
//!
//! Based on the OCI Runtime Specification state format:
//! <https://github.com/opencontainers/runtime-spec/blob/main/runtime.md#state>

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The runtime `state` document a hook receives on stdin.
///
/// All semantic inputs beyond the container identity and PID are carried
/// through `annotations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    /// OCI version.
    #[serde(default)]
    pub oci_version: String,
    /// Container ID.
    pub id: String,
    /// Container status at the time the hook runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContainerStatus>,
    /// Process ID of the container init process.
    ///
    /// Absent (or zero) for VM-backed runtimes, where the in-kernel PID does
    /// not live in the container's network namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Path to the OCI bundle.
    pub bundle: PathBuf,
    /// Annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl RuntimeState {
    /// The init PID, treating an absent value as zero.
    #[must_use]
    pub fn pid_or_zero(&self) -> u32 {
        self.pid.unwrap_or(0)
    }
}

/// Container status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is being created.
    Creating,
    /// Container has been created but not started.
    Created,
    /// Container is running.
    Running,
    /// Container has exited.
    Stopped,
    /// Container is paused.
    Paused,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
        }
    }
}
