//! Per-container lifecycle record.
//!
//! A small JSON document in the container's state directory recording
//! lifecycle instants. Mutation follows a load → mutate → save cycle under
//! the state directory's exclusive lock so concurrent hook invocations
//! serialise.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use porter_common::PorterResult;

use crate::atomic::write_atomically;
use crate::flock::DirLock;

/// File name of the record inside the state directory.
pub const LIFECYCLE_FILE: &str = "lifecycle.json";

/// The persisted lifecycle fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleData {
    /// When the container last started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// A container's lifecycle record, bound to its state directory.
#[derive(Debug)]
pub struct LifecycleRecord {
    state_dir: PathBuf,
    /// The in-memory view of the record.
    pub data: LifecycleData,
}

impl LifecycleRecord {
    /// Bind a record to a state directory. Nothing is read until
    /// [`LifecycleRecord::load`].
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            data: LifecycleData::default(),
        }
    }

    /// Run `f` while holding the exclusive lock on the state directory.
    pub fn with_lock<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> PorterResult<T>,
    ) -> PorterResult<T> {
        let dir = self.state_dir.clone();
        let _lock = DirLock::acquire(&dir)?;
        f(self)
    }

    /// Load the record from disk; an absent file yields the default.
    pub fn load(&mut self) -> PorterResult<()> {
        match std::fs::read(self.state_dir.join(LIFECYCLE_FILE)) {
            Ok(bytes) => {
                self.data = serde_json::from_slice(&bytes)?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.data = LifecycleData::default();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the record atomically.
    pub fn save(&self) -> PorterResult<()> {
        write_atomically(
            &self.state_dir.join(LIFECYCLE_FILE),
            &serde_json::to_vec_pretty(&self.data)?,
        )
    }

    /// Record the start instant. The caller provides the clock.
    pub fn stamp_started_at(&mut self, at: DateTime<Utc>) {
        self.data.started_at = Some(at);
    }
}
