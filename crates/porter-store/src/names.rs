//! The name-reservation store.
//!
//! Human-readable container names are unique within a namespace. A
//! reservation is a file named after the container name whose contents are
//! the owning container ID.

use std::path::PathBuf;

use porter_common::{DataPaths, PorterError, PorterResult};

use crate::atomic::write_atomically;
use crate::flock::with_dir_lock;

/// The name store for one namespace.
#[derive(Debug)]
pub struct NameStore {
    dir: PathBuf,
}

impl NameStore {
    /// Open the store for `namespace` under `data_store`.
    pub fn open(data_store: impl Into<PathBuf>, namespace: &str) -> PorterResult<Self> {
        let dir = DataPaths::new(data_store).name_store(namespace);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Reserve `name` for the container `id`.
    ///
    /// Re-acquiring a name the same container already owns succeeds, so a
    /// runtime that delivers the same event twice stays harmless. An empty
    /// name is a no-op: anonymous containers reserve nothing.
    pub fn acquire(&self, name: &str, id: &str) -> PorterResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        with_dir_lock(&self.dir, || {
            if let Some(owner) = self.owner(name)? {
                if owner != id {
                    return Err(PorterError::Store {
                        message: format!("name {name:?} is already used by ID {owner:?}"),
                    });
                }
                return Ok(());
            }
            write_atomically(&self.dir.join(name), id.as_bytes())
        })
    }

    /// Release the reservation of `name` held by `id`.
    ///
    /// A missing reservation is fine; a reservation held by a different
    /// container is left alone and reported.
    pub fn release(&self, name: &str, id: &str) -> PorterResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        with_dir_lock(&self.dir, || {
            match self.owner(name)? {
                None => Ok(()),
                Some(owner) if owner == id => {
                    std::fs::remove_file(self.dir.join(name))?;
                    Ok(())
                }
                Some(owner) => Err(PorterError::Store {
                    message: format!("name {name:?} is used by ID {owner:?}, not by {id:?}"),
                }),
            }
        })
    }

    /// The container ID currently holding `name`, if any.
    pub fn owner(&self, name: &str) -> PorterResult<Option<String>> {
        match std::fs::read_to_string(self.dir.join(name)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
