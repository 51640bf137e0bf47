//! Data-store filesystem layout for Porter.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for the Porter data store.
pub static PORTER_DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("PORTER_DATA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/porter"))
});

/// Well-known locations inside a Porter data store.
///
/// Every store lives under a single root directory shared by all containers
/// of one manager instance. Hook invocations receive that root and derive
/// the per-namespace and per-container paths from it.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Data-store root directory.
    pub root: PathBuf,
}

impl DataPaths {
    /// Create paths rooted at the given data store.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the hosts store (one subtree per namespace).
    #[must_use]
    pub fn hosts_store(&self) -> PathBuf {
        self.root.join("etchosts")
    }

    /// Hosts-store subtree for one namespace.
    #[must_use]
    pub fn hosts_namespace(&self, namespace: &str) -> PathBuf {
        self.hosts_store().join(namespace)
    }

    /// Hosts-store entry directory for one container.
    #[must_use]
    pub fn hosts_entry(&self, namespace: &str, id: &str) -> PathBuf {
        self.hosts_namespace(namespace).join(id)
    }

    /// The persisted meta record for one container.
    #[must_use]
    pub fn hosts_meta(&self, namespace: &str, id: &str) -> PathBuf {
        self.hosts_entry(namespace, id).join("meta.json")
    }

    /// The generated hosts file for one container.
    #[must_use]
    pub fn hosts_file(&self, namespace: &str, id: &str) -> PathBuf {
        self.hosts_entry(namespace, id).join("hosts")
    }

    /// Name-reservation directory for one namespace.
    #[must_use]
    pub fn name_store(&self, namespace: &str) -> PathBuf {
        self.root.join("names").join(namespace)
    }

    /// Reservation file for one container name.
    #[must_use]
    pub fn name_file(&self, namespace: &str, name: &str) -> PathBuf {
        self.name_store(namespace).join(name)
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            root: PORTER_DATA_ROOT.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_layout() {
        let paths = DataPaths::new("/var/lib/porter");
        assert_eq!(
            paths.hosts_meta("default", "c1"),
            PathBuf::from("/var/lib/porter/etchosts/default/c1/meta.json")
        );
        assert_eq!(
            paths.hosts_file("default", "c1"),
            PathBuf::from("/var/lib/porter/etchosts/default/c1/hosts")
        );
        assert_eq!(
            paths.name_file("default", "web"),
            PathBuf::from("/var/lib/porter/names/default/web")
        );
    }
}
