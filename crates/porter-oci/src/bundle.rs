//! Bundle `config.json` access.
//!
//! The hook only needs the `root.path` field of the runtime configuration;
//! everything else in the bundle belongs to the runtime.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use porter_common::PorterResult;

/// The subset of the bundle's `config.json` the hook reads.
#[derive(Debug, Default, Deserialize)]
pub struct BundleConfig {
    /// Container root filesystem configuration.
    #[serde(default)]
    pub root: Option<Root>,
}

/// Root filesystem configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Root {
    /// Path to the root filesystem, absolute or relative to the bundle.
    pub path: PathBuf,
    /// Whether the root filesystem is read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Load the hook-relevant subset of `<bundle>/config.json`.
pub fn load_config(bundle: &Path) -> PorterResult<BundleConfig> {
    let file = File::open(bundle.join("config.json"))?;
    let config = serde_json::from_reader(BufReader::new(file))?;
    Ok(config)
}

/// Resolve the bundle's rootfs to an absolute path.
///
/// A relative `root.path` is resolved against the bundle directory.
pub fn rootfs_path(bundle: &Path) -> PorterResult<PathBuf> {
    let config = load_config(bundle)?;
    let root = config.root.map(|r| r.path).unwrap_or_default();
    if root.is_absolute() {
        Ok(root)
    } else {
        Ok(bundle.join(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(bundle: &Path, contents: &str) {
        std::fs::write(bundle.join("config.json"), contents).unwrap();
    }

    #[test]
    fn relative_root_is_joined_with_bundle() {
        let bundle = TempDir::new().unwrap();
        write_config(bundle.path(), r#"{"root": {"path": "rootfs"}}"#);

        let rootfs = rootfs_path(bundle.path()).unwrap();
        assert_eq!(rootfs, bundle.path().join("rootfs"));
    }

    #[test]
    fn absolute_root_is_kept() {
        let bundle = TempDir::new().unwrap();
        write_config(bundle.path(), r#"{"root": {"path": "/containers/c1/fs"}}"#);

        let rootfs = rootfs_path(bundle.path()).unwrap();
        assert_eq!(rootfs, PathBuf::from("/containers/c1/fs"));
    }

    #[test]
    fn missing_config_is_an_error() {
        let bundle = TempDir::new().unwrap();
        assert!(rootfs_path(bundle.path()).is_err());
    }

    #[test]
    fn readonly_flag_is_parsed() {
        let bundle = TempDir::new().unwrap();
        write_config(
            bundle.path(),
            r#"{"root": {"path": "rootfs", "readonly": true}}"#,
        );
        let config = load_config(bundle.path()).unwrap();
        assert!(config.root.unwrap().readonly);
    }
}
