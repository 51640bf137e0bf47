//! The hosts store.
//!
//! One record per container, keyed by `(namespace, id)`, feeding the
//! generated hosts file every container in the namespace mounts as
//! `/etc/hosts`. Acquiring or releasing a record regenerates the files of
//! every peer in the namespace, so all mutation runs under the store-wide
//! lock.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use porter_common::{DataPaths, PorterError, PorterResult};
use porter_net::CniResult;

use crate::atomic::write_atomically;
use crate::flock::with_dir_lock;

/// The persisted record for one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Logical namespace.
    pub namespace: String,
    /// Container ID.
    pub id: String,
    /// Human-readable container name.
    #[serde(default)]
    pub name: String,
    /// Container hostname.
    #[serde(default)]
    pub hostname: String,
    /// Extra `hostname -> ip` entries requested by the user.
    #[serde(default)]
    pub extra_hosts: BTreeMap<String, String>,
    /// Attachment result per network, keyed by network name.
    #[serde(default)]
    pub networks: BTreeMap<String, CniResult>,
}

impl Meta {
    /// Every address allocated to this container, prefix stripped.
    fn addresses(&self) -> Vec<&str> {
        self.networks
            .values()
            .flat_map(|result| result.ips.iter())
            .map(|ip| ip.address.split('/').next().unwrap_or(&ip.address))
            .collect()
    }
}

/// The per-manager hosts store.
#[derive(Debug)]
pub struct HostsStore {
    paths: DataPaths,
}

impl HostsStore {
    /// Open the store rooted at `data_store`, creating it if absent.
    pub fn open(data_store: impl Into<PathBuf>) -> PorterResult<Self> {
        let paths = DataPaths::new(data_store);
        std::fs::create_dir_all(paths.hosts_store())?;
        Ok(Self { paths })
    }

    /// Persist `meta` and regenerate the hosts files of its namespace.
    pub fn acquire(&self, meta: Meta) -> PorterResult<()> {
        if meta.namespace.is_empty() || meta.id.is_empty() {
            return Err(PorterError::Store {
                message: "hosts-store records need both a namespace and an id".to_string(),
            });
        }
        with_dir_lock(&self.paths.hosts_store(), || {
            let entry = self.paths.hosts_entry(&meta.namespace, &meta.id);
            std::fs::create_dir_all(&entry)?;
            write_atomically(
                &self.paths.hosts_meta(&meta.namespace, &meta.id),
                &serde_json::to_vec_pretty(&meta)?,
            )?;
            self.regenerate(&meta.namespace)
        })
    }

    /// Drop the record for `(namespace, id)` and regenerate its peers.
    ///
    /// Releasing an absent record is not an error; teardown may run more
    /// than once.
    pub fn release(&self, namespace: &str, id: &str) -> PorterResult<()> {
        with_dir_lock(&self.paths.hosts_store(), || {
            let entry = self.paths.hosts_entry(namespace, id);
            match std::fs::remove_dir_all(&entry) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.regenerate(namespace)
        })
    }

    /// Load the record for `(namespace, id)`, if present.
    pub fn get(&self, namespace: &str, id: &str) -> PorterResult<Option<Meta>> {
        let path = self.paths.hosts_meta(namespace, id);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Rewrite the hosts file of every container in `namespace`.
    fn regenerate(&self, namespace: &str) -> PorterResult<()> {
        let peers = self.load_namespace(namespace)?;
        for meta in &peers {
            let rendered = render_hosts(meta, &peers);
            write_atomically(
                &self.paths.hosts_file(&meta.namespace, &meta.id),
                rendered.as_bytes(),
            )?;
        }
        tracing::debug!(namespace, peers = peers.len(), "regenerated hosts files");
        Ok(())
    }

    fn load_namespace(&self, namespace: &str) -> PorterResult<Vec<Meta>> {
        let dir = self.paths.hosts_namespace(namespace);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut peers = Vec::new();
        for entry in entries {
            let meta_path = entry?.path().join("meta.json");
            if !meta_path.is_file() {
                continue;
            }
            let bytes = std::fs::read(&meta_path)?;
            peers.push(serde_json::from_slice(&bytes)?);
        }
        peers.sort_by(|a: &Meta, b: &Meta| a.id.cmp(&b.id));
        Ok(peers)
    }
}

/// Render one container's hosts file from its namespace peers.
fn render_hosts(target: &Meta, peers: &[Meta]) -> String {
    let mut hosts = String::from("# generated by porter, do not edit\n");
    hosts.push_str("127.0.0.1\tlocalhost localhost.localdomain\n");
    hosts.push_str("::1\tlocalhost localhost.localdomain ip6-localhost ip6-loopback\n");

    for (name, ip) in &target.extra_hosts {
        hosts.push_str(&format!("{ip}\t{name}\n"));
    }

    for peer in peers {
        let mut names: Vec<&str> = Vec::new();
        for candidate in [peer.hostname.as_str(), peer.name.as_str()] {
            if !candidate.is_empty() && !names.contains(&candidate) {
                names.push(candidate);
            }
        }
        if names.is_empty() {
            continue;
        }
        for address in peer.addresses() {
            hosts.push_str(&format!("{address}\t{}\n", names.join(" ")));
        }
    }

    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_net::cni::CniIpConfig;
    use tempfile::TempDir;

    fn meta(ns: &str, id: &str, name: &str, ip: &str) -> Meta {
        let mut networks = BTreeMap::new();
        networks.insert(
            "bridge".to_string(),
            CniResult {
                ips: vec![CniIpConfig {
                    address: format!("{ip}/24"),
                    gateway: None,
                    interface: None,
                }],
                ..Default::default()
            },
        );
        Meta {
            namespace: ns.to_string(),
            id: id.to_string(),
            name: name.to_string(),
            hostname: name.to_string(),
            extra_hosts: BTreeMap::new(),
            networks,
        }
    }

    #[test]
    fn acquire_persists_and_generates_hosts() {
        let dir = TempDir::new().unwrap();
        let store = HostsStore::open(dir.path()).unwrap();

        store.acquire(meta("default", "c1", "web", "10.4.0.2")).unwrap();

        let loaded = store.get("default", "c1").unwrap().unwrap();
        assert_eq!(loaded.name, "web");

        let hosts = std::fs::read_to_string(dir.path().join("etchosts/default/c1/hosts")).unwrap();
        assert!(hosts.contains("127.0.0.1\tlocalhost"));
        assert!(hosts.contains("10.4.0.2\tweb"));
    }

    #[test]
    fn peers_see_each_other_within_a_namespace() {
        let dir = TempDir::new().unwrap();
        let store = HostsStore::open(dir.path()).unwrap();

        store.acquire(meta("default", "c1", "web", "10.4.0.2")).unwrap();
        store.acquire(meta("default", "c2", "db", "10.4.0.3")).unwrap();
        store.acquire(meta("other", "c3", "cache", "10.9.0.2")).unwrap();

        let web_hosts =
            std::fs::read_to_string(dir.path().join("etchosts/default/c1/hosts")).unwrap();
        assert!(web_hosts.contains("10.4.0.3\tdb"));
        assert!(!web_hosts.contains("cache"));
    }

    #[test]
    fn release_removes_the_peer_entry() {
        let dir = TempDir::new().unwrap();
        let store = HostsStore::open(dir.path()).unwrap();

        store.acquire(meta("default", "c1", "web", "10.4.0.2")).unwrap();
        store.acquire(meta("default", "c2", "db", "10.4.0.3")).unwrap();
        store.release("default", "c2").unwrap();

        assert!(store.get("default", "c2").unwrap().is_none());
        let web_hosts =
            std::fs::read_to_string(dir.path().join("etchosts/default/c1/hosts")).unwrap();
        assert!(!web_hosts.contains("db"));
    }

    #[test]
    fn release_of_an_absent_record_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = HostsStore::open(dir.path()).unwrap();
        store.release("default", "ghost").unwrap();
    }

    #[test]
    fn extra_hosts_are_rendered_first() {
        let dir = TempDir::new().unwrap();
        let store = HostsStore::open(dir.path()).unwrap();

        let mut m = meta("default", "c1", "web", "10.4.0.2");
        m.extra_hosts
            .insert("gateway.local".to_string(), "192.168.1.1".to_string());
        store.acquire(m).unwrap();

        let hosts = std::fs::read_to_string(dir.path().join("etchosts/default/c1/hosts")).unwrap();
        assert!(hosts.contains("192.168.1.1\tgateway.local"));
    }
}
