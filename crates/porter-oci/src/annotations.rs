//! Porter annotation keys and typed accessors.
//!
//! The manager encodes everything the hook needs to know about a container
//! as runtime-spec annotations under the `porter/` prefix. Values are plain
//! strings unless noted; list-valued annotations are JSON arrays.

use std::collections::{BTreeMap, HashMap};

use porter_common::{PorterError, PorterResult};

/// Shared prefix for all Porter annotation keys.
pub const PREFIX: &str = "porter/";

/// Per-container scratch directory (required).
pub const STATE_DIR: &str = "porter/state-dir";
/// Logical namespace of the container (required).
pub const NAMESPACE: &str = "porter/namespace";
/// Human-readable container name.
pub const NAME: &str = "porter/name";
/// Container hostname.
pub const HOSTNAME: &str = "porter/hostname";
/// JSON array of network names (required; may be empty).
pub const NETWORKS: &str = "porter/networks";
/// JSON array of port mappings.
pub const PORTS: &str = "porter/ports";
/// JSON array of `host:ip` strings.
pub const EXTRA_HOSTS: &str = "porter/extraHosts";
/// Static IPv4 address hint.
pub const IP_ADDRESS: &str = "porter/ip-address";
/// Static IPv6 address hint.
pub const IP6_ADDRESS: &str = "porter/ip6-address";
/// Static MAC address hint.
pub const MAC_ADDRESS: &str = "porter/mac-address";
/// Host path that receives the init PID, written atomically.
pub const PID_FILE: &str = "porter/pid-file";
/// Explicit network namespace path.
///
/// When set, this takes precedence over the PID based resolution
/// (`/proc/<pid>/ns/net`). VM-backed runtimes set it because their state PID
/// does not live in the container's network namespace. On Windows the value
/// carries an HCN namespace UUID rather than a filesystem path.
pub const NETWORK_NAMESPACE: &str = "porter/network-namespace";
/// Marker: bypass4netns acceleration is enabled for this container.
pub const BYPASS4NETNS: &str = "porter/bypass4netns";
/// Marker: bypass4netns must leave bind sockets inside the namespace.
pub const BYPASS4NETNS_IGNORE_BIND: &str = "porter/bypass4netns-ignore-bind";

/// Borrowed view over a state document's annotation map.
#[derive(Debug, Clone, Copy)]
pub struct Annotations<'a> {
    map: &'a HashMap<String, String>,
}

impl<'a> Annotations<'a> {
    /// Wrap an annotation map.
    #[must_use]
    pub fn new(map: &'a HashMap<String, String>) -> Self {
        Self { map }
    }

    /// Raw lookup; empty values are treated as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// The per-container state directory.
    #[must_use]
    pub fn state_dir(&self) -> Option<&'a str> {
        self.get(STATE_DIR)
    }

    /// The logical namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&'a str> {
        self.get(NAMESPACE)
    }

    /// The human-readable container name, or `""` if unset.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.get(NAME).unwrap_or_default()
    }

    /// The container hostname, or `""` if unset.
    #[must_use]
    pub fn hostname(&self) -> &'a str {
        self.get(HOSTNAME).unwrap_or_default()
    }

    /// The PID file path, if requested.
    #[must_use]
    pub fn pid_file(&self) -> Option<&'a str> {
        self.get(PID_FILE)
    }

    /// The explicit network namespace path, if set.
    #[must_use]
    pub fn netns_path(&self) -> Option<&'a str> {
        self.get(NETWORK_NAMESPACE)
    }

    /// The static IPv4 address hint, if set.
    #[must_use]
    pub fn ip_address(&self) -> Option<&'a str> {
        self.get(IP_ADDRESS)
    }

    /// The static IPv6 address hint, if set.
    #[must_use]
    pub fn ip6_address(&self) -> Option<&'a str> {
        self.get(IP6_ADDRESS)
    }

    /// The static MAC address hint, if set.
    #[must_use]
    pub fn mac_address(&self) -> Option<&'a str> {
        self.get(MAC_ADDRESS)
    }

    /// The raw JSON of the ports annotation, if set.
    #[must_use]
    pub fn ports_json(&self) -> Option<&'a str> {
        self.get(PORTS)
    }

    /// The requested network names.
    ///
    /// The annotation is required; an empty array is valid.
    pub fn networks(&self) -> PorterResult<Vec<String>> {
        let raw = self.get(NETWORKS).ok_or_else(|| PorterError::Config {
            message: "networks annotation must be set".to_string(),
        })?;
        let networks = serde_json::from_str(raw)?;
        Ok(networks)
    }

    /// Extra `hostname -> ip` entries for the container's hosts file.
    ///
    /// Entries without a `:` separator are silently dropped.
    pub fn extra_hosts(&self) -> PorterResult<BTreeMap<String, String>> {
        let mut hosts = BTreeMap::new();
        if let Some(raw) = self.get(EXTRA_HOSTS) {
            let entries: Vec<String> = serde_json::from_str(raw)?;
            for entry in entries {
                if let Some((host, ip)) = entry.split_once(':') {
                    hosts.insert(host.to_string(), ip.to_string());
                }
            }
        }
        Ok(hosts)
    }

    /// The bypass4netns markers as `(enabled, bind_enabled)`.
    ///
    /// `bind_enabled` is true when the bypass service also owns bind sockets
    /// on the host side, which makes separate port exposure unnecessary.
    #[must_use]
    pub fn bypass_flags(&self) -> (bool, bool) {
        let enabled = self.get(BYPASS4NETNS).is_some_and(parse_bool);
        let ignore_bind = self.get(BYPASS4NETNS_IGNORE_BIND).is_some_and(parse_bool);
        (enabled, enabled && !ignore_bind)
    }
}

/// Permissive boolean parsing for marker annotations.
fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "true" | "True" | "TRUE")
}
