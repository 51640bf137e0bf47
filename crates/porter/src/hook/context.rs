//! Handler context construction.
//!
//! One context is built per hook invocation and shared by whichever handler
//! runs. It resolves everything the handlers need up front: the bundle
//! rootfs, the container's full ID, the selected CNI networks, the port
//! list, and the rootless clients when running inside the supervisor's
//! namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use porter_common::{PorterError, PorterResult};
use porter_net::cni::{Cni, CniEnv, CniRuntime};
use porter_net::{nettype, NetworkType, PortMapping};
use porter_oci::{bundle, Annotations, RuntimeState};
use porter_rootless::bypass::{default_socket_path, BypassClient, BypassDaemon};
use porter_rootless::supervisor::{Supervisor, SupervisorClient};
use porter_rootless::is_rootless_child;
use porter_store::write_pid_file;

/// Everything a handler needs to know about one invocation.
pub struct HandlerContext {
    /// The decoded runtime state.
    pub state: RuntimeState,
    /// The per-manager data store root.
    pub data_store: PathBuf,
    /// Absolute rootfs path of the bundle.
    pub rootfs: PathBuf,
    /// `<namespace>-<id>`: the key CNI state is held under. Setup and
    /// teardown must pass identical values.
    pub full_id: String,
    /// The per-container state directory (from the annotations).
    pub state_dir: String,
    /// Published ports, exactly as annotated. This list is the source of
    /// truth for both CNI and the rootless port forwarder; rewrites operate
    /// on copies.
    pub ports: Vec<PortMapping>,
    /// Selected network names, in user order. The hosts store zips this
    /// with the CNI result array, so the ordering is load-bearing.
    pub cni_names: Vec<String>,
    /// CNI driver, present only for the `cni` network type.
    pub cni: Option<Box<dyn Cni>>,
    /// Static IPv4 hint.
    pub container_ip: Option<String>,
    /// Static IPv6 hint.
    pub container_ip6: Option<String>,
    /// Static MAC hint.
    pub container_mac: Option<String>,
    /// Extra hosts-file entries.
    pub extra_hosts: BTreeMap<String, String>,
    /// Rootless supervisor client; present only inside a rootless child.
    pub supervisor: Option<Box<dyn Supervisor>>,
    /// bypass4netns client; present only when the bypass marker is set
    /// inside a rootless child.
    pub bypass: Option<Box<dyn BypassDaemon>>,
    /// Whether this invocation runs inside a rootless child, captured once.
    pub rootless: bool,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("state", &self.state)
            .field("data_store", &self.data_store)
            .field("rootfs", &self.rootfs)
            .field("full_id", &self.full_id)
            .field("state_dir", &self.state_dir)
            .field("ports", &self.ports)
            .field("cni_names", &self.cni_names)
            .field("cni", &self.cni.is_some())
            .field("container_ip", &self.container_ip)
            .field("container_ip6", &self.container_ip6)
            .field("container_mac", &self.container_mac)
            .field("extra_hosts", &self.extra_hosts)
            .field("supervisor", &self.supervisor.is_some())
            .field("bypass", &self.bypass.is_some())
            .field("rootless", &self.rootless)
            .finish()
    }
}

impl HandlerContext {
    /// A borrowed view over the state's annotations.
    #[must_use]
    pub fn annotations(&self) -> Annotations<'_> {
        Annotations::new(&self.state.annotations)
    }

    /// Build the context for one invocation.
    pub fn build(
        state: RuntimeState,
        data_store: &Path,
        cni_path: &Path,
        cni_netconf_path: &Path,
    ) -> PorterResult<Self> {
        let annotations = Annotations::new(&state.annotations);

        let extra_hosts = annotations.extra_hosts()?;
        let rootfs = bundle::rootfs_path(&state.bundle)?;

        let namespace = annotations
            .namespace()
            .ok_or_else(|| PorterError::Config {
                message: "namespace annotation must be set".to_string(),
            })?
            .to_string();
        if state.id.is_empty() {
            return Err(PorterError::Config {
                message: "state id must be set".to_string(),
            });
        }
        let full_id = format!("{namespace}-{}", state.id);

        let networks = annotations.networks()?;
        let net_type = nettype::detect(&networks)?;

        let mut cni: Option<Box<dyn Cni>> = None;
        let mut cni_names = Vec::new();
        if net_type == NetworkType::Cni {
            let env = CniEnv::new(cni_netconf_path, &namespace)?;
            let mut selected = Vec::with_capacity(networks.len());
            for name in &networks {
                let config = env.get(name).ok_or_else(|| PorterError::NoSuchNetwork {
                    name: name.clone(),
                })?;
                selected.push(config.clone());
                cni_names.push(name.clone());
            }
            if selected.is_empty() {
                tracing::warn!(
                    ?networks,
                    "no CNI network could be loaded from the requested names"
                );
            } else {
                cni = Some(Box::new(CniRuntime::new(cni_path, selected)));
            }
        }

        if let Some(pid_file) = annotations.pid_file() {
            write_pid_file(Path::new(pid_file), state.pid_or_zero())?;
        }

        let ports = match annotations.ports_json() {
            Some(raw) => serde_json::from_str(raw)?,
            None => Vec::new(),
        };
        let container_ip = annotations.ip_address().map(str::to_string);
        let container_ip6 = annotations.ip6_address().map(str::to_string);
        let container_mac = annotations.mac_address().map(str::to_string);
        let state_dir = annotations.state_dir().unwrap_or_default().to_string();

        let rootless = is_rootless_child();
        let mut supervisor: Option<Box<dyn Supervisor>> = None;
        let mut bypass: Option<Box<dyn BypassDaemon>> = None;
        if rootless {
            supervisor = Some(Box::new(SupervisorClient::from_env()?));
            let (bypass_enabled, _) = annotations.bypass_flags();
            if bypass_enabled {
                bypass = Some(Box::new(BypassClient::connect(default_socket_path()?)?));
            }
        }

        Ok(Self {
            state,
            data_store: data_store.to_path_buf(),
            rootfs,
            full_id,
            state_dir,
            ports,
            cni_names,
            cni,
            container_ip,
            container_ip6,
            container_mac,
            extra_hosts,
            supervisor,
            bypass,
            rootless,
        })
    }
}
