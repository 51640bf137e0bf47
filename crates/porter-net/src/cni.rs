//! CNI configuration discovery and plugin invocation.
//!
//! Network configurations are `.conflist` files: a named list of plugin
//! configurations executed in order. The hook selects the lists a container
//! asked for, attaches them at setup and detaches them at teardown, keyed by
//! the container's full ID in both directions.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use porter_common::{PorterError, PorterResult};

/// A parsed CNI configuration list.
#[derive(Debug, Clone)]
pub struct NetworkConfigList {
    /// Network name (the key users select networks by).
    pub name: String,
    /// Declared CNI spec version.
    pub cni_version: String,
    /// Plugin configurations, in execution order.
    pub plugins: Vec<Map<String, Value>>,
    /// The complete configuration list as read from disk.
    pub bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct ConfListFile {
    name: String,
    #[serde(rename = "cniVersion", default)]
    cni_version: String,
    #[serde(default)]
    plugins: Vec<Map<String, Value>>,
}

impl NetworkConfigList {
    /// Parse a configuration list from its on-disk bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> PorterResult<Self> {
        let parsed: ConfListFile = serde_json::from_slice(&bytes)?;
        Ok(Self {
            name: parsed.name,
            cni_version: parsed.cni_version,
            plugins: parsed.plugins,
            bytes,
        })
    }
}

/// The CNI configuration lists visible to one namespace.
///
/// Lists at the top level of the netconf directory are available everywhere;
/// lists under `<netconf>/<namespace>/` are scoped to that namespace and
/// shadow same-named defaults.
#[derive(Debug)]
pub struct CniEnv {
    networks: HashMap<String, NetworkConfigList>,
}

impl CniEnv {
    /// Enumerate the configuration lists under `netconf_dir` for `namespace`.
    ///
    /// A missing directory yields an empty environment; unknown network
    /// names are reported at lookup time, not here.
    pub fn new(netconf_dir: &Path, namespace: &str) -> PorterResult<Self> {
        let mut networks = HashMap::new();
        load_dir(netconf_dir, &mut networks)?;
        load_dir(&netconf_dir.join(namespace), &mut networks)?;
        Ok(Self { networks })
    }

    /// Look up a configuration list by network name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NetworkConfigList> {
        self.networks.get(name)
    }

    /// Number of known networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether no configuration list was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

fn load_dir(dir: &Path, networks: &mut HashMap<String, NetworkConfigList>) -> PorterResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("conflist") {
            continue;
        }
        let bytes = std::fs::read(&path)?;
        let config = NetworkConfigList::from_bytes(bytes).map_err(|e| PorterError::Config {
            message: format!("invalid network configuration {}: {e}", path.display()),
        })?;
        networks.insert(config.name.clone(), config);
    }
    Ok(())
}

/// A per-invocation option forwarded to the CNI plugins.
///
/// Labels and args both travel as `CNI_ARGS` entries; capabilities are
/// injected into each plugin's `runtimeConfig`, filtered by the
/// capabilities that plugin declares.
#[derive(Debug, Clone)]
pub enum NamespaceOpt {
    /// A loosely verified key/value forwarded alongside the args.
    Label(String, String),
    /// A CNI argument.
    Arg(String, String),
    /// A capability argument.
    Capability(String, Value),
}

impl NamespaceOpt {
    /// Build a label option.
    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Label(key.into(), value.into())
    }

    /// Build an argument option.
    pub fn arg(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Arg(key.into(), value.into())
    }

    /// Build a capability option from any serializable value.
    pub fn capability(name: impl Into<String>, value: &impl Serialize) -> PorterResult<Self> {
        Ok(Self::Capability(name.into(), serde_json::to_value(value)?))
    }
}

/// The result of attaching one network: its interfaces and IP allocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    /// CNI spec version of the result.
    #[serde(default)]
    pub cni_version: String,
    /// Interfaces created by the attachment.
    #[serde(default)]
    pub interfaces: Vec<CniInterface>,
    /// IP allocations.
    #[serde(default)]
    pub ips: Vec<CniIpConfig>,
    /// Routes installed in the namespace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Value>,
    /// DNS settings reported by the plugins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Value>,
}

/// An interface in a [`CniResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniInterface {
    /// Interface name.
    pub name: String,
    /// MAC address.
    #[serde(default)]
    pub mac: String,
    /// Namespace path the interface lives in.
    #[serde(default)]
    pub sandbox: String,
}

/// An IP allocation in a [`CniResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CniIpConfig {
    /// Allocated address in CIDR notation.
    pub address: String,
    /// Gateway for the allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Index into `interfaces`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<u32>,
}

impl CniResult {
    /// The first allocated address with its prefix stripped, if any.
    #[must_use]
    pub fn first_ip(&self) -> Option<&str> {
        self.ips
            .first()
            .map(|ip| ip.address.split('/').next().unwrap_or(&ip.address))
    }
}

/// The attachment operations the hook handlers drive.
///
/// The exec-based [`CniRuntime`] is the production implementation; tests
/// substitute recorders.
pub trait Cni {
    /// Attach every selected network inside `netns_path`, returning one
    /// result per network in selection order.
    fn setup(
        &self,
        id: &str,
        netns_path: &str,
        opts: &[NamespaceOpt],
    ) -> PorterResult<Vec<CniResult>>;

    /// Detach every selected network. An empty `netns_path` is valid: the
    /// namespace may already be gone at teardown.
    fn remove(&self, id: &str, netns_path: &str, opts: &[NamespaceOpt]) -> PorterResult<()>;
}

/// Exec-based CNI driver: invokes the plugin binaries per the CNI exec
/// protocol.
pub struct CniRuntime {
    plugin_dir: PathBuf,
    networks: Vec<NetworkConfigList>,
}

impl CniRuntime {
    /// Create a driver over the selected configuration lists.
    #[must_use]
    pub fn new(plugin_dir: impl Into<PathBuf>, networks: Vec<NetworkConfigList>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            networks,
        }
    }

    fn exec_plugin(
        &self,
        network: &NetworkConfigList,
        plugin: &Map<String, Value>,
        command: &str,
        id: &str,
        netns_path: &str,
        ifname: &str,
        cni_args: &str,
        capabilities: &Map<String, Value>,
        prev_result: Option<&Value>,
    ) -> PorterResult<Value> {
        let plugin_type = plugin
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PorterError::Cni {
                message: format!("network {:?} has a plugin without a type", network.name),
            })?;
        let binary = self.plugin_dir.join(plugin_type);
        if !binary.exists() {
            return Err(PorterError::Cni {
                message: format!(
                    "CNI plugin {:?} not found in {}",
                    plugin_type,
                    self.plugin_dir.display()
                ),
            });
        }

        let mut conf = plugin.clone();
        conf.insert("cniVersion".to_string(), Value::from(network.cni_version.clone()));
        conf.insert("name".to_string(), Value::from(network.name.clone()));
        if let Some(declared) = plugin.get("capabilities").and_then(Value::as_object) {
            let runtime_config: Map<String, Value> = capabilities
                .iter()
                .filter(|(k, _)| declared.get(*k).and_then(Value::as_bool) == Some(true))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !runtime_config.is_empty() {
                conf.insert("runtimeConfig".to_string(), Value::Object(runtime_config));
            }
        }
        if let Some(prev) = prev_result {
            conf.insert("prevResult".to_string(), prev.clone());
        }

        let mut cmd = Command::new(&binary);
        cmd.env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", id)
            .env("CNI_IFNAME", ifname)
            .env("CNI_PATH", &self.plugin_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !netns_path.is_empty() {
            cmd.env("CNI_NETNS", netns_path);
        }
        if !cni_args.is_empty() {
            cmd.env("CNI_ARGS", cni_args);
        }

        tracing::debug!(
            network = %network.name,
            plugin = plugin_type,
            command,
            ifname,
            "invoking CNI plugin"
        );

        let mut child = cmd.spawn().map_err(|e| PorterError::Cni {
            message: format!("failed to spawn CNI plugin {plugin_type:?}: {e}"),
        })?;
        child
            .stdin
            .take()
            .ok_or_else(|| PorterError::Internal {
                message: "CNI plugin stdin was not captured".to_string(),
            })?
            .write_all(&serde_json::to_vec(&conf)?)?;
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(PorterError::Cni {
                message: plugin_error_message(plugin_type, &output.stdout, &output.stderr),
            });
        }
        if output.stdout.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Render a failed plugin invocation, preferring the structured CNI error.
fn plugin_error_message(plugin_type: &str, stdout: &[u8], stderr: &[u8]) -> String {
    #[derive(Deserialize)]
    struct CniError {
        code: u32,
        msg: String,
        #[serde(default)]
        details: String,
    }
    if let Ok(err) = serde_json::from_slice::<CniError>(stdout) {
        if err.details.is_empty() {
            return format!("plugin {plugin_type:?} failed (code {}): {}", err.code, err.msg);
        }
        return format!(
            "plugin {plugin_type:?} failed (code {}): {}: {}",
            err.code, err.msg, err.details
        );
    }
    format!(
        "plugin {plugin_type:?} failed: {}",
        String::from_utf8_lossy(stderr).trim()
    )
}

/// Split the option list into `CNI_ARGS` entries and capability values.
fn collect_opts(opts: &[NamespaceOpt]) -> (String, Map<String, Value>) {
    let mut args = Vec::new();
    let mut capabilities = Map::new();
    for opt in opts {
        match opt {
            NamespaceOpt::Label(k, v) | NamespaceOpt::Arg(k, v) => {
                args.push(format!("{k}={v}"));
            }
            NamespaceOpt::Capability(k, v) => {
                capabilities.insert(k.clone(), v.clone());
            }
        }
    }
    (args.join(";"), capabilities)
}

impl Cni for CniRuntime {
    fn setup(
        &self,
        id: &str,
        netns_path: &str,
        opts: &[NamespaceOpt],
    ) -> PorterResult<Vec<CniResult>> {
        let (cni_args, capabilities) = collect_opts(opts);
        let mut results = Vec::with_capacity(self.networks.len());
        for (i, network) in self.networks.iter().enumerate() {
            let ifname = format!("eth{i}");
            let mut prev = None;
            for plugin in &network.plugins {
                let out = self.exec_plugin(
                    network,
                    plugin,
                    "ADD",
                    id,
                    netns_path,
                    &ifname,
                    &cni_args,
                    &capabilities,
                    prev.as_ref(),
                )?;
                if !out.is_null() {
                    prev = Some(out);
                }
            }
            let result = match prev {
                Some(value) => serde_json::from_value(value)?,
                None => CniResult::default(),
            };
            results.push(result);
        }
        Ok(results)
    }

    fn remove(&self, id: &str, netns_path: &str, opts: &[NamespaceOpt]) -> PorterResult<()> {
        let (cni_args, capabilities) = collect_opts(opts);
        for (i, network) in self.networks.iter().enumerate() {
            let ifname = format!("eth{i}");
            for plugin in network.plugins.iter().rev() {
                self.exec_plugin(
                    network,
                    plugin,
                    "DEL",
                    id,
                    netns_path,
                    &ifname,
                    &cni_args,
                    &capabilities,
                    None,
                )?;
            }
        }
        Ok(())
    }
}
