//! Mock collaborators shared by the hook tests.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use porter_common::{PorterError, PorterResult};
use porter_net::cni::{Cni, CniResult, NamespaceOpt};
use porter_net::PortMapping;
use porter_oci::RuntimeState;
use porter_rootless::bypass::BypassDaemon;
use porter_rootless::supervisor::{
    NetworkDriverInfo, PortDriverInfo, Supervisor, SupervisorInfo,
};

use super::context::HandlerContext;

/// Ordered record of collaborator invocations, shared across mocks.
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn take(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Shared recorder for values a mock observed.
pub(crate) struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Recorder<T> {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub(crate) fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }
}

impl<T: Clone> Recorder<T> {
    pub(crate) fn take(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// A context with sane defaults for handler tests; annotations always
/// include the `default` namespace and an empty network list.
pub(crate) fn test_context(annotations: &[(&str, &str)]) -> HandlerContext {
    let mut map: HashMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    map.entry(porter_oci::annotations::NAMESPACE.to_string())
        .or_insert_with(|| "default".to_string());
    map.entry(porter_oci::annotations::NETWORKS.to_string())
        .or_insert_with(|| "[]".to_string());

    HandlerContext {
        state: RuntimeState {
            oci_version: "1.2.0".to_string(),
            id: "c1".to_string(),
            status: None,
            pid: Some(std::process::id()),
            bundle: "/run/bundles/c1".into(),
            annotations: map,
        },
        data_store: std::env::temp_dir(),
        rootfs: "/run/bundles/c1/rootfs".into(),
        full_id: "default-c1".to_string(),
        state_dir: String::new(),
        ports: Vec::new(),
        cni_names: Vec::new(),
        cni: None,
        container_ip: None,
        container_ip6: None,
        container_mac: None,
        extra_hosts: BTreeMap::new(),
        supervisor: None,
        bypass: None,
        rootless: false,
    }
}

/// Extract the host IPs from the `portMappings` capability in an option set.
pub(crate) fn recorded_ports(opts: &[NamespaceOpt]) -> Vec<String> {
    for opt in opts {
        if let NamespaceOpt::Capability(name, value) = opt {
            if name == "portMappings" {
                return value
                    .as_array()
                    .map(|ports| {
                        ports
                            .iter()
                            .map(|p| p["HostIP"].as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .unwrap_or_default();
            }
        }
    }
    Vec::new()
}

/// Recording CNI driver.
pub(crate) struct MockCni {
    results: Vec<CniResult>,
    setup_error: Option<String>,
    remove_error: Option<String>,
    calls: Recorder<(String, String, String)>,
    opts: Recorder<NamespaceOpt>,
    log: Option<CallLog>,
}

impl MockCni {
    pub(crate) fn new(results: Vec<CniResult>) -> Self {
        Self {
            results,
            setup_error: None,
            remove_error: None,
            calls: Recorder::new(),
            opts: Recorder::new(),
            log: None,
        }
    }

    pub(crate) fn failing_setup(message: &str) -> Self {
        let mut cni = Self::new(Vec::new());
        cni.setup_error = Some(message.to_string());
        cni
    }

    pub(crate) fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Handle to the recorded `(operation, id, netns)` triples.
    pub(crate) fn calls(&self) -> Recorder<(String, String, String)> {
        self.calls.clone()
    }

    /// Handle to the flattened option list the last call saw.
    pub(crate) fn opts(&self) -> Recorder<NamespaceOpt> {
        self.opts.clone()
    }
}

impl Cni for MockCni {
    fn setup(
        &self,
        id: &str,
        netns_path: &str,
        opts: &[NamespaceOpt],
    ) -> PorterResult<Vec<CniResult>> {
        self.calls
            .push(("setup".to_string(), id.to_string(), netns_path.to_string()));
        for opt in opts {
            self.opts.push(opt.clone());
        }
        if let Some(log) = &self.log {
            log.push("cni.setup");
        }
        if let Some(message) = &self.setup_error {
            return Err(PorterError::Cni {
                message: message.clone(),
            });
        }
        Ok(self.results.clone())
    }

    fn remove(&self, id: &str, netns_path: &str, opts: &[NamespaceOpt]) -> PorterResult<()> {
        self.calls
            .push(("remove".to_string(), id.to_string(), netns_path.to_string()));
        for opt in opts {
            self.opts.push(opt.clone());
        }
        if let Some(log) = &self.log {
            log.push("cni.remove");
        }
        if let Some(message) = &self.remove_error {
            return Err(PorterError::Cni {
                message: message.clone(),
            });
        }
        Ok(())
    }
}

/// Recording supervisor.
pub(crate) struct MockSupervisor {
    child_ip: Option<IpAddr>,
    disallow_loopback_child_ip: bool,
    exposed: Recorder<PortMapping>,
    unexposed: Recorder<PortMapping>,
    log: Option<CallLog>,
}

impl MockSupervisor {
    pub(crate) fn new(child_ip: Option<&str>, disallow_loopback_child_ip: bool) -> Self {
        Self {
            child_ip: child_ip.map(|ip| ip.parse().unwrap()),
            disallow_loopback_child_ip,
            exposed: Recorder::new(),
            unexposed: Recorder::new(),
            log: None,
        }
    }

    pub(crate) fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Handle to the ports passed to `expose_ports`.
    pub(crate) fn exposed(&self) -> Recorder<PortMapping> {
        self.exposed.clone()
    }
}

impl Supervisor for MockSupervisor {
    fn info(&self) -> PorterResult<SupervisorInfo> {
        Ok(SupervisorInfo {
            network_driver: NetworkDriverInfo {
                child_ip: self.child_ip,
            },
            port_driver: PortDriverInfo {
                disallow_loopback_child_ip: self.disallow_loopback_child_ip,
            },
        })
    }

    fn expose_ports(&self, ports: &[PortMapping]) -> PorterResult<()> {
        for port in ports {
            self.exposed.push(port.clone());
        }
        if let Some(log) = &self.log {
            log.push("supervisor.expose");
        }
        Ok(())
    }

    fn unexpose_ports(&self, ports: &[PortMapping]) -> PorterResult<()> {
        for port in ports {
            self.unexposed.push(port.clone());
        }
        if let Some(log) = &self.log {
            log.push("supervisor.unexpose");
        }
        Ok(())
    }
}

/// Recording bypass daemon.
pub(crate) struct MockBypass {
    stop_error: Option<String>,
    log: Option<CallLog>,
}

impl MockBypass {
    pub(crate) fn ok() -> Self {
        Self {
            stop_error: None,
            log: None,
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            stop_error: Some(message.to_string()),
            log: None,
        }
    }

    pub(crate) fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl BypassDaemon for MockBypass {
    fn start_bypass(&self, _ports: &[PortMapping], _id: &str, _state_dir: &str) -> PorterResult<()> {
        if let Some(log) = &self.log {
            log.push("bypass.start");
        }
        Ok(())
    }

    fn stop_bypass(&self, _id: &str) -> PorterResult<()> {
        if let Some(log) = &self.log {
            log.push("bypass.stop");
        }
        match &self.stop_error {
            Some(message) => Err(PorterError::Rpc {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}
