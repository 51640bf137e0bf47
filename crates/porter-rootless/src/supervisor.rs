//! Client for the rootless supervisor's port API.
//!
//! The supervisor runs on the host side of the user namespace and ferries
//! connections from host ports into the child. The hook asks it for the
//! child address and port-driver capabilities, and tells it which published
//! ports to expose or retract. The API speaks newline-delimited JSON over
//! a UNIX socket in the supervisor's state directory.

use std::io::{BufRead, BufReader, Write};
use std::net::IpAddr;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use porter_common::{PorterError, PorterResult};
use porter_net::PortMapping;

use crate::detect::STATE_DIR_ENV;

/// Name of the API socket inside the supervisor state directory.
pub const API_SOCKET: &str = "api.sock";

/// What the supervisor reports about itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorInfo {
    /// Network driver properties.
    #[serde(default)]
    pub network_driver: NetworkDriverInfo,
    /// Port driver properties.
    #[serde(default)]
    pub port_driver: PortDriverInfo,
}

/// Network-driver section of [`SupervisorInfo`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDriverInfo {
    /// The child namespace's own IP, when the driver assigns one.
    #[serde(default, rename = "childIP")]
    pub child_ip: Option<IpAddr>,
}

/// Port-driver section of [`SupervisorInfo`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDriverInfo {
    /// True when the driver cannot forward to a loopback address inside the
    /// child namespace.
    #[serde(default, rename = "disallowLoopbackChildIP")]
    pub disallow_loopback_child_ip: bool,
}

/// The supervisor operations the hook depends on.
pub trait Supervisor {
    /// Query driver capabilities and the child IP.
    fn info(&self) -> PorterResult<SupervisorInfo>;
    /// Expose the given host ports into the child namespace.
    fn expose_ports(&self, ports: &[PortMapping]) -> PorterResult<()>;
    /// Retract previously exposed ports.
    fn unexpose_ports(&self, ports: &[PortMapping]) -> PorterResult<()>;
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum Request<'a> {
    Info,
    Expose { ports: &'a [PortMapping] },
    Unexpose { ports: &'a [PortMapping] },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum Response {
    Ok {
        #[serde(default)]
        info: Option<SupervisorInfo>,
    },
    Error {
        message: String,
    },
}

/// UNIX-socket client for the supervisor API.
#[derive(Debug, Clone)]
pub struct SupervisorClient {
    socket_path: PathBuf,
}

impl SupervisorClient {
    /// Client over an explicit socket path.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Client over the socket advertised in the supervisor's state-dir
    /// environment variable.
    pub fn from_env() -> PorterResult<Self> {
        let state_dir = std::env::var(STATE_DIR_ENV).map_err(|_| PorterError::Rpc {
            message: format!("{STATE_DIR_ENV} is not set; not inside a rootless child?"),
        })?;
        Ok(Self::new(Path::new(&state_dir).join(API_SOCKET)))
    }

    fn call(&self, request: &Request<'_>) -> PorterResult<Option<SupervisorInfo>> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| PorterError::Rpc {
            message: format!(
                "cannot reach the rootless supervisor at {}: {e}",
                self.socket_path.display()
            ),
        })?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream.write_all(line.as_bytes())?;

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response)?;
        match serde_json::from_str(&response)? {
            Response::Ok { info } => Ok(info),
            Response::Error { message } => Err(PorterError::Rpc {
                message: format!("rootless supervisor refused the request: {message}"),
            }),
        }
    }
}

impl Supervisor for SupervisorClient {
    fn info(&self) -> PorterResult<SupervisorInfo> {
        self.call(&Request::Info)?.ok_or_else(|| PorterError::Rpc {
            message: "rootless supervisor returned no info payload".to_string(),
        })
    }

    fn expose_ports(&self, ports: &[PortMapping]) -> PorterResult<()> {
        self.call(&Request::Expose { ports })?;
        Ok(())
    }

    fn unexpose_ports(&self, ports: &[PortMapping]) -> PorterResult<()> {
        self.call(&Request::Unexpose { ports })?;
        Ok(())
    }
}
