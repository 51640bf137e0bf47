//! Client for the bypass4netns daemon.
//!
//! bypass4netns intercepts TCP sockets inside the child namespace and
//! replays them on the host side, removing the user-mode networking hop.
//! The hook starts a bypass when the container comes up and stops it at
//! teardown. Same wire shape as the supervisor API: newline-delimited JSON
//! over a UNIX socket.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use porter_common::{PorterError, PorterResult};
use porter_net::PortMapping;

/// Socket file name inside the user's runtime directory.
pub const SOCKET_NAME: &str = "bypass4netnsd.sock";

/// Hint appended to connection failures; installing the daemon is a one-time
/// setup step users tend to miss.
const INSTALL_HINT: &str = "run `porter-rootless-setup.sh install-bypass4netnsd`";

/// Default socket path, under `$XDG_RUNTIME_DIR`.
pub fn default_socket_path() -> PorterResult<PathBuf> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").map_err(|_| PorterError::Rpc {
        message: "XDG_RUNTIME_DIR is not set; cannot locate the bypass4netns socket".to_string(),
    })?;
    Ok(PathBuf::from(runtime_dir).join(SOCKET_NAME))
}

/// The bypass operations the hook depends on.
pub trait BypassDaemon {
    /// Start bypassing for a container with its published ports.
    fn start_bypass(&self, ports: &[PortMapping], id: &str, state_dir: &str) -> PorterResult<()>;
    /// Stop bypassing for a container.
    fn stop_bypass(&self, id: &str) -> PorterResult<()>;
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum Request<'a> {
    StartBypass {
        id: &'a str,
        #[serde(rename = "stateDir")]
        state_dir: &'a str,
        ports: &'a [PortMapping],
    },
    StopBypass {
        id: &'a str,
    },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum Response {
    Ok {},
    Error { message: String },
}

/// UNIX-socket client for the bypass4netns daemon.
#[derive(Debug, Clone)]
pub struct BypassClient {
    socket_path: PathBuf,
}

impl BypassClient {
    /// Connect to the daemon, verifying it is reachable.
    ///
    /// The connection itself is per-request; this probes the socket once so
    /// a missing daemon is reported while the hook still has context to
    /// explain it.
    pub fn connect(socket_path: impl Into<PathBuf>) -> PorterResult<Self> {
        let socket_path = socket_path.into();
        UnixStream::connect(&socket_path).map_err(|e| PorterError::Rpc {
            message: format!("bypass4netnsd not running? (hint: {INSTALL_HINT}): {e}"),
        })?;
        Ok(Self { socket_path })
    }

    fn call(&self, request: &Request<'_>) -> PorterResult<()> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| PorterError::Rpc {
            message: format!("bypass4netnsd not running? (hint: {INSTALL_HINT}): {e}"),
        })?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream.write_all(line.as_bytes())?;

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response)?;
        match serde_json::from_str(&response)? {
            Response::Ok {} => Ok(()),
            Response::Error { message } => Err(PorterError::Rpc {
                message: format!("bypass4netnsd refused the request: {message}"),
            }),
        }
    }
}

impl BypassDaemon for BypassClient {
    fn start_bypass(&self, ports: &[PortMapping], id: &str, state_dir: &str) -> PorterResult<()> {
        tracing::debug!(id, ports = ports.len(), "starting bypass4netns");
        self.call(&Request::StartBypass {
            id,
            state_dir,
            ports,
        })
    }

    fn stop_bypass(&self, id: &str) -> PorterResult<()> {
        tracing::debug!(id, "stopping bypass4netns");
        self.call(&Request::StopBypass { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn connect_failure_carries_the_install_hint() {
        let err = BypassClient::connect("/nonexistent/bypass.sock").unwrap_err();
        assert!(err.to_string().contains("install-bypass4netnsd"));
    }

    #[test]
    fn start_and_stop_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let socket = dir.path().join(SOCKET_NAME);
        let listener = UnixListener::bind(&socket).unwrap();

        let server = std::thread::spawn(move || {
            let mut requests = Vec::new();
            // One probe connection from connect(), then two calls.
            let (_probe, _) = listener.accept().unwrap();
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request = String::new();
                reader.read_line(&mut request).unwrap();
                requests.push(request);
                let mut stream = stream;
                stream.write_all(b"{\"status\":\"ok\"}\n").unwrap();
            }
            requests
        });

        let client = BypassClient::connect(&socket).unwrap();
        client
            .start_bypass(&[], "c1", "/run/porter/c1")
            .unwrap();
        client.stop_bypass("c1").unwrap();

        let requests = server.join().unwrap();
        assert!(requests[0].contains("\"op\":\"startBypass\""));
        assert!(requests[0].contains("\"id\":\"c1\""));
        assert!(requests[1].contains("\"op\":\"stopBypass\""));
    }
}
