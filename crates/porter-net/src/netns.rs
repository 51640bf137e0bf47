//! Network namespace path resolution.

use std::path::Path;

use porter_common::{PorterError, PorterResult};
use porter_oci::{Annotations, RuntimeState};

/// Resolve the network namespace path for a runtime state.
///
/// The explicit `network-namespace` annotation wins over the PID based
/// `/proc/<pid>/ns/net` path; VM-backed runtimes rely on that because their
/// state PID does not live in the container's network namespace. Without
/// either input there is nothing to resolve.
pub fn resolve_netns_path(state: &RuntimeState) -> PorterResult<String> {
    let annotations = Annotations::new(&state.annotations);

    if let Some(path) = annotations.netns_path() {
        // On Windows the annotation carries an HCN namespace UUID, not a
        // filesystem path, so the existence check is Unix-only.
        #[cfg(unix)]
        require_exists(path)?;
        return Ok(path.to_string());
    }

    let pid = state.pid_or_zero();
    if pid == 0 {
        return Err(PorterError::Config {
            message: "both the state PID and the network-namespace annotation are unset"
                .to_string(),
        });
    }

    let path = format!("/proc/{pid}/ns/net");
    require_exists(&path)?;
    Ok(path)
}

fn require_exists(path: &str) -> PorterResult<()> {
    if Path::new(path).exists() {
        Ok(())
    } else {
        Err(PorterError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("network namespace path {path:?} does not exist"),
        )))
    }
}
