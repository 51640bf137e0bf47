//! Rootless child detection.

/// Environment variable the rootless supervisor sets for its children,
/// pointing at its state directory (which also holds the API socket).
pub const STATE_DIR_ENV: &str = "ROOTLESSKIT_STATE_DIR";

/// Whether the current process runs inside the rootless supervisor's child
/// user namespace.
///
/// The supervisor exports its state directory to every child, and the child
/// runs in a user namespace that is not the host's. Both must hold: the env
/// var alone could be inherited by an unrelated process tree.
#[must_use]
pub fn is_rootless_child() -> bool {
    match std::env::var(STATE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => in_user_namespace(),
        _ => false,
    }
}

/// Whether the manager as a whole runs without host root: either the
/// effective UID is non-zero or we are already inside a user namespace.
#[cfg(unix)]
#[must_use]
pub fn is_rootless() -> bool {
    !nix::unistd::geteuid().is_root() || in_user_namespace()
}

/// Whether the current user namespace differs from the host's, judged by
/// `/proc/self/uid_map`: the host namespace maps the full ID range onto
/// itself.
#[cfg(target_os = "linux")]
fn in_user_namespace() -> bool {
    match std::fs::read_to_string("/proc/self/uid_map") {
        Ok(contents) => {
            let fields: Vec<&str> = contents.split_whitespace().collect();
            fields != ["0", "0", "4294967295"]
        }
        // No procfs view means we cannot be in the host namespace setup the
        // supervisor creates; treat the env var as authoritative.
        Err(_) => true,
    }
}

#[cfg(not(target_os = "linux"))]
fn in_user_namespace() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_the_env_var_we_are_not_a_child() {
        // The test environment never runs under the rootless supervisor.
        if std::env::var_os(STATE_DIR_ENV).is_none() {
            assert!(!is_rootless_child());
        }
    }
}
