//! AppArmor profile management.
//!
//! Containers run under the default Porter profile when the host supports
//! AppArmor. The hook only makes sure the profile is loaded before a
//! container starts; applying it is the runtime's job.

use porter_common::{PorterError, PorterResult};

/// Name of the default container profile.
pub const DEFAULT_PROFILE: &str = "porter-default";

const DEFAULT_PROFILE_CONTENT: &str = r#"#include <tunables/global>

profile porter-default flags=(attach_disconnected,mediate_deleted) {
  #include <abstractions/base>

  network,
  capability,
  file,
  umount,

  deny @{PROC}/sys/kernel/** wklx,
  deny @{PROC}/sysrq-trigger rwklx,
  deny mount,
  deny /sys/firmware/** rwklx,
}
"#;

/// Check if AppArmor is enabled on the system.
#[cfg(target_os = "linux")]
pub fn is_enabled() -> bool {
    std::path::Path::new("/sys/module/apparmor").exists()
        && std::path::Path::new("/sys/kernel/security/apparmor").exists()
}

#[cfg(not(target_os = "linux"))]
pub fn is_enabled() -> bool {
    false
}

/// Make sure the default profile is loaded.
///
/// A missing profile only degrades confinement, so failures are logged and
/// never block container creation.
pub fn ensure_default_profile() {
    if !is_enabled() {
        tracing::debug!("AppArmor not enabled, skipping profile load");
        return;
    }
    if is_loaded(DEFAULT_PROFILE) {
        return;
    }
    if let Err(e) = load_default_profile() {
        tracing::warn!(
            error = %e,
            profile = DEFAULT_PROFILE,
            "failed to load the default AppArmor profile"
        );
    }
}

#[cfg(target_os = "linux")]
fn is_loaded(name: &str) -> bool {
    match std::fs::read_to_string("/sys/kernel/security/apparmor/profiles") {
        Ok(profiles) => profiles
            .lines()
            .any(|line| line.split_whitespace().next() == Some(name)),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_loaded(_name: &str) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn load_default_profile() -> PorterResult<()> {
    let temp_path = std::env::temp_dir().join(format!("apparmor-{DEFAULT_PROFILE}.profile"));
    std::fs::write(&temp_path, DEFAULT_PROFILE_CONTENT)?;

    let output = std::process::Command::new("apparmor_parser")
        .args(["-r", "-W"])
        .arg(&temp_path)
        .output()
        .map_err(|e| PorterError::Internal {
            message: format!("failed to run apparmor_parser: {e}"),
        })?;

    std::fs::remove_file(&temp_path).ok();

    if !output.status.success() {
        return Err(PorterError::Internal {
            message: format!(
                "apparmor_parser failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    tracing::info!(profile = DEFAULT_PROFILE, "AppArmor profile loaded");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn load_default_profile() -> PorterResult<()> {
    Err(PorterError::Unsupported {
        feature: "AppArmor".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_content_declares_the_profile() {
        assert!(DEFAULT_PROFILE_CONTENT.contains("profile porter-default"));
    }

    #[test]
    fn ensure_never_panics() {
        // Works both with and without AppArmor on the test host.
        ensure_default_profile();
    }
}
