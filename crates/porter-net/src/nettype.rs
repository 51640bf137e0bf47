//! Network mode detection.
//!
//! A container's `networks` annotation either selects one of the special
//! modes (`host`, `none`, `container:<id>`) or names one or more CNI
//! networks. The modes are mutually exclusive.

use porter_common::{PorterError, PorterResult};

/// The network mode requested for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Share the host's network namespace; no CNI work, no port mapping.
    Host,
    /// No networking at all.
    None,
    /// Share another container's namespace; that container owns the CNI
    /// attachments.
    Container,
    /// One or more named CNI networks.
    Cni,
}

impl NetworkType {
    fn classify(name: &str) -> Self {
        match name {
            "host" => Self::Host,
            "none" => Self::None,
            _ if name.starts_with("container:") => Self::Container,
            _ => Self::Cni,
        }
    }

    /// Canonical lowercase name of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::None => "none",
            Self::Container => "container",
            Self::Cni => "cni",
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify the requested network names into a single [`NetworkType`].
///
/// An empty list means no networking. Multiple entries are only valid when
/// every entry names a CNI network; the special modes must appear alone.
pub fn detect(networks: &[String]) -> PorterResult<NetworkType> {
    let mut detected: Option<NetworkType> = None;
    for name in networks {
        let ty = NetworkType::classify(name);
        match detected {
            None => detected = Some(ty),
            Some(NetworkType::Cni) if ty == NetworkType::Cni => {}
            Some(prev) => {
                return Err(PorterError::Config {
                    message: format!(
                        "cannot mix network {:?} with the {} network mode",
                        name, prev
                    ),
                });
            }
        }
    }
    Ok(detected.unwrap_or(NetworkType::None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_list_means_none() {
        assert_eq!(detect(&[]).unwrap(), NetworkType::None);
    }

    #[test]
    fn special_modes() {
        assert_eq!(detect(&names(&["host"])).unwrap(), NetworkType::Host);
        assert_eq!(detect(&names(&["none"])).unwrap(), NetworkType::None);
        assert_eq!(
            detect(&names(&["container:web"])).unwrap(),
            NetworkType::Container
        );
    }

    #[test]
    fn named_networks_are_cni() {
        assert_eq!(detect(&names(&["bridge"])).unwrap(), NetworkType::Cni);
        assert_eq!(
            detect(&names(&["bridge", "backend", "frontend"])).unwrap(),
            NetworkType::Cni
        );
    }

    #[test]
    fn mixing_modes_is_rejected() {
        assert!(detect(&names(&["host", "bridge"])).is_err());
        assert!(detect(&names(&["bridge", "none"])).is_err());
        assert!(detect(&names(&["host", "host"])).is_err());
        assert!(detect(&names(&["container:web", "bridge"])).is_err());
    }
}
