//! # porter-net
//!
//! Networking primitives for Porter containers.
//!
//! This crate covers the hook-facing side of container networking: deciding
//! which network mode a container asked for, resolving its network namespace
//! path, and attaching or detaching CNI networks.

#![warn(missing_docs)]

pub mod cni;
pub mod netns;
pub mod nettype;
pub mod portmap;

pub use cni::{Cni, CniEnv, CniResult, CniRuntime, NamespaceOpt, NetworkConfigList};
pub use netns::resolve_netns_path;
pub use nettype::NetworkType;
pub use portmap::PortMapping;
