//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use crate::hook;

/// Porter - Container Manager
#[derive(Parser)]
#[command(name = "porter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// OCI runtime lifecycle hook (invoked by the runtime, not by users)
    #[command(name = "oci-hook", hide = true)]
    OciHook {
        /// Lifecycle event reported by the runtime
        event: String,

        /// Path to the Porter data store
        data_store: PathBuf,

        /// Directory containing the CNI plugin binaries
        cni_path: PathBuf,

        /// Directory containing the CNI network configuration lists
        cni_netconf_path: PathBuf,
    },
}

impl Cli {
    /// Execute the selected command.
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::OciHook {
                event,
                data_store,
                cni_path,
                cni_netconf_path,
            } => {
                let stdin = std::io::stdin();
                hook::run(
                    stdin.lock(),
                    &event,
                    &data_store,
                    &cni_path,
                    &cni_netconf_path,
                )?;
                Ok(())
            }
        }
    }
}
