// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use pullwise::fetch::PullPolicy;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pullwise")]
#[command(about = "Policy-driven container image fetching for Docker and Podman")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (default: discovered in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new pullwise.yml configuration file
    Init {
        /// Overwrite an existing pullwise.yml
        #[arg(long)]
        force: bool,
    },

    /// Fetch an image into the daemon, from the registry, or into an OCI layout
    Fetch {
        /// Image reference, e.g. alpine:3.20
        image: String,

        /// always, never, if-not-present, hourly, daily, weekly, interval=<spec>
        #[arg(short, long)]
        pull_policy: Option<PullPolicy>,

        /// Target platform, os/arch[/variant]
        #[arg(long)]
        platform: Option<String>,

        /// Resolve in the registry without touching the daemon
        #[arg(long, conflicts_with = "layout")]
        registry: bool,

        /// Save into an OCI image layout at PATH
        #[arg(long, value_name = "PATH")]
        layout: Option<PathBuf>,

        /// Skip layer blobs when saving a layout
        #[arg(long, requires = "layout")]
        sparse: bool,
    },

    /// Inspect or maintain the pull ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Show the ledger contents
    Show,

    /// Drop entries older than the pruning interval
    Prune,

    /// Report whether an image is due for a pull
    Check {
        image: String,
    },

    /// Forget the recorded pull of an image
    Forget {
        image: String,
    },
}
