//! # ringctl - command-line front end for consistent hash rings
//!
//! Creates, inspects and edits rings held either as serialized JSON
//! documents (memory backend) or in an on-disk store (persistent backend).
//!
//! ## Commands
//!
//! ```text
//! create                     create a ring (-v VNODES -p PNODES [-a ALG])
//! deserialize-ring           load a serialized ring into a store directory
//! add-data                   attach data to vnodes (-v LIST [-d DATA])
//! remap-vnode                move vnodes to a pnode (-v LIST -p PNODE)
//! remove-pnode               remove a pnode, redistributing its vnodes
//! get-pnodes                 list pnodes
//! get-vnodes PNODE           list the vnodes of a pnode
//! get-vnode-pnode-and-data   owner and data of vnodes (-v LIST)
//! get-node KEY               where a key lands
//! get-hashspace              start of each vnode's hash range (-v LIST)
//! print-hash                 print the serialized ring
//! diff FILE1 FILE2           per-pnode vnode changes between two rings
//! ```
//!
//! ## Configuration
//!
//! Defaults come from the environment and are overridden by flags:
//!
//! ```text
//! RINGCTL_BACKEND     memory | persistent          (default: "memory")
//! RINGCTL_LOCATION    topology file or store dir   (default: stdin)
//! RINGCTL_ALGORITHM   sha256 | sha1 | md5          (default: "sha256")
//! RINGCTL_LOG         tracing filter               (default: "warn")
//! RINGCTL_STORE_SYNC  fsync every store batch      (default: "true")
//! RINGCTL_COMPACT_MB  store compaction threshold   (default: 64)
//! ```
//!
//! `RUST_LOG`, when set, takes precedence over `RINGCTL_LOG`. Logs go to
//! stderr; stdout carries only command output.
//!
//! ## Example
//!
//! ```text
//! $ ringctl create -v 4 -p "A, B" -o > ring.json
//! $ ringctl remap-vnode -l ring.json -v 0 -p B -o > ring2.json
//! $ ringctl diff ring.json ring2.json
//! {"A":{"removed":[0]},"B":{"added":[0]}}
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{BackendChoice, Settings};

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ringctl", version, about = "Consistent hash ring tool")]
struct Cli {
    /// Tracing filter directive (overrides RINGCTL_LOG).
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Which ring a command works on.
#[derive(Args, Debug, Clone)]
pub struct RingArgs {
    /// Backend holding the ring: memory or persistent.
    #[arg(short, long)]
    pub backend: Option<BackendChoice>,

    /// Serialized ring file (memory; stdin if absent) or store directory
    /// (persistent).
    #[arg(short, long)]
    pub location: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Create a consistent hash ring.
    Create {
        /// Number of vnodes.
        #[arg(short = 'v', long = "vnodes")]
        vnodes: u32,

        /// Pnode names, comma or space separated. May be repeated.
        #[arg(short = 'p', long = "pnode", required = true)]
        pnodes: Vec<String>,

        /// Hash algorithm: sha256, sha1 or md5.
        #[arg(short, long)]
        algorithm: Option<String>,

        #[command(flatten)]
        ring: RingArgs,

        /// Print the serialized ring.
        #[arg(short, long)]
        output: bool,
    },

    /// Load a serialized ring into a persistent store directory.
    DeserializeRing {
        /// Store directory to create.
        #[arg(short, long)]
        location: PathBuf,

        /// Serialized ring; read from stdin if absent.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Attach data to vnodes. Without --data, existing data is removed.
    AddData {
        /// Vnodes, comma or space separated.
        #[arg(short = 'v', long = "vnodes")]
        vnodes: String,

        #[arg(short, long)]
        data: Option<String>,

        #[command(flatten)]
        ring: RingArgs,

        #[arg(short, long)]
        output: bool,
    },

    /// Move vnodes to a pnode, creating the pnode if needed.
    RemapVnode {
        #[arg(short = 'v', long = "vnodes")]
        vnodes: String,

        /// Destination pnode.
        #[arg(short, long)]
        pnode: String,

        #[command(flatten)]
        ring: RingArgs,

        #[arg(short, long)]
        output: bool,
    },

    /// Remove a pnode, handing its vnodes to the remaining pnodes.
    RemovePnode {
        #[arg(short, long)]
        pnode: String,

        #[command(flatten)]
        ring: RingArgs,

        #[arg(short, long)]
        output: bool,
    },

    /// List the pnodes of a ring.
    GetPnodes {
        #[command(flatten)]
        ring: RingArgs,
    },

    /// List the vnodes owned by a pnode.
    GetVnodes {
        pnode: String,

        #[command(flatten)]
        ring: RingArgs,
    },

    /// Show the owner and data of vnodes.
    GetVnodePnodeAndData {
        #[arg(short = 'v', long = "vnodes")]
        vnodes: String,

        #[command(flatten)]
        ring: RingArgs,
    },

    /// Show which vnode and pnode a key maps to.
    GetNode {
        key: String,

        #[command(flatten)]
        ring: RingArgs,
    },

    /// Show where each vnode's range of the hash space starts.
    GetHashspace {
        #[arg(short = 'v', long = "vnodes")]
        vnodes: String,

        #[command(flatten)]
        ring: RingArgs,
    },

    /// Print the serialized ring.
    PrintHash {
        #[command(flatten)]
        ring: RingArgs,
    },

    /// Compare two rings. Either input may be '-' for stdin.
    ///
    /// Give -b once for both inputs, or twice for one backend per input.
    Diff {
        #[arg(short, long, num_args = 1, action = clap::ArgAction::Append)]
        backend: Vec<BackendChoice>,

        first: String,
        second: String,
    },
}

fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("reading RINGCTL_* environment")?;
    setup_tracing(cli.log.as_deref().unwrap_or(&settings.log_filter));

    let runner = commands::Runner::new(settings);
    match cli.command {
        Command::Create {
            vnodes,
            pnodes,
            algorithm,
            ring,
            output,
        } => runner.create(vnodes, &pnodes, algorithm, &ring, output),
        Command::DeserializeRing { location, file } => runner.deserialize_ring(&location, file.as_deref()),
        Command::AddData {
            vnodes,
            data,
            ring,
            output,
        } => runner.add_data(&vnodes, data, &ring, output),
        Command::RemapVnode {
            vnodes,
            pnode,
            ring,
            output,
        } => runner.remap_vnode(&vnodes, &pnode, &ring, output),
        Command::RemovePnode { pnode, ring, output } => runner.remove_pnode(&pnode, &ring, output),
        Command::GetPnodes { ring } => runner.get_pnodes(&ring),
        Command::GetVnodes { pnode, ring } => runner.get_vnodes(&pnode, &ring),
        Command::GetVnodePnodeAndData { vnodes, ring } => runner.get_vnode_pnode_and_data(&vnodes, &ring),
        Command::GetNode { key, ring } => runner.get_node(&key, &ring),
        Command::GetHashspace { vnodes, ring } => runner.get_hashspace(&vnodes, &ring),
        Command::PrintHash { ring } => runner.print_hash(&ring),
        Command::Diff {
            backend,
            first,
            second,
        } => runner.diff(&backend, &first, &second),
    }
}
