//! # CLI Interface
//!
//! Defines the command-line argument structure for `vigil-node` using
//! `clap` derive. Supports four subcommands: `run`, `keygen`,
//! `demo-approve`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// VIGIL steward approval daemon.
///
/// Hosts an approval orchestrator over an in-process relay, serves the
/// status API, and exposes Prometheus metrics. Authorization rounds can
/// be driven one-shot with `demo-approve` or continuously while running.
#[derive(Parser, Debug)]
#[command(
    name = "vigil-node",
    about = "VIGIL steward approval daemon",
    version,
    propagate_version = true
)]
pub struct VigilNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the VIGIL node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the approval daemon.
    Run(RunArgs),
    /// Generate a steward identity and messaging keypair — creates the
    /// data directory and writes both secret keys into it.
    Keygen(KeygenArgs),
    /// Run a single k-of-n approval round against a simulated federation
    /// and print the verdict.
    DemoApprove(DemoApproveArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory where steward keys are stored.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "VIGIL_DATA_DIR", default_value = "~/.vigil")]
    pub data_dir: PathBuf,

    /// Port for the status/REST API.
    #[arg(long, env = "VIGIL_RPC_PORT", default_value_t = vigil_protocol::config::DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "VIGIL_METRICS_PORT", default_value_t = vigil_protocol::config::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Number of simulated approver stewards in the hosted federation.
    #[arg(long, default_value_t = 3)]
    pub stewards: u32,

    /// Approvals required for a round to settle (k of n).
    #[arg(long, default_value_t = 2)]
    pub threshold: u32,

    /// Hex-encoded Ed25519 steward identity private key.
    ///
    /// If not provided, a fresh identity is generated at startup.
    /// **Never pass this flag in production** — use a key file instead.
    #[arg(long, env = "VIGIL_IDENTITY_KEY")]
    pub identity_key: Option<String>,

    /// When set, fire a demo payment round every N seconds so the audit
    /// and metrics pipelines carry live traffic.
    #[arg(long)]
    pub exercise_interval: Option<u64>,
}

/// Arguments for the `keygen` subcommand.
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "VIGIL_DATA_DIR", default_value = "~/.vigil")]
    pub data_dir: PathBuf,
}

/// Arguments for the `demo-approve` subcommand.
#[derive(Parser, Debug)]
pub struct DemoApproveArgs {
    /// Number of simulated approver stewards.
    #[arg(long, default_value_t = 3)]
    pub stewards: u32,

    /// Approvals required for the round to settle.
    #[arg(long, default_value_t = 2)]
    pub threshold: u32,

    /// Payment amount in the smallest currency unit.
    #[arg(long, default_value_t = 250_000)]
    pub amount: u64,

    /// Opaque recipient identifier.
    #[arg(long, default_value = "acct-demo")]
    pub recipient: String,

    /// Human-readable justification attached to the operation.
    #[arg(long, default_value = "demo payment")]
    pub purpose: String,

    /// How many of the simulated stewards reject instead of approving.
    #[arg(long, default_value_t = 0)]
    pub rejectors: u32,
}
