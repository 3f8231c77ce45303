use clap::Parser;
use std::path::PathBuf;

use crate::config::{PolicyKind, StorageBackend};

/// Axon session runtime - pipes raw agent events into derived event streams
#[derive(Parser, Debug, Clone)]
#[command(name = "axon", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "AXON_CONFIG", default_value = "axon.toml")]
    pub config: PathBuf,

    /// Storage backend for session persistence
    #[arg(long, env = "AXON_STORAGE_BACKEND", value_enum)]
    pub storage_backend: Option<StorageBackend>,

    /// Storage location (directory for file backend, database file for sqlite)
    #[arg(long, env = "AXON_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Per-subscriber event queue capacity
    #[arg(long, env = "AXON_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Backpressure policy for full subscriber queues
    #[arg(long, env = "AXON_BACKPRESSURE_POLICY", value_enum)]
    pub backpressure_policy: Option<PolicyKind>,

    /// Template id assigned to sessions opened for piped agents
    #[arg(long, env = "AXON_TEMPLATE_ID", default_value = "pipe")]
    pub template_id: String,
}
