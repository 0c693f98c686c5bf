use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kulima")]
#[command(about = "Administer a local Kulima registration database")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the chief registry
    Chiefs {
        #[command(subcommand)]
        command: ChiefCommands,
    },
    /// Push batches and read the change feed as an operator
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Inspect farmer records
    Farmer {
        #[command(subcommand)]
        command: FarmerCommands,
    },
}

#[derive(Subcommand)]
pub enum ChiefCommands {
    /// Register chiefs from a JSON array file ("-" reads stdin)
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// List registered chiefs
    List {
        #[arg(long)]
        province: Option<String>,
        #[arg(long)]
        district: Option<String>,
        /// Number of chiefs to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Reconcile a batch of offline registrations from a JSON file
    Push {
        /// JSON array of records, or an object with a `farmers` array
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Operator the batch is pushed as
        #[arg(long, value_name = "ID")]
        operator: String,
        /// QR signing key (falls back to QR_SIGNING_KEY)
        #[arg(long, value_name = "KEY")]
        qr_key: Option<String>,
    },
    /// Show records the operator owns that changed after a timestamp
    Status {
        #[arg(long, value_name = "ID")]
        operator: String,
        /// RFC 3339 watermark, e.g. 2024-05-01T00:00:00Z
        #[arg(long, value_name = "TIMESTAMP")]
        since: String,
    },
}

#[derive(Subcommand)]
pub enum FarmerCommands {
    /// Print a stored farmer record as JSON
    Show {
        #[arg(value_name = "FARMER_ID")]
        farmer_id: String,
    },
}
