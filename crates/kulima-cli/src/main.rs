//! Kulima CLI - local administration of the registration database
//!
//! Seeds the chief registry, replays offline batches and inspects the
//! change feed without going through the HTTP API.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{ChiefCommands, Cli, Commands, FarmerCommands, SyncCommands};
use crate::commands::common::resolve_db_path;
use crate::commands::{chiefs, farmer, sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kulima=warn,kulima_core=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Chiefs { command } => match command {
            ChiefCommands::Import { file } => chiefs::run_import(&file, &db_path).await?,
            ChiefCommands::List {
                province,
                district,
                limit,
                json,
            } => {
                chiefs::run_list(
                    province.as_deref(),
                    district.as_deref(),
                    limit,
                    json,
                    &db_path,
                )
                .await?;
            }
        },
        Commands::Sync { command } => match command {
            SyncCommands::Push {
                file,
                operator,
                qr_key,
            } => sync::run_push(&file, &operator, qr_key, &db_path).await?,
            SyncCommands::Status { operator, since } => {
                sync::run_status(&operator, &since, &db_path).await?;
            }
        },
        Commands::Farmer { command } => match command {
            FarmerCommands::Show { farmer_id } => farmer::run_show(&farmer_id, &db_path).await?,
        },
    }

    Ok(())
}
