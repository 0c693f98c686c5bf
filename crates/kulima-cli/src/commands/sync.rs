use std::env;
use std::path::Path;
use std::sync::Arc;

use kulima_core::db::{Database, LibSqlFarmerRepository};
use kulima_core::qr::HmacQrSigner;
use kulima_core::sync::changes_since;
use kulima_core::{SyncEngine, SyncSettings};
use serde_json::Value;

use crate::commands::common::{open_database, parse_timestamp, print_json, read_input};
use crate::error::CliError;

pub async fn run_push(
    file: &Path,
    operator: &str,
    qr_key: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let key = resolve_qr_key(qr_key)?;
    let records = parse_batch(&read_input(file)?)?;

    let db = open_database(db_path).await?;
    let signer = HmacQrSigner::new(key.into_bytes())?;
    let engine = SyncEngine::new(Arc::new(db), Arc::new(signer), SyncSettings::default());

    let result = engine.sync_batch(records, operator).await?;
    print_json(&result)
}

pub async fn run_status(operator: &str, since: &str, db_path: &Path) -> Result<(), CliError> {
    let last_sync = parse_timestamp(since)?;
    let db = open_database(db_path).await?;
    print_json(&status(&db, operator, last_sync).await?)
}

pub async fn status(
    db: &Database,
    operator: &str,
    last_sync: chrono::DateTime<chrono::Utc>,
) -> Result<kulima_core::models::ChangeFeed, CliError> {
    let farmers = LibSqlFarmerRepository::new(db.connection());
    Ok(changes_since(&farmers, operator, last_sync).await?)
}

/// Accepts a bare array or the API request shape `{"farmers": [...]}`.
pub fn parse_batch(input: &str) -> Result<Vec<Value>, CliError> {
    match serde_json::from_str(input)? {
        Value::Array(records) => Ok(records),
        Value::Object(mut body) => match body.remove("farmers") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(CliError::InvalidBatch),
        },
        _ => Err(CliError::InvalidBatch),
    }
}

fn resolve_qr_key(flag: Option<String>) -> Result<String, CliError> {
    flag.or_else(|| env::var("QR_SIGNING_KEY").ok())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or(CliError::MissingQrKey)
}
