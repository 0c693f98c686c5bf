use std::path::Path;

use kulima_core::db::{ChiefRepository, Database, LibSqlChiefRepository};
use kulima_core::models::{Chief, NewChief};

use crate::commands::common::{open_database, print_json, read_input};
use crate::error::CliError;

pub async fn run_import(file: &Path, db_path: &Path) -> Result<(), CliError> {
    let chiefs: Vec<NewChief> = serde_json::from_str(&read_input(file)?)?;
    let db = open_database(db_path).await?;
    let imported = import_chiefs(&db, chiefs).await?;
    println!("Imported {} chiefs", imported.len());
    Ok(())
}

/// Registers every chief, stopping at the first invalid entry.
pub async fn import_chiefs(db: &Database, chiefs: Vec<NewChief>) -> Result<Vec<Chief>, CliError> {
    let repo = LibSqlChiefRepository::new(db.connection());
    let mut created = Vec::with_capacity(chiefs.len());
    for chief in chiefs {
        created.push(repo.create(chief).await?);
    }
    tracing::info!(count = created.len(), "Chiefs imported");
    Ok(created)
}

pub async fn run_list(
    province: Option<&str>,
    district: Option<&str>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let chiefs = LibSqlChiefRepository::new(db.connection())
        .list(province, district, limit, 0)
        .await?;

    if as_json {
        return print_json(&chiefs);
    }
    if chiefs.is_empty() {
        println!("No chiefs registered.");
        return Ok(());
    }
    for chief in &chiefs {
        println!("{}", format_chief_line(chief));
    }
    Ok(())
}

pub fn format_chief_line(chief: &Chief) -> String {
    let palace = match (chief.palace_latitude, chief.palace_longitude) {
        (Some(lat), Some(lon)) => format!("{lat:.4}, {lon:.4}"),
        _ => "no palace location".to_string(),
    };
    let status = if chief.is_active { "" } else { " [inactive]" };
    format!(
        "{}  {} ({} / {}) @ {}{}",
        chief.chief_name, chief.chiefdom, chief.province, chief.district, palace, status
    )
}
