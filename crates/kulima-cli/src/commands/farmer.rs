use std::path::Path;

use kulima_core::db::{FarmerRepository, LibSqlFarmerRepository};
use kulima_core::FarmerId;

use crate::commands::common::{open_database, print_json};
use crate::error::CliError;

pub async fn run_show(farmer_id: &str, db_path: &Path) -> Result<(), CliError> {
    let id: FarmerId = farmer_id.trim().parse()?;
    let db = open_database(db_path).await?;
    let record = LibSqlFarmerRepository::new(db.connection())
        .get(&id)
        .await?
        .ok_or_else(|| CliError::FarmerNotFound(id.to_string()))?;
    print_json(&record)
}
