//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &V1_FARMERS).await?;
    }
    if version < 2 {
        apply(conn, 2, &V2_CHIEFS).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Version 1: farmers, the id counter and schema tracking.
///
/// Timestamps are Unix microseconds. `phone_primary` mirrors
/// `personal_info.phone_primary` for duplicate lookups.
const V1_FARMERS: [&str; 9] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )",
    "INSERT OR IGNORE INTO counters (name, value) VALUES ('farmer_id', 0)",
    "CREATE TABLE IF NOT EXISTS farmers (
        id TEXT PRIMARY KEY,
        farmer_id TEXT NOT NULL UNIQUE,
        temp_id TEXT,
        nrc_number TEXT,
        phone_primary TEXT,
        personal_info TEXT,
        address TEXT,
        farm_details TEXT,
        land_parcels TEXT NOT NULL DEFAULT '[]',
        next_of_kin_name TEXT,
        next_of_kin_phone TEXT,
        notes TEXT,
        registration_status TEXT NOT NULL DEFAULT 'pending',
        assigned_chief TEXT,
        qr_code TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL,
        created_by TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        synced_at INTEGER NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_farmers_owner_temp_id
        ON farmers(created_by, temp_id) WHERE temp_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_farmers_owner_updated ON farmers(created_by, updated_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_farmers_nrc_number
        ON farmers(nrc_number) WHERE nrc_number IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_farmers_phone_primary ON farmers(phone_primary)",
    "INSERT INTO schema_version (version) VALUES (1)",
];

/// Version 2: chief registry for automatic assignment.
const V2_CHIEFS: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS chiefs (
        id TEXT PRIMARY KEY,
        chief_name TEXT NOT NULL,
        title TEXT,
        province TEXT NOT NULL,
        district TEXT NOT NULL,
        chiefdom TEXT NOT NULL,
        palace_latitude REAL,
        palace_longitude REAL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chiefs_palace ON chiefs(palace_latitude, palace_longitude)",
    "CREATE INDEX IF NOT EXISTS idx_chiefs_district ON chiefs(province, district)",
    "INSERT INTO schema_version (version) VALUES (2)",
];

/// Run `statements` in one transaction.
///
/// libsql has no `execute_batch` for local connections, so each statement
/// is executed separately and the whole step rolls back on the first error.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!(version, "Migrated database");
    Ok(())
}
