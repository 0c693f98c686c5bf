//! Farmer repository implementation

use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{FarmerChange, FarmerId, FarmerPayload, FarmerRecord};
use crate::util::{from_storage_micros, to_storage_micros};

const FARMER_COLUMNS: &str = "id, farmer_id, temp_id, nrc_number, personal_info, address, \
     farm_details, land_parcels, next_of_kin_name, next_of_kin_phone, notes, \
     registration_status, assigned_chief, qr_code, source, created_by, created_at, \
     updated_at, synced_at";

/// Trait for farmer storage operations (async)
#[allow(async_fn_in_trait)]
pub trait FarmerRepository {
    /// Reserve the next identifier from the shared counter
    async fn issue_farmer_id(&self) -> Result<FarmerId>;

    /// Insert a fully materialized record
    async fn insert(&self, record: &FarmerRecord) -> Result<()>;

    /// Get a record by its farmer identifier
    async fn get(&self, farmer_id: &FarmerId) -> Result<Option<FarmerRecord>>;

    /// Find the record `created_by` registered under `temp_id`
    async fn find_by_temp_id(&self, created_by: &str, temp_id: &str) -> Result<Option<FarmerId>>;

    /// Overwrite the provided top-level fields and re-stamp; returns rows affected
    async fn merge(
        &self,
        farmer_id: &FarmerId,
        payload: &FarmerPayload,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Records owned by `created_by` updated strictly after `since`, oldest first
    async fn changed_since(
        &self,
        created_by: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FarmerChange>>;

    /// Whether another record already carries this NRC number
    async fn nrc_taken(&self, nrc_number: &str, excluding: Option<&FarmerId>) -> Result<bool>;

    /// Whether another record already carries this primary phone
    async fn phone_taken(&self, phone: &str, excluding: Option<&FarmerId>) -> Result<bool>;

    /// Total number of stored records
    async fn count(&self) -> Result<u64>;
}

/// libSQL implementation of `FarmerRepository`
pub struct LibSqlFarmerRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlFarmerRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_farmer(row: &Row) -> Result<FarmerRecord> {
        let farmer_id: String = row.get(1)?;
        let status: String = row.get(11)?;
        Ok(FarmerRecord {
            id: row.get(0)?,
            farmer_id: farmer_id.parse()?,
            temp_id: row.get(2)?,
            nrc_number: row.get(3)?,
            personal_info: json_column(row, 4)?,
            address: json_column(row, 5)?,
            farm_details: json_column(row, 6)?,
            land_parcels: json_column(row, 7)?.unwrap_or_default(),
            next_of_kin_name: row.get(8)?,
            next_of_kin_phone: row.get(9)?,
            notes: row.get(10)?,
            registration_status: status.parse()?,
            assigned_chief: row.get(12)?,
            qr_code: row.get(13)?,
            source: row.get(14)?,
            created_by: row.get(15)?,
            created_at: from_storage_micros(row.get(16)?),
            updated_at: from_storage_micros(row.get(17)?),
            synced_at: from_storage_micros(row.get(18)?),
        })
    }

    async fn exists(&self, sql: &str, value: &str, excluding: Option<&FarmerId>) -> Result<bool> {
        let excluding = excluding.map(ToString::to_string);
        let mut rows = self.conn.query(sql, params![value, excluding]).await?;
        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }
}

impl FarmerRepository for LibSqlFarmerRepository<'_> {
    async fn issue_farmer_id(&self) -> Result<FarmerId> {
        let mut rows = self
            .conn
            .query(
                "UPDATE counters SET value = value + 1 WHERE name = 'farmer_id' RETURNING value",
                (),
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("farmer_id counter is missing".into()))?;
        let value: i64 = row.get(0)?;
        let sequence = u64::try_from(value)
            .map_err(|_| Error::Database(format!("farmer_id counter is negative: {value}")))?;
        Ok(FarmerId::from_sequence(sequence))
    }

    async fn insert(&self, record: &FarmerRecord) -> Result<()> {
        let phone_primary = record
            .personal_info
            .as_ref()
            .and_then(|info| info.phone_primary.clone());

        self.conn
            .execute(
                &format!(
                    "INSERT INTO farmers ({FARMER_COLUMNS}, phone_primary)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    record.id.as_str(),
                    record.farmer_id.as_str(),
                    record.temp_id.clone(),
                    record.nrc_number.clone(),
                    to_json(record.personal_info.as_ref())?,
                    to_json(record.address.as_ref())?,
                    to_json(record.farm_details.as_ref())?,
                    serde_json::to_string(&record.land_parcels)?,
                    record.next_of_kin_name.clone(),
                    record.next_of_kin_phone.clone(),
                    record.notes.clone(),
                    record.registration_status.as_str(),
                    record.assigned_chief.clone(),
                    record.qr_code.as_str(),
                    record.source.as_str(),
                    record.created_by.as_str(),
                    to_storage_micros(record.created_at),
                    to_storage_micros(record.updated_at),
                    to_storage_micros(record.synced_at),
                    phone_primary,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, farmer_id: &FarmerId) -> Result<Option<FarmerRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {FARMER_COLUMNS} FROM farmers WHERE farmer_id = ?"),
                [farmer_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_farmer(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_temp_id(&self, created_by: &str, temp_id: &str) -> Result<Option<FarmerId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT farmer_id FROM farmers WHERE created_by = ? AND temp_id = ?",
                [created_by, temp_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let farmer_id: String = row.get(0)?;
                Ok(Some(farmer_id.parse()?))
            }
            None => Ok(None),
        }
    }

    async fn merge(
        &self,
        farmer_id: &FarmerId,
        payload: &FarmerPayload,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let personal_info = to_json(payload.personal_info.as_ref())?;
        let land_parcels = payload
            .land_parcels
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let at = to_storage_micros(at);

        let affected = self
            .conn
            .execute(
                "UPDATE farmers SET
                    nrc_number = COALESCE(?1, nrc_number),
                    personal_info = COALESCE(?2, personal_info),
                    phone_primary = CASE WHEN ?2 IS NULL THEN phone_primary ELSE ?3 END,
                    address = COALESCE(?4, address),
                    farm_details = COALESCE(?5, farm_details),
                    land_parcels = COALESCE(?6, land_parcels),
                    next_of_kin_name = COALESCE(?7, next_of_kin_name),
                    next_of_kin_phone = COALESCE(?8, next_of_kin_phone),
                    notes = COALESCE(?9, notes),
                    registration_status = COALESCE(?10, registration_status),
                    updated_at = MAX(updated_at, ?11),
                    synced_at = MAX(synced_at, ?11)
                 WHERE farmer_id = ?12",
                params![
                    payload.nrc_number.clone(),
                    personal_info,
                    payload.phone_primary().map(str::to_string),
                    to_json(payload.address.as_ref())?,
                    to_json(payload.farm_details.as_ref())?,
                    land_parcels,
                    payload.next_of_kin_name.clone(),
                    payload.next_of_kin_phone.clone(),
                    payload.notes.clone(),
                    payload.registration_status.map(|s| s.as_str().to_string()),
                    at,
                    farmer_id.as_str(),
                ],
            )
            .await?;
        Ok(affected)
    }

    async fn changed_since(
        &self,
        created_by: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FarmerChange>> {
        let mut rows = self
            .conn
            .query(
                "SELECT farmer_id, updated_at, registration_status
                 FROM farmers
                 WHERE created_by = ? AND updated_at > ?
                 ORDER BY updated_at ASC, farmer_id ASC",
                params![created_by, to_storage_micros(since)],
            )
            .await?;

        let mut changes = Vec::new();
        while let Some(row) = rows.next().await? {
            let farmer_id: String = row.get(0)?;
            let status: String = row.get(2)?;
            changes.push(FarmerChange {
                farmer_id: farmer_id.parse()?,
                updated_at: from_storage_micros(row.get(1)?),
                status: status.parse()?,
            });
        }
        Ok(changes)
    }

    async fn nrc_taken(&self, nrc_number: &str, excluding: Option<&FarmerId>) -> Result<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM farmers
                 WHERE nrc_number = ?1 AND (?2 IS NULL OR farmer_id <> ?2))",
            nrc_number,
            excluding,
        )
        .await
    }

    async fn phone_taken(&self, phone: &str, excluding: Option<&FarmerId>) -> Result<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM farmers
                 WHERE phone_primary = ?1 AND (?2 IS NULL OR farmer_id <> ?2))",
            phone,
            excluding,
        )
        .await
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM farmers", ()).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

fn json_column<T: DeserializeOwned>(row: &Row, index: i32) -> Result<Option<T>> {
    let raw: Option<String> = row.get(index)?;
    Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
}
