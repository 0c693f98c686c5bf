//! Sync batch and change feed models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::farmer::{FarmerId, RegistrationStatus};
use crate::validation::FieldError;

/// What the reconciler did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
}

/// A record that was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub temp_id: String,
    pub farmer_id: FarmerId,
    pub status: SyncAction,
}

/// A record that was not written, keyed by its correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub temp_id: String,
    pub error: String,
    /// Field-level defects when the failure came from validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

/// Response of one batch push. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatchResult {
    pub total: usize,
    #[serde(rename = "successful")]
    pub successful_count: usize,
    #[serde(rename = "failed")]
    pub failed_count: usize,
    pub results: Vec<SyncOutcome>,
    pub errors: Vec<SyncFailure>,
    /// Clients use this as their next watermark
    pub server_timestamp: DateTime<Utc>,
}

impl SyncBatchResult {
    pub(crate) fn new(
        total: usize,
        results: Vec<SyncOutcome>,
        errors: Vec<SyncFailure>,
        server_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            total,
            successful_count: results.len(),
            failed_count: errors.len(),
            results,
            errors,
            server_timestamp,
        }
    }
}

/// Lightweight projection returned by the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerChange {
    pub farmer_id: FarmerId,
    pub updated_at: DateTime<Utc>,
    pub status: RegistrationStatus,
}

/// Records a caller owns that changed after a watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFeed {
    pub user_id: String,
    pub last_sync: DateTime<Utc>,
    /// Server capture time, the client's next watermark
    pub current_time: DateTime<Utc>,
    pub updates_count: usize,
    pub farmers: Vec<FarmerChange>,
}
