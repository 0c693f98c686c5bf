//! Incremental pull for devices.

use chrono::{DateTime, TimeDelta, Utc};

use crate::db::FarmerRepository;
use crate::error::Result;
use crate::models::ChangeFeed;
use crate::util::storage_now;

/// Records `caller` owns that changed strictly after `last_sync`.
///
/// `current_time` is one microsecond before the moment the query starts, so a
/// write stamped in that same microsecond or while the query runs is
/// delivered again on the next pull. Clients may see a record twice, never
/// zero times.
pub async fn changes_since(
    farmers: &impl FarmerRepository,
    caller: &str,
    last_sync: DateTime<Utc>,
) -> Result<ChangeFeed> {
    let current_time = storage_now() - TimeDelta::microseconds(1);
    let changes = farmers.changed_since(caller, last_sync).await?;

    Ok(ChangeFeed {
        user_id: caller.to_string(),
        last_sync,
        current_time,
        updates_count: changes.len(),
        farmers: changes,
    })
}
