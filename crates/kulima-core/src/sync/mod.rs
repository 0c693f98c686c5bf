//! Offline-to-online sync engine.
//!
//! Devices push batches of farmer records captured offline and later pull
//! what changed on the server. A batch is reconciled record by record:
//! records whose `temp_id` the caller already registered are merged into the
//! existing farmer, everything else is created. A failing record is reported
//! under its correlation key and never aborts its siblings.

mod change_feed;
mod materializer;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::{Database, FarmerRepository, LibSqlFarmerRepository};
use crate::error::{Error, Result};
use crate::models::{
    raw_temp_id, ChangeFeed, FarmerId, FarmerPayload, FarmerRecord, SyncAction, SyncBatchResult,
    SyncFailure, SyncOutcome,
};
use crate::qr::{QrClaims, QrSigner};
use crate::util::{storage_now, user_fingerprint};

pub use change_feed::changes_since;
pub use materializer::{Created, Materializer, MOBILE_SOURCE};

/// Engine knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Radius for automatic chief assignment
    pub chief_radius_km: f64,
    /// Largest batch accepted in one push
    pub max_batch_size: usize,
    /// Re-run validation on the fields an update provides
    pub revalidate_on_update: bool,
    /// Extra attempts for a record after a busy/locked store
    pub store_retries: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// Identifiers tried before a create gives up
    pub id_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chief_radius_km: 50.0,
            max_batch_size: 500,
            revalidate_on_update: true,
            store_retries: 3,
            retry_backoff: Duration::from_millis(50),
            id_attempts: 5,
        }
    }
}

/// Reconciles pushed batches and serves the change feed.
pub struct SyncEngine {
    db: Arc<Database>,
    signer: Arc<dyn QrSigner>,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>, signer: Arc<dyn QrSigner>, settings: SyncSettings) -> Self {
        Self {
            db,
            signer,
            settings,
        }
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Reconcile a pushed batch on behalf of `caller`.
    ///
    /// Only an oversize batch fails as a whole; every other problem is
    /// reported per record in the result.
    pub async fn sync_batch(&self, records: Vec<Value>, caller: &str) -> Result<SyncBatchResult> {
        let total = records.len();
        if total > self.settings.max_batch_size {
            return Err(Error::InvalidInput(format!(
                "batch of {total} records exceeds the limit of {}",
                self.settings.max_batch_size
            )));
        }

        let user = user_fingerprint(caller);
        tracing::info!(user, total, "Sync batch received");

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (index, raw) in records.into_iter().enumerate() {
            let key = raw_temp_id(&raw).unwrap_or_else(|| format!("offline_{}", index + 1));

            match self.reconcile(raw, caller).await {
                Ok((farmer_id, status)) => results.push(SyncOutcome {
                    temp_id: key,
                    farmer_id,
                    status,
                }),
                Err(error) => errors.push(failure(key, error)),
            }
        }

        let result = SyncBatchResult::new(total, results, errors, storage_now());
        tracing::info!(
            user,
            total,
            successful = result.successful_count,
            failed = result.failed_count,
            "Sync batch reconciled"
        );
        Ok(result)
    }

    /// Everything `caller` owns that changed after `last_sync`.
    pub async fn get_sync_status(
        &self,
        caller: &str,
        last_sync: Option<DateTime<Utc>>,
    ) -> Result<ChangeFeed> {
        let last_sync =
            last_sync.ok_or_else(|| Error::InvalidInput("Missing 'last_sync' parameter".into()))?;

        let farmers = LibSqlFarmerRepository::new(self.db.connection());
        let feed = retry_transient(&self.settings, || changes_since(&farmers, caller, last_sync))
            .await?;
        tracing::info!(
            user = user_fingerprint(caller),
            updates = feed.updates_count,
            since = %last_sync,
            "Sync status served"
        );
        Ok(feed)
    }

    /// Full stored record.
    pub async fn farmer(&self, farmer_id: &FarmerId) -> Result<Option<FarmerRecord>> {
        LibSqlFarmerRepository::new(self.db.connection())
            .get(farmer_id)
            .await
    }

    /// Check a QR payload printed by this server.
    pub fn verify_qr(&self, qr_code: &str) -> Result<QrClaims> {
        self.signer.verify(qr_code)
    }

    async fn reconcile(&self, raw: Value, caller: &str) -> Result<(FarmerId, SyncAction)> {
        let payload = FarmerPayload::from_value(raw)?;
        retry_transient(&self.settings, || self.apply(&payload, caller)).await
    }

    async fn apply(&self, payload: &FarmerPayload, caller: &str) -> Result<(FarmerId, SyncAction)> {
        let materializer =
            Materializer::new(self.db.connection(), self.signer.as_ref(), &self.settings);

        let Some(temp_id) = payload.temp_id() else {
            let created = materializer.create(payload, caller).await?;
            return Ok((created.farmer_id, SyncAction::Created));
        };

        if let Some(existing) = materializer.farmers.find_by_temp_id(caller, &temp_id).await? {
            materializer.update(&existing, payload).await?;
            return Ok((existing, SyncAction::Updated));
        }

        match materializer.create(payload, caller).await {
            Ok(created) => Ok((created.farmer_id, SyncAction::Created)),
            // A concurrent push from the same caller registered this temp_id first.
            Err(error) if error.is_unique_violation("temp_id") => {
                let existing = materializer
                    .farmers
                    .find_by_temp_id(caller, &temp_id)
                    .await?
                    .ok_or(error)?;
                materializer.update(&existing, payload).await?;
                Ok((existing, SyncAction::Updated))
            }
            Err(error) => Err(error),
        }
    }
}

fn failure(temp_id: String, error: Error) -> SyncFailure {
    match error {
        Error::Validation(errors) => {
            tracing::warn!(temp_id = %temp_id, errors = %errors, "Sync record failed validation");
            SyncFailure {
                temp_id,
                error: format!("Validation failed: {errors}"),
                details: errors.into_inner(),
            }
        }
        Error::InvalidInput(message) => {
            tracing::warn!(temp_id = %temp_id, error = %message, "Sync record rejected");
            SyncFailure {
                temp_id,
                error: message,
                details: Vec::new(),
            }
        }
        other => {
            tracing::error!(temp_id = %temp_id, error = %other, "Sync record failed");
            SyncFailure {
                temp_id,
                error: other.to_string(),
                details: Vec::new(),
            }
        }
    }
}

/// Run `op`, retrying busy/locked store errors with linear backoff.
async fn retry_transient<T, F, Fut>(settings: &SyncSettings, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(error) if error.is_transient() && attempt < settings.store_retries => {
                attempt += 1;
                let delay = settings.retry_backoff * attempt;
                tracing::warn!(attempt, ?delay, error = %error, "Store busy, retrying");
                tokio::time::sleep(delay).await;
            }
            outcome => return outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegistrationStatus;
    use crate::qr::HmacQrSigner;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingSigner;

    impl QrSigner for FailingSigner {
        fn sign(&self, _: &FarmerId, _: &FarmerPayload, _: DateTime<Utc>) -> Result<String> {
            Err(Error::Qr("signing service unavailable".into()))
        }

        fn verify(&self, _: &str) -> Result<QrClaims> {
            Err(Error::Qr("signing service unavailable".into()))
        }
    }

    async fn engine_with(signer: Arc<dyn QrSigner>, settings: SyncSettings) -> SyncEngine {
        let db = Database::open_in_memory().await.unwrap();
        SyncEngine::new(Arc::new(db), signer, settings)
    }

    async fn engine() -> SyncEngine {
        engine_with(
            Arc::new(HmacQrSigner::new("test-key").unwrap()),
            SyncSettings::default(),
        )
        .await
    }

    fn farmer(temp_id: Option<&str>, nrc: &str, phone: &str) -> Value {
        let mut value = json!({
            "nrc_number": nrc,
            "personal_info": {
                "first_name": "Mwila",
                "last_name": "Banda",
                "date_of_birth": "1980-01-01",
                "phone_primary": phone
            },
            "address": {
                "province": "Central",
                "district": "Chibombo",
                "gps_coordinates": { "latitude": -15.0, "longitude": 28.0 }
            }
        });
        if let Some(temp_id) = temp_id {
            value["temp_id"] = json!(temp_id);
        }
        value
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_batch_reports_zero() {
        let engine = engine().await;
        let result = engine.sync_batch(Vec::new(), "op-1").await.unwrap();
        assert_eq!(result.total, 0);
        assert!(result.results.is_empty());
        assert!(result.errors.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_nrc_fails_only_its_record() {
        let engine = engine().await;
        let batch = vec![
            farmer(Some("t1"), "111111/11/1", "+260971111111"),
            farmer(Some("t2"), "bad-nrc", "+260972222222"),
            farmer(Some("t3"), "333333/33/3", "+260973333333"),
        ];

        let result = engine.sync_batch(batch, "op-1").await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.successful_count, 2);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.errors[0].temp_id, "t2");
        assert!(!result.errors[0].error.is_empty());
        assert_eq!(result.errors[0].details[0].field, "nrc_number");
        let ok: Vec<_> = result.results.iter().map(|r| r.temp_id.as_str()).collect();
        assert_eq!(ok, vec!["t1", "t3"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resubmitting_a_batch_updates_instead_of_duplicating() {
        let engine = engine().await;
        let batch = vec![
            farmer(Some("t1"), "111111/11/1", "+260971111111"),
            farmer(Some("t2"), "222222/22/2", "+260972222222"),
        ];

        let first = engine.sync_batch(batch.clone(), "op-1").await.unwrap();
        let second = engine.sync_batch(batch, "op-1").await.unwrap();

        assert!(first.results.iter().all(|r| r.status == SyncAction::Created));
        assert!(second.results.iter().all(|r| r.status == SyncAction::Updated));
        let first_ids: Vec<_> = first.results.iter().map(|r| &r.farmer_id).collect();
        let second_ids: Vec<_> = second.results.iter().map(|r| &r.farmer_id).collect();
        assert_eq!(first_ids, second_ids);

        let count = LibSqlFarmerRepository::new(engine.database().connection())
            .count()
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_merges_notes_and_keeps_identity() {
        let engine = engine().await;
        let created = engine
            .sync_batch(vec![farmer(Some("t1"), "111111/11/1", "+260971111111")], "op-1")
            .await
            .unwrap();
        let farmer_id = created.results[0].farmer_id.clone();
        let before = engine.farmer(&farmer_id).await.unwrap().unwrap();

        let updated = engine
            .sync_batch(vec![json!({ "temp_id": "t1", "notes": "x" })], "op-1")
            .await
            .unwrap();
        assert_eq!(updated.results[0].status, SyncAction::Updated);
        assert_eq!(updated.results[0].farmer_id, farmer_id);

        let after = engine.farmer(&farmer_id).await.unwrap().unwrap();
        assert_eq!(after.notes.as_deref(), Some("x"));
        assert_eq!(after.personal_info, before.personal_info);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.qr_code, before.qr_code);
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_without_temp_id_get_positional_keys() {
        let engine = engine().await;
        let batch = vec![
            farmer(None, "111111/11/1", "+260971111111"),
            json!({ "temp_id": "  ", "nrc_number": "bad-nrc" }),
        ];

        let result = engine.sync_batch(batch, "op-1").await.unwrap();
        assert_eq!(result.results[0].temp_id, "offline_1");
        assert_eq!(result.errors[0].temp_id, "offline_2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resubmitting_without_temp_id_is_caught_as_duplicate() {
        let engine = engine().await;
        let record = farmer(None, "111111/11/1", "+260971111111");

        engine.sync_batch(vec![record.clone()], "op-1").await.unwrap();
        let again = engine.sync_batch(vec![record], "op-1").await.unwrap();

        assert_eq!(again.failed_count, 1);
        assert!(again.errors[0].error.contains("already registered"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_temp_id_within_batch_becomes_update() {
        let engine = engine().await;
        let batch = vec![
            farmer(Some("t1"), "111111/11/1", "+260971111111"),
            json!({ "temp_id": "t1", "notes": "second copy" }),
        ];

        let result = engine.sync_batch(batch, "op-1").await.unwrap();
        let statuses: Vec<_> = result.results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![SyncAction::Created, SyncAction::Updated]);
        assert_eq!(result.results[0].farmer_id, result.results[1].farmer_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn temp_ids_are_scoped_per_caller() {
        let engine = engine().await;
        engine
            .sync_batch(vec![farmer(Some("t1"), "111111/11/1", "+260971111111")], "op-1")
            .await
            .unwrap();

        let other = engine
            .sync_batch(vec![farmer(Some("t1"), "222222/22/2", "+260972222222")], "op-2")
            .await
            .unwrap();
        assert_eq!(other.results[0].status, SyncAction::Created);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn phone_spellings_count_as_one_number() {
        let engine = engine().await;
        let batch = vec![
            farmer(Some("a"), "111111/11/1", "+260971234567"),
            farmer(Some("b"), "222222/22/2", "+260-97-1234567"),
            farmer(Some("c"), "333333/33/3", " +260971234567"),
            farmer(Some("d"), "444444/44/4", "+260 97 1234567"),
        ];

        let result = engine.sync_batch(batch, "op-1").await.unwrap();
        assert_eq!(result.successful_count, 1);
        assert_eq!(result.failed_count, 3);
        assert!(result.errors.iter().all(|e| e.details[0].field == "personal_info.phone_primary"));

        let stored = engine
            .farmer(&result.results[0].farmer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.personal_info.unwrap().phone_primary.as_deref(),
            Some("+260971234567")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn padded_nrc_from_update_still_blocks_duplicates() {
        let engine = engine().await;
        let created = engine
            .sync_batch(vec![farmer(Some("a"), "111111/11/1", "+260971111111")], "op-1")
            .await
            .unwrap();
        engine
            .sync_batch(
                vec![json!({ "temp_id": "a", "nrc_number": " 444444/44/4 " })],
                "op-1",
            )
            .await
            .unwrap();

        let stored = engine
            .farmer(&created.results[0].farmer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.nrc_number.as_deref(), Some("444444/44/4"));

        let duplicate = engine
            .sync_batch(vec![farmer(Some("b"), "444444/44/4", "+260972222222")], "op-2")
            .await
            .unwrap();
        assert_eq!(duplicate.successful_count, 0);
        assert_eq!(duplicate.errors[0].details[0].field, "nrc_number");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn temp_id_taken_between_lookup_and_insert_becomes_update() {
        let engine = engine().await;
        // Another push for the same caller registers `t1` once this one has
        // passed its lookup and is issuing an id.
        engine
            .database()
            .connection()
            .execute(
                "CREATE TRIGGER concurrent_push AFTER UPDATE ON counters
                 WHEN NOT EXISTS (SELECT 1 FROM farmers WHERE temp_id = 't1')
                 BEGIN
                     INSERT INTO farmers (id, farmer_id, temp_id, source, created_by,
                                          created_at, updated_at, synced_at)
                     VALUES ('concurrent', 'ZM999999', 't1', 'mobile_app', 'op-1', 0, 0, 0);
                 END",
                (),
            )
            .await
            .unwrap();

        let result = engine
            .sync_batch(vec![farmer(Some("t1"), "111111/11/1", "+260971111111")], "op-1")
            .await
            .unwrap();

        assert_eq!(result.failed_count, 0);
        assert_eq!(result.results[0].status, SyncAction::Updated);
        assert_eq!(result.results[0].farmer_id.as_str(), "ZM999999");

        let farmers = LibSqlFarmerRepository::new(engine.database().connection());
        assert_eq!(farmers.count().await.unwrap(), 1);
        let merged = farmers
            .get(&result.results[0].farmer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.nrc_number.as_deref(), Some("111111/11/1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_record_is_isolated() {
        let engine = engine().await;
        let batch = vec![
            json!({ "temp_id": "t1", "personal_info": "not an object" }),
            json!(42),
            farmer(Some("t3"), "333333/33/3", "+260973333333"),
        ];

        let result = engine.sync_batch(batch, "op-1").await.unwrap();
        assert_eq!(result.results.len() + result.errors.len(), result.total);
        assert_eq!(result.successful_count, 1);
        let failed: Vec<_> = result.errors.iter().map(|e| e.temp_id.as_str()).collect();
        assert_eq!(failed, vec!["t1", "offline_2"]);
        assert!(result.errors[0].error.contains("malformed farmer record"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversize_batch_is_rejected_whole() {
        let engine = engine_with(
            Arc::new(HmacQrSigner::new("test-key").unwrap()),
            SyncSettings {
                max_batch_size: 1,
                ..SyncSettings::default()
            },
        )
        .await;
        let batch = vec![json!({}), json!({})];

        let err = engine.sync_batch(batch, "op-1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn signing_failure_still_registers_farmer() {
        let engine = engine_with(Arc::new(FailingSigner), SyncSettings::default()).await;

        let result = engine
            .sync_batch(vec![farmer(Some("t1"), "111111/11/1", "+260971111111")], "op-1")
            .await
            .unwrap();
        assert_eq!(result.successful_count, 1);

        let stored = engine
            .farmer(&result.results[0].farmer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.qr_code, "");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_reports_new_records_once() {
        let engine = engine().await;
        let start = Utc::now() - ChronoDuration::minutes(1);
        engine
            .sync_batch(vec![farmer(Some("t1"), "111111/11/1", "+260971111111")], "op-1")
            .await
            .unwrap();

        let first = engine.get_sync_status("op-1", Some(start)).await.unwrap();
        assert_eq!(first.updates_count, 1);
        assert_eq!(first.farmers[0].status, RegistrationStatus::Pending);
        assert_eq!(first.last_sync, start);

        let second = engine
            .get_sync_status("op-1", Some(first.current_time))
            .await
            .unwrap();
        assert_eq!(second.updates_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_never_leaks_other_callers_records() {
        let engine = engine().await;
        let start = Utc::now() - ChronoDuration::minutes(1);
        engine
            .sync_batch(vec![farmer(Some("t1"), "111111/11/1", "+260971111111")], "op-1")
            .await
            .unwrap();

        let feed = engine.get_sync_status("op-2", Some(start)).await.unwrap();
        assert_eq!(feed.user_id, "op-2");
        assert!(feed.farmers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_orders_by_update_time() {
        let engine = engine().await;
        let start = Utc::now() - ChronoDuration::minutes(1);
        let created = engine
            .sync_batch(
                vec![
                    farmer(Some("t1"), "111111/11/1", "+260971111111"),
                    farmer(Some("t2"), "222222/22/2", "+260972222222"),
                ],
                "op-1",
            )
            .await
            .unwrap();
        engine
            .sync_batch(vec![json!({ "temp_id": "t1", "notes": "later" })], "op-1")
            .await
            .unwrap();

        let feed = engine.get_sync_status("op-1", Some(start)).await.unwrap();
        let order: Vec<_> = feed.farmers.iter().map(|f| &f.farmer_id).collect();
        assert_eq!(
            order,
            vec![&created.results[1].farmer_id, &created.results[0].farmer_id]
        );
        assert!(feed
            .farmers
            .windows(2)
            .all(|pair| pair[0].updated_at <= pair[1].updated_at));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_requires_watermark() {
        let engine = engine().await;
        let err = engine.get_sync_status("op-1", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_errors_are_retried() {
        let settings = SyncSettings {
            retry_backoff: Duration::from_millis(1),
            ..SyncSettings::default()
        };
        let calls = AtomicU32::new(0);

        let value = retry_transient(&settings, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(Error::LibSql(libsql::Error::SqliteFailure(
                        5,
                        "database is locked".into(),
                    )))
                } else {
                    Ok(call)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retries_are_bounded_and_skip_permanent_errors() {
        let settings = SyncSettings {
            store_retries: 2,
            retry_backoff: Duration::from_millis(1),
            ..SyncSettings::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&settings, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::LibSql(libsql::Error::SqliteFailure(6, "locked".into()))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&settings, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotFound("gone".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
