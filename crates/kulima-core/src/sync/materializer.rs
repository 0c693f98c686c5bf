//! Turns accepted payloads into stored farmer records.

use crate::db::{ChiefRepository, FarmerRepository, LibSqlChiefRepository, LibSqlFarmerRepository};
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::models::{new_storage_id, FarmerId, FarmerPayload, FarmerRecord};
use crate::qr::QrSigner;
use crate::util::storage_now;
use crate::validation::{validate_farmer, ValidationErrors, ValidationMode};

use super::SyncSettings;

/// `source` stamped on records created through device sync.
pub const MOBILE_SOURCE: &str = "mobile_app";

/// Identifiers of a freshly created record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub farmer_id: FarmerId,
    pub storage_id: String,
}

pub struct Materializer<'a> {
    pub(super) farmers: LibSqlFarmerRepository<'a>,
    chiefs: LibSqlChiefRepository<'a>,
    signer: &'a dyn QrSigner,
    settings: &'a SyncSettings,
}

impl<'a> Materializer<'a> {
    pub fn new(
        conn: &'a libsql::Connection,
        signer: &'a dyn QrSigner,
        settings: &'a SyncSettings,
    ) -> Self {
        Self {
            farmers: LibSqlFarmerRepository::new(conn),
            chiefs: LibSqlChiefRepository::new(conn),
            signer,
            settings,
        }
    }

    /// Validate, identify, stamp, sign and persist a new registration.
    pub async fn create(&self, payload: &FarmerPayload, caller: &str) -> Result<Created> {
        let now = storage_now();
        validate_farmer(
            payload,
            ValidationMode::Create,
            &self.farmers,
            now.date_naive(),
        )
        .await?;

        let assigned_chief = self.assign_chief(payload).await?;

        for attempt in 1..=self.settings.id_attempts {
            let farmer_id = self.farmers.issue_farmer_id().await?;
            let qr_code = match self.signer.sign(&farmer_id, payload, now) {
                Ok(qr_code) => qr_code,
                Err(error) => {
                    tracing::warn!(
                        farmer_id = %farmer_id,
                        error = %error,
                        "QR payload signing failed; storing record without QR code"
                    );
                    String::new()
                }
            };

            let record = FarmerRecord {
                id: new_storage_id(),
                farmer_id,
                temp_id: payload.temp_id(),
                nrc_number: payload.nrc_number.clone(),
                personal_info: payload.personal_info.clone(),
                address: payload.address.clone(),
                farm_details: payload.farm_details.clone(),
                land_parcels: payload.land_parcels.clone().unwrap_or_default(),
                next_of_kin_name: payload.next_of_kin_name.clone(),
                next_of_kin_phone: payload.next_of_kin_phone.clone(),
                notes: payload.notes.clone(),
                registration_status: payload.registration_status.unwrap_or_default(),
                assigned_chief: assigned_chief.clone(),
                qr_code,
                source: MOBILE_SOURCE.to_string(),
                created_by: caller.to_string(),
                created_at: now,
                updated_at: now,
                synced_at: now,
            };

            match self.farmers.insert(&record).await {
                Ok(()) => {
                    tracing::info!(
                        farmer_id = %record.farmer_id,
                        assigned_chief = record.assigned_chief.as_deref().unwrap_or("none"),
                        "Registered farmer from sync"
                    );
                    return Ok(Created {
                        farmer_id: record.farmer_id,
                        storage_id: record.id,
                    });
                }
                Err(error) if error.is_unique_violation("farmer_id") => {
                    tracing::warn!(
                        farmer_id = %record.farmer_id,
                        attempt,
                        "Issued farmer id already in use; issuing another"
                    );
                }
                Err(error) => return Err(map_duplicate_nrc(error)),
            }
        }

        Err(Error::Database(format!(
            "no unique farmer id after {} attempts",
            self.settings.id_attempts
        )))
    }

    /// Shallow-merge the provided fields into an existing record.
    pub async fn update(&self, farmer_id: &FarmerId, payload: &FarmerPayload) -> Result<()> {
        let now = storage_now();
        if self.settings.revalidate_on_update {
            validate_farmer(
                payload,
                ValidationMode::Update(farmer_id),
                &self.farmers,
                now.date_naive(),
            )
            .await?;
        }

        let affected = self
            .farmers
            .merge(farmer_id, payload, now)
            .await
            .map_err(map_duplicate_nrc)?;
        if affected == 0 {
            tracing::warn!(farmer_id = %farmer_id, "Farmer update had no effect");
        } else {
            tracing::info!(farmer_id = %farmer_id, "Updated farmer from sync");
        }
        Ok(())
    }

    async fn assign_chief(&self, payload: &FarmerPayload) -> Result<Option<String>> {
        let Some(gps) = payload
            .address
            .as_ref()
            .and_then(|address| address.gps_coordinates)
        else {
            return Ok(None);
        };

        let point = GeoPoint::new(gps.latitude, gps.longitude);
        let nearest = self
            .chiefs
            .nearest(point, self.settings.chief_radius_km)
            .await?;
        Ok(nearest.map(|(chief, distance_km)| {
            tracing::debug!(chief = %chief.chief_name, distance_km, "Assigned chief");
            chief.chief_name
        }))
    }
}

/// The NRC unique index is the last line of defence behind validation.
fn map_duplicate_nrc(error: Error) -> Error {
    if error.is_unique_violation("nrc_number") {
        let mut errors = ValidationErrors::new();
        errors.push("nrc_number", "NRC number already registered");
        errors.into()
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Address, GpsCoordinates, NewChief, PersonalInfo, RegistrationStatus};
    use crate::qr::HmacQrSigner;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn payload(temp_id: &str, nrc: &str, phone: &str) -> FarmerPayload {
        FarmerPayload {
            temp_id: Some(temp_id.to_string()),
            nrc_number: Some(nrc.to_string()),
            personal_info: Some(PersonalInfo {
                first_name: "Mwila".to_string(),
                middle_name: None,
                last_name: "Banda".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(1980, 1, 1),
                gender: None,
                phone_primary: Some(phone.to_string()),
                phone_secondary: None,
                email: None,
            }),
            address: Some(Address {
                province: "Central".to_string(),
                district: "Chibombo".to_string(),
                constituency: None,
                ward: None,
                chiefdom: None,
                village: None,
                gps_coordinates: Some(GpsCoordinates {
                    latitude: -15.0,
                    longitude: 28.0,
                    accuracy: None,
                    captured_at: None,
                }),
            }),
            ..FarmerPayload::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_stamps_and_assigns_chief() {
        let db = Database::open_in_memory().await.unwrap();
        let signer = HmacQrSigner::new("k").unwrap();
        let settings = SyncSettings::default();
        let materializer = Materializer::new(db.connection(), &signer, &settings);
        materializer
            .chiefs
            .create(NewChief {
                chief_name: "Mungule".to_string(),
                title: None,
                province: "Central".to_string(),
                district: "Chibombo".to_string(),
                chiefdom: "Mungule".to_string(),
                palace_latitude: Some(-15.05),
                palace_longitude: Some(28.05),
                is_active: true,
            })
            .await
            .unwrap();

        let created = materializer
            .create(&payload("t1", "123456/12/1", "+260971234567"), "op-1")
            .await
            .unwrap();
        assert_eq!(created.farmer_id.as_str(), "ZM000001");

        let stored = materializer
            .farmers
            .get(&created.farmer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, created.storage_id);
        assert_eq!(stored.assigned_chief.as_deref(), Some("Mungule"));
        assert_eq!(stored.source, MOBILE_SOURCE);
        assert_eq!(stored.created_by, "op-1");
        assert_eq!(stored.registration_status, RegistrationStatus::Pending);
        assert_eq!(stored.created_at, stored.updated_at);
        assert_eq!(stored.updated_at, stored.synced_at);
        assert!(signer.verify(&stored.qr_code).is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_without_nearby_chief_leaves_assignment_empty() {
        let db = Database::open_in_memory().await.unwrap();
        let signer = HmacQrSigner::new("k").unwrap();
        let settings = SyncSettings::default();
        let materializer = Materializer::new(db.connection(), &signer, &settings);

        let created = materializer
            .create(&payload("t1", "123456/12/1", "+260971234567"), "op-1")
            .await
            .unwrap();
        let stored = materializer
            .farmers
            .get(&created.farmer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.assigned_chief, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_skips_ids_already_in_use() {
        let db = Database::open_in_memory().await.unwrap();
        let signer = HmacQrSigner::new("k").unwrap();
        let settings = SyncSettings::default();
        let materializer = Materializer::new(db.connection(), &signer, &settings);

        // A record imported out of band took ZM000001 without touching the counter.
        let mut imported = crate::db::tests::record(FarmerId::from_sequence(1), "admin", None);
        imported.nrc_number = Some("999999/99/9".to_string());
        imported.personal_info = None;
        materializer.farmers.insert(&imported).await.unwrap();

        let created = materializer
            .create(&payload("t1", "123456/12/1", "+260971234567"), "op-1")
            .await
            .unwrap();
        assert_eq!(created.farmer_id.as_str(), "ZM000002");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_with_revalidation_rejects_bad_fields() {
        let db = Database::open_in_memory().await.unwrap();
        let signer = HmacQrSigner::new("k").unwrap();
        let settings = SyncSettings::default();
        let materializer = Materializer::new(db.connection(), &signer, &settings);
        let created = materializer
            .create(&payload("t1", "123456/12/1", "+260971234567"), "op-1")
            .await
            .unwrap();

        let bad = FarmerPayload {
            next_of_kin_phone: Some("12345".to_string()),
            ..FarmerPayload::default()
        };
        let err = materializer
            .update(&created.farmer_id, &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_without_revalidation_stores_as_sent() {
        let db = Database::open_in_memory().await.unwrap();
        let signer = HmacQrSigner::new("k").unwrap();
        let settings = SyncSettings {
            revalidate_on_update: false,
            ..SyncSettings::default()
        };
        let materializer = Materializer::new(db.connection(), &signer, &settings);
        let created = materializer
            .create(&payload("t1", "123456/12/1", "+260971234567"), "op-1")
            .await
            .unwrap();

        let raw = FarmerPayload {
            next_of_kin_phone: Some("12345".to_string()),
            ..FarmerPayload::default()
        };
        materializer.update(&created.farmer_id, &raw).await.unwrap();

        let stored = materializer
            .farmers
            .get(&created.farmer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.next_of_kin_phone.as_deref(), Some("12345"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_cannot_steal_another_farmers_nrc() {
        let db = Database::open_in_memory().await.unwrap();
        let signer = HmacQrSigner::new("k").unwrap();
        let settings = SyncSettings {
            revalidate_on_update: false,
            ..SyncSettings::default()
        };
        let materializer = Materializer::new(db.connection(), &signer, &settings);
        materializer
            .create(&payload("t1", "123456/12/1", "+260971234567"), "op-1")
            .await
            .unwrap();
        let second = materializer
            .create(&payload("t2", "222222/22/2", "+260972222222"), "op-1")
            .await
            .unwrap();

        let steal = FarmerPayload {
            nrc_number: Some("123456/12/1".to_string()),
            ..FarmerPayload::default()
        };
        let err = materializer
            .update(&second.farmer_id, &steal)
            .await
            .unwrap_err();
        let Error::Validation(errors) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(errors.errors()[0].field, "nrc_number");
    }
}
