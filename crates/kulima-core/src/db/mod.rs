//! Database layer for Kulima

mod chief_repository;
mod connection;
mod farmer_repository;
mod migrations;

pub use chief_repository::{ChiefRepository, LibSqlChiefRepository};
pub use connection::Database;
pub use farmer_repository::{FarmerRepository, LibSqlFarmerRepository};

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{FarmerRepository, LibSqlFarmerRepository};
    use crate::models::{
        new_storage_id, Address, FarmerId, FarmerRecord, PersonalInfo, RegistrationStatus,
    };
    use crate::util::{from_storage_micros, to_storage_micros};

    /// A complete record owned by `created_by`, not yet stored.
    pub fn record(farmer_id: FarmerId, created_by: &str, temp_id: Option<&str>) -> FarmerRecord {
        let now = from_storage_micros(to_storage_micros(Utc::now()));
        FarmerRecord {
            id: new_storage_id(),
            farmer_id,
            temp_id: temp_id.map(str::to_string),
            nrc_number: Some("123456/12/1".to_string()),
            personal_info: Some(PersonalInfo {
                first_name: "Mwila".to_string(),
                middle_name: None,
                last_name: "Banda".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(1980, 1, 1),
                gender: None,
                phone_primary: Some("+260971234567".to_string()),
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
                gps_coordinates: None,
            }),
            farm_details: None,
            land_parcels: Vec::new(),
            next_of_kin_name: None,
            next_of_kin_phone: None,
            notes: None,
            registration_status: RegistrationStatus::Pending,
            assigned_chief: None,
            qr_code: "signed".to_string(),
            source: "mobile_app".to_string(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            synced_at: now,
        }
    }

    /// Issue an id and store [`record`].
    pub async fn stored_record(
        repo: &LibSqlFarmerRepository<'_>,
        created_by: &str,
        temp_id: Option<&str>,
    ) -> FarmerRecord {
        let farmer_id = repo.issue_farmer_id().await.unwrap();
        let record = record(farmer_id, created_by, temp_id);
        repo.insert(&record).await.unwrap();
        record
    }
}
