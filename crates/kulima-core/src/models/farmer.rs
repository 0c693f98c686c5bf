//! Farmer model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Prefix of every issued farmer identifier.
pub const FARMER_ID_PREFIX: &str = "ZM";

/// Number of digits after the prefix.
const FARMER_ID_DIGITS: usize = 6;

/// Server-assigned farmer identifier, e.g. `ZM000001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FarmerId(String);

impl FarmerId {
    /// Build an identifier from a sequence number.
    ///
    /// Sequences wider than six digits are kept in full rather than truncated.
    #[must_use]
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!(
            "{FARMER_ID_PREFIX}{sequence:0width$}",
            width = FARMER_ID_DIGITS
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FarmerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FarmerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(FARMER_ID_PREFIX)
            .ok_or_else(|| Error::InvalidInput(format!("farmer id `{s}` must start with ZM")))?;
        if digits.len() < FARMER_ID_DIGITS || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidInput(format!(
                "farmer id `{s}` must be ZM followed by at least six digits"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for FarmerId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FarmerId> for String {
    fn from(value: FarmerId) -> Self {
        value.0
    }
}

/// Lifecycle state of a registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    #[default]
    Pending,
    Verified,
    Approved,
    Rejected,
    Active,
    Inactive,
}

impl RegistrationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(Error::InvalidInput(format!(
                "unknown registration status `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// A GPS fix captured on the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonalInfo {
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_secondary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl PersonalInfo {
    /// "First Last", used on QR payloads.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Address {
    pub province: String,
    pub district: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constituency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ward: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chiefdom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub village: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_coordinates: Option<GpsCoordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FarmDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_size_hectares: Option<f64>,
    #[serde(default)]
    pub crops_grown: Vec<String>,
    #[serde(default)]
    pub livestock: Vec<String>,
    #[serde(default)]
    pub has_irrigation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farming_experience_years: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandOwnership {
    Owned,
    Leased,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LandParcel {
    pub parcel_id: String,
    pub total_area: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership_type: Option<LandOwnership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_coordinates: Option<GpsCoordinates>,
}

/// The stored unit of synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerRecord {
    /// Storage identifier (UUID v7)
    pub id: String,
    pub farmer_id: FarmerId,
    pub temp_id: Option<String>,
    pub nrc_number: Option<String>,
    pub personal_info: Option<PersonalInfo>,
    pub address: Option<Address>,
    pub farm_details: Option<FarmDetails>,
    pub land_parcels: Vec<LandParcel>,
    pub next_of_kin_name: Option<String>,
    pub next_of_kin_phone: Option<String>,
    pub notes: Option<String>,
    pub registration_status: RegistrationStatus,
    pub assigned_chief: Option<String>,
    /// Signed QR payload; empty when signing failed at creation
    pub qr_code: String,
    pub source: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// Create a new storage identifier using UUID v7 (time-sortable)
pub fn new_storage_id() -> String {
    Uuid::now_v7().to_string()
}
