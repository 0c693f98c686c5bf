//! Inbound farmer payload submitted by mobile clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::farmer::{Address, FarmDetails, LandParcel, PersonalInfo, RegistrationStatus};
use crate::error::{Error, Result};
use crate::util::{compact_text, normalize_phone, normalize_text_option};

/// One farmer record as captured offline.
///
/// Every field is optional: a create must carry the required fields (the
/// validator reports what is missing), an update carries only what changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FarmerPayload {
    #[serde(default)]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub nrc_number: Option<String>,
    #[serde(default)]
    pub personal_info: Option<PersonalInfo>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub farm_details: Option<FarmDetails>,
    #[serde(default)]
    pub land_parcels: Option<Vec<LandParcel>>,
    #[serde(default)]
    pub next_of_kin_name: Option<String>,
    #[serde(default)]
    pub next_of_kin_phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub registration_status: Option<RegistrationStatus>,

    // Device-side bookkeeping echoed back by clients. Accepted, never stored.
    #[serde(default, skip_serializing)]
    pub farmer_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl FarmerPayload {
    /// Parse one raw batch element into canonical form.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value)
            .map(Self::normalized)
            .map_err(|error| {
                Error::InvalidInput(format!(
                    "malformed farmer record: {}",
                    compact_text(&error.to_string())
                ))
            })
    }

    /// Trim the NRC and strip separators from phone numbers.
    ///
    /// Duplicate detection and storage both see these values, so
    /// `+260-97-1234567` and `+260971234567` are the same number.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.nrc_number = normalize_text_option(self.nrc_number);
        self.next_of_kin_phone = normalize_phone(self.next_of_kin_phone);
        if let Some(info) = self.personal_info.as_mut() {
            info.phone_primary = normalize_phone(info.phone_primary.take());
            info.phone_secondary = normalize_phone(info.phone_secondary.take());
        }
        self
    }

    /// The client correlation token, if one was supplied.
    pub fn temp_id(&self) -> Option<String> {
        normalize_text_option(self.temp_id.clone())
    }

    /// Primary phone number carried in `personal_info`, if any.
    pub fn phone_primary(&self) -> Option<&str> {
        self.personal_info
            .as_ref()
            .and_then(|info| info.phone_primary.as_deref())
    }
}

/// Best-effort read of `temp_id` from a raw element that may not parse.
pub fn raw_temp_id(value: &Value) -> Option<String> {
    normalize_text_option(value.get("temp_id")?.as_str().map(str::to_string))
}
