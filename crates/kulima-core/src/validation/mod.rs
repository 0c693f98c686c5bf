//! Farmer registration validation.
//!
//! Format rules live in [`rules`]; [`validate_farmer`] applies them to a
//! payload and consults the store for duplicate NRC numbers and phones.
//! Every defect is collected before returning, so a client sees the whole
//! list in one round trip.

mod rules;

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use rules::{
    age_on, is_valid_email, is_valid_land_area, is_valid_nrc, is_valid_phone, is_within_zambia,
    MAX_LAND_AREA_HA, MIN_FARMER_AGE, MIN_LAND_AREA_HA,
};

use crate::db::FarmerRepository;
use crate::error::Result;
use crate::models::{FarmerId, FarmerPayload, GpsCoordinates};

/// One field-level defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// All defects found in one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<FieldError> {
        self.0
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
            first = false;
        }
        Ok(())
    }
}

/// Which write the payload is headed for.
#[derive(Debug, Clone, Copy)]
pub enum ValidationMode<'a> {
    /// New registration: required fields must be present.
    Create,
    /// Merge into an existing record: only provided fields are checked, and
    /// duplicate lookups ignore the record itself.
    Update(&'a FarmerId),
}

impl<'a> ValidationMode<'a> {
    const fn excluding(self) -> Option<&'a FarmerId> {
        match self {
            Self::Create => None,
            Self::Update(id) => Some(id),
        }
    }
}

/// Validate `payload`, returning `Error::Validation` with every defect found.
pub async fn validate_farmer(
    payload: &FarmerPayload,
    mode: ValidationMode<'_>,
    repo: &impl FarmerRepository,
    today: NaiveDate,
) -> Result<()> {
    let mut errors = ValidationErrors::new();
    check_formats(payload, mode, today, &mut errors);

    let excluding = mode.excluding();
    if let Some(nrc) = payload.nrc_number.as_deref().map(str::trim) {
        if is_valid_nrc(nrc) && repo.nrc_taken(nrc, excluding).await? {
            errors.push("nrc_number", "NRC number already registered");
        }
    }
    if let Some(phone) = payload.phone_primary().map(str::trim) {
        if is_valid_phone(phone) && repo.phone_taken(phone, excluding).await? {
            errors.push(
                "personal_info.phone_primary",
                "Phone number already registered",
            );
        }
    }

    errors.into_result()
}

/// Store-independent checks.
pub fn check_formats(
    payload: &FarmerPayload,
    mode: ValidationMode<'_>,
    today: NaiveDate,
    errors: &mut ValidationErrors,
) {
    let creating = matches!(mode, ValidationMode::Create);

    match payload.nrc_number.as_deref().map(str::trim) {
        Some(nrc) if !is_valid_nrc(nrc) => {
            errors.push("nrc_number", "Invalid NRC format (expected 123456/12/1)");
        }
        None if creating => errors.push("nrc_number", "NRC number is required"),
        _ => {}
    }

    match &payload.personal_info {
        Some(info) => {
            if info.first_name.trim().is_empty() {
                errors.push("personal_info.first_name", "First name is required");
            }
            if info.last_name.trim().is_empty() {
                errors.push("personal_info.last_name", "Last name is required");
            }
            if let Some(phone) = &info.phone_primary {
                if !is_valid_phone(phone) {
                    errors.push(
                        "personal_info.phone_primary",
                        "Invalid Zambian phone number",
                    );
                }
            }
            if let Some(phone) = &info.phone_secondary {
                if !is_valid_phone(phone) {
                    errors.push(
                        "personal_info.phone_secondary",
                        "Invalid Zambian phone number",
                    );
                }
            }
            if let Some(email) = &info.email {
                if !is_valid_email(email) {
                    errors.push("personal_info.email", "Invalid email address");
                }
            }
            if let Some(dob) = info.date_of_birth {
                if dob > today {
                    errors.push(
                        "personal_info.date_of_birth",
                        "Date of birth is in the future",
                    );
                } else if age_on(dob, today) < MIN_FARMER_AGE {
                    errors.push(
                        "personal_info.date_of_birth",
                        format!("Farmer must be at least {MIN_FARMER_AGE} years old"),
                    );
                }
            }
        }
        None if creating => errors.push("personal_info", "Personal information is required"),
        None => {}
    }

    match &payload.address {
        Some(address) => {
            if address.province.trim().is_empty() {
                errors.push("address.province", "Province is required");
            }
            if address.district.trim().is_empty() {
                errors.push("address.district", "District is required");
            }
            if let Some(gps) = &address.gps_coordinates {
                check_gps("address.gps_coordinates", gps, errors);
            }
        }
        None if creating => errors.push("address", "Address is required"),
        None => {}
    }

    if let Some(size) = payload
        .farm_details
        .as_ref()
        .and_then(|details| details.farm_size_hectares)
    {
        if !is_valid_land_area(size) {
            errors.push(
                "farm_details.farm_size_hectares",
                land_area_message(),
            );
        }
    }

    for (index, parcel) in payload.land_parcels.iter().flatten().enumerate() {
        if !is_valid_land_area(parcel.total_area) {
            errors.push(
                format!("land_parcels[{index}].total_area"),
                land_area_message(),
            );
        }
        if let Some(gps) = &parcel.gps_coordinates {
            check_gps(&format!("land_parcels[{index}].gps_coordinates"), gps, errors);
        }
    }

    if let Some(phone) = &payload.next_of_kin_phone {
        if !is_valid_phone(phone) {
            errors.push("next_of_kin_phone", "Invalid Zambian phone number");
        }
    }
}

fn check_gps(field: &str, gps: &GpsCoordinates, errors: &mut ValidationErrors) {
    if !is_within_zambia(gps.latitude, gps.longitude) {
        errors.push(field, "GPS coordinates are outside Zambia");
    }
}

fn land_area_message() -> String {
    format!("Land area must be between {MIN_LAND_AREA_HA} and {MAX_LAND_AREA_HA} hectares")
}
