//! Format rules for farmer registration fields.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

/// Minimum age of a registered farmer, in years.
pub const MIN_FARMER_AGE: i32 = 18;

/// Allowed land area in hectares (inclusive).
pub const MIN_LAND_AREA_HA: f64 = 0.1;
pub const MAX_LAND_AREA_HA: f64 = 1000.0;

/// Approximate national bounds.
const ZAMBIA_LATITUDE: (f64, f64) = (-18.5, -8.0);
const ZAMBIA_LONGITUDE: (f64, f64) = (21.5, 34.0);

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+260[- ]?\d{2}[- ]?\d{6,7}$").expect("Invalid regex"));
static NRC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}/\d{2}/\d$").expect("Invalid regex"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("Invalid regex")
});

/// Zambian mobile number, e.g. `+260971234567` or `+260-97-1234567`.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone.trim())
}

/// National Registration Card number, e.g. `123456/12/1`.
pub fn is_valid_nrc(nrc: &str) -> bool {
    NRC_RE.is_match(nrc.trim())
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

/// Completed years between `date_of_birth` and `today`.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age
}

pub fn is_within_zambia(latitude: f64, longitude: f64) -> bool {
    (ZAMBIA_LATITUDE.0..=ZAMBIA_LATITUDE.1).contains(&latitude)
        && (ZAMBIA_LONGITUDE.0..=ZAMBIA_LONGITUDE.1).contains(&longitude)
}

pub fn is_valid_land_area(hectares: f64) -> bool {
    (MIN_LAND_AREA_HA..=MAX_LAND_AREA_HA).contains(&hectares)
}
