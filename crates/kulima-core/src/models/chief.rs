//! Traditional chief model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chief in the registry used for automatic assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chief {
    pub id: String,
    pub chief_name: String,
    pub title: Option<String>,
    pub province: String,
    pub district: String,
    pub chiefdom: String,
    /// Palace location; chiefs without one are never auto-assigned
    pub palace_latitude: Option<f64>,
    pub palace_longitude: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a chief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewChief {
    pub chief_name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub province: String,
    pub district: String,
    pub chiefdom: String,
    #[serde(default)]
    pub palace_latitude: Option<f64>,
    #[serde(default)]
    pub palace_longitude: Option<f64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}
