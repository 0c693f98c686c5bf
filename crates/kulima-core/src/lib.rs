//! kulima-core - Core library for Kulima
//!
//! Farmer and chief models, the libSQL storage layer, registration
//! validation, QR payload signing and the offline-to-online sync engine
//! shared by the API server and the CLI.

pub mod db;
pub mod error;
pub mod geo;
pub mod models;
pub mod qr;
pub mod sync;
pub mod util;
pub mod validation;

pub use error::{Error, Result};
pub use models::{FarmerId, FarmerPayload, FarmerRecord};
pub use sync::{SyncEngine, SyncSettings};
