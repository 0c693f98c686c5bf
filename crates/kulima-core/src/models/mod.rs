//! Data models for Kulima

mod chief;
mod farmer;
mod payload;
mod sync;

pub use chief::{Chief, NewChief};
pub use farmer::{
    new_storage_id, Address, FarmDetails, FarmerId, FarmerRecord, Gender, GpsCoordinates,
    LandOwnership, LandParcel, PersonalInfo, RegistrationStatus, FARMER_ID_PREFIX,
};
pub use payload::{raw_temp_id, FarmerPayload};
pub use sync::{ChangeFeed, FarmerChange, SyncAction, SyncBatchResult, SyncFailure, SyncOutcome};
