use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] kulima_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Expected a JSON array or an object with a `farmers` array")]
    InvalidBatch,
    #[error("Invalid timestamp `{0}`; expected RFC 3339")]
    InvalidTimestamp(String),
    #[error("Farmer not found: {0}")]
    FarmerNotFound(String),
    #[error("No QR signing key. Pass --qr-key or set QR_SIGNING_KEY.")]
    MissingQrKey,
}
