//! Signed QR payloads printed on farmer ID cards.
//!
//! A payload is compact JSON carrying the farmer's identity fields followed
//! by a `signature` member: HMAC-SHA256 over the JSON without the signature,
//! base64url encoded without padding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::models::{FarmerId, FarmerPayload};

type HmacSha256 = Hmac<Sha256>;

/// Identity fields embedded in a QR payload, in wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrClaims {
    pub farmer_id: String,
    pub nrc: Option<String>,
    pub name: String,
    pub phone: Option<String>,
    pub province: String,
    pub district: String,
    pub chiefdom: Option<String>,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize)]
struct SignedQr {
    #[serde(flatten)]
    claims: QrClaims,
    signature: String,
}

/// Produces and checks QR payloads.
pub trait QrSigner: Send + Sync {
    /// Signed payload for a farmer being registered at `issued_at`.
    fn sign(
        &self,
        farmer_id: &FarmerId,
        payload: &FarmerPayload,
        issued_at: DateTime<Utc>,
    ) -> Result<String>;

    /// Claims of an untampered payload.
    fn verify(&self, qr_code: &str) -> Result<QrClaims>;
}

/// HMAC-SHA256 signer keyed by a server secret.
pub struct HmacQrSigner {
    key: Vec<u8>,
}

impl HmacQrSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidInput("QR signing key must not be empty".into()));
        }
        Ok(Self { key })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|error| Error::Qr(error.to_string()))
    }
}

impl std::fmt::Debug for HmacQrSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacQrSigner")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl QrSigner for HmacQrSigner {
    fn sign(
        &self,
        farmer_id: &FarmerId,
        payload: &FarmerPayload,
        issued_at: DateTime<Utc>,
    ) -> Result<String> {
        let info = payload
            .personal_info
            .as_ref()
            .ok_or_else(|| Error::Qr("personal_info is required to sign a QR payload".into()))?;
        let address = payload
            .address
            .as_ref()
            .ok_or_else(|| Error::Qr("address is required to sign a QR payload".into()))?;

        let claims = QrClaims {
            farmer_id: farmer_id.to_string(),
            nrc: payload.nrc_number.clone(),
            name: info.full_name(),
            phone: info.phone_primary.clone(),
            province: address.province.clone(),
            district: address.district.clone(),
            chiefdom: address.chiefdom.clone(),
            timestamp: issued_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        };

        let mut mac = self.mac()?;
        mac.update(serde_json::to_string(&claims)?.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(serde_json::to_string(&SignedQr { claims, signature })?)
    }

    fn verify(&self, qr_code: &str) -> Result<QrClaims> {
        let signed: SignedQr = serde_json::from_str(qr_code)
            .map_err(|error| Error::Qr(format!("unreadable QR payload: {error}")))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signed.signature.as_bytes())
            .map_err(|_| Error::Qr("QR signature is not valid base64url".into()))?;

        let mut mac = self.mac()?;
        mac.update(serde_json::to_string(&signed.claims)?.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::Qr("QR signature mismatch".into()))?;

        Ok(signed.claims)
    }
}
