use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kulima_core::SyncSettings;
use thiserror::Error;

/// Shortest accepted HMAC secret for access tokens.
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    pub qr_signing_key: String,
    pub chief_radius_km: f64,
    pub sync_max_batch_size: usize,
    pub sync_revalidate_on_update: bool,
    pub sync_store_retries: u32,
    pub rate_limit_window: Duration,
    pub sync_batch_rate_limit_per_window: u32,
    pub sync_status_rate_limit_per_window: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("qr_signing_key", &"[REDACTED]")
            .field("chief_radius_km", &self.chief_radius_km)
            .field("sync_max_batch_size", &self.sync_max_batch_size)
            .field(
                "sync_revalidate_on_update",
                &self.sync_revalidate_on_update,
            )
            .field("sync_store_retries", &self.sync_store_retries)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_batch_rate_limit_per_window",
                &self.sync_batch_rate_limit_per_window,
            )
            .field(
                "sync_status_rate_limit_per_window",
                &self.sync_status_rate_limit_per_window,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "KULIMA_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path =
            PathBuf::from(value_or_default(&lookup, "KULIMA_DATABASE_PATH", "kulima.db"));

        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET_KEY")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "JWT_SECRET_KEY must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }
        let jwt_issuer = optional_trimmed(&lookup, "JWT_ISSUER");
        let qr_signing_key = required_trimmed(&lookup, "QR_SIGNING_KEY")?;

        let auth_clock_skew_secs = in_range(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0..=300)?;
        let chief_radius_km: f64 = parse(&lookup, "CHIEF_RADIUS_KM", "50")?;
        let radius_ok = chief_radius_km > 0.0 && chief_radius_km <= 500.0;
        if !radius_ok {
            return Err(ConfigError::Invalid(
                "CHIEF_RADIUS_KM must be in (0, 500]".to_string(),
            ));
        }
        let sync_max_batch_size = in_range(&lookup, "SYNC_MAX_BATCH_SIZE", "500", 1..=5_000)?;
        let sync_revalidate_on_update = parse_bool(&lookup, "SYNC_REVALIDATE_ON_UPDATE", true)?;
        let sync_store_retries = in_range(&lookup, "SYNC_STORE_RETRIES", "3", 0..=10)?;

        let rate_limit_window_secs =
            in_range(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10..=3_600)?;
        let sync_batch_rate_limit_per_window = in_range(
            &lookup,
            "SYNC_BATCH_RATE_LIMIT_PER_WINDOW",
            "30",
            1..=1_000,
        )?;
        let sync_status_rate_limit_per_window = in_range(
            &lookup,
            "SYNC_STATUS_RATE_LIMIT_PER_WINDOW",
            "120",
            1..=5_000,
        )?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            qr_signing_key,
            chief_radius_km,
            sync_max_batch_size,
            sync_revalidate_on_update,
            sync_store_retries,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_batch_rate_limit_per_window,
            sync_status_rate_limit_per_window,
        })
    }

    /// Engine knobs derived from this configuration.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            chief_radius_km: self.chief_radius_km,
            max_batch_size: self.sync_max_batch_size,
            revalidate_on_update: self.sync_revalidate_on_update,
            store_retries: self.sync_store_retries,
            ..SyncSettings::default()
        }
    }
}

fn parse<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> Result<T, ConfigError> {
    value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{name} is not a valid number")))
}

fn in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display,
{
    let out_of_range = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| out_of_range())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(out_of_range())
    }
}

fn parse_bool(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{name} must be true or false"))),
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
