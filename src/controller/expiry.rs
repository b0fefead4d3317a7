//! # Expiry Evaluation
//!
//! Resolves the expiry annotation of a credential into an instant and decides whether the
//! credential has expired.
//!
//! Supported formats, tried in this order (first match wins):
//!
//! 1. RFC 3339 with offset - `2025-01-02T15:04:05Z`
//! 2. Timestamp without offset - `2025-01-02T15:04:05` or `2025-01-02 15:04:05`
//! 3. Date only - `2025-01-02` (midnight)
//! 4. Non-negative integer - seconds after the credential was created
//!
//! Absolute formats are tried first so an intended absolute timestamp is never read as a
//! relative offset.

use crate::controller::types::{Credential, ObjectKey};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static RELATIVE_SECONDS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+$").expect("Failed to compile relative expiry regex - this should never happen")
});

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Zone applied to timestamps and dates that carry no offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NaiveZone {
    #[default]
    Utc,
    /// The controller host's local zone
    Local,
}

impl FromStr for NaiveZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utc" | "z" => Ok(Self::Utc),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown timestamp zone '{other}', expected 'utc' or 'local'")),
        }
    }
}

impl NaiveZone {
    fn to_utc(self, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::Utc => Some(Utc.from_utc_datetime(naive)),
            // Ambiguous local times (DST fold) resolve to the earlier instant; gaps have none
            Self::Local => Local
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Which format matched an expiry value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpiryFormat {
    Rfc3339,
    NaiveTimestamp,
    Date,
    /// Seconds after creation
    RelativeSeconds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedExpiry {
    pub expires_at: DateTime<Utc>,
    pub format: ExpiryFormat,
}

impl ResolvedExpiry {
    /// Expired means strictly after the expiry instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Expiry evaluation errors. Never fatal to a scan: the credential is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpiryError {
    #[error("unsupported expiry format: '{value}'")]
    Format { value: String },
    #[error("relative expiry '{value}' requires a creation timestamp, none recorded")]
    MissingCreationTimestamp { value: String },
}

/// Result of evaluating one credential in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryRecord {
    pub credential: ObjectKey,
    pub raw_value: String,
    pub expiry: Result<ResolvedExpiry, ExpiryError>,
    pub expired: bool,
}

/// Parses expiry annotations with a configured zone for offset-less values
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryEvaluator {
    naive_zone: NaiveZone,
}

impl ExpiryEvaluator {
    pub fn new(naive_zone: NaiveZone) -> Self {
        Self { naive_zone }
    }

    /// Resolve a raw annotation value into an expiry instant
    pub fn resolve(
        &self,
        raw: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<ResolvedExpiry, ExpiryError> {
        let value = raw.trim();
        let format_error = || ExpiryError::Format {
            value: raw.to_string(),
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(ResolvedExpiry {
                expires_at: dt.with_timezone(&Utc),
                format: ExpiryFormat::Rfc3339,
            });
        }

        if let Some(naive) = NAIVE_DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        {
            let expires_at = self.naive_zone.to_utc(&naive).ok_or_else(format_error)?;
            return Ok(ResolvedExpiry {
                expires_at,
                format: ExpiryFormat::NaiveTimestamp,
            });
        }

        if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
            let expires_at = date
                .and_hms_opt(0, 0, 0)
                .and_then(|midnight| self.naive_zone.to_utc(&midnight))
                .ok_or_else(format_error)?;
            return Ok(ResolvedExpiry {
                expires_at,
                format: ExpiryFormat::Date,
            });
        }

        if RELATIVE_SECONDS_REGEX.is_match(value) {
            let created_at = created_at.ok_or_else(|| ExpiryError::MissingCreationTimestamp {
                value: raw.to_string(),
            })?;
            let expires_at = value
                .parse::<i64>()
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|offset| created_at.checked_add_signed(offset))
                .ok_or_else(format_error)?;
            return Ok(ResolvedExpiry {
                expires_at,
                format: ExpiryFormat::RelativeSeconds,
            });
        }

        Err(format_error())
    }

    /// Whether the credential is expired at `now`
    pub fn evaluate(
        &self,
        raw: &str,
        now: DateTime<Utc>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<bool, ExpiryError> {
        self.resolve(raw, created_at)
            .map(|expiry| expiry.is_expired(now))
    }

    /// Build the record for a credential, or `None` when it carries no (or an empty)
    /// expiry annotation
    pub fn record(
        &self,
        credential: &Credential,
        annotation_key: &str,
        now: DateTime<Utc>,
    ) -> Option<ExpiryRecord> {
        let raw_value = credential.expiry_value(annotation_key)?;
        let expiry = self.resolve(raw_value, credential.created_at);
        let expired = expiry.as_ref().is_ok_and(|e| e.is_expired(now));
        Some(ExpiryRecord {
            credential: credential.key.clone(),
            raw_value: raw_value.to_string(),
            expiry,
            expired,
        })
    }
}
