//! The persisted consent record and its wire format.
//!
//! Both stores hold the same JSON document:
//!
//! ```json
//! { "analytics": true, "timestamp": "2026-10-17T08:30:05.123Z", "version": "1.0" }
//! ```
//!
//! Anything that does not decode into exactly this shape is corrupt, and a
//! corrupt record is never read as a grant.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Key under which the record is stored, in the cookie jar and in local storage.
pub const CONSENT_STORAGE_KEY: &str = "gwkb_consent";

/// Privacy policy version recorded alongside each decision.
pub const POLICY_VERSION: &str = "1.0";

/// A visitor's recorded analytics decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRecord {
    /// `true` when analytics may run.
    pub analytics_granted: bool,
    /// When the decision was recorded, at millisecond precision.
    pub decided_at: DateTime<Utc>,
    /// Policy version in effect when the decision was made. Informational.
    pub policy_version: String,
}

/// On-the-wire field names.
#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    analytics: bool,
    timestamp: String,
    version: String,
}

impl ConsentRecord {
    /// Build a record decided at `decided_at`.
    ///
    /// The timestamp is truncated to milliseconds so a record compares equal
    /// to itself after a trip through storage.
    #[must_use]
    pub fn new(
        analytics_granted: bool,
        policy_version: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        let decided_at =
            DateTime::from_timestamp_millis(decided_at.timestamp_millis()).unwrap_or(decided_at);
        Self {
            analytics_granted,
            decided_at,
            policy_version: policy_version.into(),
        }
    }

    /// Build a record decided now.
    #[must_use]
    pub fn now(analytics_granted: bool, policy_version: impl Into<String>) -> Self {
        Self::new(analytics_granted, policy_version, Utc::now())
    }

    /// Encode into the stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, RecordError> {
        let wire = WireRecord {
            analytics: self.analytics_granted,
            timestamp: self.decided_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            version: self.policy_version.clone(),
        };
        serde_json::to_string(&wire).map_err(|e| RecordError::Encode {
            reason: e.to_string(),
        })
    }

    /// Decode the stored JSON form.
    ///
    /// Unknown extra fields are tolerated; missing or mistyped fields are not.
    ///
    /// # Errors
    ///
    /// - [`RecordError::Malformed`] for invalid JSON or the wrong shape.
    /// - [`RecordError::InvalidTimestamp`] if `timestamp` is not RFC 3339.
    pub fn from_json(raw: &str) -> Result<Self, RecordError> {
        let wire: WireRecord = serde_json::from_str(raw).map_err(|e| RecordError::Malformed {
            reason: e.to_string(),
        })?;

        let decided_at = DateTime::parse_from_rfc3339(&wire.timestamp)
            .map_err(|e| RecordError::InvalidTimestamp {
                value: wire.timestamp.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            analytics_granted: wire.analytics,
            decided_at,
            policy_version: wire.version,
        })
    }
}
