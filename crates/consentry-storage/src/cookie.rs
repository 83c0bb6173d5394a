//! Cookie jar storage backend, the durable network-transmitted store.
//!
//! Writes are expressed the way a page script writes `document.cookie`: as a
//! single assignment string (`name=value;expires=...;path=/;SameSite=Lax`)
//! that the jar parses and applies. Deletion is an assignment with an expiry
//! in the past. Values are percent-encoded on the way in and decoded on the
//! way out, so any string survives the trip through the `Cookie:` header.
//!
//! The jar can optionally be backed by a JSON file so a browser profile keeps
//! its cookies across loads. The file is rewritten (write + rename) on every
//! mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{StorageBackend, StorageError};

/// `Date.prototype.toUTCString` layout, minus the zone suffix.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// Expiry used for deletion assignments.
const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 UTC";

/// The `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    /// Attribute value as written in an assignment string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Attributes applied to every cookie the backend writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    /// Cookie path.
    pub path: String,
    /// Time from write until the cookie expires.
    pub lifetime: TimeDelta,
    /// Cross-site sending policy.
    pub same_site: SameSite,
}

impl Default for CookieAttributes {
    /// Same-site, site-wide, one year.
    fn default() -> Self {
        Self {
            path: "/".to_owned(),
            lifetime: TimeDelta::days(365),
            same_site: SameSite::Lax,
        }
    }
}

/// A single cookie held by the jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    /// The value exactly as sent on the wire (still percent-encoded).
    pub value: String,
    /// `None` for a session cookie.
    pub expires: Option<DateTime<Utc>>,
    pub path: String,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    /// Parse a `document.cookie`-style assignment.
    ///
    /// Returns `None` for input a browser would ignore (no `=`, empty name).
    /// `max-age` takes precedence over `expires` when both are present.
    #[must_use]
    pub fn parse_assignment(assignment: &str, now: DateTime<Utc>) -> Option<Self> {
        let mut parts = assignment.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Self {
            name: name.to_owned(),
            value: value.trim().to_owned(),
            expires: None,
            path: "/".to_owned(),
            same_site: None,
        };
        let mut max_age = None;

        for attr in parts {
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            match key.trim().to_ascii_lowercase().as_str() {
                "expires" => cookie.expires = parse_http_date(val),
                "max-age" => {
                    // Out-of-range values drop the attribute.
                    max_age = val
                        .trim()
                        .parse::<i64>()
                        .ok()
                        .and_then(TimeDelta::try_seconds)
                        .and_then(|d| now.checked_add_signed(d));
                }
                "path" if !val.trim().is_empty() => cookie.path = val.trim().to_owned(),
                "samesite" => cookie.same_site = SameSite::parse(val),
                _ => {}
            }
        }
        if max_age.is_some() {
            cookie.expires = max_age;
        }

        Some(cookie)
    }

    /// Render the cookie back into an assignment string.
    #[must_use]
    pub fn to_assignment(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(expires) = self.expires {
            out.push_str(";expires=");
            out.push_str(&format_http_date(expires));
        }
        out.push_str(";path=");
        out.push_str(&self.path);
        if let Some(same_site) = self.same_site {
            out.push_str(";SameSite=");
            out.push_str(same_site.as_str());
        }
        out
    }

    /// Whether the cookie has expired at `now`. Session cookies never do.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// Format a timestamp the way `Date.prototype.toUTCString` does.
fn format_http_date(at: DateTime<Utc>) -> String {
    format!("{} GMT", at.format(HTTP_DATE_FORMAT))
}

/// The last instant a four-digit-year HTTP date can express.
fn latest_http_date() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map_or(DateTime::<Utc>::MAX_UTC, |naive| naive.and_utc())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = ["GMT", "UTC", "UT"]
        .iter()
        .find_map(|zone| value.strip_suffix(zone))
        .unwrap_or(value)
        .trim_end();
    NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// A cookie jar exposed as a [`StorageBackend`].
///
/// One cookie per name; the consent mechanism only ever writes site-wide
/// (`path=/`) cookies. Clones share the same jar.
#[derive(Debug, Clone)]
pub struct CookieJarBackend {
    jar: Arc<RwLock<BTreeMap<String, Cookie>>>,
    attributes: CookieAttributes,
    file: Option<PathBuf>,
    enabled: bool,
}

impl CookieJarBackend {
    /// Create an empty, in-memory jar with default attributes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jar: Arc::new(RwLock::new(BTreeMap::new())),
            attributes: CookieAttributes::default(),
            file: None,
            enabled: true,
        }
    }

    /// Create a jar that refuses every operation, as a user agent with
    /// cookies blocked does.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Open a jar persisted at `path`, creating it on first write.
    ///
    /// Expired cookies in the file are dropped on load.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file exists but cannot be read
    /// or is not a valid jar.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let open_err = |reason: String| StorageError::Open {
            path: path.display().to_string(),
            reason,
        };

        let cookies: Vec<Cookie> = match std::fs::read_to_string(path) {
            Ok(contents) if contents.trim().is_empty() => Vec::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| open_err(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(open_err(e.to_string())),
        };

        let now = Utc::now();
        let jar = cookies
            .into_iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| (c.name.clone(), c))
            .collect();

        Ok(Self {
            jar: Arc::new(RwLock::new(jar)),
            attributes: CookieAttributes::default(),
            file: Some(path.to_path_buf()),
            enabled: true,
        })
    }

    /// An empty jar persisted at `path`, ignoring whatever the file holds.
    /// The first write replaces the file, the way a browser rebuilds a
    /// cookie store it cannot read.
    #[must_use]
    pub fn empty_at(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Self::new()
        }
    }

    /// Replace the attributes applied to subsequent writes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: CookieAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Apply a `document.cookie`-style assignment.
    ///
    /// Malformed assignments are ignored, as browsers ignore them. An
    /// assignment whose expiry is already in the past removes the cookie.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Unavailable`] if cookies are disabled.
    /// - [`StorageError::Persist`] if the jar file cannot be written.
    pub async fn set_cookie(&self, assignment: &str) -> Result<(), StorageError> {
        self.ensure_enabled()?;

        let now = Utc::now();
        let Some(cookie) = Cookie::parse_assignment(assignment, now) else {
            debug!("ignoring malformed cookie assignment");
            return Ok(());
        };

        let snapshot = {
            let mut jar = self.jar.write().await;
            jar.retain(|_, c| !c.is_expired(now));
            if cookie.is_expired(now) {
                jar.remove(&cookie.name);
            } else {
                jar.insert(cookie.name.clone(), cookie);
            }
            jar.values().cloned().collect::<Vec<_>>()
        };

        self.persist(&snapshot).await
    }

    /// The `Cookie:` request header the origin would receive.
    pub async fn cookie_header(&self) -> String {
        let now = Utc::now();
        self.jar
            .read()
            .await
            .values()
            .filter(|c| !c.is_expired(now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// All unexpired cookies, ordered by name.
    pub async fn cookies(&self) -> Vec<Cookie> {
        let now = Utc::now();
        self.jar
            .read()
            .await
            .values()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    fn ensure_enabled(&self) -> Result<(), StorageError> {
        if self.enabled {
            Ok(())
        } else {
            Err(StorageError::Unavailable { backend: "cookie" })
        }
    }

    async fn persist(&self, cookies: &[Cookie]) -> Result<(), StorageError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let persist_err = |reason: String| StorageError::Persist {
            path: path.display().to_string(),
            reason,
        };

        let json = serde_json::to_string_pretty(cookies).map_err(|e| persist_err(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| persist_err(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| persist_err(e.to_string()))
    }
}

impl Default for CookieJarBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StorageBackend for CookieJarBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_enabled()?;

        let now = Utc::now();
        let jar = self.jar.read().await;
        let Some(cookie) = jar.get(key).filter(|c| !c.is_expired(now)) else {
            return Ok(None);
        };
        if cookie.value.is_empty() {
            return Ok(None);
        }

        urlencoding::decode(&cookie.value)
            .map(|decoded| Some(decoded.into_owned()))
            .map_err(|e| StorageError::Decode {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let expires = Utc::now()
            .checked_add_signed(self.attributes.lifetime)
            .unwrap_or_else(latest_http_date);
        let assignment = format!(
            "{key}={};expires={};path={};SameSite={}",
            urlencoding::encode(value),
            format_http_date(expires),
            self.attributes.path,
            self.attributes.same_site.as_str(),
        );
        self.set_cookie(&assignment).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let assignment = format!(
            "{key}=;expires={EPOCH_EXPIRES};path={};",
            self.attributes.path
        );
        self.set_cookie(&assignment).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_http_date_accepts_gmt_and_utc() {
        let gmt = parse_http_date("Thu, 01 Jan 1970 00:00:00 GMT").unwrap();
        let utc = parse_http_date(EPOCH_EXPIRES).unwrap();
        assert_eq!(gmt, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(utc, DateTime::<Utc>::UNIX_EPOCH);
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn http_date_round_trips() {
        let at = DateTime::parse_from_rfc3339("2026-10-17T08:30:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let formatted = format_http_date(at);
        assert_eq!(formatted, "Sat, 17 Oct 2026 08:30:05 GMT");
        assert_eq!(parse_http_date(&formatted), Some(at));
    }

    #[test]
    fn parse_assignment_reads_attributes() {
        let now = Utc::now();
        let cookie = Cookie::parse_assignment(
            "gwkb_consent=abc;expires=Sat, 17 Oct 2099 08:30:05 GMT;path=/;SameSite=Lax",
            now,
        )
        .unwrap();
        assert_eq!(cookie.name, "gwkb_consent");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.same_site, Some(SameSite::Lax));
        assert!(!cookie.is_expired(now));
    }

    #[test]
    fn max_age_overrides_expires() {
        let now = Utc::now();
        let cookie =
            Cookie::parse_assignment("a=1;expires=Sat, 17 Oct 2099 08:30:05 GMT;max-age=0", now)
                .unwrap();
        assert!(cookie.is_expired(now));
    }

    #[test]
    fn out_of_range_max_age_is_dropped() {
        let now = Utc::now();
        let cookie = Cookie::parse_assignment("a=1;max-age=9223372036854775807", now).unwrap();
        assert_eq!(cookie.expires, None);

        let cookie = Cookie::parse_assignment(
            "a=1;expires=Sat, 17 Oct 2099 08:30:05 GMT;max-age=99999999999999999",
            now,
        )
        .unwrap();
        assert_eq!(cookie.expires, parse_http_date("Sat, 17 Oct 2099 08:30:05 GMT"));
    }

    #[tokio::test]
    async fn huge_max_age_assignment_is_stored() {
        let jar = CookieJarBackend::new();
        jar.set_cookie("gwkb_consent=x;max-age=9223372036854775807")
            .await
            .unwrap();
        assert_eq!(jar.get("gwkb_consent").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn unbounded_lifetime_clamps_expiry() {
        let jar = CookieJarBackend::new().with_attributes(CookieAttributes {
            lifetime: TimeDelta::MAX,
            ..CookieAttributes::default()
        });
        jar.put("k", "v").await.unwrap();
        let cookie = &jar.cookies().await[0];
        assert_eq!(cookie.expires, Some(latest_http_date()));
        assert_eq!(jar.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn malformed_assignment_is_ignored() {
        assert!(Cookie::parse_assignment("no-equals-sign", Utc::now()).is_none());
        assert!(Cookie::parse_assignment("=value", Utc::now()).is_none());
    }

    #[tokio::test]
    async fn put_percent_encodes_and_get_decodes() {
        let jar = CookieJarBackend::new();
        let value = r#"{"analytics":true,"version":"1.0"}"#;
        jar.put("gwkb_consent", value).await.unwrap();

        let raw = &jar.cookies().await[0];
        assert!(raw.value.starts_with("%7B"));
        assert!(!raw.value.contains('"'));
        assert_eq!(raw.same_site, Some(SameSite::Lax));
        assert_eq!(raw.path, "/");

        assert_eq!(jar.get("gwkb_consent").await.unwrap().as_deref(), Some(value));
    }

    #[tokio::test]
    async fn put_sets_one_year_expiry() {
        let jar = CookieJarBackend::new();
        jar.put("k", "v").await.unwrap();
        let expires = jar.cookies().await[0].expires.unwrap();
        let days = (expires - Utc::now()).num_days();
        assert!((364..=365).contains(&days), "expiry {days} days out");
    }

    #[tokio::test]
    async fn delete_removes_cookie() {
        let jar = CookieJarBackend::new();
        jar.put("k", "v").await.unwrap();
        jar.delete("k").await.unwrap();
        assert_eq!(jar.get("k").await.unwrap(), None);
        assert!(jar.cookies().await.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let jar = CookieJarBackend::new();
        jar.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn expired_cookie_is_invisible() {
        let jar = CookieJarBackend::new();
        jar.set_cookie("k=v;max-age=-10").await.unwrap();
        assert_eq!(jar.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_value_reads_as_absent() {
        let jar = CookieJarBackend::new();
        jar.set_cookie("k=;path=/").await.unwrap();
        assert_eq!(jar.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn undecodable_value_is_a_decode_error() {
        let jar = CookieJarBackend::new();
        jar.set_cookie("k=%FF%FE;path=/").await.unwrap();
        let err = jar.get("k").await.unwrap_err();
        assert!(err.is_corrupt_value());
    }

    #[tokio::test]
    async fn cookie_header_joins_pairs() {
        let jar = CookieJarBackend::new();
        jar.put("a", "1").await.unwrap();
        jar.put("b", "x y").await.unwrap();
        assert_eq!(jar.cookie_header().await, "a=1; b=x%20y");
    }

    #[tokio::test]
    async fn disabled_jar_refuses_everything() {
        let jar = CookieJarBackend::disabled();
        assert!(matches!(
            jar.put("k", "v").await,
            Err(StorageError::Unavailable { backend: "cookie" })
        ));
        assert!(matches!(
            jar.get("k").await,
            Err(StorageError::Unavailable { .. })
        ));
        assert!(jar.delete("k").await.is_err());
    }

    #[tokio::test]
    async fn custom_attributes_are_applied() {
        let jar = CookieJarBackend::new().with_attributes(CookieAttributes {
            path: "/blog".to_owned(),
            lifetime: TimeDelta::days(1),
            same_site: SameSite::Strict,
        });
        jar.put("k", "v").await.unwrap();
        let cookie = &jar.cookies().await[0];
        assert_eq!(cookie.path, "/blog");
        assert_eq!(cookie.same_site, Some(SameSite::Strict));
        assert!(cookie.to_assignment().ends_with(";path=/blog;SameSite=Strict"));
    }

    #[tokio::test]
    async fn persisted_jar_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");

        let jar = CookieJarBackend::open(&path).unwrap();
        jar.put("gwkb_consent", "kept").await.unwrap();
        jar.put("gone", "soon").await.unwrap();
        jar.delete("gone").await.unwrap();
        drop(jar);

        let reopened = CookieJarBackend::open(&path).unwrap();
        assert_eq!(
            reopened.get("gwkb_consent").await.unwrap().as_deref(),
            Some("kept")
        );
        assert_eq!(reopened.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_jar_replaces_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "{{{").unwrap();

        let jar = CookieJarBackend::empty_at(&path);
        assert!(jar.cookies().await.is_empty());
        jar.put("gwkb_consent", "rebuilt").await.unwrap();

        let reopened = CookieJarBackend::open(&path).unwrap();
        assert_eq!(
            reopened.get("gwkb_consent").await.unwrap().as_deref(),
            Some("rebuilt")
        );
    }

    #[test]
    fn open_rejects_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "not json").unwrap();
        let err = CookieJarBackend::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::Open { .. }));
    }
}
