//! CLI configuration for `consentry`.
//!
//! Loads settings from environment variables with sensible defaults. Command
//! line flags override them. All settings can be set via `CONSENTRY_*`
//! environment variables.

use std::path::PathBuf;

use consentry_core::analytics::GA_MEASUREMENT_ID;
use consentry_core::record::POLICY_VERSION;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Directory holding the browser profile (cookie jar + local storage).
    pub profile_dir: PathBuf,
    /// Log level filter (e.g., `warn`, `info`, `debug`).
    pub log_level: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    /// Analytics measurement id.
    pub measurement_id: String,
    /// Privacy policy version written into new decisions.
    pub policy_version: String,
    /// Language the simulated browser reports.
    pub browser_language: Option<String>,
    /// How long to wait for in-flight script loads before exiting.
    pub script_timeout_secs: u64,
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CONSENTRY_PROFILE_DIR`: browser profile directory (default: `./.consentry-profile`)
    /// - `CONSENTRY_LOG_LEVEL`: log filter when `RUST_LOG` is unset (default: `warn`)
    /// - `CONSENTRY_LOG_JSON`: `true`/`1` for JSON logs (default: `false`)
    /// - `CONSENTRY_MEASUREMENT_ID`: analytics measurement id (default: `G-PC28GD5SSR`)
    /// - `CONSENTRY_POLICY_VERSION`: policy version (default: `1.0`)
    /// - `CONSENTRY_BROWSER_LANG`, then `LANG`: browser language (optional)
    /// - `CONSENTRY_SCRIPT_TIMEOUT`: seconds to wait for script loads (default: `5`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let profile_dir = lookup("CONSENTRY_PROFILE_DIR")
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from("./.consentry-profile"), PathBuf::from);

        let log_level = lookup("CONSENTRY_LOG_LEVEL").unwrap_or_else(|| "warn".to_owned());

        let log_json = lookup("CONSENTRY_LOG_JSON").is_some_and(|v| v == "true" || v == "1");

        let measurement_id = lookup("CONSENTRY_MEASUREMENT_ID")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| GA_MEASUREMENT_ID.to_owned());

        let policy_version = lookup("CONSENTRY_POLICY_VERSION")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| POLICY_VERSION.to_owned());

        let browser_language = lookup("CONSENTRY_BROWSER_LANG")
            .or_else(|| lookup("LANG"))
            .filter(|v| !v.is_empty());

        let script_timeout_secs = lookup("CONSENTRY_SCRIPT_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        Self {
            profile_dir,
            log_level,
            log_json,
            measurement_id,
            policy_version,
            browser_language,
            script_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> CliConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        CliConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.profile_dir, PathBuf::from("./.consentry-profile"));
        assert_eq!(cfg.log_level, "warn");
        assert!(!cfg.log_json);
        assert_eq!(cfg.measurement_id, "G-PC28GD5SSR");
        assert_eq!(cfg.policy_version, "1.0");
        assert_eq!(cfg.browser_language, None);
        assert_eq!(cfg.script_timeout_secs, 5);
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("CONSENTRY_PROFILE_DIR", "/tmp/profile"),
            ("CONSENTRY_LOG_LEVEL", "debug"),
            ("CONSENTRY_LOG_JSON", "1"),
            ("CONSENTRY_MEASUREMENT_ID", "G-OTHER"),
            ("CONSENTRY_POLICY_VERSION", "2.0"),
            ("CONSENTRY_SCRIPT_TIMEOUT", "30"),
        ]);
        assert_eq!(cfg.profile_dir, PathBuf::from("/tmp/profile"));
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.log_json);
        assert_eq!(cfg.measurement_id, "G-OTHER");
        assert_eq!(cfg.policy_version, "2.0");
        assert_eq!(cfg.script_timeout_secs, 30);
    }

    #[test]
    fn browser_language_prefers_explicit_variable() {
        let cfg = config(&[("LANG", "ko_KR.UTF-8"), ("CONSENTRY_BROWSER_LANG", "es-MX")]);
        assert_eq!(cfg.browser_language.as_deref(), Some("es-MX"));

        let cfg = config(&[("LANG", "ko_KR.UTF-8")]);
        assert_eq!(cfg.browser_language.as_deref(), Some("ko_KR.UTF-8"));
    }

    #[test]
    fn unparseable_timeout_uses_default() {
        let cfg = config(&[("CONSENTRY_SCRIPT_TIMEOUT", "soon")]);
        assert_eq!(cfg.script_timeout_secs, 5);
    }
}
