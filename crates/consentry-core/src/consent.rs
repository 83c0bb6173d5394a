//! The consent decision lifecycle.
//!
//! [`ConsentManager`] decides, once per page load, whether the analytics
//! loader may run, and owns every transition after that:
//!
//! ```text
//!             accept()              decline()
//! UNDECIDED ───────────▶ GRANTED ◀──────────▶ DECLINED
//!     ▲                     │      accept()       │
//!     └──────── reset() ────┴─────────────────────┘
//! ```
//!
//! The state a load starts in comes from storage, never from memory. The
//! record is written to the cookie jar (authoritative) and to local storage
//! (fallback); the write always completes before analytics is switched on
//! or off. Every storage failure is absorbed: the decision then lives in
//! memory for the rest of the load, and the next load prompts again.
//!
//! The loader is only ever activated while the current decision grants it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use consentry_storage::StorageBackend;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::analytics::AnalyticsLoader;
use crate::prompt::PromptSurface;
use crate::record::{CONSENT_STORAGE_KEY, ConsentRecord, POLICY_VERSION};

/// Written over a record that could not be deleted. Never parses as a
/// record, so it always reads as absent.
const REVOKED_TOMBSTONE: &str = "";

/// Where the record lives and which policy version decisions are made under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentSettings {
    /// Key used in both stores.
    pub storage_key: String,
    /// Policy version written into new records.
    pub policy_version: String,
}

impl Default for ConsentSettings {
    fn default() -> Self {
        Self {
            storage_key: CONSENT_STORAGE_KEY.to_owned(),
            policy_version: POLICY_VERSION.to_owned(),
        }
    }
}

/// Where the visitor stands for the current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    Undecided,
    Granted,
    Declined,
}

impl ConsentState {
    /// State implied by a record, or its absence.
    #[must_use]
    pub fn of(record: Option<&ConsentRecord>) -> Self {
        match record {
            None => Self::Undecided,
            Some(r) if r.analytics_granted => Self::Granted,
            Some(_) => Self::Declined,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Granted => "granted",
            Self::Declined => "declined",
        }
    }
}

/// Which stores accepted a recorded decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Cookie jar and local storage.
    Durable,
    CookieOnly,
    LocalOnly,
    /// Neither store; the decision lasts for this load only.
    MemoryOnly,
}

impl Persistence {
    fn from_outcomes(cookie: bool, local: bool) -> Self {
        match (cookie, local) {
            (true, true) => Self::Durable,
            (true, false) => Self::CookieOnly,
            (false, true) => Self::LocalOnly,
            (false, false) => Self::MemoryOnly,
        }
    }

    /// Whether the next load will see this decision.
    #[must_use]
    pub fn survives_reload(self) -> bool {
        self != Self::MemoryOnly
    }
}

/// Outcome of [`ConsentManager::record_decision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDecision {
    pub record: ConsentRecord,
    pub persistence: Persistence,
}

/// Owns the consent decision for one page load.
pub struct ConsentManager {
    cookies: Arc<dyn StorageBackend>,
    local: Arc<dyn StorageBackend>,
    analytics: Arc<dyn AnalyticsLoader>,
    prompt: Arc<dyn PromptSurface>,
    settings: ConsentSettings,
    /// Decision in effect for this load. Never consulted across loads.
    current: Mutex<Option<ConsentRecord>>,
    initialized: AtomicBool,
}

impl ConsentManager {
    /// Create a manager over the two stores, the analytics loader it gates,
    /// and the surface that presents the choice.
    #[must_use]
    pub fn new(
        cookies: Arc<dyn StorageBackend>,
        local: Arc<dyn StorageBackend>,
        analytics: Arc<dyn AnalyticsLoader>,
        prompt: Arc<dyn PromptSurface>,
    ) -> Self {
        Self {
            cookies,
            local,
            analytics,
            prompt,
            settings: ConsentSettings::default(),
            current: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Replace the default settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ConsentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// State for the current load.
    pub async fn state(&self) -> ConsentState {
        ConsentState::of(self.current.lock().await.as_ref())
    }

    /// Record in effect for the current load.
    pub async fn current_record(&self) -> Option<ConsentRecord> {
        self.current.lock().await.clone()
    }

    /// Run once per page load: restore the analytics side effect to match
    /// the stored decision, or present the prompt if there is none.
    ///
    /// A second call on the same load is a no-op.
    pub async fn initialize(&self) -> ConsentState {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("consent already initialized for this load");
            return self.state().await;
        }

        let record = self.read_decision().await;
        let state = ConsentState::of(record.as_ref());
        *self.current.lock().await = record;

        match state {
            ConsentState::Granted => self.activate_analytics().await,
            ConsentState::Declined => {}
            ConsentState::Undecided => self.prompt.show().await,
        }

        info!(state = state.as_str(), "consent initialized");
        state
    }

    /// Read the stored decision: cookie jar first, local storage second.
    ///
    /// Corrupt entries are deleted and read as absent. Never touches the
    /// analytics loader.
    pub async fn read_decision(&self) -> Option<ConsentRecord> {
        if let Some(record) = self.read_from(self.cookies.as_ref(), "cookie").await {
            return Some(record);
        }
        self.read_from(self.local.as_ref(), "local").await
    }

    /// Build a record for `granted` under the current policy version and
    /// write it to both stores.
    ///
    /// Writing is strictly necessary storage and happens before any consent
    /// exists. Failures are absorbed; the returned [`Persistence`] says which
    /// stores took the write. The record becomes the current decision
    /// whatever the outcome.
    pub async fn record_decision(&self, granted: bool) -> RecordedDecision {
        let record = ConsentRecord::now(granted, self.settings.policy_version.clone());

        let (cookie_ok, local_ok) = match record.to_json() {
            Ok(json) => (
                self.write_to(self.cookies.as_ref(), "cookie", &json).await,
                self.write_to(self.local.as_ref(), "local", &json).await,
            ),
            Err(e) => {
                warn!(error = %e, "consent record not encodable");
                (false, false)
            }
        };
        let persistence = Persistence::from_outcomes(cookie_ok, local_ok);

        *self.current.lock().await = Some(record.clone());
        info!(
            analytics = granted,
            persistence = ?persistence,
            version = %record.policy_version,
            "consent decision recorded"
        );

        RecordedDecision {
            record,
            persistence,
        }
    }

    /// Switch the analytics loader on, if the current decision grants it.
    /// Refuses (and logs) otherwise.
    pub async fn activate_analytics(&self) {
        if self.state().await != ConsentState::Granted {
            warn!("refusing to activate analytics without a granted decision");
            return;
        }
        self.analytics.activate().await;
    }

    /// Switch the analytics loader off. Safe when it never ran.
    pub async fn deactivate_analytics(&self) {
        self.analytics.deactivate().await;
    }

    /// The visitor accepted analytics.
    pub async fn accept(&self) -> RecordedDecision {
        let decision = self.record_decision(true).await;
        self.activate_analytics().await;
        self.prompt.hide().await;
        decision
    }

    /// The visitor declined analytics.
    pub async fn decline(&self) -> RecordedDecision {
        let decision = self.record_decision(false).await;
        self.deactivate_analytics().await;
        self.prompt.hide().await;
        decision
    }

    /// Revoke the decision: delete it from both stores, tear analytics down,
    /// and present the prompt again. Effective even while a script load is
    /// in flight.
    ///
    /// A store that refuses the delete gets its entry overwritten with an
    /// unparseable tombstone, which the next load discards as corrupt.
    pub async fn reset(&self) {
        self.revoke_in(self.cookies.as_ref(), "cookie").await;
        self.revoke_in(self.local.as_ref(), "local").await;

        *self.current.lock().await = None;
        self.deactivate_analytics().await;
        self.prompt.show().await;
        info!("consent reset");
    }

    /// The process-wide revocation entrypoint.
    #[must_use]
    pub fn reset_handle(self: &Arc<Self>) -> ResetConsent {
        ResetConsent {
            manager: Arc::clone(self),
        }
    }

    async fn read_from(&self, store: &dyn StorageBackend, name: &'static str) -> Option<ConsentRecord> {
        let key = &self.settings.storage_key;
        match store.get(key).await {
            Ok(Some(raw)) => match ConsentRecord::from_json(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(store = name, error = %e, "discarding corrupt consent record");
                    self.discard(store, name).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) if e.is_corrupt_value() => {
                warn!(store = name, error = %e, "discarding undecodable consent record");
                self.discard(store, name).await;
                None
            }
            Err(e) => {
                warn!(store = name, error = %e, "consent store unreadable");
                None
            }
        }
    }

    async fn write_to(&self, store: &dyn StorageBackend, name: &'static str, json: &str) -> bool {
        match store.put(&self.settings.storage_key, json).await {
            Ok(()) => true,
            Err(e) => {
                warn!(store = name, error = %e, "consent record not persisted");
                false
            }
        }
    }

    async fn revoke_in(&self, store: &dyn StorageBackend, name: &'static str) {
        let key = &self.settings.storage_key;
        let Err(e) = store.delete(key).await else {
            return;
        };
        warn!(store = name, error = %e, "consent record not deleted, writing tombstone");
        if let Err(e) = store.put(key, REVOKED_TOMBSTONE).await {
            error!(store = name, error = %e, "stale consent record left in place");
        }
    }

    async fn discard(&self, store: &dyn StorageBackend, name: &'static str) {
        if let Err(e) = store.delete(&self.settings.storage_key).await {
            warn!(store = name, error = %e, "corrupt consent record not deleted");
        }
    }
}

impl std::fmt::Debug for ConsentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Handle for the global `resetConsent()` entrypoint: no arguments, no
/// result. Cheap to clone.
#[derive(Clone)]
pub struct ResetConsent {
    manager: Arc<ConsentManager>,
}

impl ResetConsent {
    pub async fn call(&self) {
        self.manager.reset().await;
    }
}

impl std::fmt::Debug for ResetConsent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetConsent").finish_non_exhaustive()
    }
}
