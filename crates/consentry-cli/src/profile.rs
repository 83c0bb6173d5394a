//! Browser profile on disk and the page load built on top of it.
//!
//! A profile directory holds the two stores a visitor's browser keeps for
//! the site: `cookies.json` (the cookie jar) and `local-storage.redb`
//! (local-only storage). Every CLI invocation is one page load against it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use consentry_core::analytics::{AnalyticsLoader, BlockedFetcher, GtagLoader, ScriptFetcher};
use consentry_core::consent::{ConsentManager, ConsentSettings, ConsentState, Persistence};
use consentry_core::i18n::{BuiltinTranslations, resolve_language};
use consentry_core::page::Page;
use consentry_core::prompt::{BannerPrompt, PromptCopy, PromptSurface};
use consentry_core::record::CONSENT_STORAGE_KEY;
use consentry_storage::{CookieJarBackend, MemoryBackend, RedbBackend, StorageBackend};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CliConfig;
use crate::fetch::HttpFetcher;

const COOKIE_FILE: &str = "cookies.json";
const LOCAL_STORAGE_FILE: &str = "local-storage.redb";

/// A browser profile directory.
#[derive(Debug, Clone)]
pub struct Profile {
    dir: PathBuf,
}

impl Profile {
    /// Open the profile at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create profile directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// The profile's cookie jar, or a jar that refuses everything when
    /// cookies are blocked.
    ///
    /// # Errors
    ///
    /// Returns an error if the jar file exists but cannot be read.
    pub fn cookie_jar(&self, enabled: bool) -> Result<CookieJarBackend> {
        if !enabled {
            return Ok(CookieJarBackend::disabled());
        }
        let path = self.dir.join(COOKIE_FILE);
        CookieJarBackend::open(&path)
            .with_context(|| format!("failed to open cookie jar {}", path.display()))
    }

    /// The profile's local-only storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn local_storage(&self) -> Result<RedbBackend> {
        let path = self.dir.join(LOCAL_STORAGE_FILE);
        RedbBackend::open(&path)
            .with_context(|| format!("failed to open local storage {}", path.display()))
    }

    /// The cookie jar as a page load sees it. An unreadable jar file starts
    /// the load with an empty jar that rewrites the file on its next write.
    pub fn cookie_jar_for_load(&self, enabled: bool) -> CookieJarBackend {
        self.cookie_jar(enabled).unwrap_or_else(|e| {
            warn!(error = %format_args!("{e:#}"), "cookie jar unreadable, starting empty");
            CookieJarBackend::empty_at(self.dir.join(COOKIE_FILE))
        })
    }

    /// Local storage as a page load sees it. If the database cannot be
    /// opened, the load keeps local storage in memory.
    pub fn local_storage_for_load(&self) -> Arc<dyn StorageBackend> {
        match self.local_storage() {
            Ok(db) => Arc::new(db),
            Err(e) => {
                warn!(error = %format_args!("{e:#}"), "local storage unavailable, using memory for this load");
                Arc::new(MemoryBackend::new())
            }
        }
    }
}

/// How the simulated browser behaves for one load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Path the page is loaded at.
    pub location: String,
    /// Language the browser reports.
    pub browser_language: Option<String>,
    /// Block every network fetch.
    pub offline: bool,
    /// Allow the site to set cookies.
    pub cookies_enabled: bool,
}

/// One page load: the page, its stores, and the consent mechanism wired
/// over them.
pub struct PageLoad {
    pub page: Page,
    pub loader: Arc<GtagLoader>,
    pub prompt: Arc<BannerPrompt>,
    pub manager: Arc<ConsentManager>,
    script_timeout: Duration,
}

impl PageLoad {
    /// Wire a fresh page over `profile`. The consent mechanism is not run
    /// yet; callers decide when the load happens.
    ///
    /// Unreadable stores never fail the load; see
    /// [`Profile::cookie_jar_for_load`] and [`Profile::local_storage_for_load`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub async fn open(profile: &Profile, options: &LoadOptions, config: &CliConfig) -> Result<Self> {
        let cookies = profile.cookie_jar_for_load(options.cookies_enabled);
        let local = profile.local_storage_for_load();
        let script_timeout = Duration::from_secs(config.script_timeout_secs);

        let fetcher: Arc<dyn ScriptFetcher> = if options.offline {
            Arc::new(BlockedFetcher)
        } else {
            Arc::new(HttpFetcher::new(script_timeout)?)
        };

        let page = Page::at(options.location.clone());
        let loader = Arc::new(
            GtagLoader::new(page.clone(), fetcher).with_measurement_id(&config.measurement_id),
        );

        let language = resolve_language(local.as_ref(), options.browser_language.as_deref()).await;
        debug!(language = %language, "prompt language resolved");
        let prompt = Arc::new(BannerPrompt::new(
            page.clone(),
            PromptCopy::resolve(&BuiltinTranslations, language),
        ));

        let manager = Arc::new(
            ConsentManager::new(
                Arc::new(cookies),
                Arc::clone(&local),
                Arc::clone(&loader) as Arc<dyn AnalyticsLoader>,
                Arc::clone(&prompt) as Arc<dyn PromptSurface>,
            )
            .with_settings(ConsentSettings {
                storage_key: CONSENT_STORAGE_KEY.to_owned(),
                policy_version: config.policy_version.clone(),
            }),
        );

        Ok(Self {
            page,
            loader,
            prompt,
            manager,
            script_timeout,
        })
    }

    /// Wait for detached script loads, giving up after the configured
    /// timeout.
    pub async fn settle(&self) {
        if tokio::time::timeout(self.script_timeout, self.loader.settle())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.script_timeout.as_secs(),
                "analytics script still loading, not waiting"
            );
        }
    }

    /// Snapshot of what the visitor would see.
    pub async fn report(&self, persistence: Option<Persistence>) -> PageReport {
        let record = self.manager.current_record().await;
        let scripts = self.page.scripts().await;
        PageReport {
            state: self.manager.state().await,
            language: self.prompt.copy().language.code(),
            measurement_id: self.loader.measurement_id().to_owned(),
            location: self.page.location().await,
            prompt_visible: self.prompt.is_visible().await,
            analytics_active: self.loader.is_active().await,
            scripts: scripts
                .into_iter()
                .map(|s| ScriptReport {
                    src: s.src,
                    loaded: s.loaded,
                })
                .collect(),
            data_layer: self
                .page
                .data_layer()
                .await
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.command)
                .collect(),
            decided_at: record.as_ref().map(|r| r.decided_at.to_rfc3339()),
            policy_version: record.map(|r| r.policy_version),
            persistence,
        }
    }
}

impl std::fmt::Debug for PageLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageLoad")
            .field("language", &self.prompt.copy().language)
            .field("script_timeout", &self.script_timeout)
            .finish_non_exhaustive()
    }
}

/// A script tag in the page head.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptReport {
    pub src: String,
    pub loaded: bool,
}

/// Page state after a command ran.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub state: ConsentState,
    pub language: &'static str,
    pub measurement_id: String,
    pub location: String,
    pub prompt_visible: bool,
    pub analytics_active: bool,
    pub scripts: Vec<ScriptReport>,
    /// Commands queued on `dataLayer`, in order.
    pub data_layer: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,
    /// Which stores took the decision made by this command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<Persistence>,
}
