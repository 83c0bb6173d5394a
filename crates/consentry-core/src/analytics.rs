//! The analytics loader gated by consent.
//!
//! [`AnalyticsLoader`] is the seam the consent manager drives. The shipped
//! implementation, [`GtagLoader`], reproduces the Google tag bootstrap on a
//! [`Page`]: create the `dataLayer` queue, install `gtag`, queue the `js` and
//! `config` calls, and append an async script tag. The script fetch runs on a
//! detached task; `activate` never waits for it.
//!
//! Teardown removes the tag, empties the queue, and removes the entrypoint.
//! A fetch that completes after teardown finds its tag gone and does not
//! execute, and any late call it makes goes through a `gtag` that is no
//! longer installed.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::page::Page;

/// Measurement id configured by default.
pub const GA_MEASUREMENT_ID: &str = "G-PC28GD5SSR";

/// Host serving the tag library. Teardown removes every script from it.
pub const GTAG_HOST: &str = "googletagmanager.com";

/// Activates and deactivates third-party analytics.
///
/// Both operations must be idempotent: calling either one redundantly is
/// always safe.
#[async_trait::async_trait]
pub trait AnalyticsLoader: Send + Sync {
    /// Start analytics. Returns before any network work completes.
    async fn activate(&self);

    /// Stop analytics and remove every trace of the loader from the page.
    async fn deactivate(&self);

    /// Whether analytics is currently active.
    async fn is_active(&self) -> bool;
}

/// Fetches and executes a script by URL.
#[async_trait::async_trait]
pub trait ScriptFetcher: Send + Sync + 'static {
    /// Resolve once the script has been fetched.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when the script cannot be loaded.
    async fn fetch(&self, src: &str) -> Result<(), FetchError>;
}

/// Loads every script immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantFetcher;

#[async_trait::async_trait]
impl ScriptFetcher for InstantFetcher {
    async fn fetch(&self, _src: &str) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Fails every request, the way a content blocker does.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockedFetcher;

#[async_trait::async_trait]
impl ScriptFetcher for BlockedFetcher {
    async fn fetch(&self, src: &str) -> Result<(), FetchError> {
        Err(FetchError::Blocked {
            src: src.to_owned(),
        })
    }
}

/// Google tag loader acting on a [`Page`].
pub struct GtagLoader {
    page: Page,
    measurement_id: String,
    fetcher: Arc<dyn ScriptFetcher>,
    /// Detached script loads, kept so hosts can wait for them before exit.
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl GtagLoader {
    /// Create a loader using the default measurement id.
    #[must_use]
    pub fn new(page: Page, fetcher: Arc<dyn ScriptFetcher>) -> Self {
        Self {
            page,
            measurement_id: GA_MEASUREMENT_ID.to_owned(),
            fetcher,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Override the measurement id.
    #[must_use]
    pub fn with_measurement_id(mut self, measurement_id: impl Into<String>) -> Self {
        self.measurement_id = measurement_id.into();
        self
    }

    /// The configured measurement id.
    #[must_use]
    pub fn measurement_id(&self) -> &str {
        &self.measurement_id
    }

    /// URL of the tag library for this measurement id.
    #[must_use]
    pub fn script_src(&self) -> String {
        format!(
            "https://www.{GTAG_HOST}/gtag/js?id={}",
            self.measurement_id
        )
    }

    /// Wait for every detached script load started so far.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "analytics script task did not complete");
            }
        }
    }
}

impl std::fmt::Debug for GtagLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GtagLoader")
            .field("measurement_id", &self.measurement_id)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl AnalyticsLoader for GtagLoader {
    async fn activate(&self) {
        if self.is_active().await {
            debug!("analytics already active");
            return;
        }

        self.page.install_gtag().await;
        let started = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.page.gtag("js", vec![Value::String(started)]).await;
        self.page
            .gtag("config", vec![json!(self.measurement_id)])
            .await;

        let src = self.script_src();
        let script_id = self.page.inject_script(&src).await;
        info!(measurement_id = %self.measurement_id, "analytics activated");

        let page = self.page.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let handle = tokio::spawn(load_script(page, fetcher, script_id, src));

        let mut pending = self.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    async fn deactivate(&self) {
        let removed = self.page.remove_scripts_from(GTAG_HOST).await;
        self.page.clear_data_layer().await;
        self.page.remove_gtag().await;
        debug!(removed_scripts = removed, "analytics deactivated");
    }

    async fn is_active(&self) -> bool {
        self.page.data_layer().await.is_some() && self.page.has_gtag().await
    }
}

/// Fetch the tag library and run its bootstrap.
async fn load_script(page: Page, fetcher: Arc<dyn ScriptFetcher>, script_id: u64, src: String) {
    if let Err(e) = fetcher.fetch(&src).await {
        debug!(error = %e, "analytics script did not load");
        return;
    }

    if !page.mark_script_loaded(script_id).await {
        debug!("analytics script arrived after teardown, not executed");
        return;
    }

    if !page.gtag("event", vec![json!("page_view")]).await {
        debug!("analytics entrypoint gone, page view dropped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::Notify;

    use super::*;

    /// Holds every fetch until the test opens the gate.
    struct GatedFetcher {
        gate: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl ScriptFetcher for GatedFetcher {
        async fn fetch(&self, _src: &str) -> Result<(), FetchError> {
            self.gate.notified().await;
            Ok(())
        }
    }

    fn commands(page_layer: &[crate::page::DataLayerEntry]) -> Vec<&str> {
        page_layer.iter().map(|e| e.command.as_str()).collect()
    }

    #[tokio::test]
    async fn activate_bootstraps_queue_and_script() {
        let page = Page::new();
        let loader = GtagLoader::new(page.clone(), Arc::new(InstantFetcher));

        loader.activate().await;
        assert!(loader.is_active().await);

        let scripts = page.scripts().await;
        assert_eq!(scripts.len(), 1);
        assert_eq!(
            scripts[0].src,
            "https://www.googletagmanager.com/gtag/js?id=G-PC28GD5SSR"
        );
        assert!(scripts[0].is_async);

        let layer = page.data_layer().await.unwrap();
        assert_eq!(&commands(&layer)[..2], ["js", "config"]);
        assert_eq!(layer[1].args, vec![json!("G-PC28GD5SSR")]);
    }

    #[tokio::test]
    async fn activate_twice_injects_once() {
        let page = Page::new();
        let loader = GtagLoader::new(page.clone(), Arc::new(InstantFetcher));

        loader.activate().await;
        loader.activate().await;
        loader.settle().await;

        assert_eq!(page.scripts().await.len(), 1);
        let layer = page.data_layer().await.unwrap();
        assert_eq!(commands(&layer), ["js", "config", "event"]);
    }

    #[tokio::test]
    async fn loaded_script_reports_page_view() {
        let page = Page::new();
        let loader = GtagLoader::new(page.clone(), Arc::new(InstantFetcher));

        loader.activate().await;
        loader.settle().await;

        assert!(page.scripts().await[0].loaded);
        let layer = page.data_layer().await.unwrap();
        assert_eq!(layer.last().unwrap().args, vec![json!("page_view")]);
    }

    #[tokio::test]
    async fn blocked_script_is_silent() {
        let page = Page::new();
        let loader = GtagLoader::new(page.clone(), Arc::new(BlockedFetcher));

        loader.activate().await;
        loader.settle().await;

        assert!(!page.scripts().await[0].loaded);
        assert!(loader.is_active().await);
        assert_eq!(page.data_layer().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deactivate_without_activate_changes_nothing() {
        let page = Page::new();
        let loader = GtagLoader::new(page.clone(), Arc::new(InstantFetcher));

        loader.deactivate().await;

        assert!(!loader.is_active().await);
        assert!(page.scripts().await.is_empty());
        assert_eq!(page.data_layer().await, None);
        assert!(!page.has_gtag().await);
    }

    #[tokio::test]
    async fn deactivate_tears_everything_down() {
        let page = Page::new();
        let loader = GtagLoader::new(page.clone(), Arc::new(InstantFetcher));

        loader.activate().await;
        loader.settle().await;
        loader.deactivate().await;

        assert!(!loader.is_active().await);
        assert!(page.scripts().await.is_empty());
        assert_eq!(page.data_layer().await, Some(Vec::new()));
        assert!(!page.gtag("event", vec![]).await);
    }

    #[tokio::test]
    async fn teardown_during_load_neuters_late_script() {
        let page = Page::new();
        let gate = Arc::new(Notify::new());
        let loader = GtagLoader::new(
            page.clone(),
            Arc::new(GatedFetcher {
                gate: Arc::clone(&gate),
            }),
        );

        loader.activate().await;
        loader.deactivate().await;
        gate.notify_one();
        loader.settle().await;

        assert!(page.scripts().await.is_empty());
        assert_eq!(page.data_layer().await, Some(Vec::new()));
        assert!(!loader.is_active().await);
    }

    #[tokio::test]
    async fn reactivate_after_teardown_injects_fresh_tag() {
        let page = Page::new();
        let loader = GtagLoader::new(page.clone(), Arc::new(InstantFetcher))
            .with_measurement_id("G-TEST");

        loader.activate().await;
        loader.deactivate().await;
        loader.activate().await;
        loader.settle().await;

        let scripts = page.scripts().await;
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].src.ends_with("id=G-TEST"));
        assert!(loader.is_active().await);
    }
}
