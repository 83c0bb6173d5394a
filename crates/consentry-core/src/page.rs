//! An explicit model of the browser page the consent mechanism touches.
//!
//! The analytics loader and the consent prompt both act on process-wide page
//! state: script tags in the document head, the `dataLayer` event queue, the
//! `gtag` entrypoint, and the consent bar element. Instead of reaching into
//! ambient globals, they share a [`Page`] handle and go through its named
//! operations. Third-party code is modelled the same way: it can only talk to
//! analytics through [`Page::gtag`], which does nothing once the entrypoint
//! has been removed.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// A `<script>` element in the document head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTag {
    /// Page-unique element id.
    pub id: u64,
    pub src: String,
    pub is_async: bool,
    /// Set once the fetched script has executed.
    pub loaded: bool,
}

/// One call recorded in the `dataLayer` queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLayerEntry {
    pub command: String,
    pub args: Vec<Value>,
}

/// The consent bar element in the document body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentBarElement {
    pub html: String,
    pub visible: bool,
}

#[derive(Debug)]
struct Document {
    scripts: Vec<ScriptTag>,
    next_script_id: u64,
    data_layer: Option<Vec<DataLayerEntry>>,
    gtag_installed: bool,
    consent_bar: Option<ConsentBarElement>,
    location: String,
}

/// Shared handle to the page. Clones refer to the same document.
#[derive(Debug, Clone)]
pub struct Page {
    doc: Arc<RwLock<Document>>,
}

impl Page {
    /// A freshly loaded page at `/`.
    #[must_use]
    pub fn new() -> Self {
        Self::at("/")
    }

    /// A freshly loaded page at `location`.
    #[must_use]
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            doc: Arc::new(RwLock::new(Document {
                scripts: Vec::new(),
                next_script_id: 1,
                data_layer: None,
                gtag_installed: false,
                consent_bar: None,
                location: location.into(),
            })),
        }
    }

    // ── head ─────────────────────────────────────────────────────────

    /// Append an async script tag to the head and return its id.
    pub async fn inject_script(&self, src: &str) -> u64 {
        let mut doc = self.doc.write().await;
        let id = doc.next_script_id;
        doc.next_script_id += 1;
        doc.scripts.push(ScriptTag {
            id,
            src: src.to_owned(),
            is_async: true,
            loaded: false,
        });
        id
    }

    /// Remove every script tag whose `src` contains `host`. Returns how many
    /// were removed.
    pub async fn remove_scripts_from(&self, host: &str) -> usize {
        let mut doc = self.doc.write().await;
        let before = doc.scripts.len();
        doc.scripts.retain(|s| !s.src.contains(host));
        before - doc.scripts.len()
    }

    /// Mark a script as executed. Returns `false` if the tag is gone.
    pub async fn mark_script_loaded(&self, id: u64) -> bool {
        let mut doc = self.doc.write().await;
        match doc.scripts.iter_mut().find(|s| s.id == id) {
            Some(tag) => {
                tag.loaded = true;
                true
            }
            None => false,
        }
    }

    /// Script tags currently in the head.
    pub async fn scripts(&self) -> Vec<ScriptTag> {
        self.doc.read().await.scripts.clone()
    }

    // ── globals ──────────────────────────────────────────────────────

    /// Create the `dataLayer` queue (keeping an existing one) and install the
    /// `gtag` entrypoint.
    pub async fn install_gtag(&self) {
        let mut doc = self.doc.write().await;
        doc.data_layer.get_or_insert_with(Vec::new);
        doc.gtag_installed = true;
    }

    /// Call the `gtag` entrypoint. A no-op returning `false` when the
    /// entrypoint is not installed.
    pub async fn gtag(&self, command: &str, args: Vec<Value>) -> bool {
        let mut doc = self.doc.write().await;
        if !doc.gtag_installed {
            return false;
        }
        doc.data_layer
            .get_or_insert_with(Vec::new)
            .push(DataLayerEntry {
                command: command.to_owned(),
                args,
            });
        true
    }

    /// Whether the `gtag` entrypoint is installed.
    pub async fn has_gtag(&self) -> bool {
        self.doc.read().await.gtag_installed
    }

    /// Snapshot of the `dataLayer` queue, `None` if it was never created.
    pub async fn data_layer(&self) -> Option<Vec<DataLayerEntry>> {
        self.doc.read().await.data_layer.clone()
    }

    /// Empty the `dataLayer` queue if it exists.
    pub async fn clear_data_layer(&self) {
        if let Some(queue) = self.doc.write().await.data_layer.as_mut() {
            queue.clear();
        }
    }

    /// Remove the `gtag` entrypoint.
    pub async fn remove_gtag(&self) {
        self.doc.write().await.gtag_installed = false;
    }

    // ── body ─────────────────────────────────────────────────────────

    /// Insert the consent bar, visible. Returns `false` (and changes nothing)
    /// if one is already mounted.
    pub async fn mount_consent_bar(&self, html: String) -> bool {
        let mut doc = self.doc.write().await;
        if doc.consent_bar.is_some() {
            return false;
        }
        doc.consent_bar = Some(ConsentBarElement {
            html,
            visible: true,
        });
        true
    }

    /// Show or hide the mounted consent bar. Returns `false` if none is mounted.
    pub async fn set_consent_bar_visible(&self, visible: bool) -> bool {
        match self.doc.write().await.consent_bar.as_mut() {
            Some(bar) => {
                bar.visible = visible;
                true
            }
            None => false,
        }
    }

    /// The consent bar, if mounted.
    pub async fn consent_bar(&self) -> Option<ConsentBarElement> {
        self.doc.read().await.consent_bar.clone()
    }

    // ── navigation ───────────────────────────────────────────────────

    /// Client-side navigation to `path`.
    pub async fn navigate(&self, path: &str) {
        self.doc.write().await.location = path.to_owned();
    }

    /// The current location.
    pub async fn location(&self) -> String {
        self.doc.read().await.location.clone()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}
