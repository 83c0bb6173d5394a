//! The consent prompt: a presentation seam and its banner rendering.
//!
//! The consent manager only knows [`PromptSurface`]: show, hide, and ask
//! whether it is visible. [`BannerPrompt`] is the adapter that renders the
//! fixed consent bar into a [`Page`]. Other front ends provide their own
//! surface and reuse the same manager.

use std::sync::Arc;

use crate::i18n::{Language, Translator, keys, translate_or_default};
use crate::page::Page;

/// Route of the privacy policy page.
pub const PRIVACY_PATH: &str = "/privacy";

/// Where the binary accept/decline choice is presented.
#[async_trait::async_trait]
pub trait PromptSurface: Send + Sync {
    /// Present the prompt. Showing an already visible prompt is a no-op.
    async fn show(&self);

    /// Dismiss the prompt. Safe to call when it was never shown.
    async fn hide(&self);

    /// Whether the prompt is currently presented.
    async fn is_visible(&self) -> bool;
}

/// Client-side routing, as seen by the prompt's "learn more" link.
#[async_trait::async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, path: &str);
}

#[async_trait::async_trait]
impl Navigator for Page {
    async fn navigate(&self, path: &str) {
        Page::navigate(self, path).await;
    }
}

/// Translated strings for one rendering of the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCopy {
    pub language: Language,
    pub message: String,
    pub accept: String,
    pub decline: String,
    pub learn_more: String,
    pub region_label: String,
    pub accept_label: String,
    pub decline_label: String,
    pub learn_more_label: String,
}

impl PromptCopy {
    /// Resolve every string for `language`, with fallbacks.
    #[must_use]
    pub fn resolve(translator: &dyn Translator, language: Language) -> Self {
        let t = |key| translate_or_default(translator, key, language);
        Self {
            language,
            message: t(keys::MESSAGE),
            accept: t(keys::ACCEPT),
            decline: t(keys::DECLINE),
            learn_more: t(keys::LEARN_MORE),
            region_label: t(keys::REGION_LABEL),
            accept_label: t(keys::ACCEPT_LABEL),
            decline_label: t(keys::DECLINE_LABEL),
            learn_more_label: t(keys::LEARN_MORE_LABEL),
        }
    }

    /// Markup for the consent bar.
    #[must_use]
    pub fn render_html(&self) -> String {
        format!(
            concat!(
                r#"<div id="consent-bar" class="consent-bar" role="region" aria-label="{region}" lang="{lang}">"#,
                r#"<div class="consent-bar-content">"#,
                r#"<p class="consent-message">{message}</p>"#,
                r#"<div class="consent-actions">"#,
                r#"<button id="consent-accept" class="consent-btn consent-btn-accept" aria-label="{accept_label}">{accept}</button>"#,
                r#"<button id="consent-decline" class="consent-btn consent-btn-decline" aria-label="{decline_label}">{decline}</button>"#,
                r#"<a href="{privacy}" id="consent-learn-more" class="consent-link" aria-label="{learn_more_label}">{learn_more}</a>"#,
                "</div></div></div>"
            ),
            region = escape_html(&self.region_label),
            lang = self.language.code(),
            message = escape_html(&self.message),
            accept_label = escape_html(&self.accept_label),
            accept = escape_html(&self.accept),
            decline_label = escape_html(&self.decline_label),
            decline = escape_html(&self.decline),
            privacy = PRIVACY_PATH,
            learn_more_label = escape_html(&self.learn_more_label),
            learn_more = escape_html(&self.learn_more),
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// The fixed consent bar, rendered into a [`Page`].
///
/// The bar is mounted on first show and only toggled afterwards, so the
/// page never holds two of them.
pub struct BannerPrompt {
    page: Page,
    copy: PromptCopy,
    navigator: Arc<dyn Navigator>,
}

impl BannerPrompt {
    /// Render `copy` into `page`, navigating through the page itself.
    #[must_use]
    pub fn new(page: Page, copy: PromptCopy) -> Self {
        let navigator: Arc<dyn Navigator> = Arc::new(page.clone());
        Self {
            page,
            copy,
            navigator,
        }
    }

    /// Route "learn more" through a different router.
    #[must_use]
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// The copy this banner renders.
    #[must_use]
    pub fn copy(&self) -> &PromptCopy {
        &self.copy
    }

    /// The "learn more" affordance: open the privacy policy. Does not
    /// dismiss the prompt.
    pub async fn learn_more(&self) {
        self.navigator.navigate(PRIVACY_PATH).await;
    }
}

impl std::fmt::Debug for BannerPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BannerPrompt")
            .field("language", &self.copy.language)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl PromptSurface for BannerPrompt {
    async fn show(&self) {
        if !self.page.mount_consent_bar(self.copy.render_html()).await {
            self.page.set_consent_bar_visible(true).await;
        }
    }

    async fn hide(&self) {
        self.page.set_consent_bar_visible(false).await;
    }

    async fn is_visible(&self) -> bool {
        self.page.consent_bar().await.is_some_and(|bar| bar.visible)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::Mutex;

    use super::*;
    use crate::i18n::BuiltinTranslations;

    fn banner(page: &Page, language: Language) -> BannerPrompt {
        BannerPrompt::new(
            page.clone(),
            PromptCopy::resolve(&BuiltinTranslations, language),
        )
    }

    #[test]
    fn english_markup_matches_site_copy() {
        let html = PromptCopy::resolve(&BuiltinTranslations, Language::En).render_html();
        assert!(html.contains(r#"aria-label="Cookie consent""#));
        assert!(html.contains(">Accept</button>"));
        assert!(html.contains(">Decline</button>"));
        assert!(html.contains(r#"href="/privacy""#));
        assert!(html.contains("No cross-site tracking."));
    }

    #[test]
    fn markup_escapes_copy() {
        let mut copy = PromptCopy::resolve(&BuiltinTranslations, Language::En);
        copy.message = r#"<script>alert("x")</script> & more"#.to_owned();
        let html = copy.render_html();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt; &amp; more"));
    }

    #[tokio::test]
    async fn show_mounts_once_and_hide_toggles() {
        let page = Page::new();
        let prompt = banner(&page, Language::Es);

        assert!(!prompt.is_visible().await);
        prompt.hide().await;
        assert!(page.consent_bar().await.is_none());

        prompt.show().await;
        prompt.show().await;
        assert!(prompt.is_visible().await);
        assert!(page.consent_bar().await.unwrap().html.contains("Aceptar"));

        prompt.hide().await;
        assert!(!prompt.is_visible().await);
        prompt.show().await;
        assert!(prompt.is_visible().await);
    }

    #[tokio::test]
    async fn learn_more_navigates_to_privacy() {
        let page = Page::at("/blog/launch");
        let prompt = banner(&page, Language::En);
        prompt.show().await;
        prompt.learn_more().await;
        assert_eq!(page.location().await, PRIVACY_PATH);
        assert!(prompt.is_visible().await);
    }

    #[tokio::test]
    async fn learn_more_uses_injected_router() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        #[async_trait::async_trait]
        impl Navigator for Recorder {
            async fn navigate(&self, path: &str) {
                self.0.lock().await.push(path.to_owned());
            }
        }

        let recorder = Arc::new(Recorder::default());
        let page = Page::new();
        let prompt = banner(&page, Language::En).with_navigator(recorder.clone());
        prompt.learn_more().await;

        assert_eq!(*recorder.0.lock().await, vec![PRIVACY_PATH.to_owned()]);
        assert_eq!(page.location().await, "/");
    }
}
