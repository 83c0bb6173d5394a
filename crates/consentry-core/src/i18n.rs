//! Prompt copy translations and language resolution.
//!
//! The site ships English, Korean, and Spanish. The visitor's language is the
//! stored preference if it names a supported language, else the primary
//! subtag of the browser language, else English. Lookups never fail: a
//! missing translation falls back to English, and a missing English string
//! falls back to the key itself.

use std::fmt;

use consentry_storage::StorageBackend;
use tracing::warn;

/// Local storage key holding the visitor's language preference.
pub const LANGUAGE_STORAGE_KEY: &str = "gwkb_language";

/// Translation keys used by the consent prompt.
pub mod keys {
    pub const MESSAGE: &str = "consent.message";
    pub const ACCEPT: &str = "consent.accept";
    pub const DECLINE: &str = "consent.decline";
    pub const LEARN_MORE: &str = "consent.learnMore";
    pub const REGION_LABEL: &str = "consent.regionLabel";
    pub const ACCEPT_LABEL: &str = "consent.acceptLabel";
    pub const DECLINE_LABEL: &str = "consent.declineLabel";
    pub const LEARN_MORE_LABEL: &str = "consent.learnMoreLabel";
}

/// A supported site language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Language {
    #[default]
    En,
    Ko,
    Es,
}

impl Language {
    /// All supported languages.
    pub const SUPPORTED: [Self; 3] = [Self::En, Self::Ko, Self::Es];

    /// ISO 639-1 code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ko => "ko",
            Self::Es => "es",
        }
    }

    /// Exact match on a language code, as stored in the preference key.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::SUPPORTED.into_iter().find(|l| l.code() == code)
    }

    /// Match the primary subtag of a browser or locale tag such as `ko-KR`
    /// or `es_MX.UTF-8`.
    #[must_use]
    pub fn from_browser_tag(tag: &str) -> Option<Self> {
        let primary = tag.split(['-', '_', '.']).next()?.trim().to_ascii_lowercase();
        Self::from_code(&primary)
    }

    /// Resolve from a stored preference and a browser language.
    #[must_use]
    pub fn resolve(stored: Option<&str>, browser: Option<&str>) -> Self {
        stored
            .and_then(Self::from_code)
            .or_else(|| browser.and_then(Self::from_browser_tag))
            .unwrap_or_default()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Resolve the visitor's language, reading the stored preference from the
/// local-only store. An unreadable store counts as no preference.
pub async fn resolve_language(local: &dyn StorageBackend, browser: Option<&str>) -> Language {
    let stored = match local.get(LANGUAGE_STORAGE_KEY).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "language preference unreadable");
            None
        }
    };
    Language::resolve(stored.as_deref(), browser)
}

/// Store the visitor's language preference. Best-effort.
pub async fn save_language(local: &dyn StorageBackend, language: Language) {
    if let Err(e) = local.put(LANGUAGE_STORAGE_KEY, language.code()).await {
        warn!(error = %e, language = %language, "language preference not saved");
    }
}

/// Source of display strings.
pub trait Translator: Send + Sync {
    /// The string for `key` in `language`, if this source has one.
    fn translate(&self, key: &str, language: Language) -> Option<String>;
}

/// The strings the site ships with.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTranslations;

impl BuiltinTranslations {
    fn lookup(key: &str, language: Language) -> Option<&'static str> {
        use keys::{
            ACCEPT, ACCEPT_LABEL, DECLINE, DECLINE_LABEL, LEARN_MORE, LEARN_MORE_LABEL, MESSAGE,
            REGION_LABEL,
        };

        let text = match (language, key) {
            (Language::En, MESSAGE) => {
                "We use cookies only to understand how our site is used. No ads. No cross-site tracking."
            }
            (Language::En, ACCEPT) => "Accept",
            (Language::En, DECLINE) => "Decline",
            (Language::En, LEARN_MORE) => "Learn more",
            (Language::En, REGION_LABEL) => "Cookie consent",
            (Language::En, ACCEPT_LABEL) => "Accept cookies",
            (Language::En, DECLINE_LABEL) => "Decline cookies",
            (Language::En, LEARN_MORE_LABEL) => "Learn more about our cookie policy",

            (Language::Ko, MESSAGE) => {
                "사이트 이용 현황을 파악하기 위해서만 쿠키를 사용합니다. 광고 없음. 사이트 간 추적 없음."
            }
            (Language::Ko, ACCEPT) => "수락",
            (Language::Ko, DECLINE) => "거부",
            (Language::Ko, LEARN_MORE) => "자세히 보기",
            (Language::Ko, REGION_LABEL) => "쿠키 동의",
            (Language::Ko, ACCEPT_LABEL) => "쿠키 수락",
            (Language::Ko, DECLINE_LABEL) => "쿠키 거부",
            (Language::Ko, LEARN_MORE_LABEL) => "쿠키 정책 자세히 보기",

            (Language::Es, MESSAGE) => {
                "Usamos cookies solo para entender cómo se utiliza nuestro sitio. Sin anuncios. Sin seguimiento entre sitios."
            }
            (Language::Es, ACCEPT) => "Aceptar",
            (Language::Es, DECLINE) => "Rechazar",
            (Language::Es, LEARN_MORE) => "Más información",
            (Language::Es, REGION_LABEL) => "Consentimiento de cookies",
            (Language::Es, ACCEPT_LABEL) => "Aceptar cookies",
            (Language::Es, DECLINE_LABEL) => "Rechazar cookies",
            (Language::Es, LEARN_MORE_LABEL) => "Más información sobre nuestra política de cookies",

            _ => return None,
        };
        Some(text)
    }
}

impl Translator for BuiltinTranslations {
    fn translate(&self, key: &str, language: Language) -> Option<String> {
        Self::lookup(key, language).map(str::to_owned)
    }
}

/// Look up `key`, falling back to English, then the built-in English
/// default, then the key itself. Empty strings count as missing.
pub fn translate_or_default(translator: &dyn Translator, key: &str, language: Language) -> String {
    translator
        .translate(key, language)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            translator
                .translate(key, Language::En)
                .filter(|s| !s.is_empty())
        })
        .or_else(|| BuiltinTranslations::lookup(key, Language::En).map(str::to_owned))
        .unwrap_or_else(|| key.to_owned())
}
