//! Core library for `consentry`.
//!
//! Contains the persisted consent record, the consent state machine, the
//! analytics loader it gates, the prompt rendering adapter, and the copy
//! translations. This crate depends on `consentry-storage` for the storage
//! backend trait and knows nothing about where a backend keeps its data.
//!
//! The one invariant everything here protects: the analytics loader is never
//! activated unless the most recent persisted decision grants it.

pub mod analytics;
pub mod consent;
pub mod error;
pub mod i18n;
pub mod page;
pub mod prompt;
pub mod record;
