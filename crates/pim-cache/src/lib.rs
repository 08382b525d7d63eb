//! Offline cache for pimsync data.
//!
//! This crate is the local data layer of the synchronization service: it
//! keeps items fetched from the remote source, tracks which of them were
//! changed locally while offline, and answers declarative queries without
//! re-parsing every stored payload.
//!
//! The main pieces:
//!
//! - [`ItemCache`] - keyed in-memory store with the per-item offline
//!   lifecycle ([`OfflineState`]) and time-window search.
//! - [`CacheStore`] - persistence of a cache snapshot ([`CacheData`]) as a
//!   JSON file with atomic writes.
//! - [`sexp`] - the query expression language, its parser and evaluator.
//! - [`assembly`] - reassembly of a recurring series into one document and
//!   attachment inlining/extraction.
//!
//! The cache mirrors what the remote sync orchestrator needs: writes
//! confirmed by the server go in with [`CacheMode::Online`], local offline
//! edits with [`CacheMode::Offline`], and
//! [`ItemCache::get_offline_changes`] plus [`ItemCache::resync`] drive the
//! push cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod assembly;
pub mod cache;
pub mod interval;
pub mod sexp;
pub mod store;

pub use cache::{CacheError, ItemCache};
pub use interval::{IntervalIndex, Span};
pub use store::{CacheStore, CacheStoreError};

/// Offline lifecycle state of one cached row.
///
/// The state tracks whether the local copy matches the remote source and,
/// if not, what kind of change is pending. Transitions are driven by
/// [`ItemCache::put`], [`ItemCache::remove`] and [`ItemCache::resync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineState {
    /// The local copy matches the remote source.
    Synced,

    /// Created locally while offline; the server has never seen it.
    LocallyCreated,

    /// Modified locally while offline; the server holds an older copy.
    LocallyModified,

    /// Deleted locally while offline; kept as a tombstone until the
    /// deletion is confirmed remotely.
    LocallyDeleted,
}

impl OfflineState {
    /// Returns true for states the sync orchestrator still has to push.
    pub fn is_locally_changed(&self) -> bool {
        !matches!(self, OfflineState::Synced)
    }
}

/// Whether a mutation reflects a confirmed remote write or a local
/// offline edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// The mutation mirrors a successful remote round-trip.
    Online,

    /// The mutation is a local edit pending synchronization.
    Offline,
}

/// A cached item as returned to callers: the decoded component plus its
/// per-row metadata. Callers always receive copies, never the cache's
/// internal data.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedComponent {
    /// The decoded item content.
    pub component: pim_data_rs::Component,

    /// Opaque caller-supplied side data (e.g. a remote entity tag).
    pub extra: Option<String>,

    /// Opaque caller-defined flag bits.
    pub custom_flags: u32,

    /// The row's offline lifecycle state.
    pub offline_state: OfflineState,
}

/// One persisted row, in snapshot form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowData {
    /// The stable item identifier.
    pub uid: String,

    /// The recurrence id, present only for detached exceptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<String>,

    /// The serialized item content.
    pub payload: String,

    /// Opaque caller-supplied side data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,

    /// Opaque caller-defined flag bits.
    #[serde(default)]
    pub custom_flags: u32,

    /// The row's offline lifecycle state.
    pub offline_state: OfflineState,
}

/// A serializable snapshot of an entire cache: rows plus cache-wide
/// bookkeeping. This is what [`CacheStore`] reads and writes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheData {
    /// Schema version of the persisted layout.
    #[serde(default)]
    pub version: u32,

    /// Opaque revision token controlled by the sync orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Arbitrary string-keyed settings, opaque to the cache.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,

    /// The stored rows.
    #[serde(default)]
    pub rows: Vec<RowData>,
}

impl CacheData {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_state_serde_names() {
        let json = serde_json::to_string(&OfflineState::LocallyCreated).unwrap();
        assert_eq!(json, "\"locally_created\"");

        let state: OfflineState = serde_json::from_str("\"locally_deleted\"").unwrap();
        assert_eq!(state, OfflineState::LocallyDeleted);
    }

    #[test]
    fn test_offline_state_is_locally_changed() {
        assert!(!OfflineState::Synced.is_locally_changed());
        assert!(OfflineState::LocallyCreated.is_locally_changed());
        assert!(OfflineState::LocallyModified.is_locally_changed());
        assert!(OfflineState::LocallyDeleted.is_locally_changed());
    }

    #[test]
    fn test_cache_data_serde_roundtrip() {
        let mut data = CacheData::new();
        data.version = 3;
        data.revision = Some("rev-17".to_string());
        data.settings
            .insert("collection".to_string(), "personal".to_string());
        data.rows.push(RowData {
            uid: "a".to_string(),
            recurrence_id: None,
            payload: "{\"uid\":\"a\"}".to_string(),
            extra: Some("etag-1".to_string()),
            custom_flags: 5,
            offline_state: OfflineState::Synced,
        });

        let json = serde_json::to_string_pretty(&data).unwrap();
        let back: CacheData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
    }

    #[test]
    fn test_cache_data_deserialize_minimal() {
        let data: CacheData = serde_json::from_str("{}").unwrap();
        assert_eq!(data.version, 0);
        assert!(data.revision.is_none());
        assert!(data.settings.is_empty());
        assert!(data.rows.is_empty());
    }

    #[test]
    fn test_cache_data_skips_empty_fields() {
        let json = serde_json::to_string(&CacheData::new()).unwrap();
        assert!(!json.contains("revision"));
        assert!(!json.contains("settings"));
    }
}
