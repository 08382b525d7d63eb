//! The keyed item cache and its offline sync state machine.
//!
//! [`ItemCache`] is an explicit handle owned by the caller; there is no
//! process-wide default instance. It is safe to share across threads:
//! mutations of one `(uid, recurrence_id)` row exclude each other and
//! reads of that row, while unrelated rows proceed concurrently.
//! Operations that insert or physically delete rows, the cache-wide
//! bookkeeping writers and [`ItemCache::resync`] take the map write lock
//! and therefore exclude every row mutation, so `resync` always sees a
//! consistent snapshot of offline state.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Duration;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;

use pim_data_rs::{CalTime, Component, ComponentKey, RecurrenceService};

use crate::interval::{IntervalIndex, Span};
use crate::sexp::{dominant_occur_range, EvalError, Evaluator, ParseError, QueryParser};
use crate::{CacheData, CacheMode, CachedComponent, OfflineState, RowData};

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The requested row does not exist (or exists only as a tombstone).
    #[error("item not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: ComponentKey,
    },

    /// An item key with an empty uid was supplied.
    #[error("item key must have a non-empty uid")]
    InvalidKey,

    /// Malformed query text.
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] ParseError),

    /// A well-formed query failed during evaluation.
    #[error("query evaluation failed: {0}")]
    Eval(#[from] EvalError),

    /// A stored payload could not be encoded or decoded.
    #[error("corrupt payload for '{uid}': {message}")]
    Corrupt {
        /// UID of the affected row.
        uid: String,
        /// Decoder diagnostic.
        message: String,
    },
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// One stored row: the authoritative payload, its decoded form for
/// filtering, per-row metadata and the derived span.
#[derive(Debug, Clone)]
struct Row {
    payload: String,
    component: Component,
    extra: Option<String>,
    custom_flags: u32,
    state: OfflineState,
    span: Option<Span>,
}

/// Rows plus cache-wide bookkeeping, all behind one lock so that
/// bookkeeping writers and `resync` exclude every row mutation.
#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<ComponentKey, Arc<RwLock<Row>>>,
    version: u32,
    revision: Option<String>,
    settings: BTreeMap<String, String>,
}

/// The keyed item cache.
///
/// # Example
///
/// ```
/// use pim_cache_rs::{CacheMode, ItemCache, OfflineState};
/// use pim_data_rs::Component;
///
/// let cache = ItemCache::new();
/// cache
///     .put(Component::new("event-1"), None, 0, CacheMode::Online)
///     .unwrap();
///
/// let cached = cache.get("event-1", None).unwrap();
/// assert_eq!(cached.offline_state, OfflineState::Synced);
/// ```
#[derive(Debug, Default)]
pub struct ItemCache {
    inner: RwLock<Inner>,
    spans: RwLock<IntervalIndex>,
}

impl ItemCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a cache from a persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Corrupt` if a row's payload does not decode or
    /// disagrees with the row's key.
    pub fn from_data(data: CacheData) -> Result<Self> {
        let cache = Self::new();
        {
            let mut inner = cache.write_inner();
            let mut spans = cache.write_spans();
            inner.version = data.version;
            inner.revision = data.revision;
            inner.settings = data.settings;

            for row in data.rows {
                let component =
                    Component::decode(&row.payload).map_err(|e| CacheError::Corrupt {
                        uid: row.uid.clone(),
                        message: e.to_string(),
                    })?;
                if component.uid != row.uid
                    || component.recurrence_id != row.recurrence_id
                {
                    return Err(CacheError::Corrupt {
                        uid: row.uid.clone(),
                        message: "payload key disagrees with row key".to_string(),
                    });
                }
                let key = ComponentKey {
                    uid: row.uid,
                    recurrence_id: row.recurrence_id,
                };
                let span = derive_span(&component);
                if let Some(span) = span {
                    spans.insert(key.clone(), span);
                }
                inner.rows.insert(
                    key,
                    Arc::new(RwLock::new(Row {
                        payload: row.payload,
                        component,
                        extra: row.extra,
                        custom_flags: row.custom_flags,
                        state: row.offline_state,
                        span,
                    })),
                );
            }
        }
        Ok(cache)
    }

    /// Produces a persistable snapshot of the whole cache, rows ordered
    /// by key.
    pub fn snapshot(&self) -> CacheData {
        let inner = self.read_inner();
        let mut rows: Vec<RowData> = inner
            .rows
            .iter()
            .map(|(key, cell)| {
                let row = read_row(cell);
                RowData {
                    uid: key.uid.clone(),
                    recurrence_id: key.recurrence_id.clone(),
                    payload: row.payload.clone(),
                    extra: row.extra.clone(),
                    custom_flags: row.custom_flags,
                    offline_state: row.state,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            (&a.uid, &a.recurrence_id).cmp(&(&b.uid, &b.recurrence_id))
        });

        CacheData {
            version: inner.version,
            revision: inner.revision.clone(),
            settings: inner.settings.clone(),
            rows,
        }
    }

    // =========================================================================
    // Row Mutations
    // =========================================================================

    /// Upserts the row keyed by the component's `(uid, recurrence_id)`.
    ///
    /// `CacheMode::Online` marks the row `Synced` regardless of prior
    /// state: a successful remote round-trip supersedes any pending local
    /// edit. `CacheMode::Offline` marks a new row `LocallyCreated`; an
    /// existing row becomes `LocallyModified` (undoing a pending local
    /// delete included), except a `LocallyCreated` row which stays
    /// `LocallyCreated` since the server still has not seen it.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidKey` for an empty uid.
    pub fn put(
        &self,
        component: Component,
        extra: Option<String>,
        custom_flags: u32,
        mode: CacheMode,
    ) -> Result<()> {
        if component.uid.is_empty() {
            return Err(CacheError::InvalidKey);
        }
        let key = component.key();
        let payload = component.encode().map_err(|e| CacheError::Corrupt {
            uid: component.uid.clone(),
            message: e.to_string(),
        })?;
        let span = derive_span(&component);
        debug!(key = %key, ?mode, "put");

        // Existing rows mutate under the shared map lock; unrelated keys
        // proceed concurrently.
        {
            let inner = self.read_inner();
            if let Some(cell) = inner.rows.get(&key) {
                let mut row = write_row(cell);
                row.state = next_put_state(row.state, mode);
                row.payload = payload;
                row.component = component;
                row.extra = extra;
                row.custom_flags = custom_flags;
                row.span = span;
                drop(row);
                self.update_span(&key, span);
                return Ok(());
            }
        }

        // New rows need the exclusive map lock; re-check in case another
        // writer inserted the key in between.
        let mut inner = self.write_inner();
        match inner.rows.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let mut row = write_row(entry.get());
                row.state = next_put_state(row.state, mode);
                row.payload = payload;
                row.component = component;
                row.extra = extra;
                row.custom_flags = custom_flags;
                row.span = span;
            }
            Entry::Vacant(entry) => {
                let state = match mode {
                    CacheMode::Online => OfflineState::Synced,
                    CacheMode::Offline => OfflineState::LocallyCreated,
                };
                entry.insert(Arc::new(RwLock::new(Row {
                    payload,
                    component,
                    extra,
                    custom_flags,
                    state,
                    span,
                })));
            }
        }
        drop(inner);
        self.update_span(&key, span);
        Ok(())
    }

    /// Removes the row keyed by `(uid, recurrence_id)`.
    ///
    /// `CacheMode::Online` deletes the row physically, regardless of
    /// state. `CacheMode::Offline` deletes `LocallyCreated` rows
    /// physically (the server never saw them), turns `Synced` and
    /// `LocallyModified` rows into tombstones, and leaves existing
    /// tombstones untouched.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if no row exists under the key.
    pub fn remove(
        &self,
        uid: &str,
        recurrence_id: Option<&str>,
        mode: CacheMode,
    ) -> Result<()> {
        let key = ComponentKey::new(uid, recurrence_id);
        debug!(key = %key, ?mode, "remove");

        if mode == CacheMode::Online {
            let mut inner = self.write_inner();
            if inner.rows.remove(&key).is_none() {
                return Err(CacheError::NotFound { key });
            }
            drop(inner);
            self.write_spans().remove(&key);
            return Ok(());
        }

        // Offline: tombstone, no-op or purge depending on prior state.
        {
            let inner = self.read_inner();
            let Some(cell) = inner.rows.get(&key) else {
                drop(inner);
                return Err(CacheError::NotFound { key });
            };
            let mut row = write_row(cell);
            match row.state {
                OfflineState::LocallyDeleted => return Ok(()),
                OfflineState::Synced | OfflineState::LocallyModified => {
                    row.state = OfflineState::LocallyDeleted;
                    return Ok(());
                }
                // Purged below; needs the exclusive map lock.
                OfflineState::LocallyCreated => {}
            }
        }

        let mut inner = self.write_inner();
        // Re-check: the state may have changed while re-locking.
        let still_created = inner
            .rows
            .get(&key)
            .is_some_and(|cell| read_row(cell).state == OfflineState::LocallyCreated);
        if still_created {
            inner.rows.remove(&key);
            drop(inner);
            self.write_spans().remove(&key);
        }
        Ok(())
    }

    /// Finalizes all pending offline changes in one step: locally created
    /// and modified rows become `Synced`, tombstones are purged. Calling
    /// it again is a no-op.
    pub fn resync(&self) {
        let mut inner = self.write_inner();
        let mut purged = Vec::new();
        inner.rows.retain(|key, cell| {
            let mut row = write_row(cell);
            match row.state {
                OfflineState::LocallyDeleted => {
                    purged.push(key.clone());
                    false
                }
                OfflineState::LocallyCreated | OfflineState::LocallyModified => {
                    row.state = OfflineState::Synced;
                    true
                }
                OfflineState::Synced => true,
            }
        });
        drop(inner);

        debug!(purged = purged.len(), "resync");
        let mut spans = self.write_spans();
        for key in &purged {
            spans.remove(key);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the cached item under `(uid, recurrence_id)`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if the row is absent or present
    /// only as a tombstone; tombstones are invisible to normal reads.
    pub fn get(&self, uid: &str, recurrence_id: Option<&str>) -> Result<CachedComponent> {
        let key = ComponentKey::new(uid, recurrence_id);
        let inner = self.read_inner();
        let Some(cell) = inner.rows.get(&key) else {
            drop(inner);
            return Err(CacheError::NotFound { key });
        };
        let row = read_row(cell);
        if row.state == OfflineState::LocallyDeleted {
            drop(row);
            drop(inner);
            return Err(CacheError::NotFound { key });
        }
        Ok(cached(&row))
    }

    /// Returns true if a row exists under the key. Tombstones count only
    /// when `include_deleted` is set.
    pub fn contains(&self, uid: &str, recurrence_id: Option<&str>, include_deleted: bool) -> bool {
        let key = ComponentKey::new(uid, recurrence_id);
        let inner = self.read_inner();
        inner.rows.get(&key).is_some_and(|cell| {
            include_deleted || read_row(cell).state != OfflineState::LocallyDeleted
        })
    }

    /// Number of stored rows. Tombstones count only when
    /// `include_deleted` is set.
    pub fn count(&self, include_deleted: bool) -> usize {
        let inner = self.read_inner();
        inner
            .rows
            .values()
            .filter(|cell| {
                include_deleted || read_row(cell).state != OfflineState::LocallyDeleted
            })
            .count()
    }

    /// Lists every row with a pending offline change (any state other
    /// than `Synced`), ordered by key. The sync orchestrator uses this to
    /// know what to push.
    pub fn get_offline_changes(&self) -> Vec<(ComponentKey, OfflineState)> {
        let inner = self.read_inner();
        let mut changes: Vec<_> = inner
            .rows
            .iter()
            .filter_map(|(key, cell)| {
                let state = read_row(cell).state;
                state.is_locally_changed().then(|| (key.clone(), state))
            })
            .collect();
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        changes
    }

    // =========================================================================
    // Per-Row Side Channel
    // =========================================================================

    /// Returns the opaque extra data stored for a row.
    ///
    /// Unlike [`get`](Self::get), this also reads tombstones: the
    /// orchestrator needs the remote tag of a pending delete to push it.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if no row exists under the key.
    pub fn get_extra(&self, uid: &str, recurrence_id: Option<&str>) -> Result<Option<String>> {
        self.with_row(uid, recurrence_id, |row| row.extra.clone())
    }

    /// Replaces the opaque extra data of a row, leaving its offline state
    /// untouched.
    pub fn set_extra(
        &self,
        uid: &str,
        recurrence_id: Option<&str>,
        extra: Option<String>,
    ) -> Result<()> {
        self.with_row_mut(uid, recurrence_id, |row| row.extra = extra)
    }

    /// Returns the custom flag bits stored for a row.
    pub fn get_custom_flags(&self, uid: &str, recurrence_id: Option<&str>) -> Result<u32> {
        self.with_row(uid, recurrence_id, |row| row.custom_flags)
    }

    /// Replaces the custom flag bits of a row, leaving its offline state
    /// untouched.
    pub fn set_custom_flags(
        &self,
        uid: &str,
        recurrence_id: Option<&str>,
        custom_flags: u32,
    ) -> Result<()> {
        self.with_row_mut(uid, recurrence_id, |row| row.custom_flags = custom_flags)
    }

    // =========================================================================
    // Cache-Wide Bookkeeping
    // =========================================================================

    /// Returns the schema version.
    pub fn version(&self) -> u32 {
        self.read_inner().version
    }

    /// Sets the schema version.
    pub fn set_version(&self, version: u32) {
        self.write_inner().version = version;
    }

    /// Returns the revision token, an opaque value the sync orchestrator
    /// controls.
    pub fn revision(&self) -> Option<String> {
        self.read_inner().revision.clone()
    }

    /// Sets the revision token.
    pub fn set_revision(&self, revision: Option<String>) {
        self.write_inner().revision = revision;
    }

    /// Returns the value stored under a settings key.
    pub fn get_key_value(&self, key: &str) -> Option<String> {
        self.read_inner().settings.get(key).cloned()
    }

    /// Stores or clears a settings value.
    pub fn put_key_value(&self, key: &str, value: Option<&str>) {
        let mut inner = self.write_inner();
        match value {
            Some(value) => {
                inner.settings.insert(key.to_string(), value.to_string());
            }
            None => {
                inner.settings.remove(key);
            }
        }
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Returns every non-tombstone item matching the query expression.
    ///
    /// When the expression pins a single dominant time range, candidates
    /// come from the interval index (plus rows without a span) instead of
    /// a full scan; the expression evaluator then decides each candidate.
    /// Results are ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidQuery` for malformed query text and
    /// `CacheError::Eval` if the expression fails to evaluate.
    pub fn search(
        &self,
        query: &str,
        service: &dyn RecurrenceService,
    ) -> Result<Vec<CachedComponent>> {
        let expr = QueryParser::parse(query)?;
        let range = dominant_occur_range(&expr);
        debug!(query, indexed = range.is_some(), "search");

        let mut candidates = Vec::new();
        {
            let inner = self.read_inner();
            let narrowed: Option<HashSet<ComponentKey>> = range.map(|(start, end)| {
                self.read_spans()
                    .overlapping(start, end)
                    .into_iter()
                    .collect()
            });

            for (key, cell) in &inner.rows {
                let row = read_row(cell);
                if row.state == OfflineState::LocallyDeleted {
                    continue;
                }
                // A row with no derived span cannot be excluded by the index.
                if let Some(keys) = &narrowed {
                    if row.span.is_some() && !keys.contains(key) {
                        continue;
                    }
                }
                candidates.push(cached(&row));
            }
        }

        let mut results = Vec::new();
        for candidate in candidates {
            let evaluator = Evaluator::new(&candidate.component, service);
            if evaluator.matches(&expr)? {
                results.push(candidate);
            }
        }
        results.sort_by(|a, b| a.component.key().cmp(&b.component.key()));
        Ok(results)
    }

    /// Like [`search`](Self::search), returning only the matching keys.
    pub fn search_keys(
        &self,
        query: &str,
        service: &dyn RecurrenceService,
    ) -> Result<Vec<ComponentKey>> {
        Ok(self
            .search(query, service)?
            .into_iter()
            .map(|item| item.component.key())
            .collect())
    }

    // =========================================================================
    // Lock Plumbing
    // =========================================================================

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        // A poisoned lock means another thread panicked mid-operation;
        // rows are replaced wholesale, so the map stays structurally sound.
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_spans(&self) -> RwLockReadGuard<'_, IntervalIndex> {
        self.spans.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_spans(&self) -> RwLockWriteGuard<'_, IntervalIndex> {
        self.spans.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_span(&self, key: &ComponentKey, span: Option<Span>) {
        let mut spans = self.write_spans();
        match span {
            Some(span) => spans.insert(key.clone(), span),
            None => spans.remove(key),
        }
    }

    fn with_row<T>(
        &self,
        uid: &str,
        recurrence_id: Option<&str>,
        read: impl FnOnce(&Row) -> T,
    ) -> Result<T> {
        let key = ComponentKey::new(uid, recurrence_id);
        let inner = self.read_inner();
        match inner.rows.get(&key) {
            Some(cell) => Ok(read(&read_row(cell))),
            None => {
                drop(inner);
                Err(CacheError::NotFound { key })
            }
        }
    }

    fn with_row_mut(
        &self,
        uid: &str,
        recurrence_id: Option<&str>,
        mutate: impl FnOnce(&mut Row),
    ) -> Result<()> {
        let key = ComponentKey::new(uid, recurrence_id);
        let inner = self.read_inner();
        match inner.rows.get(&key) {
            Some(cell) => {
                mutate(&mut write_row(cell));
                Ok(())
            }
            None => {
                drop(inner);
                Err(CacheError::NotFound { key })
            }
        }
    }
}

/// The put-transition table of the offline state machine.
fn next_put_state(prior: OfflineState, mode: CacheMode) -> OfflineState {
    match mode {
        CacheMode::Online => OfflineState::Synced,
        CacheMode::Offline => match prior {
            OfflineState::LocallyCreated => OfflineState::LocallyCreated,
            OfflineState::Synced
            | OfflineState::LocallyModified
            | OfflineState::LocallyDeleted => OfflineState::LocallyModified,
        },
    }
}

/// Derives the indexed span of a component: anchored on its start (due
/// for tasks without one), open-ended for recurring masters. Date-only
/// anchors are widened by a day on each side, since a query-supplied zone
/// can shift their resolved instant across a day boundary.
fn derive_span(component: &Component) -> Option<Span> {
    let anchor = component.start.as_ref().or(component.due.as_ref())?;
    let date_only = anchor.is_date_only();
    let mut start = anchor.to_utc(Tz::UTC);
    if date_only {
        start -= Duration::days(1);
    }

    if component.rrule.is_some() {
        return Some(Span::open_ended(start));
    }

    let length = match (&component.start, &component.end) {
        (Some(span_start), Some(span_end)) => {
            (span_end.to_utc(Tz::UTC) - span_start.to_utc(Tz::UTC)).max(Duration::zero())
        }
        (Some(CalTime::Date(_)), None) => Duration::days(1),
        _ => Duration::zero(),
    };
    let mut end = start + length;
    if date_only {
        // Give the widened start its day back, plus the slack at the end.
        end += Duration::days(2);
    }
    Some(Span::closed(start, end))
}

/// Copies a row into the caller-facing shape.
fn cached(row: &Row) -> CachedComponent {
    CachedComponent {
        component: row.component.clone(),
        extra: row.extra.clone(),
        custom_flags: row.custom_flags,
        offline_state: row.state,
    }
}

fn read_row(cell: &Arc<RwLock<Row>>) -> RwLockReadGuard<'_, Row> {
    cell.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_row(cell: &Arc<RwLock<Row>>) -> RwLockWriteGuard<'_, Row> {
    cell.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_state_table() {
        use CacheMode::*;
        use OfflineState::*;

        for prior in [Synced, LocallyCreated, LocallyModified, LocallyDeleted] {
            assert_eq!(next_put_state(prior, Online), Synced);
        }
        assert_eq!(next_put_state(Synced, Offline), LocallyModified);
        assert_eq!(next_put_state(LocallyModified, Offline), LocallyModified);
        assert_eq!(next_put_state(LocallyDeleted, Offline), LocallyModified);
        assert_eq!(next_put_state(LocallyCreated, Offline), LocallyCreated);
    }

    #[test]
    fn test_derive_span_shapes() {
        use chrono::TimeZone;
        use chrono::Utc;

        let mut component = Component::new("a");
        assert!(derive_span(&component).is_none());

        let start = Utc.with_ymd_and_hms(2020, 1, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap();
        component.start = Some(CalTime::Utc(start));
        component.end = Some(CalTime::Utc(end));
        assert_eq!(derive_span(&component), Some(Span::closed(start, end)));

        component.rrule = Some("FREQ=DAILY".to_string());
        assert_eq!(derive_span(&component), Some(Span::open_ended(start)));

        let mut task = Component::new("t");
        task.due = Some(CalTime::Utc(end));
        assert_eq!(derive_span(&task), Some(Span::closed(end, end)));
    }
}
