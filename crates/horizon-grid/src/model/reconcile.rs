//! Subscription event reconciliation.
//!
//! Remote create, update and delete events are merged into the row index.
//! An `UPDATED` event for a row that has open edit sessions is a conflict,
//! resolved by the grid's [`ConflictPolicy`].

use std::collections::HashSet;
use std::sync::Arc;

use horizon_grid_core::logging::targets;
use horizon_grid_core::{Result, Signal, Subscription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::editing::{CellEditState, CellKey};
use super::row::{GridRow, RowId, RowPatch};
use super::row_index::RowIndex;
use super::store::GridState;

// =========================================================================
// Events
// =========================================================================

/// Kind of a subscription event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionEventType {
    /// A row was created.
    Created,
    /// A row changed; carries a full row or a patch.
    Updated,
    /// A row was deleted.
    Deleted,
    /// A row left the subscription's scope.
    Terminated,
    /// A row re-entered the subscription's scope.
    Unterminated,
    /// A row was created or replaced.
    Upsert,
}

/// A push event delivered by a subscription.
///
/// Decodes from JSON shaped like
/// `{"type": "UPDATED", "id": 1, "patch": {"name": "Remote Update"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct SubscriptionEvent<T> {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: SubscriptionEventType,
    /// Identity of the affected row.
    pub id: RowId,
    /// Full row payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<T>,
    /// Partial row payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<RowPatch>,
    /// Server timestamp of the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Server version of the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl<T> SubscriptionEvent<T> {
    fn new(kind: SubscriptionEventType, id: impl Into<RowId>) -> Self {
        Self {
            kind,
            id: id.into(),
            row: None,
            patch: None,
            updated_at: None,
            version: None,
        }
    }

    /// A `CREATED` event.
    pub fn created(id: impl Into<RowId>, row: T) -> Self {
        Self::new(SubscriptionEventType::Created, id).with_row(row)
    }

    /// An `UPSERT` event.
    pub fn upsert(id: impl Into<RowId>, row: T) -> Self {
        Self::new(SubscriptionEventType::Upsert, id).with_row(row)
    }

    /// An `UPDATED` event replacing the full row.
    pub fn updated(id: impl Into<RowId>, row: T) -> Self {
        Self::new(SubscriptionEventType::Updated, id).with_row(row)
    }

    /// An `UPDATED` event carrying a patch.
    pub fn patched(id: impl Into<RowId>, patch: RowPatch) -> Self {
        Self::new(SubscriptionEventType::Updated, id).with_patch(patch)
    }

    /// A `DELETED` event.
    pub fn deleted(id: impl Into<RowId>) -> Self {
        Self::new(SubscriptionEventType::Deleted, id)
    }

    /// A `TERMINATED` event.
    pub fn terminated(id: impl Into<RowId>) -> Self {
        Self::new(SubscriptionEventType::Terminated, id)
    }

    /// An `UNTERMINATED` event without payload; combine with
    /// [`with_row`](Self::with_row) or [`with_patch`](Self::with_patch).
    pub fn unterminated(id: impl Into<RowId>) -> Self {
        Self::new(SubscriptionEventType::Unterminated, id)
    }

    /// Attaches a full row.
    pub fn with_row(mut self, row: T) -> Self {
        self.row = Some(row);
        self
    }

    /// Attaches a patch.
    pub fn with_patch(mut self, patch: RowPatch) -> Self {
        self.patch = Some(patch);
        self
    }

    /// Attaches a version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

impl<T: DeserializeOwned> SubscriptionEvent<T> {
    /// Decodes an event from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decodes an event from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

// =========================================================================
// Policies
// =========================================================================

/// How an update to a row under edit is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Apply the update except for fields being edited.
    #[default]
    PreferLocalEdits,
    /// Hold the update until the host resolves the conflict.
    Prompt,
    /// Apply the update in full and cancel the row's edit sessions.
    PreferRemote,
}

/// Host decision for a prompted conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictResolution {
    /// Keep the local edits and drop the remote update.
    Local,
    /// Apply the remote update and drop the local edits.
    Remote,
}

/// Caller-supplied replacement for the default event merge.
///
/// Receives the row index and the event, and returns `true` if it changed
/// the rows. When installed it bypasses conflict handling entirely.
pub type ApplyEventFn<T> = Arc<dyn Fn(&mut RowIndex<T>, &SubscriptionEvent<T>) -> bool + Send + Sync>;

// =========================================================================
// Event Sources
// =========================================================================

/// Callback invoked for each delivered event.
pub type EventHandler<T> = Arc<dyn Fn(SubscriptionEvent<T>) + Send + Sync>;

/// A stream of subscription events, such as a websocket or GraphQL
/// subscription adapter.
pub trait EventSource<T>: Send + Sync {
    /// Registers a handler. Dropping the returned subscription unsubscribes.
    fn subscribe(&self, handler: EventHandler<T>) -> Subscription;
}

/// An in-process event source backed by a [`Signal`].
///
/// # Example
///
/// ```ignore
/// let source = SignalEventSource::<Record>::new();
/// let _subscription = store.attach_source(&source);
/// source.publish(SubscriptionEvent::deleted(1));
/// ```
pub struct SignalEventSource<T> {
    signal: Arc<Signal<SubscriptionEvent<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SignalEventSource<T> {
    /// Create a source with no subscribers.
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal::new()),
        }
    }

    /// Delivers an event to every subscriber.
    pub fn publish(&self, event: SubscriptionEvent<T>) {
        self.signal.emit(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.signal.connection_count()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SignalEventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> EventSource<T> for SignalEventSource<T> {
    fn subscribe(&self, handler: EventHandler<T>) -> Subscription {
        self.signal.connect_scoped(move |event: &SubscriptionEvent<T>| handler(event.clone()))
    }
}

// =========================================================================
// Reconciliation
// =========================================================================

/// What a reconciliation step changed, for signal emission.
#[derive(Debug, Default)]
pub(crate) struct ReconcileOutcome {
    pub rows_changed: bool,
    pub cell_changes: Vec<(CellKey, CellEditState)>,
    pub conflict: Option<RowId>,
    pub selection_changed: bool,
}

/// Applies an event with default semantics, leaving `excluded` fields of an
/// updated row untouched.
pub fn apply_event_default<T: GridRow>(index: &mut RowIndex<T>, event: &SubscriptionEvent<T>) -> bool {
    apply_excluding(index, event, &HashSet::new())
}

fn apply_excluding<T: GridRow>(
    index: &mut RowIndex<T>,
    event: &SubscriptionEvent<T>,
    excluded: &HashSet<String>,
) -> bool {
    use SubscriptionEventType::*;

    match event.kind {
        Created | Upsert => match &event.row {
            Some(row) => index.upsert(row.clone()),
            None => ignore(event, "missing row"),
        },
        Updated => {
            if !index.contains(&event.id) {
                return ignore(event, "unknown row");
            }
            if let Some(row) = &event.row {
                let next = match index.get(&event.id) {
                    Some(current) if !excluded.is_empty() => keep_fields(current.as_ref(), row, excluded),
                    _ => row.clone(),
                };
                index.update_row(&event.id, next)
            } else if let Some(patch) = &event.patch {
                let patch: RowPatch = patch
                    .iter()
                    .filter(|(field, _)| !excluded.contains(*field))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                !patch.is_empty() && index.merge_patch(&event.id, &patch)
            } else {
                ignore(event, "missing row and patch")
            }
        }
        Deleted | Terminated => index.remove_row(&event.id).is_some(),
        Unterminated => {
            if let Some(row) = &event.row {
                index.upsert(row.clone())
            } else if let Some(patch) = &event.patch {
                index.merge_patch(&event.id, patch)
            } else {
                ignore(event, "missing row and patch")
            }
        }
    }
}

fn keep_fields<T: GridRow>(current: &T, incoming: &T, fields: &HashSet<String>) -> T {
    let mut next = incoming.clone();
    for field in fields {
        let local = current.field(field);
        if next.field(field) != local {
            next.set_field(field, local);
        }
    }
    next
}

fn ignore<T>(event: &SubscriptionEvent<T>, reason: &str) -> bool {
    tracing::debug!(
        target: targets::RECONCILE,
        kind = ?event.kind,
        id = %event.id,
        reason,
        "ignoring event"
    );
    false
}

/// Applies an event to the grid state under the configured policy.
pub(crate) fn reconcile<T: GridRow>(
    state: &mut GridState<T>,
    event: &SubscriptionEvent<T>,
    hook: Option<&ApplyEventFn<T>>,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    let conflicting = event.kind == SubscriptionEventType::Updated
        && state.index.contains(&event.id)
        && state.editing.has_row_edits(&event.id);

    match hook {
        Some(hook) => outcome.rows_changed = hook(&mut state.index, event),
        None if conflicting => resolve_by_policy(state, event, &mut outcome),
        None => outcome.rows_changed = apply_excluding(&mut state.index, event, &HashSet::new()),
    }

    drop_orphans(state, &mut outcome);
    outcome
}

fn resolve_by_policy<T: GridRow>(
    state: &mut GridState<T>,
    event: &SubscriptionEvent<T>,
    outcome: &mut ReconcileOutcome,
) {
    let policy = state.options.conflict_policy;
    tracing::debug!(target: targets::RECONCILE, id = %event.id, ?policy, "update conflicts with local edits");

    match policy {
        ConflictPolicy::PreferLocalEdits => {
            let edited = state.editing.edited_fields(&event.id);
            outcome.rows_changed = apply_excluding(&mut state.index, event, &edited);
        }
        ConflictPolicy::Prompt => {
            state.pending_conflicts.insert(event.id.clone(), event.clone());
            for from in [CellEditState::Editing, CellEditState::Error] {
                for key in state.editing.transition_row(&event.id, from, CellEditState::Conflict) {
                    outcome.cell_changes.push((key, CellEditState::Conflict));
                }
            }
            outcome.conflict = Some(event.id.clone());
        }
        ConflictPolicy::PreferRemote => {
            outcome.rows_changed = apply_excluding(&mut state.index, event, &HashSet::new());
            for key in state.editing.cancel_row(&event.id) {
                outcome.cell_changes.push((key, CellEditState::Pristine));
            }
        }
    }
}

/// Settles a prompted conflict. Does nothing if none is pending for the row.
pub(crate) fn resolve_conflict<T: GridRow>(
    state: &mut GridState<T>,
    row_id: &RowId,
    resolution: ConflictResolution,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    let Some(event) = state.pending_conflicts.remove(row_id) else {
        return outcome;
    };

    match resolution {
        ConflictResolution::Local => {
            for key in state.editing.transition_row(row_id, CellEditState::Conflict, CellEditState::Editing) {
                outcome.cell_changes.push((key, CellEditState::Editing));
            }
        }
        ConflictResolution::Remote => {
            outcome.rows_changed = apply_excluding(&mut state.index, &event, &HashSet::new());
            for key in state.editing.cancel_row(row_id) {
                outcome.cell_changes.push((key, CellEditState::Pristine));
            }
        }
    }
    tracing::debug!(target: targets::RECONCILE, id = %row_id, ?resolution, "conflict resolved");

    drop_orphans(state, &mut outcome);
    outcome
}

/// Drops edit sessions and selection entries of rows that are no longer in
/// the index, then any held conflicts that lost their row or their edits.
pub(crate) fn drop_orphans<T: GridRow>(state: &mut GridState<T>, outcome: &mut ReconcileOutcome) {
    let index = &state.index;
    let orphaned: Vec<RowId> = state
        .editing
        .iter()
        .map(|(key, _)| key.row_id.clone())
        .filter(|id| !index.contains(id))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    for id in orphaned {
        for key in state.editing.remove_row(&id) {
            outcome.cell_changes.push((key, CellEditState::Pristine));
        }
    }

    if state.selection.retain(|id| index.contains(id)) > 0 {
        outcome.selection_changed = true;
    }
    drop_stale_conflicts(state);
}

/// A held update only stands while the row still has edit sessions; once the
/// last one closes, later events apply directly and the held one is stale.
pub(crate) fn drop_stale_conflicts<T: GridRow>(state: &mut GridState<T>) {
    let (index, editing) = (&state.index, &state.editing);
    state.pending_conflicts.retain(|id, _| {
        let live = index.contains(id) && editing.has_row_edits(id);
        if !live {
            tracing::debug!(target: targets::RECONCILE, %id, "dropping stale held update");
        }
        live
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::row::{row_id_from_field, Record};
    use crate::model::value::CellValue;

    fn index() -> RowIndex<Record> {
        RowIndex::with_rows(
            row_id_from_field("id"),
            (1..=5)
                .map(|i| Record::new().with("id", i).with("name", format!("Row {}", i)).with("salary", i * 10))
                .collect(),
        )
    }

    fn patch(pairs: &[(&str, CellValue)]) -> RowPatch {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_event_json() {
        let event = SubscriptionEvent::<Record>::from_json(
            r#"{"type": "UPDATED", "id": 1, "patch": {"name": "Remote Update"}, "updatedAt": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, SubscriptionEventType::Updated);
        assert_eq!(event.id, RowId::Int(1));
        assert_eq!(event.patch.unwrap()["name"], CellValue::from("Remote Update"));
        assert!(event.updated_at.is_some());
    }

    #[test]
    fn test_event_json_for_row_type_without_default() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Ticket {
            id: u64,
            title: String,
        }

        let event = SubscriptionEvent::<Ticket>::from_value(serde_json::json!({
            "type": "CREATED",
            "id": 9,
            "row": {"id": 9, "title": "Broken build"}
        }))
        .unwrap();
        assert_eq!(event.row.as_ref().map(|t| (t.id, t.title.as_str())), Some((9, "Broken build")));

        let deleted = SubscriptionEvent::<Ticket>::from_json(r#"{"type": "DELETED", "id": 9}"#).unwrap();
        assert!(deleted.row.is_none());
        assert!(serde_json::to_string(&deleted).unwrap().contains("DELETED"));
    }

    #[test]
    fn test_event_json_rejects_unknown_type() {
        assert!(SubscriptionEvent::<Record>::from_json(r#"{"type": "RENAMED", "id": 1}"#).is_err());
    }

    #[test]
    fn test_created_and_upsert_are_idempotent() {
        let mut index = index();
        let row = Record::new().with("id", 6).with("name", "New");
        assert!(apply_event_default(&mut index, &SubscriptionEvent::created(6, row.clone())));
        assert!(apply_event_default(&mut index, &SubscriptionEvent::upsert(6, row)));
        assert_eq!(index.len(), 6);
    }

    #[test]
    fn test_deleted_removes_row() {
        let mut index = index();
        assert!(apply_event_default(&mut index, &SubscriptionEvent::deleted(1)));
        assert_eq!(index.len(), 4);
        assert!(!index.contains(&RowId::Int(1)));
    }

    #[test]
    fn test_update_unknown_row_is_ignored() {
        let mut index = index();
        let event = SubscriptionEvent::patched(42, patch(&[("name", "x".into())]));
        assert!(!apply_event_default(&mut index, &event));
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_malformed_events_are_ignored() {
        let mut index = index();
        let bare_update = SubscriptionEvent::<Record>::new(SubscriptionEventType::Updated, 1);
        let bare_create = SubscriptionEvent::<Record>::new(SubscriptionEventType::Created, 7);
        assert!(!apply_event_default(&mut index, &bare_update));
        assert!(!apply_event_default(&mut index, &bare_create));
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_unterminated_restores_or_patches() {
        let mut index = index();
        apply_event_default(&mut index, &SubscriptionEvent::terminated(2));
        assert!(!index.contains(&RowId::Int(2)));

        let restored = Record::new().with("id", 2).with("name", "Back");
        assert!(apply_event_default(&mut index, &SubscriptionEvent::unterminated(2).with_row(restored)));
        assert!(index.contains(&RowId::Int(2)));

        let event = SubscriptionEvent::unterminated(3).with_patch(patch(&[("name", "Patched".into())]));
        assert!(apply_event_default(&mut index, &event));
        assert_eq!(index.get(&RowId::Int(3)).unwrap().get("name"), CellValue::from("Patched"));

        let missing = SubscriptionEvent::unterminated(99).with_patch(patch(&[("name", "x".into())]));
        assert!(!apply_event_default(&mut index, &missing));
    }

    #[test]
    fn test_excluded_fields_survive_patch() {
        let mut index = index();
        let excluded: HashSet<String> = ["name".to_string()].into_iter().collect();
        let event = SubscriptionEvent::patched(
            1,
            patch(&[("name", "Remote Update".into()), ("salary", CellValue::Int(999))]),
        );
        assert!(apply_excluding(&mut index, &event, &excluded));
        let row = index.get(&RowId::Int(1)).unwrap();
        assert_eq!(row.get("name"), CellValue::from("Row 1"));
        assert_eq!(row.get("salary"), CellValue::Int(999));
    }

    #[test]
    fn test_excluded_fields_survive_full_row() {
        let mut index = index();
        let excluded: HashSet<String> = ["name".to_string()].into_iter().collect();
        let incoming = Record::new().with("id", 1).with("name", "Remote").with("salary", 1);
        assert!(apply_excluding(&mut index, &SubscriptionEvent::updated(1, incoming), &excluded));
        let row = index.get(&RowId::Int(1)).unwrap();
        assert_eq!(row.get("name"), CellValue::from("Row 1"));
        assert_eq!(row.get("salary"), CellValue::Int(1));
    }

    #[test]
    fn test_signal_event_source() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let source = SignalEventSource::<Record>::new();
        let received = Arc::new(AtomicUsize::new(0));
        let r = received.clone();
        let subscription = source.subscribe(Arc::new(move |_event| {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(source.subscriber_count(), 1);

        source.publish(SubscriptionEvent::deleted(1));
        drop(subscription);
        source.publish(SubscriptionEvent::deleted(2));

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_policy_names() {
        let policy: ConflictPolicy = serde_json::from_str(r#""prefer_remote""#).unwrap();
        assert_eq!(policy, ConflictPolicy::PreferRemote);
    }
}
