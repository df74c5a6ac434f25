//! The grid store.
//!
//! [`GridStore`] owns the row index, the column definitions, every view model
//! and the interaction state behind a single lock. Any change reruns the
//! filter → sort → group → flatten pipeline and bumps the view revision.
//! Notifications go out through [`StoreSignals`] once the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use horizon_grid_core::logging::targets;
use horizon_grid_core::{PerfSpan, Result, Subscription, TreeFormatOptions};
use parking_lot::RwLock;

use crate::config::GridOptions;

use super::column::{dedup_columns, find_column, Column};
use super::editing::{CellEditState, CellKey, CommitOutcome, EditingCell, EditingState};
use super::filter::{
    apply_advanced_filters, apply_filters_with_options, value_options, AdvancedFilterModel, FilterModel,
    FilterOptions, ValueOption,
};
use super::flatten::{flatten, format_tree, window};
use super::group::{build_tree, AggregationModel, GroupingModel, TreeNode};
use super::reconcile::{
    self, drop_orphans, ApplyEventFn, ConflictResolution, EventSource, ReconcileOutcome, SubscriptionEvent,
};
use super::row::{GridRow, RowId, RowIdFn, RowPatch};
use super::row_index::RowIndex;
use super::selection::{SelectionModel, SelectionState};
use super::signals::{Notifications, StoreSignals, ViewStats};
use super::sort::{apply_sort, SortModel};
use super::value::CellValue;

/// Type alias for the asynchronous row update processor.
///
/// Receives `(new_row, old_row)` and resolves to the row to store, or an
/// error message.
pub type ProcessRowUpdateFn<T> =
    Arc<dyn Fn(T, T) -> BoxFuture<'static, std::result::Result<T, String>> + Send + Sync>;

// =========================================================================
// View
// =========================================================================

/// The derived, render-ready view.
pub struct GridView<T> {
    processed: Vec<Arc<T>>,
    processed_ids: Vec<RowId>,
    tree: Vec<TreeNode<T>>,
    flat: Vec<TreeNode<T>>,
    revision: u64,
}

impl<T> GridView<T> {
    fn empty() -> Self {
        Self {
            processed: Vec::new(),
            processed_ids: Vec::new(),
            tree: Vec::new(),
            flat: Vec::new(),
            revision: 0,
        }
    }

    /// Monotonic revision, bumped on every recomputation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Rows passing the filters, in sorted order.
    pub fn processed_rows(&self) -> &[Arc<T>] {
        &self.processed
    }

    /// Ids of the processed rows, in sorted order.
    pub fn processed_ids(&self) -> &[RowId] {
        &self.processed_ids
    }

    /// Number of processed rows.
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// The grouped tree.
    pub fn tree(&self) -> &[TreeNode<T>] {
        &self.tree
    }

    /// The flattened node list.
    pub fn nodes(&self) -> &[TreeNode<T>] {
        &self.flat
    }

    /// Number of flattened nodes.
    pub fn node_count(&self) -> usize {
        self.flat.len()
    }

    /// The flattened node at `index`.
    pub fn node_at(&self, index: usize) -> Option<&TreeNode<T>> {
        self.flat.get(index)
    }

    /// The flattened nodes in `start..start + len`, clamped.
    pub fn window(&self, start: usize, len: usize) -> &[TreeNode<T>] {
        window(&self.flat, start, len)
    }

    /// Summary of the view.
    pub fn stats(&self) -> ViewStats {
        ViewStats {
            revision: self.revision,
            processed_count: self.processed.len(),
            flattened_count: self.flat.len(),
        }
    }
}

// =========================================================================
// State
// =========================================================================

pub(crate) struct GridState<T> {
    pub(crate) index: RowIndex<T>,
    pub(crate) columns: Vec<Column<T>>,
    pub(crate) filter_model: FilterModel,
    pub(crate) advanced_filter_model: AdvancedFilterModel,
    pub(crate) sort_model: SortModel,
    pub(crate) grouping: GroupingModel,
    pub(crate) aggregation_model: AggregationModel,
    pub(crate) selection: SelectionModel,
    pub(crate) editing: EditingState,
    pub(crate) pending_conflicts: HashMap<RowId, SubscriptionEvent<T>>,
    pub(crate) options: GridOptions,
    pub(crate) view: GridView<T>,
}

impl<T: GridRow> GridState<T> {
    /// Reruns the pipeline and records the new view.
    fn refresh(&mut self, notes: &mut Notifications) {
        let _span = PerfSpan::new("grid_recompute");
        let filter_options = FilterOptions {
            quick_filter_case_sensitive: self.options.quick_filter_case_sensitive,
        };

        let filtered = apply_filters_with_options(self.index.rows(), &self.filter_model, &self.columns, filter_options);
        let filtered = apply_advanced_filters(&filtered, &self.advanced_filter_model, &self.columns);
        let sorted = apply_sort(&filtered, &self.sort_model, &self.columns);
        let tree = build_tree(
            &sorted,
            &self.grouping,
            &self.columns,
            &self.aggregation_model,
            self.index.row_id_fn(),
        );
        let flat = flatten(&tree);

        self.view = GridView {
            processed_ids: sorted.iter().filter_map(|row| self.index.row_id(row)).collect(),
            processed: sorted,
            tree,
            flat,
            revision: self.view.revision + 1,
        };

        let stats = self.view.stats();
        tracing::debug!(
            target: targets::PIPELINE,
            revision = stats.revision,
            total = self.index.len(),
            processed = stats.processed_count,
            nodes = stats.flattened_count,
            "view recomputed"
        );
        notes.view = Some(stats);
    }

    /// Settles dependent state after the row index changed, then refreshes.
    fn rows_changed(&mut self, notes: &mut Notifications) {
        let mut outcome = ReconcileOutcome::default();
        drop_orphans(self, &mut outcome);
        self.absorb(outcome, notes);
        notes.rows = Some(self.index.len());
        self.refresh(notes);
    }

    fn absorb(&mut self, outcome: ReconcileOutcome, notes: &mut Notifications) {
        notes.cells.extend(outcome.cell_changes);
        if outcome.selection_changed {
            notes.selection = Some(self.selection.selected_count());
        }
        if outcome.conflict.is_some() {
            notes.conflict = outcome.conflict;
        }
    }

    fn selection_changed(&self, notes: &mut Notifications) {
        notes.selection = Some(self.selection.selected_count());
    }

    /// Writes `value` into the row through the column setter, or directly.
    fn apply_cell_value(&self, row: &T, field: &str, value: CellValue) -> T {
        match find_column(&self.columns, field) {
            Some(column) => column.apply_value(row, value),
            None => {
                let mut next = row.clone();
                next.set_field(field, value);
                next
            }
        }
    }
}

// =========================================================================
// Store
// =========================================================================

/// A grid's data engine.
///
/// # Example
///
/// ```ignore
/// use horizon_grid::model::{row_id_from_field, Column, GridStore, Record};
///
/// let store = GridStore::builder(row_id_from_field::<Record>("id"))
///     .column(Column::new("name").editable(true))
///     .column(Column::new("salary"))
///     .rows(vec![
///         Record::new().with("id", 1).with("name", "Alice").with("salary", 95000),
///         Record::new().with("id", 2).with("name", "Bob").with("salary", 85000),
///     ])
///     .build();
///
/// store.toggle_sort("salary");
/// assert_eq!(store.node_count(), 2);
/// ```
pub struct GridStore<T> {
    state: RwLock<GridState<T>>,
    signals: StoreSignals,
    process_row_update: Option<ProcessRowUpdateFn<T>>,
    apply_event: Option<ApplyEventFn<T>>,
}

impl<T: GridRow> GridStore<T> {
    /// Starts building a store around a row id function.
    pub fn builder(get_row_id: RowIdFn<T>) -> GridStoreBuilder<T> {
        GridStoreBuilder::new(get_row_id)
    }

    /// Creates a store with default options.
    pub fn new(get_row_id: RowIdFn<T>, columns: Vec<Column<T>>, rows: Vec<T>) -> Self {
        Self::builder(get_row_id).columns(columns).rows(rows).build()
    }

    /// The store's change signals.
    pub fn signals(&self) -> &StoreSignals {
        &self.signals
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut GridState<T>, &mut Notifications) -> R) -> R {
        let mut notes = Notifications::default();
        let result = {
            let mut state = self.state.write();
            f(&mut state, &mut notes)
        };
        if !notes.is_empty() {
            notes.emit(&self.signals);
        }
        result
    }

    // =========================================================================
    // Rows
    // =========================================================================

    /// Replaces every row.
    pub fn set_rows(&self, rows: Vec<T>) {
        self.mutate(|state, notes| {
            state.index.set_rows(rows);
            state.rows_changed(notes);
        });
    }

    /// Appends a row, or replaces the row with the same id.
    pub fn add_row(&self, row: T) -> bool {
        self.mutate(|state, notes| {
            let changed = state.index.add_row(row);
            if changed {
                state.rows_changed(notes);
            }
            changed
        })
    }

    /// Replaces the row stored under `id`.
    pub fn update_row(&self, id: &RowId, row: T) -> bool {
        self.mutate(|state, notes| {
            let changed = state.index.update_row(id, row);
            if changed {
                state.rows_changed(notes);
            }
            changed
        })
    }

    /// Merges a partial update into the row stored under `id`.
    pub fn patch_row(&self, id: &RowId, patch: &RowPatch) -> bool {
        self.mutate(|state, notes| {
            let changed = state.index.merge_patch(id, patch);
            if changed {
                state.rows_changed(notes);
            }
            changed
        })
    }

    /// Removes a row along with its edit sessions and selection.
    pub fn remove_row(&self, id: &RowId) -> bool {
        self.mutate(|state, notes| {
            let changed = state.index.remove_row(id).is_some();
            if changed {
                state.rows_changed(notes);
            }
            changed
        })
    }

    /// Looks up a row by id.
    pub fn row(&self, id: &RowId) -> Option<Arc<T>> {
        self.state.read().index.get(id).cloned()
    }

    /// Every row, in insertion order.
    pub fn all_rows(&self) -> Vec<Arc<T>> {
        self.state.read().index.rows().to_vec()
    }

    /// Total number of rows.
    pub fn row_count(&self) -> usize {
        self.state.read().index.len()
    }

    // =========================================================================
    // Columns
    // =========================================================================

    /// Replaces the column definitions.
    pub fn set_columns(&self, columns: Vec<Column<T>>) {
        self.mutate(|state, notes| {
            state.columns = dedup_columns(columns);
            state.refresh(notes);
        });
    }

    /// Every column definition.
    pub fn columns(&self) -> Vec<Column<T>> {
        self.state.read().columns.clone()
    }

    /// Columns that are not hidden.
    pub fn visible_columns(&self) -> Vec<Column<T>> {
        self.state
            .read()
            .columns
            .iter()
            .filter(|c| !c.is_hidden())
            .cloned()
            .collect()
    }

    /// Shows or hides a column. Returns `false` for unknown fields.
    pub fn set_column_hidden(&self, field: &str, hidden: bool) -> bool {
        let mut state = self.state.write();
        match state.columns.iter_mut().find(|c| c.field() == field) {
            Some(column) => {
                *column = column.clone().hidden(hidden);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Filtering
    // =========================================================================

    /// The current filter model.
    pub fn filter_model(&self) -> FilterModel {
        self.state.read().filter_model.clone()
    }

    /// Replaces the filter model.
    pub fn set_filter_model(&self, model: FilterModel) {
        self.mutate(|state, notes| {
            state.filter_model = model;
            state.refresh(notes);
        });
    }

    /// Sets the quick filter term.
    pub fn set_quick_filter(&self, term: impl Into<String>) {
        let term = term.into();
        self.mutate(|state, notes| {
            state.filter_model.quick_filter = term;
            state.refresh(notes);
        });
    }

    /// The current advanced filter model.
    pub fn advanced_filter_model(&self) -> AdvancedFilterModel {
        self.state.read().advanced_filter_model.clone()
    }

    /// Replaces the advanced filter model.
    pub fn set_advanced_filter_model(&self, model: AdvancedFilterModel) {
        self.mutate(|state, notes| {
            state.advanced_filter_model = model;
            state.refresh(notes);
        });
    }

    /// Distinct values of `field` across all rows, for a value filter menu.
    pub fn value_options(&self, field: &str) -> Vec<ValueOption> {
        let state = self.state.read();
        value_options(state.index.rows(), field, &state.columns)
    }

    // =========================================================================
    // Sorting
    // =========================================================================

    /// The current sort model.
    pub fn sort_model(&self) -> SortModel {
        self.state.read().sort_model.clone()
    }

    /// Replaces the sort model.
    pub fn set_sort_model(&self, model: SortModel) {
        self.mutate(|state, notes| {
            state.sort_model = model;
            state.refresh(notes);
        });
    }

    /// Header click: cycles `field` through asc, desc and unsorted.
    ///
    /// Replaces other sort keys unless multi-sort is enabled. Returns `false`
    /// for unknown or non-sortable columns.
    pub fn toggle_sort(&self, field: &str) -> bool {
        let multi = self.state.read().options.multi_sort;
        self.toggle_sort_with(field, multi)
    }

    /// Like [`toggle_sort`](Self::toggle_sort) but always keeps other keys.
    pub fn toggle_sort_multi(&self, field: &str) -> bool {
        self.toggle_sort_with(field, true)
    }

    fn toggle_sort_with(&self, field: &str, multi: bool) -> bool {
        self.mutate(|state, notes| {
            if !find_column(&state.columns, field).is_some_and(Column::is_sortable) {
                tracing::debug!(target: targets::PIPELINE, field, "sort toggle ignored");
                return false;
            }
            if multi {
                state.sort_model.toggle_multi(field);
            } else {
                state.sort_model.toggle(field);
            }
            state.refresh(notes);
            true
        })
    }

    // =========================================================================
    // Grouping
    // =========================================================================

    /// The current grouping model.
    pub fn grouping_model(&self) -> GroupingModel {
        self.state.read().grouping.clone()
    }

    /// Replaces the grouping model.
    pub fn set_grouping_model(&self, model: GroupingModel) {
        self.mutate(|state, notes| {
            state.grouping = model;
            state.refresh(notes);
        });
    }

    /// Sets the grouping fields, keeping expand state.
    pub fn set_group_fields<I, S>(&self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.mutate(|state, notes| {
            state.grouping.fields = fields;
            state.refresh(notes);
        });
    }

    /// Expands or collapses a group.
    pub fn set_group_expanded(&self, group_id: &str, expanded: bool) {
        self.mutate(|state, notes| {
            state.grouping.set_expanded(group_id, expanded);
            state.refresh(notes);
        });
    }

    /// Flips a group's expand state, returning the new state.
    pub fn toggle_group_expanded(&self, group_id: &str) -> bool {
        self.mutate(|state, notes| {
            let expanded = state.grouping.toggle_expanded(group_id);
            state.refresh(notes);
            expanded
        })
    }

    /// The current aggregation model.
    pub fn aggregation_model(&self) -> AggregationModel {
        self.state.read().aggregation_model.clone()
    }

    /// Replaces the aggregation model.
    pub fn set_aggregation_model(&self, model: AggregationModel) {
        self.mutate(|state, notes| {
            state.aggregation_model = model;
            state.refresh(notes);
        });
    }

    // =========================================================================
    // Options
    // =========================================================================

    /// The current options.
    pub fn options(&self) -> GridOptions {
        self.state.read().options.clone()
    }

    /// Replaces the options. The group expand default is carried into the
    /// grouping model.
    pub fn set_options(&self, options: GridOptions) {
        self.mutate(|state, notes| {
            state.grouping.expand_by_default = options.groups_expanded_by_default;
            state.options = options;
            state.refresh(notes);
        });
    }

    // =========================================================================
    // View
    // =========================================================================

    /// Runs `f` against the current view without copying it.
    pub fn with_view<R>(&self, f: impl FnOnce(&GridView<T>) -> R) -> R {
        f(&self.state.read().view)
    }

    /// Current view revision.
    pub fn revision(&self) -> u64 {
        self.state.read().view.revision
    }

    /// Summary of the current view.
    pub fn view_stats(&self) -> ViewStats {
        self.state.read().view.stats()
    }

    /// Rows passing the filters, in sorted order.
    pub fn processed_rows(&self) -> Vec<Arc<T>> {
        self.state.read().view.processed.clone()
    }

    /// Number of rows passing the filters.
    pub fn processed_count(&self) -> usize {
        self.state.read().view.processed.len()
    }

    /// Every flattened node.
    pub fn flattened_nodes(&self) -> Vec<TreeNode<T>> {
        self.state.read().view.flat.clone()
    }

    /// Number of flattened nodes.
    pub fn node_count(&self) -> usize {
        self.state.read().view.flat.len()
    }

    /// The flattened node at `index`.
    pub fn node_at(&self, index: usize) -> Option<TreeNode<T>> {
        self.state.read().view.flat.get(index).cloned()
    }

    /// The flattened nodes in `start..start + len`, clamped.
    pub fn window(&self, start: usize, len: usize) -> Vec<TreeNode<T>> {
        self.state.read().view.window(start, len).to_vec()
    }

    /// The grouped tree.
    pub fn tree(&self) -> Vec<TreeNode<T>> {
        self.state.read().view.tree.clone()
    }

    /// Renders the grouped tree for debug output.
    pub fn format_tree(&self, options: &TreeFormatOptions) -> String {
        format_tree(&self.state.read().view.tree, options)
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Check if a row is selected.
    pub fn is_selected(&self, id: &RowId) -> bool {
        self.state.read().selection.is_selected(id)
    }

    /// Selected row ids.
    pub fn selected_ids(&self) -> Vec<RowId> {
        self.state.read().selection.selected_ids().iter().cloned().collect()
    }

    /// Selected rows, in insertion order.
    pub fn selected_rows(&self) -> Vec<Arc<T>> {
        let state = self.state.read();
        state
            .index
            .rows()
            .iter()
            .filter(|row| {
                state
                    .index
                    .row_id(row)
                    .is_some_and(|id| state.selection.is_selected(&id))
            })
            .cloned()
            .collect()
    }

    /// All, some or none of the processed rows are selected.
    pub fn selection_state(&self) -> SelectionState {
        let state = self.state.read();
        state.selection.state(state.view.processed_ids.iter())
    }

    /// Whether the last bulk action was select-all.
    pub fn is_select_all(&self) -> bool {
        self.state.read().selection.is_select_all()
    }

    /// Flips a row's selection. Unknown rows are ignored.
    pub fn toggle_row_selection(&self, id: &RowId) -> bool {
        self.mutate(|state, notes| {
            if !state.index.contains(id) {
                return false;
            }
            let selected = state.selection.toggle(id);
            tracing::trace!(target: targets::SELECTION, %id, selected, "selection toggled");
            state.selection_changed(notes);
            true
        })
    }

    /// Selects a row. Unknown rows are ignored.
    pub fn select_row(&self, id: &RowId) -> bool {
        self.mutate(|state, notes| {
            let changed = state.index.contains(id) && state.selection.select(id);
            if changed {
                state.selection_changed(notes);
            }
            changed
        })
    }

    /// Deselects a row, clearing the select-all flag.
    pub fn deselect_row(&self, id: &RowId) -> bool {
        self.mutate(|state, notes| {
            let changed = state.selection.deselect(id);
            if changed {
                state.selection_changed(notes);
            }
            changed
        })
    }

    /// Selects exactly the processed rows.
    pub fn select_all(&self) {
        self.mutate(|state, notes| {
            let ids = state.view.processed_ids.clone();
            tracing::debug!(target: targets::SELECTION, count = ids.len(), "select all");
            state.selection.select_all(ids);
            state.selection_changed(notes);
        });
    }

    /// Clears the selection.
    pub fn deselect_all(&self) {
        self.mutate(|state, notes| {
            state.selection.deselect_all();
            state.selection_changed(notes);
        });
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Opens an edit session on a cell and focuses it.
    ///
    /// Missing rows, undeclared columns and non-editable cells are ignored
    /// with `Ok(false)`. A cell in `error` resumes editing with its working
    /// value. Fails with [`GridError::IllegalEditTransition`] while the cell
    /// is saving.
    ///
    /// [`GridError::IllegalEditTransition`]: horizon_grid_core::GridError::IllegalEditTransition
    pub fn start_cell_edit(&self, row_id: &RowId, field: &str) -> Result<bool> {
        self.mutate(|state, notes| {
            let Some(row) = state.index.get(row_id).cloned() else {
                tracing::debug!(target: targets::EDITING, %row_id, "edit ignored: unknown row");
                return Ok(false);
            };
            let Some(column) = find_column(&state.columns, field) else {
                tracing::debug!(target: targets::EDITING, field, "edit ignored: undeclared column");
                return Ok(false);
            };
            if !column.is_editable(&row) {
                tracing::debug!(target: targets::EDITING, %row_id, field, "edit ignored: read-only cell");
                return Ok(false);
            }
            let value = column.value(&row);
            let key = CellKey::new(row_id.clone(), field);
            let opened = state.editing.begin(key.clone(), value)?;
            if opened {
                tracing::debug!(target: targets::EDITING, cell = %key, "edit started");
                notes.cell(key, CellEditState::Editing);
            }
            Ok(opened)
        })
    }

    /// Replaces the working value of an open session.
    pub fn update_cell_value(&self, row_id: &RowId, field: &str, value: impl Into<CellValue>) -> bool {
        let value = value.into();
        self.mutate(|state, notes| {
            let key = CellKey::new(row_id.clone(), field);
            let was_error = state.editing.state_of(&key) == CellEditState::Error;
            let updated = state.editing.update_value(&key, value);
            if updated && was_error {
                notes.cell(key, CellEditState::Editing);
            }
            updated
        })
    }

    /// Discards an edit session. Saving sessions cannot be cancelled.
    pub fn cancel_cell_edit(&self, row_id: &RowId, field: &str) -> bool {
        self.mutate(|state, notes| {
            let key = CellKey::new(row_id.clone(), field);
            if state.editing.state_of(&key) == CellEditState::Saving {
                return false;
            }
            let cancelled = state.editing.remove(&key).is_some();
            if cancelled {
                tracing::debug!(target: targets::EDITING, cell = %key, "edit cancelled");
                reconcile::drop_stale_conflicts(state);
                notes.cell(key, CellEditState::Pristine);
            }
            cancelled
        })
    }

    /// Commits a session synchronously through the column setter.
    ///
    /// Sessions that are saving or awaiting conflict resolution are not
    /// committed.
    pub fn commit_cell_edit(&self, row_id: &RowId, field: &str) -> bool {
        self.mutate(|state, notes| {
            let key = CellKey::new(row_id.clone(), field);
            let value = match state.editing.get(&key) {
                Some(cell) if is_committable(cell.state) => cell.value.clone(),
                _ => return false,
            };
            commit_value(state, notes, &key, value).is_some()
        })
    }

    /// Validates and commits a session through the row update processor.
    ///
    /// The column validator runs first; a rejection leaves the session in
    /// `error`. The session is then `saving` while the processor runs, and
    /// the row it returns is what gets stored. Without a processor the value
    /// is committed synchronously once validated. If the working value changed
    /// while the validator ran, nothing is committed and the session stays
    /// open with the newer value. Failures are reported through
    /// [`StoreSignals::commit_failed`].
    pub async fn commit_cell_edit_async(&self, row_id: &RowId, field: &str) -> CommitOutcome<T> {
        let key = CellKey::new(row_id.clone(), field);

        let prepared = {
            let state = self.state.read();
            prepare_commit(&state, &key)
        };
        let Some((value, candidate, validator)) = prepared else {
            return CommitOutcome::Skipped;
        };

        if let Some(validator) = validator {
            if let Some(message) = validator(value.clone(), candidate).await {
                tracing::debug!(target: targets::EDITING, cell = %key, %message, "validation failed");
                self.fail_cell(&key, &message);
                return CommitOutcome::Invalid(message);
            }
        }

        let Some(processor) = self.process_row_update.clone() else {
            return self.mutate(|state, notes| {
                if !still_validated(state, &key, &value) {
                    return CommitOutcome::Skipped;
                }
                match commit_value(state, notes, &key, value) {
                    Some(row) => CommitOutcome::Committed(row),
                    None => CommitOutcome::Skipped,
                }
            });
        };

        let rows = self.mutate(|state, notes| {
            let old = state.index.get(&key.row_id).cloned()?;
            if !still_validated(state, &key, &value) {
                return None;
            }
            let new = state.apply_cell_value(&old, &key.field, value);
            state.editing.set_state(&key, CellEditState::Saving);
            notes.cell(key.clone(), CellEditState::Saving);
            Some((new, T::clone(&old)))
        });
        let Some((new_row, old_row)) = rows else {
            return CommitOutcome::Skipped;
        };

        tracing::debug!(target: targets::EDITING, cell = %key, "saving");
        match processor(new_row, old_row).await {
            Ok(saved) => self.mutate(|state, notes| {
                if !state.index.contains(&key.row_id) {
                    tracing::debug!(target: targets::EDITING, cell = %key, "row removed while saving");
                    if state.editing.remove(&key).is_some() {
                        notes.cell(key.clone(), CellEditState::Pristine);
                    }
                    return CommitOutcome::Skipped;
                }
                if !state.index.update_row(&key.row_id, saved.clone()) {
                    let message = "row update changed the row id";
                    tracing::debug!(target: targets::EDITING, cell = %key, "{}", message);
                    if state.editing.fail(&key, message) {
                        notes.cell(key.clone(), CellEditState::Error);
                    }
                    notes.failure = Some((key.clone(), message.to_string()));
                    return CommitOutcome::Failed(message.to_string());
                }
                state.editing.remove(&key);
                notes.cell(key.clone(), CellEditState::Pristine);
                state.rows_changed(notes);
                CommitOutcome::Committed(saved)
            }),
            Err(message) => {
                tracing::debug!(target: targets::EDITING, cell = %key, %message, "commit failed");
                self.fail_cell(&key, &message);
                CommitOutcome::Failed(message)
            }
        }
    }

    fn fail_cell(&self, key: &CellKey, message: &str) {
        self.mutate(|state, notes| {
            if state.editing.fail(key, message) {
                notes.cell(key.clone(), CellEditState::Error);
            }
            notes.failure = Some((key.clone(), message.to_string()));
        });
    }

    /// The edit session of a cell.
    pub fn editing_cell(&self, row_id: &RowId, field: &str) -> Option<EditingCell> {
        self.state.read().editing.get(&CellKey::new(row_id.clone(), field)).cloned()
    }

    /// The edit state of a cell; pristine without a session.
    pub fn cell_state(&self, row_id: &RowId, field: &str) -> CellEditState {
        self.state.read().editing.state_of(&CellKey::new(row_id.clone(), field))
    }

    /// Every open edit session.
    pub fn editing_cells(&self) -> Vec<(CellKey, EditingCell)> {
        let state = self.state.read();
        let mut cells: Vec<_> = state.editing.iter().map(|(k, c)| (k.clone(), c.clone())).collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        cells
    }

    /// The focused cell.
    pub fn focused_cell(&self) -> Option<CellKey> {
        self.state.read().editing.focused().cloned()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Applies a subscription event. Returns `true` if rows changed.
    pub fn apply_subscription_event(&self, event: SubscriptionEvent<T>) -> bool {
        let hook = self.apply_event.clone();
        self.mutate(|state, notes| {
            let outcome = reconcile::reconcile(state, &event, hook.as_ref());
            let changed = outcome.rows_changed;
            state.absorb(outcome, notes);
            if changed {
                notes.rows = Some(state.index.len());
                state.refresh(notes);
            }
            changed
        })
    }

    /// Rows with a held remote update.
    pub fn pending_conflicts(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self.state.read().pending_conflicts.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The held remote update for a row.
    pub fn pending_conflict(&self, row_id: &RowId) -> Option<SubscriptionEvent<T>> {
        self.state.read().pending_conflicts.get(row_id).cloned()
    }

    /// Settles a held conflict. Returns `false` if none was pending.
    pub fn resolve_conflict(&self, row_id: &RowId, resolution: ConflictResolution) -> bool {
        self.mutate(|state, notes| {
            if !state.pending_conflicts.contains_key(row_id) {
                return false;
            }
            let outcome = reconcile::resolve_conflict(state, row_id, resolution);
            let changed = outcome.rows_changed;
            state.absorb(outcome, notes);
            if changed {
                notes.rows = Some(state.index.len());
                state.refresh(notes);
            }
            true
        })
    }

    /// Feeds every event from `source` into the store.
    ///
    /// The subscription holds only a weak reference, so it never keeps the
    /// store alive. Dropping the returned handle detaches the source.
    pub fn attach_source<S>(self: &Arc<Self>, source: &S) -> Subscription
    where
        S: EventSource<T> + ?Sized,
    {
        let store = Arc::downgrade(self);
        source.subscribe(Arc::new(move |event| {
            if let Some(store) = store.upgrade() {
                store.apply_subscription_event(event);
            }
        }))
    }
}

fn is_committable(state: CellEditState) -> bool {
    matches!(state, CellEditState::Editing | CellEditState::Error)
}

/// The session is still committable and holds the value that was validated.
/// A value written while the validator ran wins over the stale one.
fn still_validated<T: GridRow>(state: &GridState<T>, key: &CellKey, value: &CellValue) -> bool {
    match state.editing.get(key) {
        Some(cell) if is_committable(cell.state) && &cell.value == value => true,
        Some(_) => {
            tracing::debug!(target: targets::EDITING, cell = %key, "value changed before saving");
            false
        }
        None => false,
    }
}

type PreparedCommit<T> = (CellValue, T, Option<super::column::Validator<T>>);

fn prepare_commit<T: GridRow>(state: &GridState<T>, key: &CellKey) -> Option<PreparedCommit<T>> {
    let cell = state.editing.get(key).filter(|c| is_committable(c.state))?;
    let row = state.index.get(&key.row_id)?;
    let candidate = state.apply_cell_value(row, &key.field, cell.value.clone());
    let validator = find_column(&state.columns, &key.field).and_then(|c| c.validator_fn().cloned());
    Some((cell.value.clone(), candidate, validator))
}

/// Writes `value` into the row and closes the session. Returns the stored row.
fn commit_value<T: GridRow>(
    state: &mut GridState<T>,
    notes: &mut Notifications,
    key: &CellKey,
    value: CellValue,
) -> Option<T> {
    let Some(row) = state.index.get(&key.row_id).cloned() else {
        if state.editing.remove(key).is_some() {
            notes.cell(key.clone(), CellEditState::Pristine);
        }
        return None;
    };
    let next = state.apply_cell_value(&row, &key.field, value);
    if !state.index.update_row(&key.row_id, next.clone()) {
        tracing::debug!(target: targets::EDITING, cell = %key, "commit would change the row id");
        return None;
    }
    state.editing.remove(key);
    tracing::debug!(target: targets::EDITING, cell = %key, "edit committed");
    notes.cell(key.clone(), CellEditState::Pristine);
    state.rows_changed(notes);
    Some(next)
}

impl<T: GridRow> fmt::Debug for GridStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("GridStore")
            .field("rows", &state.index.len())
            .field("columns", &state.columns.len())
            .field("revision", &state.view.revision)
            .field("editing", &state.editing.len())
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Builder
// =========================================================================

/// Builder for [`GridStore`].
pub struct GridStoreBuilder<T> {
    get_row_id: RowIdFn<T>,
    columns: Vec<Column<T>>,
    rows: Vec<T>,
    options: GridOptions,
    filter_model: FilterModel,
    advanced_filter_model: AdvancedFilterModel,
    sort_model: SortModel,
    grouping: GroupingModel,
    aggregation_model: AggregationModel,
    process_row_update: Option<ProcessRowUpdateFn<T>>,
    on_commit_error: Option<Arc<dyn Fn(&CellKey, &str) + Send + Sync>>,
    apply_event: Option<ApplyEventFn<T>>,
}

impl<T: GridRow> GridStoreBuilder<T> {
    fn new(get_row_id: RowIdFn<T>) -> Self {
        Self {
            get_row_id,
            columns: Vec::new(),
            rows: Vec::new(),
            options: GridOptions::default(),
            filter_model: FilterModel::default(),
            advanced_filter_model: AdvancedFilterModel::default(),
            sort_model: SortModel::default(),
            grouping: GroupingModel::default(),
            aggregation_model: AggregationModel::default(),
            process_row_update: None,
            on_commit_error: None,
            apply_event: None,
        }
    }

    /// Sets the column definitions. Repeated fields keep the first column.
    pub fn columns(mut self, columns: Vec<Column<T>>) -> Self {
        self.columns = columns;
        self
    }

    /// Adds a column definition.
    pub fn column(mut self, column: Column<T>) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the initial rows.
    pub fn rows(mut self, rows: Vec<T>) -> Self {
        self.rows = rows;
        self
    }

    /// Sets the options.
    pub fn options(mut self, options: GridOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the initial filter model.
    pub fn filter_model(mut self, model: FilterModel) -> Self {
        self.filter_model = model;
        self
    }

    /// Sets the initial advanced filter model.
    pub fn advanced_filter_model(mut self, model: AdvancedFilterModel) -> Self {
        self.advanced_filter_model = model;
        self
    }

    /// Sets the initial sort model.
    pub fn sort_model(mut self, model: SortModel) -> Self {
        self.sort_model = model;
        self
    }

    /// Sets the initial grouping fields.
    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grouping.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the initial aggregation model.
    pub fn aggregation_model(mut self, model: AggregationModel) -> Self {
        self.aggregation_model = model;
        self
    }

    /// Sets the asynchronous row update processor.
    pub fn process_row_update<F, Fut, E>(mut self, processor: F) -> Self
    where
        F: Fn(T, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        self.process_row_update = Some(Arc::new(move |new: T, old: T| {
            processor(new, old)
                .map(|result| result.map_err(|e| e.to_string()))
                .boxed()
        }));
        self
    }

    /// Sets a callback for validation and commit failures.
    pub fn on_commit_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CellKey, &str) + Send + Sync + 'static,
    {
        self.on_commit_error = Some(Arc::new(callback));
        self
    }

    /// Replaces the default subscription event merge.
    pub fn apply_event<F>(mut self, apply: F) -> Self
    where
        F: Fn(&mut RowIndex<T>, &SubscriptionEvent<T>) -> bool + Send + Sync + 'static,
    {
        self.apply_event = Some(Arc::new(apply));
        self
    }

    /// Builds the store and computes the first view.
    pub fn build(self) -> GridStore<T> {
        let mut grouping = self.grouping;
        grouping.expand_by_default = self.options.groups_expanded_by_default;

        let mut state = GridState {
            index: RowIndex::with_rows(self.get_row_id, self.rows),
            columns: dedup_columns(self.columns),
            filter_model: self.filter_model,
            advanced_filter_model: self.advanced_filter_model,
            sort_model: self.sort_model,
            grouping,
            aggregation_model: self.aggregation_model,
            selection: SelectionModel::new(),
            editing: EditingState::new(),
            pending_conflicts: HashMap::new(),
            options: self.options,
            view: GridView::empty(),
        };
        // Nothing is connected yet.
        state.refresh(&mut Notifications::default());

        let signals = StoreSignals::new();
        if let Some(callback) = self.on_commit_error {
            signals
                .commit_failed
                .connect(move |(key, message): &(CellKey, String)| callback(key, message.as_str()));
        }

        horizon_grid_core::grid_debug!(
            rows = state.index.len(),
            columns = state.columns.len(),
            "grid store created"
        );

        GridStore {
            state: RwLock::new(state),
            signals,
            process_row_update: self.process_row_update,
            apply_event: self.apply_event,
        }
    }
}

static_assertions::assert_impl_all!(GridStore<super::row::Record>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::row::{row_id_from_field, Record};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> GridStore<Record> {
        GridStore::builder(row_id_from_field("id"))
            .column(Column::new("name").editable(true))
            .column(Column::new("dept"))
            .column(Column::new("salary").editable(true))
            .column(Column::new("notes").sortable(false))
            .rows(vec![
                Record::new().with("id", 1).with("name", "Alice").with("dept", "Eng").with("salary", 95000),
                Record::new().with("id", 2).with("name", "Bob").with("dept", "Sales").with("salary", 60000),
                Record::new().with("id", 3).with("name", "Carol").with("dept", "Eng").with("salary", 85000),
            ])
            .build()
    }

    fn id(n: i64) -> RowId {
        RowId::Int(n)
    }

    #[test]
    fn test_initial_view() {
        let store = store();
        assert_eq!(store.revision(), 1);
        assert_eq!(store.row_count(), 3);
        assert_eq!(store.processed_count(), 3);
        assert_eq!(store.node_count(), 3);
    }

    #[test]
    fn test_revision_bumps_on_change() {
        let store = store();
        let before = store.revision();
        store.set_quick_filter("car");
        assert_eq!(store.revision(), before + 1);
        assert_eq!(store.processed_count(), 1);
        assert_eq!(store.row_count(), 3);
    }

    #[test]
    fn test_toggle_sort_ignores_non_sortable() {
        let store = store();
        assert!(!store.toggle_sort("notes"));
        assert!(!store.toggle_sort("missing"));
        assert!(store.sort_model().is_empty());
    }

    #[test]
    fn test_multi_sort_option() {
        let store = store();
        store.set_options(GridOptions::default().with_multi_sort(true));
        store.toggle_sort("dept");
        store.toggle_sort("salary");
        assert_eq!(store.sort_model().len(), 2);
    }

    #[test]
    fn test_grouping_through_store() {
        let store = store();
        store.set_group_fields(["dept"]);
        assert_eq!(store.node_count(), 5);
        assert!(!store.toggle_group_expanded("dept:Eng"));
        assert_eq!(store.node_count(), 3);
    }

    #[test]
    fn test_start_edit_noops() {
        let store = store();
        assert!(!store.start_cell_edit(&id(9), "name").unwrap());
        assert!(!store.start_cell_edit(&id(1), "undeclared").unwrap());
        assert!(!store.start_cell_edit(&id(1), "dept").unwrap());
        assert!(store.editing_cells().is_empty());
    }

    #[test]
    fn test_sync_commit() {
        let store = store();
        assert!(store.start_cell_edit(&id(1), "name").unwrap());
        assert_eq!(store.focused_cell(), Some(CellKey::new(1, "name")));
        assert!(store.update_cell_value(&id(1), "name", "Alicia"));
        assert!(store.commit_cell_edit(&id(1), "name"));
        assert_eq!(store.row(&id(1)).unwrap().get("name"), CellValue::from("Alicia"));
        assert_eq!(store.cell_state(&id(1), "name"), CellEditState::Pristine);
    }

    #[test]
    fn test_cancel_leaves_row() {
        let store = store();
        store.start_cell_edit(&id(1), "name").unwrap();
        store.update_cell_value(&id(1), "name", "Nope");
        assert!(store.cancel_cell_edit(&id(1), "name"));
        assert_eq!(store.row(&id(1)).unwrap().get("name"), CellValue::from("Alice"));
    }

    #[test]
    fn test_remove_row_prunes_edits_and_selection() {
        let store = store();
        store.start_cell_edit(&id(2), "name").unwrap();
        store.toggle_row_selection(&id(2));
        assert!(store.remove_row(&id(2)));
        assert!(store.editing_cell(&id(2), "name").is_none());
        assert!(!store.is_selected(&id(2)));
    }

    #[test]
    fn test_select_all_uses_processed_rows() {
        let store = store();
        store.set_quick_filter("eng");
        store.select_all();
        assert_eq!(store.selected_ids(), vec![id(1), id(3)]);
        assert_eq!(store.selection_state(), SelectionState::All);

        store.set_quick_filter("");
        assert_eq!(store.selection_state(), SelectionState::Some);
        store.deselect_row(&id(1));
        assert!(!store.is_select_all());
    }

    #[test]
    fn test_signals_fire_after_unlock() {
        let store = Arc::new(store());
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let weak = Arc::downgrade(&store);
        store.signals().view_changed.connect(move |_| {
            // Reading back from a slot must not deadlock.
            if let Some(store) = weak.upgrade() {
                s.store(store.processed_count(), Ordering::SeqCst);
            }
        });
        store.set_quick_filter("bob");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_column_visibility() {
        let store = store();
        assert!(store.set_column_hidden("notes", true));
        assert_eq!(store.visible_columns().len(), 3);
        assert!(!store.set_column_hidden("missing", true));
    }

    #[test]
    fn test_value_options_through_store() {
        let store = store();
        let options = store.value_options("dept");
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].count, 2);
    }
}
