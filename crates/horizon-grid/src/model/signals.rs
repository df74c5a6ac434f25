//! Change notifications emitted by the grid store.
//!
//! Every signal fires after the store's lock has been released, so slots
//! may call back into the store.

use horizon_grid_core::Signal;

use super::editing::{CellEditState, CellKey};
use super::row::RowId;

/// Summary of a recomputed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewStats {
    /// Monotonic view revision.
    pub revision: u64,
    /// Rows passing the filters.
    pub processed_count: usize,
    /// Nodes in the flattened list.
    pub flattened_count: usize,
}

/// Signals emitted by a [`GridStore`](super::GridStore).
///
/// # Example
///
/// ```ignore
/// store.signals().view_changed.connect(|stats| {
///     println!("revision {} has {} nodes", stats.revision, stats.flattened_count);
/// });
/// ```
pub struct StoreSignals {
    // -------------------------------------------------------------------------
    // Data
    // -------------------------------------------------------------------------
    /// Emitted after the row index changed.
    /// Args: total row count
    pub rows_changed: Signal<usize>,

    /// Emitted after the derived view was recomputed.
    pub view_changed: Signal<ViewStats>,

    // -------------------------------------------------------------------------
    // Interaction
    // -------------------------------------------------------------------------
    /// Emitted when the set of selected rows changes.
    /// Args: selected row count
    pub selection_changed: Signal<usize>,

    /// Emitted when an edit session changes state.
    /// Args: (cell, new state)
    pub edit_state_changed: Signal<(CellKey, CellEditState)>,

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------
    /// Emitted when a remote update collides with local edits under the
    /// prompt policy.
    pub conflict_detected: Signal<RowId>,

    /// Emitted when validation or an asynchronous commit fails.
    /// Args: (cell, error message)
    pub commit_failed: Signal<(CellKey, String)>,
}

impl Default for StoreSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSignals {
    /// Creates a new set of signals with no connections.
    pub fn new() -> Self {
        Self {
            rows_changed: Signal::new(),
            view_changed: Signal::new(),
            selection_changed: Signal::new(),
            edit_state_changed: Signal::new(),
            conflict_detected: Signal::new(),
            commit_failed: Signal::new(),
        }
    }
}

/// Notifications collected under the store lock and emitted after it is
/// released.
#[derive(Debug, Default)]
#[must_use]
pub(crate) struct Notifications {
    pub rows: Option<usize>,
    pub view: Option<ViewStats>,
    pub selection: Option<usize>,
    pub cells: Vec<(CellKey, CellEditState)>,
    pub conflict: Option<RowId>,
    pub failure: Option<(CellKey, String)>,
}

impl Notifications {
    pub fn cell(&mut self, key: CellKey, state: CellEditState) {
        self.cells.push((key, state));
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_none()
            && self.view.is_none()
            && self.selection.is_none()
            && self.cells.is_empty()
            && self.conflict.is_none()
            && self.failure.is_none()
    }

    pub fn emit(self, signals: &StoreSignals) {
        if let Some(count) = self.rows {
            signals.rows_changed.emit(count);
        }
        if let Some(stats) = self.view {
            signals.view_changed.emit(stats);
        }
        if let Some(count) = self.selection {
            signals.selection_changed.emit(count);
        }
        for change in self.cells {
            signals.edit_state_changed.emit(change);
        }
        if let Some(id) = self.conflict {
            signals.conflict_detected.emit(id);
        }
        if let Some(failure) = self.failure {
            signals.commit_failed.emit(failure);
        }
    }
}
