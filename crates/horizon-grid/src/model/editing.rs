//! Cell editing sessions.
//!
//! Each cell under edit has an [`EditingCell`] keyed by [`CellKey`]. A
//! session moves through:
//!
//! ```text
//! pristine → editing → saving → pristine (committed)
//!                   ↘          ↘ error → editing (retry)
//!                    pristine (cancel)
//! ```
//!
//! Remote updates may additionally park a session in `conflict` until the
//! conflict is resolved. The store drives these transitions; this module
//! holds the per-cell records and the transition rules that do not need the
//! row index.

use std::collections::{HashMap, HashSet};
use std::fmt;

use horizon_grid_core::{GridError, Result};

use super::row::RowId;
use super::value::CellValue;

/// Identifies a cell: `{row_id}:{field}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    /// Row identity.
    pub row_id: RowId,
    /// Column field.
    pub field: String,
}

impl CellKey {
    /// Creates a cell key.
    pub fn new(row_id: impl Into<RowId>, field: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row_id, self.field)
    }
}

/// Lifecycle state of an edit session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellEditState {
    /// No session.
    #[default]
    Pristine,
    /// The user is changing the value.
    Editing,
    /// An asynchronous commit is in flight.
    Saving,
    /// Validation or commit failed; the working value is kept for retry.
    Error,
    /// A remote update collided with the session and awaits resolution.
    Conflict,
}

impl CellEditState {
    /// Lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CellEditState::Pristine => "pristine",
            CellEditState::Editing => "editing",
            CellEditState::Saving => "saving",
            CellEditState::Error => "error",
            CellEditState::Conflict => "conflict",
        }
    }
}

impl fmt::Display for CellEditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edit session for one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct EditingCell {
    /// Working value.
    pub value: CellValue,
    /// Value when the session started.
    pub original_value: CellValue,
    /// Session state.
    pub state: CellEditState,
    /// Last validation or commit error.
    pub error: Option<String>,
}

impl EditingCell {
    fn new(value: CellValue) -> Self {
        Self {
            original_value: value.clone(),
            value,
            state: CellEditState::Editing,
            error: None,
        }
    }

    /// Returns `true` if the working value differs from the original.
    pub fn is_dirty(&self) -> bool {
        self.value != self.original_value
    }
}

/// Result of an asynchronous commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome<T> {
    /// The row was written; carries the row now stored.
    Committed(T),
    /// The validator rejected the value; the session is in `error`.
    Invalid(String),
    /// The row update processor failed; the session is in `error`.
    Failed(String),
    /// Nothing to commit: no session, session already saving, or the row
    /// disappeared while saving.
    Skipped,
}

impl<T> CommitOutcome<T> {
    /// Returns `true` if the row was written.
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }

    /// The error message of a rejected or failed commit.
    pub fn error(&self) -> Option<&str> {
        match self {
            CommitOutcome::Invalid(msg) | CommitOutcome::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}

/// All edit sessions plus the focused cell.
#[derive(Debug, Clone, Default)]
pub struct EditingState {
    cells: HashMap<CellKey, EditingCell>,
    focused: Option<CellKey>,
}

impl EditingState {
    /// Create an empty editing state.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The session for a cell.
    pub fn get(&self, key: &CellKey) -> Option<&EditingCell> {
        self.cells.get(key)
    }

    /// The state of a cell; pristine when there is no session.
    pub fn state_of(&self, key: &CellKey) -> CellEditState {
        self.cells.get(key).map_or(CellEditState::Pristine, |c| c.state)
    }

    /// The focused cell.
    pub fn focused(&self) -> Option<&CellKey> {
        self.focused.as_ref()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` if no cell is being edited.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterates over every session.
    pub fn iter(&self) -> impl Iterator<Item = (&CellKey, &EditingCell)> {
        self.cells.iter()
    }

    /// Returns `true` if any cell of the row has a session.
    pub fn has_row_edits(&self, row_id: &RowId) -> bool {
        self.cells.keys().any(|k| &k.row_id == row_id)
    }

    /// Fields of the row that have sessions.
    pub fn edited_fields(&self, row_id: &RowId) -> HashSet<String> {
        self.cells
            .keys()
            .filter(|k| &k.row_id == row_id)
            .map(|k| k.field.clone())
            .collect()
    }

    /// Keys of the row's sessions, sorted by field.
    pub fn row_keys(&self, row_id: &RowId) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self
            .cells
            .keys()
            .filter(|k| &k.row_id == row_id)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Opens or resumes a session and focuses the cell.
    ///
    /// A new session snapshots `current` into both the working and original
    /// value. An `error` session returns to `editing` keeping its working
    /// value; `editing` and `conflict` sessions are left as they are.
    /// Returns `true` if the session state changed.
    pub fn begin(&mut self, key: CellKey, current: CellValue) -> Result<bool> {
        let changed = match self.cells.get_mut(&key) {
            Some(cell) => match cell.state {
                CellEditState::Saving => {
                    return Err(GridError::illegal_edit_transition(
                        key.to_string(),
                        cell.state.as_str(),
                    ));
                }
                CellEditState::Error => {
                    cell.state = CellEditState::Editing;
                    cell.error = None;
                    true
                }
                _ => false,
            },
            None => {
                self.cells.insert(key.clone(), EditingCell::new(current));
                true
            }
        };
        self.focused = Some(key);
        Ok(changed)
    }

    /// Replaces the working value of an open session. Sessions that are
    /// saving are left untouched; an `error` session returns to `editing`.
    pub fn update_value(&mut self, key: &CellKey, value: CellValue) -> bool {
        let Some(cell) = self.cells.get_mut(key) else {
            return false;
        };
        if cell.state == CellEditState::Saving {
            return false;
        }
        if cell.state == CellEditState::Error {
            cell.state = CellEditState::Editing;
            cell.error = None;
        }
        cell.value = value;
        true
    }

    /// Sets the state of a session. Returns `false` if there is none.
    pub fn set_state(&mut self, key: &CellKey, state: CellEditState) -> bool {
        match self.cells.get_mut(key) {
            Some(cell) => {
                cell.state = state;
                true
            }
            None => false,
        }
    }

    /// Moves a session to `error` with a message.
    pub fn fail(&mut self, key: &CellKey, message: impl Into<String>) -> bool {
        match self.cells.get_mut(key) {
            Some(cell) => {
                cell.state = CellEditState::Error;
                cell.error = Some(message.into());
                true
            }
            None => false,
        }
    }

    /// Closes a session, clearing focus if it pointed at the cell.
    pub fn remove(&mut self, key: &CellKey) -> Option<EditingCell> {
        let removed = self.cells.remove(key);
        if self.focused.as_ref() == Some(key) {
            self.focused = None;
        }
        removed
    }

    /// Closes every session of the row. Returns the closed keys.
    pub fn remove_row(&mut self, row_id: &RowId) -> Vec<CellKey> {
        let keys = self.row_keys(row_id);
        for key in &keys {
            self.remove(key);
        }
        keys
    }

    /// Closes the row's sessions that are not saving. Returns the closed keys.
    pub fn cancel_row(&mut self, row_id: &RowId) -> Vec<CellKey> {
        let keys: Vec<CellKey> = self
            .row_keys(row_id)
            .into_iter()
            .filter(|k| self.state_of(k) != CellEditState::Saving)
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys
    }

    /// Moves the row's sessions between two states. Returns the moved keys.
    pub fn transition_row(&mut self, row_id: &RowId, from: CellEditState, to: CellEditState) -> Vec<CellKey> {
        let mut moved = Vec::new();
        for key in self.row_keys(row_id) {
            if let Some(cell) = self.cells.get_mut(&key) {
                if cell.state == from {
                    cell.state = to;
                    moved.push(key);
                }
            }
        }
        moved
    }
}
