//! The authoritative row store.
//!
//! [`RowIndex`] keeps the ordered row sequence and the id lookup map in
//! lockstep: every mutation updates both, so a row is reachable by id exactly
//! when it is present in the sequence.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use horizon_grid_core::logging::targets;

use super::row::{GridRow, RowId, RowIdFn, RowPatch};

/// Ordered rows plus an id lookup map.
///
/// Rows are stored as `Arc<T>` so derived views can share them. Replacing a
/// row swaps the `Arc` in both structures; nothing is mutated in place.
///
/// # Example
///
/// ```ignore
/// use horizon_grid::model::{row_id_from_field, Record, RowIndex};
///
/// let mut index = RowIndex::new(row_id_from_field::<Record>("id"));
/// index.set_rows(vec![Record::new().with("id", 1).with("name", "Alice")]);
/// assert!(index.contains(&1.into()));
/// ```
pub struct RowIndex<T> {
    rows: Vec<Arc<T>>,
    rows_by_id: HashMap<RowId, Arc<T>>,
    get_row_id: RowIdFn<T>,
}

impl<T: GridRow> RowIndex<T> {
    /// Creates an empty index.
    pub fn new(get_row_id: RowIdFn<T>) -> Self {
        Self {
            rows: Vec::new(),
            rows_by_id: HashMap::new(),
            get_row_id,
        }
    }

    /// Creates an index holding `rows`.
    pub fn with_rows(get_row_id: RowIdFn<T>, rows: Vec<T>) -> Self {
        let mut index = Self::new(get_row_id);
        index.set_rows(rows);
        index
    }

    /// Returns the identity of a row.
    pub fn row_id(&self, row: &T) -> Option<RowId> {
        (self.get_row_id)(row)
    }

    /// Returns `true` if `row` is identified by `id`.
    pub fn has_id(&self, row: &T, id: &RowId) -> bool {
        self.row_id(row).as_ref() == Some(id)
    }

    /// Returns the row id function.
    pub fn row_id_fn(&self) -> &RowIdFn<T> {
        &self.get_row_id
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All rows in insertion order.
    pub fn rows(&self) -> &[Arc<T>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up a row by id.
    pub fn get(&self, id: &RowId) -> Option<&Arc<T>> {
        self.rows_by_id.get(id)
    }

    /// Returns `true` if a row with `id` exists.
    pub fn contains(&self, id: &RowId) -> bool {
        self.rows_by_id.contains_key(id)
    }

    /// Position of the row with `id` in the sequence.
    pub fn position(&self, id: &RowId) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        self.rows
            .iter()
            .position(|row| self.row_id(row).as_ref() == Some(id))
    }

    /// Iterates over the ids of all rows in order.
    pub fn ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.iter().filter_map(|row| self.row_id(row))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Replaces the whole row set.
    ///
    /// Rows without an identity are dropped. Duplicate ids keep the last row.
    pub fn set_rows(&mut self, rows: Vec<T>) {
        self.rows.clear();
        self.rows_by_id.clear();
        for row in rows {
            let Some(id) = self.row_id(&row) else {
                tracing::debug!(target: targets::ROWS, "dropping row without identity");
                continue;
            };
            let row = Arc::new(row);
            if let Some(previous) = self.rows_by_id.insert(id, row.clone()) {
                if let Some(slot) = self.rows.iter_mut().find(|r| Arc::ptr_eq(r, &previous)) {
                    *slot = row;
                    continue;
                }
            }
            self.rows.push(row);
        }
        tracing::debug!(target: targets::ROWS, count = self.rows.len(), "rows replaced");
    }

    /// Appends a row, or replaces the existing row with the same id in place.
    ///
    /// Returns `false` if the row has no identity.
    pub fn add_row(&mut self, row: T) -> bool {
        let Some(id) = self.row_id(&row) else {
            return false;
        };
        if self.contains(&id) {
            return self.update_row(&id, row);
        }
        let row = Arc::new(row);
        self.rows_by_id.insert(id, row.clone());
        self.rows.push(row);
        true
    }

    /// Inserts or replaces a row.
    pub fn upsert(&mut self, row: T) -> bool {
        self.add_row(row)
    }

    /// Replaces the row stored under `id`.
    ///
    /// Unknown ids are ignored, and so is a replacement whose own identity is
    /// not `id`.
    pub fn update_row(&mut self, id: &RowId, row: T) -> bool {
        let Some(previous) = self.rows_by_id.get(id).cloned() else {
            return false;
        };
        if !self.has_id(&row, id) {
            tracing::debug!(target: targets::ROWS, %id, "rejecting update that changes the row id");
            return false;
        }
        let row = Arc::new(row);
        for slot in self.rows.iter_mut().filter(|r| Arc::ptr_eq(r, &previous)) {
            *slot = row.clone();
        }
        self.rows_by_id.insert(id.clone(), row);
        true
    }

    /// Merges a partial update into the row stored under `id`.
    pub fn merge_patch(&mut self, id: &RowId, patch: &RowPatch) -> bool {
        let Some(current) = self.get(id) else {
            return false;
        };
        let mut next = T::clone(current);
        next.merge_patch(patch);
        self.update_row(id, next)
    }

    /// Removes the row stored under `id`.
    pub fn remove_row(&mut self, id: &RowId) -> Option<Arc<T>> {
        let removed = self.rows_by_id.remove(id)?;
        self.rows.retain(|r| !Arc::ptr_eq(r, &removed));
        Some(removed)
    }

    /// Removes every row.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.rows_by_id.clear();
    }
}

impl<T> fmt::Debug for RowIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowIndex")
            .field("len", &self.rows.len())
            .finish_non_exhaustive()
    }
}
