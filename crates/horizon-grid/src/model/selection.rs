//! Row selection state.
//!
//! Selection is tracked by row identity, so it survives sorting, filtering
//! and regrouping. The grid-level [`SelectionState`] is always derived
//! against the rows currently passing the filters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::row::RowId;

/// Grid-level selection summary, as shown by a header checkbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SelectionState {
    /// Every processed row is selected.
    All,
    /// Some but not all processed rows are selected.
    Some,
    /// No processed row is selected.
    #[default]
    None,
}

/// Selected row ids plus the select-all flag.
///
/// # Example
///
/// ```ignore
/// use horizon_grid::model::{RowId, SelectionModel, SelectionState};
///
/// let processed = [RowId::Int(1), RowId::Int(2)];
/// let mut selection = SelectionModel::new();
/// selection.toggle(&RowId::Int(1));
/// assert_eq!(selection.state(processed.iter()), SelectionState::Some);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionModel {
    selected_ids: BTreeSet<RowId>,
    select_all: bool,
}

impl SelectionModel {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Check if a row is selected.
    pub fn is_selected(&self, id: &RowId) -> bool {
        self.selected_ids.contains(id)
    }

    /// The selected ids, in id order.
    pub fn selected_ids(&self) -> &BTreeSet<RowId> {
        &self.selected_ids
    }

    /// Number of selected rows.
    pub fn selected_count(&self) -> usize {
        self.selected_ids.len()
    }

    /// Check if any row is selected.
    pub fn has_selection(&self) -> bool {
        !self.selected_ids.is_empty()
    }

    /// Whether the last bulk action was select-all.
    pub fn is_select_all(&self) -> bool {
        self.select_all
    }

    /// Derives the grid-level state against the processed row ids.
    pub fn state<'a>(&self, processed: impl IntoIterator<Item = &'a RowId>) -> SelectionState {
        let mut total = 0usize;
        let mut selected = 0usize;
        for id in processed {
            total += 1;
            if self.selected_ids.contains(id) {
                selected += 1;
            }
        }
        if selected == 0 {
            SelectionState::None
        } else if selected == total {
            SelectionState::All
        } else {
            SelectionState::Some
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Flips membership of a row. Returns the new membership.
    pub fn toggle(&mut self, id: &RowId) -> bool {
        if self.selected_ids.remove(id) {
            self.select_all = false;
            false
        } else {
            self.selected_ids.insert(id.clone());
            true
        }
    }

    /// Adds a row. Returns `true` if it was not already selected.
    pub fn select(&mut self, id: &RowId) -> bool {
        self.selected_ids.insert(id.clone())
    }

    /// Removes a row and clears the select-all flag. Returns `true` if the
    /// row was selected.
    pub fn deselect(&mut self, id: &RowId) -> bool {
        let removed = self.selected_ids.remove(id);
        if removed {
            self.select_all = false;
        }
        removed
    }

    /// Selects exactly the processed rows and sets the select-all flag.
    pub fn select_all<I>(&mut self, processed: I)
    where
        I: IntoIterator<Item = RowId>,
    {
        self.selected_ids = processed.into_iter().collect();
        self.select_all = true;
    }

    /// Clears the selection and the select-all flag.
    pub fn deselect_all(&mut self) {
        self.selected_ids.clear();
        self.select_all = false;
    }

    /// Drops a removed row from the selection without touching the flag.
    pub fn prune(&mut self, id: &RowId) -> bool {
        self.selected_ids.remove(id)
    }

    /// Drops every id not accepted by `keep`. Returns the number removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&RowId) -> bool) -> usize {
        let before = self.selected_ids.len();
        self.selected_ids.retain(|id| keep(id));
        before - self.selected_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: std::ops::RangeInclusive<i64>) -> Vec<RowId> {
        range.map(RowId::Int).collect()
    }

    #[test]
    fn test_empty_selection() {
        let selection = SelectionModel::new();
        assert_eq!(selection.state(ids(1..=3).iter()), SelectionState::None);
        assert!(!selection.has_selection());
    }

    #[test]
    fn test_toggle() {
        let mut selection = SelectionModel::new();
        assert!(selection.toggle(&RowId::Int(1)));
        assert!(selection.is_selected(&RowId::Int(1)));
        assert_eq!(selection.state(ids(1..=3).iter()), SelectionState::Some);
        assert!(!selection.toggle(&RowId::Int(1)));
        assert!(!selection.is_selected(&RowId::Int(1)));
    }

    #[test]
    fn test_select_all_then_deselect() {
        let mut selection = SelectionModel::new();
        selection.select_all(ids(1..=3));
        assert!(selection.is_select_all());
        assert_eq!(selection.state(ids(1..=3).iter()), SelectionState::All);

        selection.deselect(&RowId::Int(2));
        assert!(!selection.is_select_all());
        assert_eq!(selection.state(ids(1..=3).iter()), SelectionState::Some);
    }

    #[test]
    fn test_state_derived_against_processed_rows() {
        let mut selection = SelectionModel::new();
        selection.select(&RowId::Int(1));
        selection.select(&RowId::Int(2));
        // Filtering down to the selected rows reads as all selected.
        assert_eq!(selection.state(ids(1..=2).iter()), SelectionState::All);
        assert_eq!(selection.state(ids(3..=4).iter()), SelectionState::None);
    }

    #[test]
    fn test_flag_not_rederived() {
        let mut selection = SelectionModel::new();
        selection.select(&RowId::Int(1));
        assert_eq!(selection.state(ids(1..=1).iter()), SelectionState::All);
        assert!(!selection.is_select_all());
    }

    #[test]
    fn test_retain() {
        let mut selection = SelectionModel::new();
        selection.select_all(ids(1..=4));
        let removed = selection.retain(|id| *id != RowId::Int(3));
        assert_eq!(removed, 1);
        assert_eq!(selection.selected_count(), 3);
    }

    #[test]
    fn test_deselect_all() {
        let mut selection = SelectionModel::new();
        selection.select_all(ids(1..=2));
        selection.deselect_all();
        assert!(!selection.has_selection());
        assert!(!selection.is_select_all());
    }
}
