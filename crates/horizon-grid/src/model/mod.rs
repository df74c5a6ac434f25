//! The grid data model.
//!
//! A [`GridStore`] turns a flat set of rows into a render-ready list of
//! nodes. The pipeline runs in a fixed order:
//!
//! ```text
//! rows ──> filter ──> advanced filter ──> sort ──> group/aggregate ──> flatten
//!                                           │                            │
//!                                     processed rows               flattened nodes
//! ```
//!
//! Around the pipeline the store keeps interaction state:
//!
//! - [`SelectionModel`]: selected row ids and the select-all flag
//! - [`EditingState`]: per-cell edit sessions with an asynchronous commit
//! - Subscription reconciliation: remote row events merged under a
//!   [`ConflictPolicy`]
//!
//! # Core Types
//!
//! - `CellValue`: Dynamically typed cell content
//! - `GridRow`: The trait rows implement, with `Record` as a map-backed row
//! - `Column`: Field binding, formatting, editability and validation
//! - `GridStore`: Owns rows, models and view, and emits `StoreSignals`
//!
//! # Example
//!
//! ```ignore
//! use horizon_grid::model::{row_id_from_field, Column, GridStore, Record, TreeNode};
//!
//! let store = GridStore::builder(row_id_from_field::<Record>("id"))
//!     .column(Column::new("dept"))
//!     .column(Column::new("salary"))
//!     .group_by(["dept"])
//!     .rows(rows)
//!     .build();
//!
//! store.signals().view_changed.connect(|stats| {
//!     println!("{} nodes", stats.flattened_count);
//! });
//!
//! for node in store.window(0, 50) {
//!     match node {
//!         TreeNode::Group(group) => println!("{} ({})", group.value, group.child_count),
//!         TreeNode::Row(row) => println!("  {}", row.id),
//!     }
//! }
//! ```

mod column;
mod editing;
mod filter;
mod flatten;
mod group;
mod reconcile;
mod row;
mod row_index;
pub mod selection;
mod signals;
mod sort;
mod store;
mod value;

pub use column::{
    AggregationType, Column, Editable, EditablePredicate, Validator, ValueFormatter, ValueGetter, ValueSetter,
    find_column, resolve_value,
};
pub use editing::{CellEditState, CellKey, CommitOutcome, EditingCell, EditingState};
pub use filter::{
    AdvancedFilterModel, DateFilter, FilterItem, FilterModel, FilterOperator, FilterOptions, LinkOperator,
    ValueOption, apply_advanced_filters, apply_filters, apply_filters_with_options, compare, matches_item,
    value_options,
};
pub use flatten::{flatten, format_tree, window};
pub use group::{
    AggregationModel, Aggregations, GroupNode, GroupingModel, RowNode, TreeNode, aggregate, build_tree, group_id,
};
pub use reconcile::{
    ApplyEventFn, ConflictPolicy, ConflictResolution, EventHandler, EventSource, SignalEventSource,
    SubscriptionEvent, SubscriptionEventType, apply_event_default,
};
pub use row::{GridRow, Record, RowId, RowIdFn, RowPatch, row_id_from_field};
pub use row_index::RowIndex;
pub use selection::{SelectionModel, SelectionState};
pub use signals::{StoreSignals, ViewStats};
pub use sort::{SortDirection, SortItem, SortModel, apply_sort, compare_rows, compare_values, locale_compare};
pub use store::{GridStore, GridStoreBuilder, GridView, ProcessRowUpdateFn};
pub use value::{CellValue, EMPTY_VALUE_KEY};
