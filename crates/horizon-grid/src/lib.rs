//! Horizon Grid - a headless data grid engine.
//!
//! The crate holds everything a table view needs except the drawing:
//! filtering, multi-key sorting, grouping with aggregations, flattening for
//! virtualized rendering, row selection, cell editing with asynchronous
//! commits, and reconciliation of live subscription events.
//!
//! # Example
//!
//! ```ignore
//! use horizon_grid::model::{row_id_from_field, Column, GridStore, Record, RowId};
//!
//! let store = GridStore::builder(row_id_from_field::<Record>("id"))
//!     .column(Column::new("name").editable(true))
//!     .rows(vec![Record::new().with("id", 1).with("name", "Alice")])
//!     .build();
//!
//! let id = RowId::from(1);
//! store.start_cell_edit(&id, "name")?;
//! store.update_cell_value(&id, "name", "Alicia");
//! store.commit_cell_edit(&id, "name");
//! ```

pub mod config;
pub mod model;

pub use config::GridOptions;
pub use horizon_grid_core::{GridError, Result, Signal, Subscription, TreeFormatOptions, TreeStyle};
pub use model::{
    CellEditState, CellKey, CellValue, Column, ConflictPolicy, GridRow, GridStore, GridView, Record, RowId,
    SubscriptionEvent,
};

/// Logging utilities.
pub mod logging {
    pub use horizon_grid_core::logging::*;
}
