//! Core systems for Horizon Grid.
//!
//! This crate provides the foundational pieces shared by the grid engine:
//!
//! - **Signal/Slot System**: Type-safe change notifications ([`Signal`])
//! - **Subscriptions**: RAII unsubscribe handles ([`Subscription`])
//! - **Errors**: The shared [`GridError`] type and [`Result`] alias
//! - **Logging**: `tracing` targets, [`PerfSpan`] and tree formatting options
//!
//! # Signal Example
//!
//! ```
//! use horizon_grid_core::Signal;
//!
//! let view_changed = Signal::<u64>::new();
//!
//! let conn_id = view_changed.connect(|revision| {
//!     println!("view revision {}", revision);
//! });
//!
//! view_changed.emit(1);
//! view_changed.disconnect(conn_id);
//! ```

mod error;
pub mod logging;
pub mod signal;

pub use error::{GridError, Result};
pub use logging::{PerfSpan, TreeFormatOptions, TreeStyle};
pub use signal::{ConnectionId, Signal, Subscription};
