//! Logging and debugging facilities for Horizon Grid.
//!
//! This module provides:
//! - Target names for filtering `tracing` output by subsystem
//! - [`PerfSpan`] for timing pipeline recomputation
//! - Tree formatting options shared by the group tree debug dump
//!
//! # Tracing Integration
//!
//! Horizon Grid uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in the host application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_grid::reconcile=debug")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "horizon_grid_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "horizon_grid_core::signal";
    /// Row index mutations.
    pub const ROWS: &str = "horizon_grid::rows";
    /// Filter → sort → group → flatten recomputation.
    pub const PIPELINE: &str = "horizon_grid::pipeline";
    /// Selection state machine.
    pub const SELECTION: &str = "horizon_grid::selection";
    /// Cell editing state machine.
    pub const EDITING: &str = "horizon_grid::editing";
    /// Subscription event reconciliation.
    pub const RECONCILE: &str = "horizon_grid::reconcile";
    /// Performance spans.
    pub const PERF: &str = "horizon_grid::perf";
}

/// Style options for tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for tree debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show node ids.
    pub show_ids: bool,
    /// Whether to show group aggregations.
    pub show_aggregations: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    /// Indent size for each level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_aggregations: false,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Create options for detailed debugging output.
    pub fn detailed() -> Self {
        Self {
            show_aggregations: true,
            ..Default::default()
        }
    }

    /// Create options for minimal output.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_aggregations: false,
            ..Default::default()
        }
    }

    /// Build the prefix string for a tree line at `depth`.
    pub fn prefix(&self, depth: usize, is_last: bool) -> String {
        if depth == 0 {
            return String::new();
        }

        let (branch, corner, last) = match self.style {
            TreeStyle::Ascii => ("|", "+--", "`--"),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
            TreeStyle::Compact => ("", "-", "-"),
        };

        let mut prefix = String::new();
        for _ in 0..(depth - 1) {
            prefix.push_str(branch);
            for _ in 0..self.indent_size {
                prefix.push(' ');
            }
        }

        prefix.push_str(if is_last { last } else { corner });
        prefix.push(' ');
        prefix
    }
}

/// A guard that keeps a tracing span entered until dropped.
///
/// Used to track the duration of operations such as a full pipeline
/// recomputation.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "horizon_grid::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Macros for common tracing patterns.
///
/// Thin wrappers around the `tracing` macros with a consistent target.
#[macro_export]
macro_rules! grid_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "horizon_grid", $($arg)*)
    };
}

#[macro_export]
macro_rules! grid_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "horizon_grid", $($arg)*)
    };
}

#[macro_export]
macro_rules! grid_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "horizon_grid", $($arg)*)
    };
}

#[macro_export]
macro_rules! grid_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "horizon_grid", $($arg)*)
    };
}
