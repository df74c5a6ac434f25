//! Error types for Horizon Grid.
//!
//! Most grid operations never fail: missing rows, undeclared columns and
//! non-editable cells are silent no-ops, and commit or validation failures are
//! recorded on the affected cell. `GridError` covers the remaining calls that
//! are genuinely wrong or touch the outside world.

use std::path::PathBuf;

/// Result type alias for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors that can occur in grid operations.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// An edit was started on a cell whose commit is still in flight.
    #[error("Cannot start editing cell '{cell}' while it is {state}")]
    IllegalEditTransition { cell: String, state: String },

    /// A filter operator name was not recognized.
    #[error("Unknown filter operator '{0}'")]
    UnknownOperator(String),

    /// A subscription event payload could not be decoded.
    #[error("Invalid subscription event: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    /// Grid options could not be parsed.
    #[error("Invalid grid options: {0}")]
    InvalidOptions(#[from] toml::de::Error),

    /// Grid options could not be serialized.
    #[error("Failed to serialize grid options: {0}")]
    SerializeOptions(#[from] toml::ser::Error),

    /// Options file I/O error.
    #[error("Failed to read grid options '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GridError {
    /// Create an illegal edit transition error.
    pub fn illegal_edit_transition(cell: impl Into<String>, state: impl Into<String>) -> Self {
        Self::IllegalEditTransition {
            cell: cell.into(),
            state: state.into(),
        }
    }

    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
