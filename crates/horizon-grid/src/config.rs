//! Grid configuration.
//!
//! [`GridOptions`] holds the behavior switches a host usually keeps in a
//! settings file. Every field has a default, so a partial TOML document is
//! valid.
//!
//! ```ignore
//! use horizon_grid::GridOptions;
//!
//! let options = GridOptions::from_toml_str(r#"
//! conflict_policy = "prompt"
//! groups_expanded_by_default = false
//! "#)?;
//! ```

use std::path::Path;

use horizon_grid_core::{GridError, Result};
use serde::{Deserialize, Serialize};

use crate::model::ConflictPolicy;

/// Behavior options for a grid store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOptions {
    /// How remote updates to rows under edit are handled.
    pub conflict_policy: ConflictPolicy,
    /// Expand state of groups that were never toggled.
    pub groups_expanded_by_default: bool,
    /// Header toggles add sort keys instead of replacing the sort.
    pub multi_sort: bool,
    /// Match the quick filter term case-sensitively.
    pub quick_filter_case_sensitive: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            groups_expanded_by_default: true,
            multi_sort: false,
            quick_filter_case_sensitive: false,
        }
    }
}

impl GridOptions {
    /// Parses options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| GridError::io(path, e))?;
        let options = Self::from_toml_str(&text)?;
        tracing::debug!(
            target: horizon_grid_core::logging::targets::CORE,
            path = %path.display(),
            ?options,
            "loaded grid options"
        );
        Ok(options)
    }

    /// Serializes options as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes options to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_toml_string()?;
        std::fs::write(path, text).map_err(|e| GridError::io(path, e))
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the default expand state of groups.
    pub fn with_groups_expanded_by_default(mut self, expanded: bool) -> Self {
        self.groups_expanded_by_default = expanded;
        self
    }

    /// Sets multi-key sort toggling.
    pub fn with_multi_sort(mut self, multi_sort: bool) -> Self {
        self.multi_sort = multi_sort;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GridOptions::default();
        assert_eq!(options.conflict_policy, ConflictPolicy::PreferLocalEdits);
        assert!(options.groups_expanded_by_default);
        assert!(!options.multi_sort);
        assert!(!options.quick_filter_case_sensitive);
    }

    #[test]
    fn test_partial_toml() {
        let options = GridOptions::from_toml_str("conflict_policy = \"prompt\"\n").unwrap();
        assert_eq!(options.conflict_policy, ConflictPolicy::Prompt);
        assert!(options.groups_expanded_by_default);
    }

    #[test]
    fn test_invalid_toml() {
        let err = GridOptions::from_toml_str("conflict_policy = \"sometimes\"").unwrap_err();
        assert!(matches!(err, GridError::InvalidOptions(_)));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.toml");
        let options = GridOptions::default()
            .with_conflict_policy(ConflictPolicy::PreferRemote)
            .with_multi_sort(true);
        options.save(&path).unwrap();
        assert_eq!(GridOptions::load(&path).unwrap(), options);
    }

    #[test]
    fn test_missing_file() {
        let err = GridOptions::load("/nonexistent/grid.toml").unwrap_err();
        assert!(matches!(err, GridError::Io { .. }));
    }
}
