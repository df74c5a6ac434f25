//! Row identity and the row access trait.
//!
//! The grid is generic over its row type. Anything implementing [`GridRow`]
//! can be displayed; [`Record`] is a ready-made map-backed row for dynamic
//! data such as decoded subscription payloads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::value::CellValue;

/// Stable identity of a row, produced by the caller's row id function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    /// Numeric identity.
    Int(i64),
    /// Textual identity.
    Str(String),
}

impl RowId {
    /// Derives an identity from a cell value.
    ///
    /// Integers and integral floats become [`RowId::Int`], non-empty strings
    /// become [`RowId::Str`]. Anything else has no identity.
    pub fn from_value(value: &CellValue) -> Option<Self> {
        match value {
            CellValue::Int(n) => Some(RowId::Int(*n)),
            CellValue::Float(n) if n.fract() == 0.0 && n.is_finite() => Some(RowId::Int(*n as i64)),
            CellValue::String(s) if !s.is_empty() => Some(RowId::Str(s.clone())),
            _ => None,
        }
    }

    /// Converts the identity back into a cell value.
    pub fn to_value(&self) -> CellValue {
        match self {
            RowId::Int(n) => CellValue::Int(*n),
            RowId::Str(s) => CellValue::String(s.clone()),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(n) => write!(f, "{}", n),
            RowId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RowId {
    fn from(n: i64) -> Self {
        RowId::Int(n)
    }
}

impl From<i32> for RowId {
    fn from(n: i32) -> Self {
        RowId::Int(i64::from(n))
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId::Str(s.to_string())
    }
}

impl From<String> for RowId {
    fn from(s: String) -> Self {
        RowId::Str(s)
    }
}

/// A partial row: field name to new value.
pub type RowPatch = BTreeMap<String, CellValue>;

/// Function that extracts a row's identity.
///
/// Rows for which it returns `None` are not tracked by the grid.
pub type RowIdFn<T> = Arc<dyn Fn(&T) -> Option<RowId> + Send + Sync>;

/// Builds a row id function that reads the identity from a field.
///
/// # Example
///
/// ```ignore
/// use horizon_grid::model::{row_id_from_field, Record};
///
/// let get_row_id = row_id_from_field::<Record>("id");
/// ```
pub fn row_id_from_field<T: GridRow>(field: impl Into<String>) -> RowIdFn<T> {
    let field = field.into();
    Arc::new(move |row: &T| RowId::from_value(&row.field(&field)))
}

/// Trait for rows that can be displayed by the grid.
///
/// Rows are shared as `Arc<T>` between the row index and every derived view,
/// and edits produce new rows rather than mutating shared ones.
///
/// # Example
///
/// ```ignore
/// use horizon_grid::model::{CellValue, GridRow};
///
/// #[derive(Clone)]
/// struct Employee {
///     id: i64,
///     name: String,
/// }
///
/// impl GridRow for Employee {
///     fn field(&self, name: &str) -> CellValue {
///         match name {
///             "id" => self.id.into(),
///             "name" => self.name.as_str().into(),
///             _ => CellValue::Null,
///         }
///     }
///
///     fn fields(&self) -> Vec<(String, CellValue)> {
///         vec![("id".into(), self.id.into()), ("name".into(), self.name.as_str().into())]
///     }
///
///     fn set_field(&mut self, name: &str, value: CellValue) {
///         if name == "name" {
///             self.name = value.to_text();
///         }
///     }
/// }
/// ```
pub trait GridRow: Clone + Send + Sync + 'static {
    /// Reads a field directly. Unknown fields read as [`CellValue::Null`].
    fn field(&self, name: &str) -> CellValue;

    /// Returns every own field of the row, used by the quick filter.
    fn fields(&self) -> Vec<(String, CellValue)>;

    /// Writes a field directly. Unknown fields may be ignored.
    fn set_field(&mut self, name: &str, value: CellValue);

    /// Applies a partial update.
    fn merge_patch(&mut self, patch: &RowPatch) {
        for (name, value) in patch {
            self.set_field(name, value.clone());
        }
    }
}

/// A map-backed row with dynamic fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, CellValue>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Gets a field value, or null when absent.
    pub fn get(&self, name: &str) -> CellValue {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    /// Returns `true` if the record has the field.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Sets a field value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<CellValue>) -> Option<CellValue> {
        self.fields.insert(name.into(), value.into())
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<CellValue> {
        self.fields.remove(name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl GridRow for Record {
    fn field(&self, name: &str) -> CellValue {
        self.get(name)
    }

    fn fields(&self) -> Vec<(String, CellValue)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn set_field(&mut self, name: &str, value: CellValue) {
        self.fields.insert(name.to_string(), value);
    }
}

impl<K: Into<String>, V: Into<CellValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
