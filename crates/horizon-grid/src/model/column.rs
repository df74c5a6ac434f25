//! Column definitions.
//!
//! A [`Column`] names a row field and controls how its value is read,
//! written, formatted, filtered, sorted, aggregated and validated.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use super::row::GridRow;
use super::value::CellValue;

/// Type alias for a value getter.
pub type ValueGetter<T> = Arc<dyn Fn(&T) -> CellValue + Send + Sync>;

/// Type alias for a value setter. Produces a new row carrying `value`.
pub type ValueSetter<T> = Arc<dyn Fn(&T, CellValue) -> T + Send + Sync>;

/// Type alias for a display formatter.
pub type ValueFormatter = Arc<dyn Fn(&CellValue) -> String + Send + Sync>;

/// Type alias for a per-row editability predicate.
pub type EditablePredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Type alias for an asynchronous validator.
///
/// Receives the edited value and the candidate row, and resolves to an error
/// message when the value is rejected.
pub type Validator<T> = Arc<dyn Fn(CellValue, T) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Aggregation functions available on group rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    /// Number of rows in the group.
    Count,
    /// Sum of finite numeric values.
    Sum,
    /// Mean of finite numeric values.
    Avg,
    /// Smallest finite numeric value.
    Min,
    /// Largest finite numeric value.
    Max,
}

impl AggregationType {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Count => "count",
            AggregationType::Sum => "sum",
            AggregationType::Avg => "avg",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
        }
    }
}

/// Whether a column's cells can be edited.
pub enum Editable<T> {
    /// Same answer for every row.
    Static(bool),
    /// Decided per row.
    Dynamic(EditablePredicate<T>),
}

impl<T> Clone for Editable<T> {
    fn clone(&self) -> Self {
        match self {
            Editable::Static(b) => Editable::Static(*b),
            Editable::Dynamic(f) => Editable::Dynamic(f.clone()),
        }
    }
}

impl<T> fmt::Debug for Editable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Editable::Static(b) => f.debug_tuple("Static").field(b).finish(),
            Editable::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// A column definition.
///
/// Columns are sortable and filterable by default, and read-only unless
/// marked editable.
///
/// # Example
///
/// ```ignore
/// use horizon_grid::model::{AggregationType, CellValue, Column, Record};
///
/// let salary = Column::<Record>::new("salary")
///     .header("Salary")
///     .editable(true)
///     .aggregations([AggregationType::Sum, AggregationType::Avg])
///     .formatter(|v| format!("${}", v))
///     .validator(|value: CellValue, _row: Record| async move {
///         match value.to_number() {
///             Some(n) if n >= 0.0 => None,
///             _ => Some("Salary must be a positive number".to_string()),
///         }
///     });
/// ```
pub struct Column<T> {
    field: String,
    header: Option<String>,
    value_getter: Option<ValueGetter<T>>,
    value_setter: Option<ValueSetter<T>>,
    formatter: Option<ValueFormatter>,
    editable: Editable<T>,
    sortable: bool,
    filterable: bool,
    hidden: bool,
    aggregations: Vec<AggregationType>,
    validator: Option<Validator<T>>,
}

impl<T: GridRow> Column<T> {
    /// Creates a column bound to `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            header: None,
            value_getter: None,
            value_setter: None,
            formatter: None,
            editable: Editable::Static(false),
            sortable: true,
            filterable: true,
            hidden: false,
            aggregations: Vec::new(),
            validator: None,
        }
    }

    // =========================================================================
    // Builder
    // =========================================================================

    /// Sets the header label.
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    /// Sets a computed value getter.
    pub fn value_getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&T) -> CellValue + Send + Sync + 'static,
    {
        self.value_getter = Some(Arc::new(getter));
        self
    }

    /// Sets a value setter used when committing edits.
    pub fn value_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&T, CellValue) -> T + Send + Sync + 'static,
    {
        self.value_setter = Some(Arc::new(setter));
        self
    }

    /// Sets a display formatter.
    pub fn formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&CellValue) -> String + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    /// Marks every cell of the column editable or read-only.
    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = Editable::Static(editable);
        self
    }

    /// Decides editability per row.
    pub fn editable_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.editable = Editable::Dynamic(Arc::new(predicate));
        self
    }

    /// Sets whether header clicks toggle sorting.
    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    /// Sets whether the column offers advanced value filters.
    pub fn filterable(mut self, filterable: bool) -> Self {
        self.filterable = filterable;
        self
    }

    /// Hides the column from the visible column list.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Sets the default aggregations computed for group rows.
    pub fn aggregations(mut self, aggregations: impl IntoIterator<Item = AggregationType>) -> Self {
        self.aggregations = aggregations.into_iter().collect();
        self
    }

    /// Sets an asynchronous validator.
    pub fn validator<F, Fut>(mut self, validator: F) -> Self
    where
        F: Fn(CellValue, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        self.validator = Some(Arc::new(move |value: CellValue, row: T| validator(value, row).boxed()));
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The bound field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The header label, falling back to the field name.
    pub fn header_text(&self) -> &str {
        self.header.as_deref().unwrap_or(&self.field)
    }

    /// Returns `true` if header clicks toggle sorting.
    pub fn is_sortable(&self) -> bool {
        self.sortable
    }

    /// Returns `true` if the column offers advanced value filters.
    pub fn is_filterable(&self) -> bool {
        self.filterable
    }

    /// Returns `true` if the column is hidden.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Default aggregations for group rows.
    pub fn default_aggregations(&self) -> &[AggregationType] {
        &self.aggregations
    }

    /// The asynchronous validator, if any.
    pub fn validator_fn(&self) -> Option<&Validator<T>> {
        self.validator.as_ref()
    }

    // =========================================================================
    // Cell Operations
    // =========================================================================

    /// Reads the cell value: the getter's output, else the field itself.
    pub fn value(&self, row: &T) -> CellValue {
        match &self.value_getter {
            Some(getter) => getter(row),
            None => row.field(&self.field),
        }
    }

    /// Returns `true` if the cell in `row` can be edited.
    pub fn is_editable(&self, row: &T) -> bool {
        match &self.editable {
            Editable::Static(editable) => *editable,
            Editable::Dynamic(predicate) => predicate(row),
        }
    }

    /// Produces a new row with `value` written into this column.
    pub fn apply_value(&self, row: &T, value: CellValue) -> T {
        match &self.value_setter {
            Some(setter) => setter(row, value),
            None => {
                let mut next = row.clone();
                next.set_field(&self.field, value);
                next
            }
        }
    }

    /// Formats a value for display.
    pub fn format(&self, value: &CellValue) -> String {
        match &self.formatter {
            Some(formatter) => formatter(value),
            None => value.to_text(),
        }
    }
}

impl<T> Clone for Column<T> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            header: self.header.clone(),
            value_getter: self.value_getter.clone(),
            value_setter: self.value_setter.clone(),
            formatter: self.formatter.clone(),
            editable: self.editable.clone(),
            sortable: self.sortable,
            filterable: self.filterable,
            hidden: self.hidden,
            aggregations: self.aggregations.clone(),
            validator: self.validator.clone(),
        }
    }
}

impl<T> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("field", &self.field)
            .field("header", &self.header)
            .field("editable", &self.editable)
            .field("sortable", &self.sortable)
            .field("filterable", &self.filterable)
            .field("hidden", &self.hidden)
            .field("aggregations", &self.aggregations)
            .finish_non_exhaustive()
    }
}

/// Finds the column bound to `field`.
pub fn find_column<'a, T>(columns: &'a [Column<T>], field: &str) -> Option<&'a Column<T>> {
    columns.iter().find(|c| c.field == field)
}

/// Resolves a cell value through the column's getter when one is declared,
/// else reads the field directly.
pub fn resolve_value<T: GridRow>(row: &T, field: &str, columns: &[Column<T>]) -> CellValue {
    match find_column(columns, field) {
        Some(column) => column.value(row),
        None => row.field(field),
    }
}

/// Removes columns whose field repeats an earlier one.
pub(crate) fn dedup_columns<T>(columns: Vec<Column<T>>) -> Vec<Column<T>> {
    let mut seen = HashSet::new();
    columns
        .into_iter()
        .filter(|c| {
            let fresh = seen.insert(c.field.clone());
            if !fresh {
                horizon_grid_core::grid_warn!(field = %c.field, "duplicate column ignored");
            }
            fresh
        })
        .collect()
}
