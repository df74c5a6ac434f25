//! Filter stage.
//!
//! Two independent layers narrow the row set, composed by AND:
//!
//! - [`FilterModel`]: a quick-filter term plus structured field/operator/value
//!   items linked by AND or OR.
//! - [`AdvancedFilterModel`]: per-field multi-value selections and date
//!   filters, as offered by column header menus.
//!
//! Both stages are pure functions over shared rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use horizon_grid_core::GridError;
use serde::{Deserialize, Serialize};

use super::column::{resolve_value, Column};
use super::row::GridRow;
use super::value::CellValue;

// =========================================================================
// Filter Model
// =========================================================================

/// Operators for structured filter items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Loose or stringified equality.
    #[default]
    #[serde(rename = "equals", alias = "eq")]
    Equals,
    /// Negation of [`FilterOperator::Equals`].
    #[serde(rename = "neq", alias = "notEquals")]
    NotEquals,
    /// Case-insensitive substring match.
    #[serde(rename = "contains")]
    Contains,
    /// Case-insensitive prefix match.
    #[serde(rename = "startsWith")]
    StartsWith,
    /// Case-insensitive suffix match.
    #[serde(rename = "endsWith")]
    EndsWith,
    /// Numeric `>`.
    #[serde(rename = "gt")]
    GreaterThan,
    /// Numeric `>=`.
    #[serde(rename = "gte")]
    GreaterThanOrEqual,
    /// Numeric `<`.
    #[serde(rename = "lt")]
    LessThan,
    /// Numeric `<=`.
    #[serde(rename = "lte")]
    LessThanOrEqual,
    /// Null or empty string.
    #[serde(rename = "isEmpty")]
    IsEmpty,
    /// Anything but null or empty string.
    #[serde(rename = "isNotEmpty")]
    IsNotEmpty,
    /// Boolean-aware equality.
    #[serde(rename = "is")]
    Is,
}

impl FilterOperator {
    /// Returns the canonical operator name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "neq",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEqual => "gte",
            Self::LessThan => "lt",
            Self::LessThanOrEqual => "lte",
            Self::IsEmpty => "isEmpty",
            Self::IsNotEmpty => "isNotEmpty",
            Self::Is => "is",
        }
    }

    /// Returns true if this operator compares against a filter value.
    pub fn requires_value(&self) -> bool {
        !matches!(self, Self::IsEmpty | Self::IsNotEmpty)
    }

    /// All operators in display order.
    pub fn all() -> &'static [FilterOperator] {
        &[
            Self::Equals,
            Self::NotEquals,
            Self::Contains,
            Self::StartsWith,
            Self::EndsWith,
            Self::GreaterThan,
            Self::GreaterThanOrEqual,
            Self::LessThan,
            Self::LessThanOrEqual,
            Self::IsEmpty,
            Self::IsNotEmpty,
            Self::Is,
        ]
    }
}

impl FromStr for FilterOperator {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" | "equals" => Ok(Self::Equals),
            "neq" | "notEquals" => Ok(Self::NotEquals),
            "contains" => Ok(Self::Contains),
            "startsWith" => Ok(Self::StartsWith),
            "endsWith" => Ok(Self::EndsWith),
            "gt" => Ok(Self::GreaterThan),
            "gte" => Ok(Self::GreaterThanOrEqual),
            "lt" => Ok(Self::LessThan),
            "lte" => Ok(Self::LessThanOrEqual),
            "isEmpty" => Ok(Self::IsEmpty),
            "isNotEmpty" => Ok(Self::IsNotEmpty),
            "is" => Ok(Self::Is),
            other => Err(GridError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How structured filter items combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkOperator {
    /// Every item must match.
    #[default]
    And,
    /// At least one item must match.
    Or,
}

/// A structured filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterItem {
    /// Field to test. Any row field, declared as a column or not.
    pub field: String,
    /// Comparison operator.
    pub operator: FilterOperator,
    /// Value to compare against.
    #[serde(default)]
    pub value: CellValue,
}

impl FilterItem {
    /// Creates a filter item.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<CellValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Quick filter plus structured items.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterModel {
    /// Structured conditions.
    pub items: Vec<FilterItem>,
    /// Free-text term matched against every field.
    pub quick_filter: String,
    /// How `items` combine.
    pub link_operator: LinkOperator,
}

impl FilterModel {
    /// Returns `true` if neither the quick filter nor any item is active.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.quick_filter.trim().is_empty()
    }
}

/// Options that tune the filter stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Match the quick filter term case-sensitively.
    pub quick_filter_case_sensitive: bool,
}

/// Applies a filter model with default options.
pub fn apply_filters<T: GridRow>(
    rows: &[Arc<T>],
    model: &FilterModel,
    columns: &[Column<T>],
) -> Vec<Arc<T>> {
    apply_filters_with_options(rows, model, columns, FilterOptions::default())
}

/// Applies a filter model, returning the rows that pass.
pub fn apply_filters_with_options<T: GridRow>(
    rows: &[Arc<T>],
    model: &FilterModel,
    columns: &[Column<T>],
    options: FilterOptions,
) -> Vec<Arc<T>> {
    if model.is_empty() {
        return rows.to_vec();
    }
    let quick = QuickFilter::new(&model.quick_filter, options.quick_filter_case_sensitive);
    rows.iter()
        .filter(|row| {
            quick.as_ref().is_none_or(|q| q.matches(row.as_ref()))
                && matches_items(row.as_ref(), model, columns)
        })
        .cloned()
        .collect()
}

struct QuickFilter {
    term: String,
    case_sensitive: bool,
}

impl QuickFilter {
    fn new(term: &str, case_sensitive: bool) -> Option<Self> {
        if term.trim().is_empty() {
            return None;
        }
        let term = if case_sensitive {
            term.to_string()
        } else {
            term.to_lowercase()
        };
        Some(Self { term, case_sensitive })
    }

    fn matches<T: GridRow>(&self, row: &T) -> bool {
        row.fields().iter().any(|(_, value)| {
            if value.is_null() {
                return false;
            }
            let text = value.to_text();
            if self.case_sensitive {
                text.contains(&self.term)
            } else {
                text.to_lowercase().contains(&self.term)
            }
        })
    }
}

fn matches_items<T: GridRow>(row: &T, model: &FilterModel, columns: &[Column<T>]) -> bool {
    if model.items.is_empty() {
        return true;
    }
    let mut results = model.items.iter().map(|item| matches_item(row, item, columns));
    match model.link_operator {
        LinkOperator::And => results.all(|m| m),
        LinkOperator::Or => results.any(|m| m),
    }
}

/// Evaluates one structured condition against a row.
pub fn matches_item<T: GridRow>(row: &T, item: &FilterItem, columns: &[Column<T>]) -> bool {
    let value = resolve_value(row, &item.field, columns);
    compare(&value, item.operator, &item.value)
}

/// Evaluates `value <operator> target`.
pub fn compare(value: &CellValue, operator: FilterOperator, target: &CellValue) -> bool {
    match operator {
        FilterOperator::Equals => values_equal(value, target),
        FilterOperator::NotEquals => !values_equal(value, target),
        FilterOperator::Contains => text_match(value, target, |v, t| v.contains(t)),
        FilterOperator::StartsWith => text_match(value, target, |v, t| v.starts_with(t)),
        FilterOperator::EndsWith => text_match(value, target, |v, t| v.ends_with(t)),
        FilterOperator::GreaterThan => numeric_match(value, target, |v, t| v > t),
        FilterOperator::GreaterThanOrEqual => numeric_match(value, target, |v, t| v >= t),
        FilterOperator::LessThan => numeric_match(value, target, |v, t| v < t),
        FilterOperator::LessThanOrEqual => numeric_match(value, target, |v, t| v <= t),
        FilterOperator::IsEmpty => value.is_empty(),
        FilterOperator::IsNotEmpty => !value.is_empty(),
        FilterOperator::Is => match (value.to_bool(), target.to_bool()) {
            (Some(a), Some(b)) => a == b,
            _ => values_equal(value, target),
        },
    }
}

fn values_equal(value: &CellValue, target: &CellValue) -> bool {
    value.loose_eq(target) || (!value.is_null() && !target.is_null() && value.to_text() == target.to_text())
}

fn text_match(value: &CellValue, target: &CellValue, f: impl Fn(&str, &str) -> bool) -> bool {
    if value.is_null() {
        return false;
    }
    f(&value.to_text().to_lowercase(), &target.to_text().to_lowercase())
}

fn numeric_match(value: &CellValue, target: &CellValue, f: impl Fn(f64, f64) -> bool) -> bool {
    match (value.to_number(), target.to_number()) {
        (Some(v), Some(t)) => f(v, t),
        _ => false,
    }
}

// =========================================================================
// Advanced Filter Model
// =========================================================================

/// A date filter on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DateFilter {
    /// Matches rows whose date falls on `date`.
    Exact {
        /// The calendar day to match.
        date: NaiveDate,
    },
    /// Matches rows whose date falls within the inclusive day range.
    Range {
        /// First day, from start of day.
        #[serde(rename = "startDate", default)]
        start_date: Option<NaiveDate>,
        /// Last day, through end of day.
        #[serde(rename = "endDate", default)]
        end_date: Option<NaiveDate>,
    },
}

impl DateFilter {
    /// Returns `false` for a range with neither bound.
    pub fn is_active(&self) -> bool {
        match self {
            DateFilter::Exact { .. } => true,
            DateFilter::Range { start_date, end_date } => start_date.is_some() || end_date.is_some(),
        }
    }

    /// Tests a parsed date and time.
    pub fn matches(&self, when: NaiveDateTime) -> bool {
        match self {
            DateFilter::Exact { date } => when.date() == *date,
            DateFilter::Range { start_date, end_date } => {
                let after_start = start_date.is_none_or(|d| when >= d.and_time(NaiveTime::MIN));
                let before_end = end_date.is_none_or(|d| when <= end_of_day(d));
                after_start && before_end
            }
        }
    }
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + TimeDelta::days(1) - TimeDelta::milliseconds(1)
}

/// Column-menu filters: value selections and date filters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdvancedFilterModel {
    /// Field to the set of accepted value keys. Empty sets are inactive.
    pub filters: BTreeMap<String, BTreeSet<String>>,
    /// Field to date filter.
    pub date_filters: BTreeMap<String, DateFilter>,
}

impl AdvancedFilterModel {
    /// Returns `true` if no value or date filter is active.
    pub fn is_empty(&self) -> bool {
        self.filters.values().all(BTreeSet::is_empty)
            && self.date_filters.values().all(|f| !f.is_active())
    }

    /// Replaces the accepted value keys for `field`.
    pub fn set_values(&mut self, field: impl Into<String>, keys: impl IntoIterator<Item = String>) {
        self.filters.insert(field.into(), keys.into_iter().collect());
    }

    /// Sets the date filter for `field`.
    pub fn set_date_filter(&mut self, field: impl Into<String>, filter: DateFilter) {
        self.date_filters.insert(field.into(), filter);
    }

    /// Removes every filter on `field`.
    pub fn clear_field(&mut self, field: &str) {
        self.filters.remove(field);
        self.date_filters.remove(field);
    }
}

/// Applies the advanced filter layer.
pub fn apply_advanced_filters<T: GridRow>(
    rows: &[Arc<T>],
    model: &AdvancedFilterModel,
    columns: &[Column<T>],
) -> Vec<Arc<T>> {
    if model.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .filter(|row| matches_advanced(row.as_ref(), model, columns))
        .cloned()
        .collect()
}

fn matches_advanced<T: GridRow>(row: &T, model: &AdvancedFilterModel, columns: &[Column<T>]) -> bool {
    let values_pass = model
        .filters
        .iter()
        .filter(|(_, keys)| !keys.is_empty())
        .all(|(field, keys)| keys.contains(&resolve_value(row, field, columns).value_key()));
    if !values_pass {
        return false;
    }
    model
        .date_filters
        .iter()
        .filter(|(_, filter)| filter.is_active())
        .all(|(field, filter)| {
            resolve_value(row, field, columns)
                .to_date()
                .is_some_and(|when| filter.matches(when))
        })
}

/// A distinct value offered by a multi-value filter menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueOption {
    /// Value key stored in [`AdvancedFilterModel::filters`].
    pub key: String,
    /// Display label.
    pub label: String,
    /// Number of rows carrying the value.
    pub count: usize,
}

/// Collects the distinct values of `field` in first-seen order.
pub fn value_options<T: GridRow>(rows: &[Arc<T>], field: &str, columns: &[Column<T>]) -> Vec<ValueOption> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut options: Vec<ValueOption> = Vec::new();
    for row in rows {
        let value = resolve_value(row.as_ref(), field, columns);
        let key = value.value_key();
        match positions.get(&key) {
            Some(&i) => options[i].count += 1,
            None => {
                let label = if value.is_empty() {
                    "(Blanks)".to_string()
                } else {
                    match super::column::find_column(columns, field) {
                        Some(column) => column.format(&value),
                        None => value.to_text(),
                    }
                };
                positions.insert(key.clone(), options.len());
                options.push(ValueOption { key, label, count: 1 });
            }
        }
    }
    options
}
