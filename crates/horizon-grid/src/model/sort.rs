//! Sort stage.
//!
//! Multi-key, stable, typed ordering of rows with nulls kept last in both
//! directions, plus the tri-state header toggle that edits a [`SortModel`].

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::column::{resolve_value, Column};
use super::row::GridRow;
use super::value::CellValue;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortItem {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    #[serde(rename = "sort")]
    pub direction: SortDirection,
}

impl SortItem {
    /// Create an ascending sort key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Create a descending sort key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Ordered sort keys, highest priority first. Empty keeps source order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortModel(Vec<SortItem>);

impl SortModel {
    /// Create an empty sort model.
    pub fn new() -> Self {
        Self::default()
    }

    /// The sort keys.
    pub fn items(&self) -> &[SortItem] {
        &self.0
    }

    /// Check if any sort key is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of sort keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Current direction of `field`, if sorted.
    pub fn direction_of(&self, field: &str) -> Option<SortDirection> {
        self.0.iter().find(|i| i.field == field).map(|i| i.direction)
    }

    /// Remove every sort key.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Advances `field` through none → asc → desc → none, replacing any
    /// other keys.
    pub fn toggle(&mut self, field: &str) {
        let next = next_direction(self.direction_of(field));
        self.0.clear();
        if let Some(direction) = next {
            self.0.push(SortItem {
                field: field.to_string(),
                direction,
            });
        }
    }

    /// Advances `field` through none → asc → desc → none, keeping other keys.
    /// Newly sorted fields are appended as the lowest priority key.
    pub fn toggle_multi(&mut self, field: &str) {
        match self.0.iter().position(|i| i.field == field) {
            Some(pos) => match next_direction(Some(self.0[pos].direction)) {
                Some(direction) => self.0[pos].direction = direction,
                None => {
                    self.0.remove(pos);
                }
            },
            None => self.0.push(SortItem::asc(field)),
        }
    }
}

impl From<Vec<SortItem>> for SortModel {
    fn from(items: Vec<SortItem>) -> Self {
        Self(items)
    }
}

fn next_direction(current: Option<SortDirection>) -> Option<SortDirection> {
    match current {
        None => Some(SortDirection::Asc),
        Some(SortDirection::Asc) => Some(SortDirection::Desc),
        Some(SortDirection::Desc) => None,
    }
}

/// Sorts rows into a new sequence. Equal rows keep their input order.
pub fn apply_sort<T: GridRow>(rows: &[Arc<T>], model: &SortModel, columns: &[Column<T>]) -> Vec<Arc<T>> {
    let mut sorted = rows.to_vec();
    if model.is_empty() {
        return sorted;
    }
    sorted.sort_by(|a, b| compare_rows(a.as_ref(), b.as_ref(), model, columns));
    sorted
}

/// Compares two rows key by key; the first non-equal key wins.
pub fn compare_rows<T: GridRow>(a: &T, b: &T, model: &SortModel, columns: &[Column<T>]) -> Ordering {
    for item in model.items() {
        let va = resolve_value(a, &item.field, columns);
        let vb = resolve_value(b, &item.field, columns);
        let ordering = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match item.direction {
                SortDirection::Asc => compare_values(&va, &vb),
                SortDirection::Desc => compare_values(&va, &vb).reverse(),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Compares two non-null values.
///
/// Values are ranked by kind first (numbers, then dates, then text and
/// everything else), so columns holding mixed kinds still get a total order.
/// Numbers compare numerically with NaN last, dates by timestamp, the rest by
/// locale-aware text comparison.
pub fn compare_values(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::String(x), CellValue::String(y)) => locale_compare(x, y),
        (CellValue::Date(x), CellValue::Date(y)) => x.cmp(y),
        (x, y) if x.is_number() && y.is_number() => {
            compare_numbers(x.as_float().unwrap_or(f64::NAN), y.as_float().unwrap_or(f64::NAN))
        }
        _ => match kind_rank(a).cmp(&kind_rank(b)) {
            Ordering::Equal => locale_compare(&a.to_text(), &b.to_text()),
            ordering => ordering,
        },
    }
}

fn kind_rank(value: &CellValue) -> u8 {
    match value {
        CellValue::Int(_) | CellValue::Float(_) => 0,
        CellValue::Date(_) => 1,
        _ => 2,
    }
}

fn compare_numbers(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.total_cmp(&y),
    }
}

/// Case-insensitive comparison with lowercase sorting before uppercase on ties.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    let primary = a.to_lowercase().cmp(&b.to_lowercase());
    if primary != Ordering::Equal {
        return primary;
    }
    // ASCII puts uppercase first; flip so "apple" precedes "Apple".
    b.cmp(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::row::Record;

    fn people() -> Vec<Arc<Record>> {
        vec![
            Record::new().with("id", 1).with("name", "bob").with("age", 30),
            Record::new().with("id", 2).with("name", "Alice").with("age", CellValue::Null),
            Record::new().with("id", 3).with("name", "carol").with("age", 25),
            Record::new().with("id", 4).with("name", "alice").with("age", 30),
        ]
        .into_iter()
        .map(Arc::new)
        .collect()
    }

    fn ids(rows: &[Arc<Record>]) -> Vec<i64> {
        rows.iter().filter_map(|r| r.get("id").as_int()).collect()
    }

    #[test]
    fn test_empty_model_keeps_order() {
        assert_eq!(ids(&apply_sort(&people(), &SortModel::new(), &[])), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_string_sort_is_case_insensitive() {
        let model = SortModel::from(vec![SortItem::asc("name")]);
        assert_eq!(ids(&apply_sort(&people(), &model, &[])), vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_nulls_last_both_directions() {
        let asc = SortModel::from(vec![SortItem::asc("age")]);
        assert_eq!(ids(&apply_sort(&people(), &asc, &[])), vec![3, 1, 4, 2]);

        let desc = SortModel::from(vec![SortItem::desc("age")]);
        assert_eq!(ids(&apply_sort(&people(), &desc, &[])), vec![1, 4, 3, 2]);
    }

    #[test]
    fn test_multi_key() {
        let model = SortModel::from(vec![SortItem::desc("age"), SortItem::asc("name")]);
        assert_eq!(ids(&apply_sort(&people(), &model, &[])), vec![4, 1, 3, 2]);
    }

    #[test]
    fn test_stable_for_equal_keys() {
        let rows: Vec<Arc<Record>> = (0..20)
            .map(|i| Arc::new(Record::new().with("id", i).with("bucket", i % 3)))
            .collect();
        let model = SortModel::from(vec![SortItem::asc("bucket")]);
        let sorted = apply_sort(&rows, &model, &[]);
        for pair in sorted.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.get("bucket") == b.get("bucket") {
                assert!(a.get("id").as_int() < b.get("id").as_int());
            }
        }
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(compare_values(&CellValue::Int(9), &CellValue::Float(10.5)), Ordering::Less);
        assert_eq!(compare_values(&"9".into(), &"10".into()), Ordering::Greater);
    }

    #[test]
    fn test_mixed_kinds_are_totally_ordered() {
        let values = [
            CellValue::Int(10),
            CellValue::from("10a"),
            CellValue::Int(9),
            CellValue::Float(f64::NAN),
            CellValue::Bool(true),
            CellValue::from("Na"),
        ];
        assert_eq!(compare_values(&CellValue::Int(9), &CellValue::Int(10)), Ordering::Less);
        assert_eq!(compare_values(&CellValue::Int(10), &"10a".into()), Ordering::Less);
        assert_eq!(compare_values(&CellValue::Int(9), &"10a".into()), Ordering::Less);
        assert_eq!(compare_values(&CellValue::Float(f64::NAN), &CellValue::Int(1)), Ordering::Greater);

        for a in &values {
            assert_eq!(compare_values(a, a), Ordering::Equal);
            for b in &values {
                assert_eq!(compare_values(a, b), compare_values(b, a).reverse());
                for c in &values {
                    if compare_values(a, b) == Ordering::Less && compare_values(b, c) == Ordering::Less {
                        assert_eq!(compare_values(a, c), Ordering::Less);
                    }
                }
            }
        }
    }

    #[test]
    fn test_mixed_column_sorts_without_panicking() {
        let rows: Vec<Arc<Record>> = (0..300)
            .map(|i| {
                let x = match i % 4 {
                    0 => CellValue::Int(i),
                    1 => CellValue::from("Na"),
                    2 => CellValue::Float(f64::NAN),
                    _ => CellValue::from(format!("{}a", i)),
                };
                Arc::new(Record::new().with("id", i).with("x", x))
            })
            .collect();

        let sorted = apply_sort(&rows, &SortModel::from(vec![SortItem::asc("x")]), &[]);
        assert_eq!(sorted.len(), 300);
        assert_eq!(sorted[0].get("x"), CellValue::Int(0));
        assert!(sorted[74].get("x").is_number());
        assert!(sorted[75].get("x").as_float().is_some_and(f64::is_nan));
        assert!(sorted[299].get("x").as_str().is_some());
    }

    #[test]
    fn test_locale_compare_lowercase_first() {
        assert_eq!(locale_compare("apple", "Apple"), Ordering::Less);
        assert_eq!(locale_compare("Apple", "banana"), Ordering::Less);
    }

    #[test]
    fn test_toggle_cycle() {
        let mut model = SortModel::new();
        model.toggle("name");
        assert_eq!(model.direction_of("name"), Some(SortDirection::Asc));
        model.toggle("name");
        assert_eq!(model.direction_of("name"), Some(SortDirection::Desc));
        model.toggle("name");
        assert!(model.is_empty());
    }

    #[test]
    fn test_toggle_replaces_other_keys() {
        let mut model = SortModel::from(vec![SortItem::asc("age")]);
        model.toggle("name");
        assert_eq!(model.items(), &[SortItem::asc("name")]);
    }

    #[test]
    fn test_toggle_multi_appends() {
        let mut model = SortModel::from(vec![SortItem::asc("age")]);
        model.toggle_multi("name");
        model.toggle_multi("age");
        assert_eq!(model.items(), &[SortItem::desc("age"), SortItem::asc("name")]);
        model.toggle_multi("age");
        assert_eq!(model.items(), &[SortItem::asc("name")]);
    }

    #[test]
    fn test_sort_model_json() {
        let model: SortModel = serde_json::from_str(r#"[{"field": "name", "sort": "desc"}]"#).unwrap();
        assert_eq!(model.items(), &[SortItem::desc("name")]);
    }
}
