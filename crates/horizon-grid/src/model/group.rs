//! Grouping and aggregation stage.
//!
//! [`build_tree`] partitions rows by one or more grouping fields into a tree
//! of [`TreeNode`]s. Group nodes carry per-column aggregations computed over
//! every source row beneath them and an expanded flag; collapsed groups keep
//! their row count but leave their children unbuilt.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::column::{resolve_value, AggregationType, Column};
use super::row::{GridRow, RowId, RowIdFn};
use super::value::{CellValue, GroupKey};

/// Field to aggregation override. A non-empty entry replaces the column's
/// declared aggregations.
pub type AggregationModel = BTreeMap<String, Vec<AggregationType>>;

/// Aggregated values of a group: field to aggregation to value.
pub type Aggregations = BTreeMap<String, BTreeMap<AggregationType, f64>>;

fn default_true() -> bool {
    true
}

/// Grouping fields and per-group expand state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupingModel {
    /// Fields to group by, outermost first.
    pub fields: Vec<String>,
    /// Explicit expand state by group id.
    pub expanded: HashMap<String, bool>,
    /// Expand state of groups absent from `expanded`.
    #[serde(default = "default_true")]
    pub expand_by_default: bool,
}

impl Default for GroupingModel {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            expanded: HashMap::new(),
            expand_by_default: true,
        }
    }
}

impl GroupingModel {
    /// Creates a model grouping by `fields`.
    pub fn by<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Returns `true` if rows are grouped.
    pub fn is_active(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Whether the group with `group_id` is expanded.
    pub fn is_expanded(&self, group_id: &str) -> bool {
        self.expanded
            .get(group_id)
            .copied()
            .unwrap_or(self.expand_by_default)
    }

    /// Sets the expand state of a group.
    pub fn set_expanded(&mut self, group_id: impl Into<String>, expanded: bool) {
        self.expanded.insert(group_id.into(), expanded);
    }

    /// Flips the expand state of a group, returning the new state.
    pub fn toggle_expanded(&mut self, group_id: &str) -> bool {
        let next = !self.is_expanded(group_id);
        self.expanded.insert(group_id.to_string(), next);
        next
    }
}

/// Builds the group id of a node.
pub fn group_id(parent: Option<&str>, field: &str, value: &CellValue) -> String {
    match parent {
        Some(parent) => format!("{}|{}:{}", parent, field, value.group_label()),
        None => format!("{}:{}", field, value.group_label()),
    }
}

// =========================================================================
// Tree Nodes
// =========================================================================

/// A node of the grouped view.
pub enum TreeNode<T> {
    /// A group header.
    Group(Arc<GroupNode<T>>),
    /// A data row.
    Row(RowNode<T>),
}

/// A group header node.
pub struct GroupNode<T> {
    /// Group id, `field:value` or `parent|field:value`.
    pub id: String,
    /// Grouping field.
    pub field: String,
    /// Shared value of the grouping field.
    pub value: CellValue,
    /// Nesting depth, starting at 0.
    pub depth: usize,
    /// Number of source rows beneath the group, regardless of expand state.
    pub child_count: usize,
    /// Whether the group shows its children.
    pub is_expanded: bool,
    /// Aggregated column values.
    pub aggregations: Aggregations,
    /// Child nodes; empty when collapsed.
    pub children: Vec<TreeNode<T>>,
}

/// A data row node.
pub struct RowNode<T> {
    /// Row identity.
    pub id: RowId,
    /// The row.
    pub row: Arc<T>,
    /// Nesting depth.
    pub depth: usize,
}

impl<T> TreeNode<T> {
    /// Nesting depth of the node.
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Group(group) => group.depth,
            TreeNode::Row(row) => row.depth,
        }
    }

    /// Returns `true` for group headers.
    pub fn is_group(&self) -> bool {
        matches!(self, TreeNode::Group(_))
    }

    /// The group header, if this is one.
    pub fn as_group(&self) -> Option<&GroupNode<T>> {
        match self {
            TreeNode::Group(group) => Some(group),
            TreeNode::Row(_) => None,
        }
    }

    /// The row node, if this is one.
    pub fn as_row(&self) -> Option<&RowNode<T>> {
        match self {
            TreeNode::Row(row) => Some(row),
            TreeNode::Group(_) => None,
        }
    }

    /// Display key of the node: the group id or the row id.
    pub fn key(&self) -> String {
        match self {
            TreeNode::Group(group) => group.id.clone(),
            TreeNode::Row(row) => row.id.to_string(),
        }
    }
}

impl<T> Clone for TreeNode<T> {
    fn clone(&self) -> Self {
        match self {
            TreeNode::Group(group) => TreeNode::Group(group.clone()),
            TreeNode::Row(row) => TreeNode::Row(row.clone()),
        }
    }
}

impl<T> Clone for RowNode<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            row: self.row.clone(),
            depth: self.depth,
        }
    }
}

impl<T> fmt::Debug for TreeNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeNode::Group(group) => f
                .debug_struct("Group")
                .field("id", &group.id)
                .field("depth", &group.depth)
                .field("child_count", &group.child_count)
                .field("is_expanded", &group.is_expanded)
                .finish(),
            TreeNode::Row(row) => f
                .debug_struct("Row")
                .field("id", &row.id)
                .field("depth", &row.depth)
                .finish(),
        }
    }
}

// =========================================================================
// Tree Construction
// =========================================================================

/// Builds the grouped tree. Without grouping fields every row becomes a
/// depth-0 row node.
pub fn build_tree<T: GridRow>(
    rows: &[Arc<T>],
    grouping: &GroupingModel,
    columns: &[Column<T>],
    aggregation_model: &AggregationModel,
    get_row_id: &RowIdFn<T>,
) -> Vec<TreeNode<T>> {
    let builder = TreeBuilder {
        grouping,
        columns,
        aggregation_model,
        get_row_id,
    };
    builder.build_level(rows, 0, None)
}

struct TreeBuilder<'a, T> {
    grouping: &'a GroupingModel,
    columns: &'a [Column<T>],
    aggregation_model: &'a AggregationModel,
    get_row_id: &'a RowIdFn<T>,
}

impl<T: GridRow> TreeBuilder<'_, T> {
    fn build_level(&self, rows: &[Arc<T>], depth: usize, parent: Option<&str>) -> Vec<TreeNode<T>> {
        let Some(field) = self.grouping.fields.get(depth) else {
            return rows
                .iter()
                .filter_map(|row| {
                    let id = (self.get_row_id)(row)?;
                    Some(TreeNode::Row(RowNode {
                        id,
                        row: row.clone(),
                        depth,
                    }))
                })
                .collect();
        };

        partition(rows, field, self.columns)
            .into_iter()
            .map(|(value, members)| {
                let id = group_id(parent, field, &value);
                let is_expanded = self.grouping.is_expanded(&id);
                let children = if is_expanded {
                    self.build_level(&members, depth + 1, Some(&id))
                } else {
                    Vec::new()
                };
                TreeNode::Group(Arc::new(GroupNode {
                    aggregations: aggregate(&members, self.columns, self.aggregation_model),
                    child_count: members.len(),
                    id,
                    field: field.clone(),
                    value,
                    depth,
                    is_expanded,
                    children,
                }))
            })
            .collect()
    }
}

/// Splits rows by the resolved value of `field`, groups in first-seen order.
fn partition<T: GridRow>(rows: &[Arc<T>], field: &str, columns: &[Column<T>]) -> Vec<(CellValue, Vec<Arc<T>>)> {
    let mut positions: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<(CellValue, Vec<Arc<T>>)> = Vec::new();
    for row in rows {
        let value = resolve_value(row.as_ref(), field, columns);
        match positions.get(&value.group_key()) {
            Some(&i) => groups[i].1.push(row.clone()),
            None => {
                positions.insert(value.group_key(), groups.len());
                groups.push((value, vec![row.clone()]));
            }
        }
    }
    groups
}

// =========================================================================
// Aggregation
// =========================================================================

/// Computes aggregations over `rows` for every column with a non-empty
/// aggregation list, preferring the model's override.
pub fn aggregate<T: GridRow>(
    rows: &[Arc<T>],
    columns: &[Column<T>],
    aggregation_model: &AggregationModel,
) -> Aggregations {
    let mut result = Aggregations::new();
    let declared = columns.iter().map(|c| {
        let types = aggregation_model
            .get(c.field())
            .filter(|t| !t.is_empty())
            .map_or(c.default_aggregations(), Vec::as_slice);
        (c.field(), types)
    });
    let model_only = aggregation_model
        .iter()
        .filter(|(field, _)| !columns.iter().any(|c| c.field() == field.as_str()))
        .map(|(field, types)| (field.as_str(), types.as_slice()));

    for (field, types) in declared.chain(model_only) {
        if types.is_empty() {
            continue;
        }
        let numbers: Vec<f64> = rows
            .iter()
            .filter_map(|row| resolve_value(row.as_ref(), field, columns).to_finite_number())
            .collect();
        let values = types
            .iter()
            .map(|agg| (*agg, compute(*agg, rows.len(), &numbers)))
            .collect();
        result.insert(field.to_string(), values);
    }
    result
}

fn compute(aggregation: AggregationType, row_count: usize, numbers: &[f64]) -> f64 {
    if aggregation == AggregationType::Count {
        return row_count as f64;
    }
    if numbers.is_empty() {
        return 0.0;
    }
    match aggregation {
        AggregationType::Count => row_count as f64,
        AggregationType::Sum => numbers.iter().sum(),
        AggregationType::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
        AggregationType::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationType::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::row::{row_id_from_field, Record};

    fn staff() -> Vec<Arc<Record>> {
        vec![
            Record::new().with("id", 1).with("dept", "Eng").with("level", "Senior").with("salary", 95000),
            Record::new().with("id", 2).with("dept", "Sales").with("level", "Junior").with("salary", 50000),
            Record::new().with("id", 3).with("dept", "Eng").with("level", "Junior").with("salary", 85000),
            Record::new().with("id", 4).with("dept", CellValue::Null).with("salary", "n/a"),
        ]
        .into_iter()
        .map(Arc::new)
        .collect()
    }

    fn salary_column() -> Vec<Column<Record>> {
        vec![Column::new("salary").aggregations([
            AggregationType::Count,
            AggregationType::Sum,
            AggregationType::Avg,
            AggregationType::Min,
            AggregationType::Max,
        ])]
    }

    fn build(grouping: &GroupingModel, columns: &[Column<Record>]) -> Vec<TreeNode<Record>> {
        build_tree(&staff(), grouping, columns, &AggregationModel::new(), &row_id_from_field("id"))
    }

    #[test]
    fn test_no_grouping_wraps_rows() {
        let tree = build(&GroupingModel::default(), &[]);
        assert_eq!(tree.len(), 4);
        assert!(tree.iter().all(|n| !n.is_group() && n.depth() == 0));
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let tree = build(&GroupingModel::by(["dept"]), &[]);
        let ids: Vec<_> = tree.iter().map(TreeNode::key).collect();
        assert_eq!(ids, vec!["dept:Eng", "dept:Sales", "dept:null"]);
    }

    #[test]
    fn test_nested_group_ids() {
        let tree = build(&GroupingModel::by(["dept", "level"]), &[]);
        let eng = tree[0].as_group().unwrap();
        let nested: Vec<_> = eng.children.iter().map(TreeNode::key).collect();
        assert_eq!(nested, vec!["dept:Eng|level:Senior", "dept:Eng|level:Junior"]);
        assert_eq!(eng.children[0].depth(), 1);
        let leaf = eng.children[0].as_group().unwrap();
        assert_eq!(leaf.children[0].depth(), 2);
    }

    #[test]
    fn test_child_count_ignores_expansion() {
        let mut grouping = GroupingModel::by(["dept"]);
        grouping.set_expanded("dept:Eng", false);
        let tree = build(&grouping, &[]);
        let eng = tree[0].as_group().unwrap();
        assert!(!eng.is_expanded);
        assert_eq!(eng.child_count, 2);
        assert!(eng.children.is_empty());
    }

    #[test]
    fn test_collapsed_by_default() {
        let grouping = GroupingModel {
            expand_by_default: false,
            ..GroupingModel::by(["dept"])
        };
        let tree = build(&grouping, &[]);
        assert!(tree.iter().all(|n| !n.as_group().unwrap().is_expanded));
    }

    #[test]
    fn test_aggregations() {
        let tree = build(&GroupingModel::by(["dept"]), &salary_column());
        let eng = &tree[0].as_group().unwrap().aggregations["salary"];
        assert_eq!(eng[&AggregationType::Count], 2.0);
        assert_eq!(eng[&AggregationType::Sum], 180000.0);
        assert_eq!(eng[&AggregationType::Avg], 90000.0);
        assert_eq!(eng[&AggregationType::Min], 85000.0);
        assert_eq!(eng[&AggregationType::Max], 95000.0);
    }

    #[test]
    fn test_aggregations_without_numbers_default_to_zero() {
        let tree = build(&GroupingModel::by(["dept"]), &salary_column());
        let blank = &tree[2].as_group().unwrap().aggregations["salary"];
        assert_eq!(blank[&AggregationType::Count], 1.0);
        assert_eq!(blank[&AggregationType::Avg], 0.0);
        assert_eq!(blank[&AggregationType::Min], 0.0);
    }

    #[test]
    fn test_aggregation_model_overrides_column() {
        let mut model = AggregationModel::new();
        model.insert("salary".to_string(), vec![AggregationType::Max]);
        let aggregations = aggregate(&staff(), &salary_column(), &model);
        assert_eq!(aggregations["salary"].len(), 1);
        assert_eq!(aggregations["salary"][&AggregationType::Max], 95000.0);
    }

    #[test]
    fn test_toggle_expanded() {
        let mut grouping = GroupingModel::by(["dept"]);
        assert!(grouping.is_expanded("dept:Eng"));
        assert!(!grouping.toggle_expanded("dept:Eng"));
        assert!(grouping.toggle_expanded("dept:Eng"));
    }

    #[test]
    fn test_integral_float_groups_with_int() {
        let rows: Vec<Arc<Record>> = vec![
            Arc::new(Record::new().with("id", 1).with("n", 3)),
            Arc::new(Record::new().with("id", 2).with("n", 3.0)),
        ];
        let tree = build_tree(
            &rows,
            &GroupingModel::by(["n"]),
            &[],
            &AggregationModel::new(),
            &row_id_from_field("id"),
        );
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].as_group().unwrap().child_count, 2);
    }
}
