//! Flattening stage.
//!
//! Turns the grouped tree into the index-addressable list a virtualized view
//! renders from.

use std::fmt::Write;

use horizon_grid_core::{TreeFormatOptions, TreeStyle};

use super::group::TreeNode;

/// Pre-order walk: each group, then its children if expanded. Rows are leaves.
pub fn flatten<T>(nodes: &[TreeNode<T>]) -> Vec<TreeNode<T>> {
    let mut out = Vec::with_capacity(nodes.len());
    flatten_into(nodes, &mut out);
    out
}

fn flatten_into<T>(nodes: &[TreeNode<T>], out: &mut Vec<TreeNode<T>>) {
    for node in nodes {
        out.push(node.clone());
        if let TreeNode::Group(group) = node {
            if group.is_expanded {
                flatten_into(&group.children, out);
            }
        }
    }
}

/// The nodes in `start..start + len`, clamped to the list.
pub fn window<T>(flat: &[TreeNode<T>], start: usize, len: usize) -> &[TreeNode<T>] {
    let start = start.min(flat.len());
    let end = start.saturating_add(len).min(flat.len());
    &flat[start..end]
}

/// Renders the tree as text for debug logging.
///
/// # Example
///
/// ```ignore
/// let text = format_tree(&tree, &TreeFormatOptions::detailed());
/// tracing::debug!(target: "horizon_grid::pipeline", "\n{}", text);
/// ```
pub fn format_tree<T>(nodes: &[TreeNode<T>], options: &TreeFormatOptions) -> String {
    let mut out = String::new();
    format_level(nodes, options, 0, &mut out);
    out
}

fn format_level<T>(nodes: &[TreeNode<T>], options: &TreeFormatOptions, depth: usize, out: &mut String) {
    if options.max_depth.is_some_and(|max| depth > max) {
        return;
    }
    let count = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        let is_last = i + 1 == count;
        let prefix = match options.style {
            TreeStyle::Compact => String::new(),
            _ => options.prefix(depth, is_last),
        };
        match node {
            TreeNode::Group(group) => {
                let marker = if group.is_expanded { "-" } else { "+" };
                let _ = write!(out, "{}[{}] {} ({})", prefix, marker, group.value.group_label(), group.child_count);
                if options.show_ids {
                    let _ = write!(out, " #{}", group.id);
                }
                if options.show_aggregations && !group.aggregations.is_empty() {
                    let parts: Vec<String> = group
                        .aggregations
                        .iter()
                        .flat_map(|(field, values)| {
                            values
                                .iter()
                                .map(move |(agg, v)| format!("{}.{}={}", field, agg.as_str(), v))
                        })
                        .collect();
                    let _ = write!(out, " {{{}}}", parts.join(", "));
                }
                out.push('\n');
                if group.is_expanded {
                    format_level(&group.children, options, depth + 1, out);
                }
            }
            TreeNode::Row(row) => {
                if options.show_ids {
                    let _ = writeln!(out, "{}row #{}", prefix, row.id);
                } else {
                    let _ = writeln!(out, "{}row", prefix);
                }
            }
        }
    }
}
