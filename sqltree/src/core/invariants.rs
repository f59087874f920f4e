//! Structural invariants of a search tree.

use std::collections::HashSet;

use crate::core::transitions::is_legal;
use crate::core::types::NodeType;
use crate::tree::SearchTree;

/// Check tree invariants:
/// - Node ids are unique and match their arena slot
/// - `depth(child) == depth(parent) + 1`
/// - `path(child) == path(parent) + [child]`
/// - Every child was produced by an action legal from its parent's type
/// - `End` nodes have no children and carry a non-empty final SQL
pub fn validate_tree(tree: &SearchTree) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (slot, node) in tree.nodes().iter().enumerate() {
        if node.id != slot {
            errors.push(format!("node in slot {slot} has id {}", node.id));
        }
        if !seen.insert(node.id) {
            errors.push(format!("duplicate node id {}", node.id));
        }

        if node.node_type.is_terminal() {
            if !tree.children(node.id).is_empty() {
                errors.push(format!("{}: end node has children", node.id));
            }
            let final_sql = node.context.final_sql_query.as_deref().unwrap_or_default();
            if final_sql.trim().is_empty() {
                errors.push(format!("{}: end node has empty final sql", node.id));
            }
        }

        let Some(parent_id) = node.parent else {
            if node.node_type != NodeType::Root || node.depth != 0 {
                errors.push(format!("{}: parentless node must be a depth-0 root", node.id));
            }
            continue;
        };
        let Some(parent) = tree.get(parent_id) else {
            errors.push(format!("{}: missing parent {}", node.id, parent_id));
            continue;
        };
        if node.depth != parent.depth + 1 {
            errors.push(format!(
                "{}: depth {} does not follow parent depth {}",
                node.id, node.depth, parent.depth
            ));
        }
        let mut expected_path = parent.path_ids();
        expected_path.push(node.id);
        if node.path_ids() != expected_path {
            errors.push(format!("{}: path does not extend parent path", node.id));
        }
        match node.parent_action {
            Some(action) if is_legal(parent.node_type, action) => {}
            Some(action) => errors.push(format!(
                "{}: {} is not legal from {}",
                node.id, action, parent.node_type
            )),
            None => errors.push(format!("{}: child without parent action", node.id)),
        }
        if !tree.children(parent_id).contains(&node.id) {
            errors.push(format!("{}: not listed among parent's children", node.id));
        }
    }
    errors
}
