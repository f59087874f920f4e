//! The search state machine: which actions may follow which node types.

use crate::core::error::SearchError;
use crate::core::node::SearchNode;
use crate::core::types::{ActionKind, NodeType};

/// Actions the transition table allows from a node of type `node_type`.
pub fn legal_actions(node_type: NodeType) -> &'static [ActionKind] {
    use ActionKind as A;
    match node_type {
        NodeType::Root => &[
            A::RephraseQuestion,
            A::IdentifyColumnValues,
            A::IdentifyColumnFunctions,
            A::SchemaSelection,
            A::SqlGeneration,
        ],
        NodeType::RephraseQuestion => &[
            A::IdentifyColumnValues,
            A::IdentifyColumnFunctions,
            A::SchemaSelection,
            A::SqlGeneration,
        ],
        NodeType::SchemaSelection => &[
            A::IdentifyColumnValues,
            A::IdentifyColumnFunctions,
            A::SqlGeneration,
        ],
        NodeType::IdentifyColumnValues => &[
            A::IdentifyColumnFunctions,
            A::SchemaSelection,
            A::SqlGeneration,
        ],
        NodeType::IdentifyColumnFunctions => &[
            A::SchemaSelection,
            A::IdentifyColumnValues,
            A::SqlGeneration,
        ],
        NodeType::SqlGeneration => &[A::End, A::SqlRevision],
        NodeType::SqlRevision => &[A::End],
        NodeType::End => &[],
    }
}

pub fn is_legal(from: NodeType, action: ActionKind) -> bool {
    legal_actions(from).contains(&action)
}

/// Node types from which `action` may be applied.
pub fn legal_predecessors(action: ActionKind) -> Vec<NodeType> {
    [
        NodeType::Root,
        NodeType::RephraseQuestion,
        NodeType::SchemaSelection,
        NodeType::IdentifyColumnValues,
        NodeType::IdentifyColumnFunctions,
        NodeType::SqlGeneration,
        NodeType::SqlRevision,
        NodeType::End,
    ]
    .into_iter()
    .filter(|node_type| is_legal(*node_type, action))
    .collect()
}

/// Reject `action` on a node type outside its legal-predecessor set.
pub fn ensure_legal(from: NodeType, action: ActionKind) -> Result<(), SearchError> {
    if is_legal(from, action) {
        return Ok(());
    }
    Err(SearchError::IllegalTransition { from, action })
}

/// Legal actions for `node`, minus preparatory actions already applied on its path.
///
/// A rollout never rephrases twice or selects schema twice; `End` and
/// `SqlRevision` are governed by the table alone.
pub fn valid_actions(node: &SearchNode) -> Vec<ActionKind> {
    legal_actions(node.node_type)
        .iter()
        .copied()
        .filter(|action| match action {
            ActionKind::End | ActionKind::SqlRevision | ActionKind::SqlGeneration => true,
            _ => !node.path_contains(*action),
        })
        .collect()
}
