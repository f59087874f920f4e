//! Search nodes and the accumulated reasoning context they carry.
//!
//! Nodes are immutable snapshots. A child is built from an independent copy
//! of its parent's context plus the field its action fills; the read-only
//! schema snapshot is shared behind an `Arc`.

use std::sync::Arc;

use serde::Serialize;

use crate::core::schema::{SchemaSnapshot, SelectedSchema, render_schema};
use crate::core::types::{ActionKind, NodeType};

/// Index of a node inside its search tree.
pub type NodeId = usize;

/// Context accumulated along one path of the search tree.
///
/// Optional fields are filled once, by the action responsible for them, and
/// copied forward into every descendant.
#[derive(Debug, Clone, Serialize)]
pub struct NodeContext {
    pub db_id: String,
    pub original_question: String,
    pub hint: String,
    #[serde(skip)]
    pub schema: Arc<SchemaSnapshot>,
    #[serde(skip)]
    pub schema_context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rephrased_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_schema: Option<SelectedSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_schema_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identified_column_values: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identified_column_functions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_valid_sql_query: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_sql_query: Option<String>,
}

impl NodeContext {
    /// Root context for a question against the database `db_id`.
    pub fn new(
        db_id: impl Into<String>,
        question: impl Into<String>,
        hint: impl Into<String>,
        schema: Arc<SchemaSnapshot>,
    ) -> Self {
        let schema_context = render_schema(&schema);
        Self {
            db_id: db_id.into(),
            original_question: question.into(),
            hint: hint.into(),
            schema,
            schema_context,
            rephrased_question: None,
            selected_schema: None,
            selected_schema_context: None,
            identified_column_values: None,
            identified_column_functions: None,
            sql_query: None,
            revised_sql_query: None,
            consistency_score: None,
            is_valid_sql_query: None,
            final_sql_query: None,
        }
    }

    /// Rephrased question when present, the original otherwise.
    pub fn question(&self) -> &str {
        self.rephrased_question
            .as_deref()
            .unwrap_or(&self.original_question)
    }

    /// Filtered schema context when a selection ran, the full schema otherwise.
    pub fn schema_context_to_use(&self) -> &str {
        self.selected_schema_context
            .as_deref()
            .unwrap_or(&self.schema_context)
    }

    /// Most recent SQL candidate on this path.
    pub fn current_sql(&self) -> Option<&str> {
        self.revised_sql_query
            .as_deref()
            .or(self.sql_query.as_deref())
    }
}

/// One snapshot of reasoning state in the tree.
#[derive(Debug, Clone)]
pub struct SearchNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub depth: usize,
    pub parent: Option<NodeId>,
    pub parent_action: Option<ActionKind>,
    pub context: Arc<NodeContext>,
    ancestors: Vec<Arc<SearchNode>>,
}

impl SearchNode {
    pub fn root(id: NodeId, context: NodeContext) -> Self {
        Self {
            id,
            node_type: NodeType::Root,
            depth: 0,
            parent: None,
            parent_action: None,
            context: Arc::new(context),
            ancestors: Vec::new(),
        }
    }

    /// Build the child that `action` produced from `parent`.
    pub fn child(
        parent: &Arc<SearchNode>,
        id: NodeId,
        action: ActionKind,
        context: NodeContext,
    ) -> Self {
        let mut ancestors = Vec::with_capacity(parent.ancestors.len() + 1);
        ancestors.extend(parent.ancestors.iter().cloned());
        ancestors.push(Arc::clone(parent));
        Self {
            id,
            node_type: action.produces(),
            depth: parent.depth + 1,
            parent: Some(parent.id),
            parent_action: Some(action),
            context: Arc::new(context),
            ancestors,
        }
    }

    /// Ancestors of this node, root first, excluding the node itself.
    pub fn ancestors(&self) -> &[Arc<SearchNode>] {
        &self.ancestors
    }

    /// Ids from the root down to this node.
    pub fn path_ids(&self) -> Vec<NodeId> {
        self.ancestors
            .iter()
            .map(|node| node.id)
            .chain(std::iter::once(self.id))
            .collect()
    }

    /// Whether `action` produced this node or one of its ancestors.
    pub fn path_contains(&self, action: ActionKind) -> bool {
        self.parent_action == Some(action)
            || self
                .ancestors
                .iter()
                .any(|node| node.parent_action == Some(action))
    }

    /// Closest node on the path (self included) produced by `action`.
    pub fn nearest(&self, action: ActionKind) -> Option<&SearchNode> {
        if self.parent_action == Some(action) {
            return Some(self);
        }
        self.ancestors
            .iter()
            .rev()
            .map(Arc::as_ref)
            .find(|node| node.parent_action == Some(action))
    }

    /// The text this node's own action contributed.
    pub fn contribution(&self) -> Option<&str> {
        let ctx = &self.context;
        match self.node_type {
            NodeType::Root => None,
            NodeType::RephraseQuestion => ctx.rephrased_question.as_deref(),
            NodeType::SchemaSelection => ctx.selected_schema_context.as_deref(),
            NodeType::IdentifyColumnValues => ctx.identified_column_values.as_deref(),
            NodeType::IdentifyColumnFunctions => ctx.identified_column_functions.as_deref(),
            NodeType::SqlGeneration => ctx.sql_query.as_deref(),
            NodeType::SqlRevision => ctx.revised_sql_query.as_deref(),
            NodeType::End => ctx.final_sql_query.as_deref(),
        }
    }

    /// Digest of everything `action` contributed along this node's path.
    pub fn path_digest(&self, action: ActionKind) -> Option<String> {
        let entries: Vec<&str> = self
            .ancestors
            .iter()
            .map(Arc::as_ref)
            .chain(std::iter::once(self))
            .filter(|node| node.parent_action == Some(action))
            .filter_map(SearchNode::contribution)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect();
        if entries.is_empty() {
            return None;
        }
        Some(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{child_of, root_node};

    #[test]
    fn child_extends_depth_and_path() {
        let root = root_node();
        let rephrased = child_of(&root, 1, ActionKind::RephraseQuestion);
        let generated = child_of(&rephrased, 2, ActionKind::SqlGeneration);

        assert_eq!(generated.depth, 2);
        assert_eq!(generated.parent, Some(1));
        assert_eq!(generated.path_ids(), vec![0, 1, 2]);
        assert_eq!(generated.node_type, NodeType::SqlGeneration);
    }

    #[test]
    fn question_prefers_rephrased() {
        let root = root_node();
        let mut ctx = root.context.as_ref().clone();
        assert_eq!(ctx.question(), ctx.original_question);
        ctx.rephrased_question = Some("which customers live in the north?".to_string());
        assert_eq!(ctx.question(), "which customers live in the north?");
    }

    #[test]
    fn nearest_finds_closest_producer() {
        let root = root_node();
        let generated = child_of(&root, 1, ActionKind::SqlGeneration);
        let revised = child_of(&generated, 2, ActionKind::SqlRevision);

        assert_eq!(revised.nearest(ActionKind::SqlGeneration).map(|n| n.id), Some(1));
        assert_eq!(revised.nearest(ActionKind::SqlRevision).map(|n| n.id), Some(2));
        assert!(revised.nearest(ActionKind::SchemaSelection).is_none());
        assert!(revised.path_contains(ActionKind::SqlGeneration));
    }

    #[test]
    fn path_digest_collects_contributions() {
        let root = root_node();
        let mut ctx = root.context.as_ref().clone();
        ctx.identified_column_values = Some("regions.name = 'North'".to_string());
        let values = Arc::new(SearchNode::child(
            &root,
            1,
            ActionKind::IdentifyColumnValues,
            ctx,
        ));
        let generated = child_of(&values, 2, ActionKind::SqlGeneration);

        assert_eq!(
            generated.path_digest(ActionKind::IdentifyColumnValues),
            Some("regions.name = 'North'".to_string())
        );
        assert_eq!(generated.path_digest(ActionKind::RephraseQuestion), None);
    }
}
