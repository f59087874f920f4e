use std::sync::Arc;

use crate::core::error::SearchError;
use crate::core::node::{NodeContext, NodeId, SearchNode};
use crate::core::transitions::ensure_legal;
use crate::core::types::ActionKind;

/// Append-only arena owning every node of one search session.
///
/// Node ids are arena slots. Nodes are never mutated or removed once
/// attached.
#[derive(Debug, Clone)]
pub struct SearchTree {
    nodes: Vec<Arc<SearchNode>>,
    children: Vec<Vec<NodeId>>,
}

impl SearchTree {
    pub fn new(root: NodeContext) -> Self {
        Self {
            nodes: vec![Arc::new(SearchNode::root(0, root))],
            children: vec![Vec::new()],
        }
    }

    pub fn root(&self) -> &Arc<SearchNode> {
        &self.nodes[0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Arc<SearchNode>> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Arc<SearchNode>, SearchError> {
        self.get(id).ok_or(SearchError::UnknownNode(id))
    }

    pub fn nodes(&self) -> &[Arc<SearchNode>] {
        &self.nodes
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach the children `action` produced from `parent`.
    ///
    /// Fails on unknown or terminal parents and on transitions the table
    /// does not allow.
    pub fn attach(
        &mut self,
        parent: NodeId,
        action: ActionKind,
        contexts: Vec<NodeContext>,
    ) -> Result<Vec<NodeId>, SearchError> {
        let parent_node = Arc::clone(self.node(parent)?);
        if parent_node.node_type.is_terminal() {
            return Err(SearchError::TerminalNode { node: parent });
        }
        ensure_legal(parent_node.node_type, action)?;

        let mut ids = Vec::with_capacity(contexts.len());
        for context in contexts {
            let id = self.nodes.len();
            self.nodes
                .push(Arc::new(SearchNode::child(&parent_node, id, action, context)));
            self.children.push(Vec::new());
            self.children[parent].push(id);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Nodes from the root down to `id`.
    pub fn path(&self, id: NodeId) -> Result<Vec<Arc<SearchNode>>, SearchError> {
        let node = self.node(id)?;
        let mut path: Vec<Arc<SearchNode>> = node.ancestors().to_vec();
        path.push(Arc::clone(node));
        Ok(path)
    }

    pub fn terminals(&self) -> impl Iterator<Item = &Arc<SearchNode>> {
        self.nodes.iter().filter(|node| node.node_type.is_terminal())
    }
}
