//! Search trace output: one JSON record per node on a path.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::node::{NodeContext, NodeId, SearchNode};
use crate::core::types::{ActionKind, NodeType};

#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord<'a> {
    pub id: NodeId,
    pub node_type: NodeType,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_action: Option<ActionKind>,
    pub context: &'a NodeContext,
}

impl<'a> From<&'a SearchNode> for NodeRecord<'a> {
    fn from(node: &'a SearchNode) -> Self {
        Self {
            id: node.id,
            node_type: node.node_type,
            depth: node.depth,
            parent: node.parent,
            parent_action: node.parent_action,
            context: &node.context,
        }
    }
}

/// Write `path_nodes` to `out` as a pretty-printed JSON array.
pub fn write_trace(out: &Path, path_nodes: &[Arc<SearchNode>]) -> Result<()> {
    if let Some(parent) = out.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create trace dir {}", parent.display()))?;
    }
    let records: Vec<NodeRecord<'_>> = path_nodes
        .iter()
        .map(|node| NodeRecord::from(node.as_ref()))
        .collect();
    let mut buf = serde_json::to_string_pretty(&records).context("serialize trace")?;
    buf.push('\n');
    fs::write(out, buf).with_context(|| format!("write trace {}", out.display()))
}
