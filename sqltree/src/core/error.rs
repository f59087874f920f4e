//! Contract errors raised by the search core.
//!
//! Recoverable conditions (parse failures, execution failures, timeouts, a
//! narrow schema-selection fan-out) never appear here; they are recorded on
//! the nodes instead.

use crate::core::node::NodeId;
use crate::core::types::{ActionKind, NodeType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("illegal transition: {action} cannot be applied to a {from} node")]
    IllegalTransition { from: NodeType, action: ActionKind },
    #[error("node {node} is terminal and cannot be expanded")]
    TerminalNode { node: NodeId },
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("{action} produced no usable sql after {rounds} oracle rounds")]
    SamplingExhausted { action: ActionKind, rounds: u32 },
}
