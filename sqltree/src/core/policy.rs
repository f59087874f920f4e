//! Action-choice policies used by the search driver.

use rand::RngCore;
use rand::seq::SliceRandom;

use crate::core::node::SearchNode;
use crate::core::types::ActionKind;

/// Chooses which valid action to apply to a node.
pub trait Policy {
    /// Pick one of `candidates` (never empty) for `node`.
    fn choose(
        &mut self,
        node: &SearchNode,
        candidates: &[ActionKind],
        rng: &mut dyn RngCore,
    ) -> Option<ActionKind>;
}

/// Always takes the first candidate in a fixed preference order.
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    order: Vec<ActionKind>,
}

impl PipelinePolicy {
    pub fn new(order: Vec<ActionKind>) -> Self {
        Self { order }
    }

    /// Rephrase, annotate values and functions, select schema, generate,
    /// revise, end.
    pub fn full() -> Self {
        Self::new(vec![
            ActionKind::RephraseQuestion,
            ActionKind::IdentifyColumnValues,
            ActionKind::IdentifyColumnFunctions,
            ActionKind::SchemaSelection,
            ActionKind::SqlGeneration,
            ActionKind::SqlRevision,
            ActionKind::End,
        ])
    }
}

impl Policy for PipelinePolicy {
    fn choose(
        &mut self,
        _node: &SearchNode,
        candidates: &[ActionKind],
        rng: &mut dyn RngCore,
    ) -> Option<ActionKind> {
        self.order
            .iter()
            .copied()
            .find(|action| candidates.contains(action))
            // Actions outside the preference order are still reachable.
            .or_else(|| candidates.choose(rng).copied())
    }
}

/// Uniform random choice among the candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPolicy;

impl Policy for UniformPolicy {
    fn choose(
        &mut self,
        _node: &SearchNode,
        candidates: &[ActionKind],
        rng: &mut dyn RngCore,
    ) -> Option<ActionKind> {
        candidates.choose(rng).copied()
    }
}
