//! Action handlers: one per [`ActionKind`], dispatched through the
//! transition table.
//!
//! A handler reads an immutable parent node and returns the contexts of the
//! children it produced. Attaching them to the tree is the driver's job.

use anyhow::{Result, anyhow};
use rand::rngs::StdRng;
use tracing::{debug, instrument};

use crate::core::error::SearchError;
use crate::core::node::{NodeContext, SearchNode};
use crate::core::transitions::ensure_legal;
use crate::core::types::ActionKind;
use crate::io::config::SearchConfig;
use crate::io::exec_cache::ExecutionCache;
use crate::io::oracle::Oracle;
use crate::io::prompt::PromptStore;

pub mod annotate;
pub mod schema_select;
pub mod sql;

/// Collaborators shared by every action of a session.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub oracle: &'a dyn Oracle,
    pub executions: &'a ExecutionCache,
    pub prompts: &'a PromptStore,
    pub config: &'a SearchConfig,
}

/// Apply `kind` to `node` and return the children's contexts.
///
/// Illegal transitions fail before any oracle or execution call is made.
#[instrument(skip_all, fields(action = %kind, node = node.id))]
pub fn apply(
    kind: ActionKind,
    node: &SearchNode,
    cx: &ActionContext<'_>,
    rng: &mut StdRng,
) -> Result<Vec<NodeContext>> {
    if node.node_type.is_terminal() {
        return Err(SearchError::TerminalNode { node: node.id }.into());
    }
    ensure_legal(node.node_type, kind)?;

    let children = match kind {
        ActionKind::RephraseQuestion
        | ActionKind::IdentifyColumnValues
        | ActionKind::IdentifyColumnFunctions => annotate::expand(kind, node, cx)?,
        ActionKind::SchemaSelection => schema_select::expand(node, cx, rng)?,
        ActionKind::SqlGeneration | ActionKind::SqlRevision => {
            vec![sql::expand(kind, node, cx, rng)?]
        }
        ActionKind::End => vec![finish(node)?],
    };
    debug!(children = children.len(), "action applied");
    Ok(children)
}

/// Terminal child carrying the parent's current SQL as the final answer.
fn finish(node: &SearchNode) -> Result<NodeContext> {
    let sql = node
        .context
        .current_sql()
        .filter(|sql| !sql.trim().is_empty())
        .ok_or_else(|| anyhow!("node {} carries no sql to finish with", node.id))?;
    let mut child = node.context.as_ref().clone();
    child.final_sql_query = Some(sql.to_string());
    Ok(child)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::io::sqlite::SqlExecutor;

    /// Collaborators for exercising handlers without a database.
    pub struct Harness {
        pub executions: ExecutionCache,
        pub prompts: PromptStore,
        pub config: SearchConfig,
    }

    impl Harness {
        pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
            Self {
                executions: ExecutionCache::new(executor, Duration::from_secs(1)),
                prompts: PromptStore::builtin().expect("prompts"),
                config: SearchConfig::default(),
            }
        }

        pub fn context<'a>(&'a self, oracle: &'a dyn Oracle) -> ActionContext<'a> {
            ActionContext {
                oracle,
                executions: &self.executions,
                prompts: &self.prompts,
                config: &self.config,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;

    use super::fixtures::Harness;
    use super::*;
    use crate::test_support::{FakeExecutor, RoutedOracle, child_of, root_node};

    #[test]
    fn illegal_transition_fails_before_any_oracle_call() {
        let harness = Harness::new(Arc::new(FakeExecutor::new()));
        let oracle = RoutedOracle::new();
        let mut rng = StdRng::seed_from_u64(1);

        let err = apply(
            ActionKind::SqlRevision,
            &root_node(),
            &harness.context(&oracle),
            &mut rng,
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SearchError>(),
            Some(&SearchError::IllegalTransition {
                from: crate::core::types::NodeType::Root,
                action: ActionKind::SqlRevision,
            })
        );
        assert!(oracle.calls().is_empty());
    }

    #[test]
    fn end_copies_current_sql() {
        let harness = Harness::new(Arc::new(FakeExecutor::new()));
        let oracle = RoutedOracle::new();
        let mut rng = StdRng::seed_from_u64(1);
        let generated = child_of(&root_node(), 1, ActionKind::SqlGeneration);
        let revised = child_of(&generated, 2, ActionKind::SqlRevision);

        let children = apply(
            ActionKind::End,
            &revised,
            &harness.context(&oracle),
            &mut rng,
        )
        .expect("end");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].final_sql_query.as_deref(), Some("SELECT 2"));
        assert!(oracle.calls().is_empty());
        assert_eq!(harness.executions.stats().misses, 0);
    }

    #[test]
    fn terminal_nodes_cannot_be_expanded() {
        let harness = Harness::new(Arc::new(FakeExecutor::new()));
        let oracle = RoutedOracle::new();
        let mut rng = StdRng::seed_from_u64(1);
        let generated = child_of(&root_node(), 1, ActionKind::SqlGeneration);
        let end = child_of(&generated, 2, ActionKind::End);

        let err = apply(ActionKind::End, &end, &harness.context(&oracle), &mut rng).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SearchError>(),
            Some(&SearchError::TerminalNode { node: 2 })
        );
    }
}
