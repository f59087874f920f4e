//! Search driver: expands the tree through actions, walks rollouts and picks
//! the final answer.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::actions::{self, ActionContext};
use crate::core::consistency::ConsistencyTally;
use crate::core::node::{NodeContext, NodeId, SearchNode};
use crate::core::policy::Policy;
use crate::core::transitions::valid_actions;
use crate::core::types::ActionKind;
use crate::io::config::SearchConfig;
use crate::io::exec_cache::{CacheStats, ExecutionCache};
use crate::io::oracle::Oracle;
use crate::io::prompt::PromptStore;
use crate::io::sqlite::SqlExecutor;
use crate::tree::SearchTree;

/// Answer of a completed search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub terminal: NodeId,
    pub final_sql: String,
    /// Root-to-terminal path, the audit trail of the answer.
    pub path: Vec<Arc<SearchNode>>,
    pub rollouts: u32,
    pub nodes: usize,
}

impl SearchOutcome {
    fn terminal_node(&self) -> Option<&SearchNode> {
        self.path.last().map(Arc::as_ref)
    }

    pub fn is_valid(&self) -> bool {
        self.terminal_node()
            .and_then(|node| node.context.is_valid_sql_query)
            .unwrap_or(false)
    }

    pub fn consistency_score(&self) -> f64 {
        self.terminal_node()
            .and_then(|node| node.context.consistency_score)
            .unwrap_or(0.0)
    }
}

/// One search over one question.
pub struct SearchSession {
    tree: SearchTree,
    config: SearchConfig,
    oracle: Arc<dyn Oracle>,
    executions: ExecutionCache,
    prompts: PromptStore,
    rng: StdRng,
    expanded: HashMap<(NodeId, ActionKind), Vec<NodeId>>,
    pool: Option<ThreadPool>,
}

impl SearchSession {
    pub fn new(
        root: NodeContext,
        config: SearchConfig,
        oracle: Arc<dyn Oracle>,
        executor: Arc<dyn SqlExecutor>,
        prompts: PromptStore,
    ) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pool = if config.parallelism > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.parallelism)
                    .build()
                    .context("build expansion pool")?,
            )
        } else {
            None
        };
        let executions = ExecutionCache::new(executor, config.execution.timeout());
        Ok(Self {
            tree: SearchTree::new(root),
            config,
            oracle,
            executions,
            prompts,
            rng,
            expanded: HashMap::new(),
            pool,
        })
    }

    pub fn tree(&self) -> &SearchTree {
        &self.tree
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.executions.stats()
    }

    fn action_context(&self) -> ActionContext<'_> {
        ActionContext {
            oracle: self.oracle.as_ref(),
            executions: &self.executions,
            prompts: &self.prompts,
            config: &self.config,
        }
    }

    /// Apply `action` to node `id` once; later calls return the same children.
    pub fn expand(&mut self, id: NodeId, action: ActionKind) -> Result<Vec<NodeId>> {
        if let Some(children) = self.expanded.get(&(id, action)) {
            return Ok(children.clone());
        }
        let node = Arc::clone(self.tree.node(id)?);
        let mut rng = StdRng::seed_from_u64(self.rng.next_u64());
        let contexts = actions::apply(action, &node, &self.action_context(), &mut rng)?;
        self.record(id, action, contexts)
    }

    fn record(
        &mut self,
        id: NodeId,
        action: ActionKind,
        contexts: Vec<NodeContext>,
    ) -> Result<Vec<NodeId>> {
        let children = self.tree.attach(id, action, contexts)?;
        debug!(node = id, action = %action, children = children.len(), "expanded");
        self.expanded.insert((id, action), children.clone());
        Ok(children)
    }

    /// Valid actions of `node` that have not been applied to it yet.
    fn unexpanded_actions(&self, node: &SearchNode) -> Vec<ActionKind> {
        valid_actions(node)
            .into_iter()
            .filter(|action| !self.expanded.contains_key(&(node.id, *action)))
            .collect()
    }

    /// Valid actions of `node` worth choosing in a rollout: unexpanded, or
    /// expanded with at least one child.
    fn productive_actions(&self, node: &SearchNode) -> Vec<ActionKind> {
        valid_actions(node)
            .into_iter()
            .filter(|action| {
                self.expanded
                    .get(&(node.id, *action))
                    .is_none_or(|children| !children.is_empty())
            })
            .collect()
    }

    /// Non-terminal nodes with at least one valid action not yet applied.
    pub fn frontier(&self) -> Vec<NodeId> {
        self.tree
            .nodes()
            .iter()
            .filter(|node| !node.node_type.is_terminal())
            .filter(|node| !self.unexpanded_actions(node).is_empty())
            .map(|node| node.id)
            .collect()
    }

    /// Expand every frontier node with the action `policy` picks for it.
    ///
    /// Expansions run on the session pool when `parallelism > 1`. Each one
    /// gets its own rng seeded from the session rng, and children are
    /// attached in frontier order, so ids do not depend on scheduling.
    #[instrument(skip_all, fields(parallelism = self.config.parallelism))]
    pub fn expand_frontier(&mut self, policy: &mut dyn Policy) -> Result<Vec<NodeId>> {
        let mut jobs: Vec<(Arc<SearchNode>, ActionKind, u64)> = Vec::new();
        for id in self.frontier() {
            let node = Arc::clone(self.tree.node(id)?);
            let candidates = self.unexpanded_actions(&node);
            let Some(action) = policy.choose(&node, &candidates, &mut self.rng) else {
                continue;
            };
            jobs.push((node, action, self.rng.next_u64()));
        }

        let cx = self.action_context();
        let run = |(node, action, seed): &(Arc<SearchNode>, ActionKind, u64)| {
            let mut rng = StdRng::seed_from_u64(*seed);
            actions::apply(*action, node, &cx, &mut rng)
        };
        let results: Vec<Result<Vec<NodeContext>>> = match &self.pool {
            Some(pool) => pool.install(|| jobs.par_iter().map(run).collect()),
            None => jobs.iter().map(run).collect(),
        };

        let mut created = Vec::new();
        for ((node, action, _), contexts) in jobs.iter().zip(results) {
            created.extend(self.record(node.id, *action, contexts?)?);
        }
        info!(expanded = jobs.len(), created = created.len(), "frontier expanded");
        Ok(created)
    }

    /// Walk from the root to a terminal node, choosing actions with `policy`
    /// and children uniformly. Returns the terminal's id.
    pub fn rollout(&mut self, policy: &mut dyn Policy) -> Result<NodeId> {
        let mut current = self.tree.root().id;
        loop {
            let node = Arc::clone(self.tree.node(current)?);
            if node.node_type.is_terminal() {
                return Ok(current);
            }
            let candidates = self.productive_actions(&node);
            if candidates.is_empty() {
                bail!("node {current} has no productive action left");
            }
            let action = policy
                .choose(&node, &candidates, &mut self.rng)
                .ok_or_else(|| anyhow!("policy chose nothing for node {current}"))?;
            let children = self.expand(current, action)?;
            match children.choose(&mut self.rng) {
                Some(child) => current = *child,
                None => debug!(node = current, action = %action, "action produced no children"),
            }
        }
    }

    /// Run `max_rollouts` rollouts and vote among the terminals they reached.
    #[instrument(skip_all, fields(max_rollouts = self.config.max_rollouts))]
    pub fn run(&mut self, policy: &mut dyn Policy) -> Result<SearchOutcome> {
        let mut terminals: Vec<NodeId> = Vec::new();
        for rollout in 1..=self.config.max_rollouts {
            let terminal = self.rollout(policy)?;
            info!(rollout, terminal, "rollout finished");
            if !terminals.contains(&terminal) {
                terminals.push(terminal);
            }
        }
        let terminal = self.vote(&terminals)?;
        let path = self.tree.path(terminal)?;
        let final_sql = path
            .last()
            .and_then(|node| node.context.final_sql_query.clone())
            .ok_or_else(|| anyhow!("terminal {terminal} has no final sql"))?;
        let stats = self.executions.stats();
        info!(
            terminal,
            nodes = self.tree.len(),
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            "search finished"
        );
        Ok(SearchOutcome {
            terminal,
            final_sql,
            path,
            rollouts: self.config.max_rollouts,
            nodes: self.tree.len(),
        })
    }

    /// Group terminal answers by execution result and take the majority.
    fn vote(&mut self, terminals: &[NodeId]) -> Result<NodeId> {
        let mut candidates: Vec<(NodeId, String)> = Vec::with_capacity(terminals.len());
        for id in terminals {
            let node = self.tree.node(*id)?;
            if let Some(sql) = node.context.final_sql_query.clone() {
                candidates.push((*id, sql));
            }
        }
        // Every candidate is admitted; failures stay ungrouped.
        let mut tally = ConsistencyTally::new(candidates.len(), 0);
        let db_id = self.tree.root().context.db_id.clone();
        for (_, sql) in &candidates {
            let result = self.executions.execute(&db_id, sql);
            tally.record(sql.clone(), &result);
        }
        let verdict = tally
            .decide(&mut self.rng)
            .ok_or_else(|| anyhow!("no terminal produced a final sql"))?;
        debug!(score = verdict.consistency_score, "terminals voted");
        candidates
            .into_iter()
            .find(|(_, sql)| *sql == verdict.sql)
            .map(|(id, _)| id)
            .ok_or_else(|| anyhow!("voted sql does not belong to a terminal"))
    }
}
