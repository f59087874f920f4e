//! SqlGeneration and SqlRevision: self-consistency sampling that collapses
//! many executed candidates into a single child.

use anyhow::{Result, anyhow, bail};
use minijinja::context;
use rand::rngs::StdRng;
use tracing::{debug, info, instrument, warn};

use crate::actions::ActionContext;
use crate::core::consistency::{Admission, ConsistencyTally, Verdict};
use crate::core::error::SearchError;
use crate::core::extract::extract_sql;
use crate::core::node::{NodeContext, SearchNode};
use crate::core::types::ActionKind;

pub fn expand(
    kind: ActionKind,
    node: &SearchNode,
    cx: &ActionContext<'_>,
    rng: &mut StdRng,
) -> Result<NodeContext> {
    let prompt = render_prompt(kind, node, cx)?;
    let verdict = sample_consistent(kind, &prompt, &node.context.db_id, cx, rng)?;

    let mut child = node.context.as_ref().clone();
    match kind {
        ActionKind::SqlGeneration => child.sql_query = Some(verdict.sql),
        ActionKind::SqlRevision => child.revised_sql_query = Some(verdict.sql),
        other => bail!("{other} does not produce sql"),
    }
    child.consistency_score = Some(verdict.consistency_score);
    child.is_valid_sql_query = Some(verdict.is_valid);
    Ok(child)
}

fn render_prompt(kind: ActionKind, node: &SearchNode, cx: &ActionContext<'_>) -> Result<String> {
    let ctx = node.context.as_ref();
    let base = context! {
        schema => ctx.schema_context_to_use(),
        question => ctx.question(),
        hint => &ctx.hint,
        column_values => node.path_digest(ActionKind::IdentifyColumnValues),
        column_functions => node.path_digest(ActionKind::IdentifyColumnFunctions),
    };
    match kind {
        ActionKind::SqlGeneration => cx.prompts.render("sql_generation", base),
        ActionKind::SqlRevision => {
            let generation = node
                .nearest(ActionKind::SqlGeneration)
                .ok_or_else(|| anyhow!("revision of node {} has no generation on its path", node.id))?;
            let previous_sql = generation
                .context
                .sql_query
                .as_deref()
                .ok_or_else(|| anyhow!("generation node {} carries no sql", generation.id))?;
            let summary = cx
                .executions
                .execute(&ctx.db_id, previous_sql)
                .summary(cx.config.execution.summary_rows);
            let revision = context! {
                previous_sql => previous_sql,
                previous_valid => generation.context.is_valid_sql_query.unwrap_or(false),
                execution_summary => summary,
                ..base
            };
            cx.prompts.render("sql_revision", revision)
        }
        other => bail!("{other} does not render a sql prompt"),
    }
}

/// Sample until the tally settles, restarting from scratch when a pass
/// collects nothing at all.
#[instrument(skip_all, fields(action = %kind, db_id))]
pub fn sample_consistent(
    kind: ActionKind,
    prompt: &str,
    db_id: &str,
    cx: &ActionContext<'_>,
    rng: &mut StdRng,
) -> Result<Verdict> {
    let settings = &cx.config.sampling;
    let mut total_rounds = 0;
    for pass in 0..=settings.max_restarts {
        if pass > 0 {
            warn!(pass, "no candidate collected, restarting sampling");
        }
        let mut tally = ConsistencyTally::new(settings.sample_target, settings.max_invalid_tries);
        let mut rounds = 0;
        while !tally.is_done() && rounds < settings.max_rounds {
            rounds += 1;
            let completions =
                cx.oracle
                    .generate(prompt, settings.temperature, tally.remaining())?;
            for completion in completions {
                if tally.remaining() == 0 {
                    break;
                }
                let Some(sql) = extract_sql(&completion) else {
                    debug!("completion without sql block discarded");
                    continue;
                };
                let result = cx.executions.execute(db_id, &sql);
                match tally.record(sql, &result) {
                    Admission::Grouped | Admission::Full => {}
                    Admission::Rejected => {
                        debug!(invalid_tries = tally.invalid_tries(), "candidate failed execution");
                    }
                    Admission::Forced => warn!("accepting unvalidated candidate"),
                }
            }
        }
        total_rounds += rounds;

        if let Some(verdict) = tally.decide(rng) {
            info!(
                score = verdict.consistency_score,
                valid = verdict.is_valid,
                collected = tally.collected().len(),
                groups = tally.group_sizes().len(),
                "sampling settled"
            );
            return Ok(verdict);
        }
    }
    Err(SearchError::SamplingExhausted {
        action: kind,
        rounds: total_rounds,
    }
    .into())
}
