//! RephraseQuestion, IdentifyColumnValues and IdentifyColumnFunctions.
//!
//! One oracle call per expansion; every unique completion becomes a child.

use anyhow::{Result, anyhow, bail};
use minijinja::context;
use tracing::debug;

use crate::actions::ActionContext;
use crate::core::extract::unique_responses;
use crate::core::node::{NodeContext, SearchNode};
use crate::core::types::ActionKind;
use crate::io::prompt::template_for;

pub fn expand(
    kind: ActionKind,
    node: &SearchNode,
    cx: &ActionContext<'_>,
) -> Result<Vec<NodeContext>> {
    let template =
        template_for(kind).ok_or_else(|| anyhow!("{kind} does not render a prompt"))?;
    let ctx = node.context.as_ref();
    let prompt = cx.prompts.render(
        template,
        context! {
            schema => ctx.schema_context_to_use(),
            question => ctx.question(),
            hint => &ctx.hint,
            prior => node.path_digest(kind),
        },
    )?;

    let settings = &cx.config.annotate;
    let completions = cx.oracle.generate(&prompt, settings.temperature, settings.n)?;
    let returned = completions.len();
    let responses = unique_responses(completions);
    debug!(returned, unique = responses.len(), "annotation responses");

    responses
        .into_iter()
        .map(|text| {
            let mut child = ctx.clone();
            match kind {
                ActionKind::RephraseQuestion => child.rephrased_question = Some(text),
                ActionKind::IdentifyColumnValues => child.identified_column_values = Some(text),
                ActionKind::IdentifyColumnFunctions => {
                    child.identified_column_functions = Some(text);
                }
                other => bail!("{other} is not an annotation action"),
            }
            Ok(child)
        })
        .collect()
}
