//! SchemaSelection: sample table/column selections, close them over join
//! keys, deduplicate, and emit one child per distinct selection.

use anyhow::Result;
use minijinja::context;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::actions::ActionContext;
use crate::core::extract::parse_selection;
use crate::core::node::{NodeContext, SearchNode};
use crate::core::schema::{SelectionSet, render_selected};
use crate::core::types::ActionKind;

pub fn expand(
    node: &SearchNode,
    cx: &ActionContext<'_>,
    rng: &mut StdRng,
) -> Result<Vec<NodeContext>> {
    let ctx = node.context.as_ref();
    let prompt = cx.prompts.render(
        "schema_selection",
        context! {
            schema => &ctx.schema_context,
            question => ctx.question(),
            hint => augmented_hint(node),
        },
    )?;

    let settings = &cx.config.schema_selection;
    let mut selections = SelectionSet::new();
    let mut rounds = 0;
    while selections.len() < settings.n && rounds < settings.max_rounds {
        rounds += 1;
        let wanted = settings.n - selections.len();
        for completion in cx.oracle.generate(&prompt, settings.temperature, wanted)? {
            if selections.len() >= settings.n {
                break;
            }
            match parse_selection(&ctx.schema, &completion) {
                Some(requested) => {
                    if !selections.insert(&ctx.schema, &requested) {
                        debug!("duplicate selection discarded");
                    }
                }
                None => debug!("unparseable selection discarded"),
            }
        }
    }
    if selections.len() < settings.n {
        info!(
            accepted = selections.len(),
            requested = settings.n,
            rounds,
            "schema selection narrower than requested"
        );
    }

    Ok(selections
        .into_vec()
        .into_iter()
        .map(|selection| {
            let mut child = ctx.clone();
            child.selected_schema_context = Some(render_selected(&ctx.schema, &selection, rng));
            child.selected_schema = Some(selection);
            child
        })
        .collect())
}

/// The user's hint followed by value and function findings from the path.
fn augmented_hint(node: &SearchNode) -> String {
    let mut parts = Vec::new();
    if !node.context.hint.trim().is_empty() {
        parts.push(node.context.hint.trim().to_string());
    }
    if let Some(values) = node.path_digest(ActionKind::IdentifyColumnValues) {
        parts.push(format!("Column values: {values}"));
    }
    if let Some(functions) = node.path_digest(ActionKind::IdentifyColumnFunctions) {
        parts.push(format!("Column functions: {functions}"));
    }
    parts.join("\n")
}
