//! Prompt template store backed by minijinja.
//!
//! Built-in templates are compiled into the binary. A directory may override
//! any of them with a `<name>.md` file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

use crate::core::types::ActionKind;
use crate::io::config::PromptsConfig;

const BUILTIN_TEMPLATES: [(&str, &str); 6] = [
    (
        "rephrase_question",
        include_str!("prompts/rephrase_question.md"),
    ),
    (
        "identify_column_values",
        include_str!("prompts/identify_column_values.md"),
    ),
    (
        "identify_column_functions",
        include_str!("prompts/identify_column_functions.md"),
    ),
    ("schema_selection", include_str!("prompts/schema_selection.md")),
    ("sql_generation", include_str!("prompts/sql_generation.md")),
    ("sql_revision", include_str!("prompts/sql_revision.md")),
];

/// Template used by `action`, if it renders a prompt at all.
pub fn template_for(action: ActionKind) -> Option<&'static str> {
    match action {
        ActionKind::End => None,
        other => Some(other.as_str()),
    }
}

/// Named prompt templates.
pub struct PromptStore {
    env: Environment<'static>,
}

impl PromptStore {
    /// Store holding only the built-in templates.
    pub fn builtin() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in BUILTIN_TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("compile built-in template {name}"))?;
        }
        Ok(Self { env })
    }

    /// Built-in templates, replaced by any `<name>.md` found in `dir`.
    pub fn with_overrides(dir: &Path) -> Result<Self> {
        let mut store = Self::builtin()?;
        for (name, _) in BUILTIN_TEMPLATES {
            let path = dir.join(format!("{name}.md"));
            if !path.exists() {
                continue;
            }
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read template {}", path.display()))?;
            store
                .env
                .add_template_owned(name, source)
                .with_context(|| format!("compile template {}", path.display()))?;
            debug!(template = name, path = %path.display(), "template overridden");
        }
        Ok(store)
    }

    pub fn from_config(cfg: &PromptsConfig) -> Result<Self> {
        match &cfg.dir {
            Some(dir) => Self::with_overrides(dir),
            None => Self::builtin(),
        }
    }

    /// Render template `name` with named arguments.
    pub fn render<S: Serialize>(&self, name: &str, args: S) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("unknown template {name}"))?;
        template
            .render(args)
            .with_context(|| format!("render template {name}"))
    }
}
