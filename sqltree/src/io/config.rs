//! Search configuration stored under `.sqltree/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Search configuration (TOML).
///
/// Every knob the search driver and its actions consult lives here; nothing
/// is read from module-level constants. Missing fields take the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Seed for the session random source. `None` draws from entropy.
    pub seed: Option<u64>,

    /// Rollouts performed by `SearchSession::run`.
    pub max_rollouts: u32,

    /// Frontier nodes expanded concurrently; 1 keeps expansion sequential.
    pub parallelism: usize,

    pub sampling: SamplingConfig,
    pub annotate: AnnotateConfig,
    pub schema_selection: SchemaSelectionConfig,
    pub execution: ExecutionConfig,
    pub oracle: OracleConfig,
    pub prompts: PromptsConfig,
}

/// Self-consistency sampling for SQL generation and revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Candidates collected before voting.
    pub sample_target: usize,
    /// Failed executions discarded before failing SQL is accepted anyway.
    pub max_invalid_tries: u32,
    pub temperature: f64,
    /// Oracle calls allowed in one sampling pass.
    pub max_rounds: u32,
    /// Fresh passes attempted when a pass collects nothing.
    pub max_restarts: u32,
}

/// Rephrasing and column-annotation actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnotateConfig {
    pub n: usize,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaSelectionConfig {
    /// Unique selections wanted.
    pub n: usize,
    pub temperature: f64,
    /// Oracle calls allowed while collecting selections.
    pub max_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-query wall-clock limit enforced inside the engine.
    pub timeout_ms: u64,
    /// Directory holding `<db_id>/<db_id>.sqlite` or `<db_id>.sqlite`.
    pub databases_dir: Option<PathBuf>,
    /// Rows shown in execution summaries.
    pub summary_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command spawned per generation request (e.g. `["llm-sample", "--json"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory whose `<template>.md` files override the built-in templates.
    pub dir: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_rollouts: 4,
            parallelism: 1,
            sampling: SamplingConfig::default(),
            annotate: AnnotateConfig::default(),
            schema_selection: SchemaSelectionConfig::default(),
            execution: ExecutionConfig::default(),
            oracle: OracleConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_target: 5,
            max_invalid_tries: 15,
            temperature: 0.8,
            max_rounds: 50,
            max_restarts: 3,
        }
    }
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            n: 3,
            temperature: 0.8,
        }
    }
}

impl Default for SchemaSelectionConfig {
    fn default() -> Self {
        Self {
            n: 3,
            temperature: 0.8,
            max_rounds: 5,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            databases_dir: None,
            summary_rows: 5,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
            output_limit_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_rollouts == 0 {
            return Err(anyhow!("max_rollouts must be > 0"));
        }
        if self.parallelism == 0 {
            return Err(anyhow!("parallelism must be > 0"));
        }
        if self.sampling.sample_target == 0 {
            return Err(anyhow!("sampling.sample_target must be > 0"));
        }
        if self.sampling.max_rounds == 0 {
            return Err(anyhow!("sampling.max_rounds must be > 0"));
        }
        if self.annotate.n == 0 {
            return Err(anyhow!("annotate.n must be > 0"));
        }
        if self.schema_selection.n == 0 {
            return Err(anyhow!("schema_selection.n must be > 0"));
        }
        if self.schema_selection.max_rounds == 0 {
            return Err(anyhow!("schema_selection.max_rounds must be > 0"));
        }
        for (name, temperature) in [
            ("sampling.temperature", self.sampling.temperature),
            ("annotate.temperature", self.annotate.temperature),
            ("schema_selection.temperature", self.schema_selection.temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(anyhow!("{name} must be within [0, 2]"));
            }
        }
        if self.execution.timeout_ms == 0 {
            return Err(anyhow!("execution.timeout_ms must be > 0"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SearchConfig::default()`.
pub fn load_config(path: &Path) -> Result<SearchConfig> {
    if !path.exists() {
        let cfg = SearchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SearchConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SearchConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
