//! Generation oracle abstraction.
//!
//! The [`Oracle`] trait decouples the search from the language-model backend.
//! [`CommandOracle`] shells out to a configured command; tests use scripted
//! oracles that return predetermined completions without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::config::OracleConfig;
use crate::io::process::run_command_with_timeout;

/// Text-generation capability sampled by the search.
pub trait Oracle: Send + Sync {
    /// Return `n` independent completions of `prompt`.
    ///
    /// Completions are unordered; fewer than `n` may come back.
    fn generate(&self, prompt: &str, temperature: f64, n: usize) -> Result<Vec<String>>;
}

/// Request written as JSON to the oracle command's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub temperature: f64,
    pub n: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Bare(Vec<String>),
    Wrapped { completions: Vec<String> },
}

/// Oracle backed by an external command.
///
/// The command receives a [`GenerateRequest`] on stdin and must print either
/// a JSON array of strings or `{"completions": [...]}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("oracle.command must be a non-empty array");
        }
        Ok(Self {
            argv,
            timeout,
            output_limit_bytes,
        })
    }

    pub fn from_config(cfg: &OracleConfig) -> Result<Self> {
        Self::new(
            cfg.command.clone(),
            Duration::from_secs(cfg.timeout_secs),
            cfg.output_limit_bytes,
        )
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(program = %self.argv[0], temperature, n))]
    fn generate(&self, prompt: &str, temperature: f64, n: usize) -> Result<Vec<String>> {
        let request = serde_json::to_vec(&GenerateRequest {
            prompt,
            temperature,
            n,
        })
        .context("serialize oracle request")?;

        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        let output = run_command_with_timeout(cmd, Some(request), self.timeout, self.output_limit_bytes)
            .context("run oracle command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "oracle timed out");
            return Err(anyhow!("oracle timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "oracle failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(2048)
            ));
        }
        if output.stdout_truncated > 0 {
            bail!(
                "oracle output exceeded {} bytes",
                self.output_limit_bytes
            );
        }

        let completions = parse_completions(output.stdout_text()?)?;
        debug!(returned = completions.len(), "oracle completed");
        Ok(completions)
    }
}

fn parse_completions(stdout: &str) -> Result<Vec<String>> {
    let response: GenerateResponse =
        serde_json::from_str(stdout.trim()).context("parse oracle output")?;
    Ok(match response {
        GenerateResponse::Bare(completions) => completions,
        GenerateResponse::Wrapped { completions } => completions,
    })
}
