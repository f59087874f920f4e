//! sqltree CLI.
//!
//! Runs the text-to-SQL search against SQLite databases, with the generation
//! oracle provided by an external command (`oracle.command` in
//! `.sqltree/config.toml`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};

use sqltree::core::node::NodeContext;
use sqltree::core::policy::{PipelinePolicy, Policy, UniformPolicy};
use sqltree::core::schema::{SchemaSnapshot, render_schema};
use sqltree::exit_codes;
use sqltree::io::config::{SearchConfig, load_config, write_config};
use sqltree::io::oracle::CommandOracle;
use sqltree::io::prompt::PromptStore;
use sqltree::io::schema_store::{introspect_sqlite, load_snapshot};
use sqltree::io::sqlite::{DatabaseResolver, SqlExecutor, SqliteExecutor};
use sqltree::io::trace::write_trace;
use sqltree::logging;
use sqltree::search::SearchSession;

const DEFAULT_CONFIG: &str = ".sqltree/config.toml";

#[derive(Parser)]
#[command(
    name = "sqltree",
    version,
    about = "Search-tree text-to-SQL synthesis with self-consistency voting"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default `.sqltree/config.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the schema snapshot of a database.
    Schema {
        #[command(flatten)]
        target: Target,
        /// Print the rendered schema context instead of JSON.
        #[arg(long)]
        text: bool,
    },
    /// Execute one query and print its result as JSON.
    Exec {
        #[command(flatten)]
        target: Target,
        sql: String,
    },
    /// Search for the SQL answering a question.
    Search {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        question: String,
        #[arg(long)]
        hint: Option<String>,
        /// Schema snapshot JSON; introspected from the database when absent.
        #[arg(long)]
        schema: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, value_enum, default_value_t = PolicyArg::Pipeline)]
        policy: PolicyArg,
        /// Write the answer's root-to-terminal path as JSON.
        #[arg(long)]
        trace: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct Target {
    /// Database id, or a path to a SQLite file.
    #[arg(long)]
    db: String,
    #[arg(long)]
    databases_dir: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum PolicyArg {
    Pipeline,
    Uniform,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Schema { target, text } => cmd_schema(&target, text),
        Command::Exec { target, sql } => cmd_exec(&target, &sql),
        Command::Search {
            target,
            question,
            hint,
            schema,
            seed,
            policy,
            trace,
        } => cmd_search(SearchArgs {
            target: &target,
            question: &question,
            hint: hint.as_deref().unwrap_or_default(),
            schema: schema.as_deref(),
            seed,
            policy,
            trace: trace.as_deref(),
        }),
    }
}

fn cmd_init(force: bool) -> Result<i32> {
    let path = Path::new(DEFAULT_CONFIG);
    if force || !path.exists() {
        write_config(path, &SearchConfig::default())?;
    }
    Ok(exit_codes::OK)
}

fn cmd_schema(target: &Target, text: bool) -> Result<i32> {
    let cfg = load_config(&target.config)?;
    let snapshot = introspect_target(target, &cfg)?;
    if text {
        println!("{}", render_schema(&snapshot));
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("serialize schema")?
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_exec(target: &Target, sql: &str) -> Result<i32> {
    let cfg = load_config(&target.config)?;
    let executor = SqliteExecutor::new(resolver_for(target, &cfg));
    let result = executor.execute(&target.db, sql, cfg.execution.timeout());
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("serialize result")?
    );
    Ok(if result.is_success() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

struct SearchArgs<'a> {
    target: &'a Target,
    question: &'a str,
    hint: &'a str,
    schema: Option<&'a Path>,
    seed: Option<u64>,
    policy: PolicyArg,
    trace: Option<&'a Path>,
}

fn cmd_search(args: SearchArgs<'_>) -> Result<i32> {
    let mut cfg = load_config(&args.target.config)?;
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }
    let snapshot = match args.schema {
        Some(path) => load_snapshot(path)?,
        None => introspect_target(args.target, &cfg)?,
    };
    let oracle = CommandOracle::from_config(&cfg.oracle)?;
    let prompts = PromptStore::from_config(&cfg.prompts)?;
    let executor = SqliteExecutor::new(resolver_for(args.target, &cfg));
    let root = NodeContext::new(
        args.target.db.clone(),
        args.question,
        args.hint,
        Arc::new(snapshot),
    );

    let mut session = SearchSession::new(root, cfg, Arc::new(oracle), Arc::new(executor), prompts)?;
    let mut policy: Box<dyn Policy> = match args.policy {
        PolicyArg::Pipeline => Box::new(PipelinePolicy::full()),
        PolicyArg::Uniform => Box::new(UniformPolicy),
    };
    let outcome = session.run(policy.as_mut())?;

    if let Some(path) = args.trace {
        write_trace(path, &outcome.path)?;
    }
    println!("{}", outcome.final_sql);
    Ok(if outcome.is_valid() {
        exit_codes::OK
    } else {
        exit_codes::UNVALIDATED
    })
}

/// Resolver honoring `--databases-dir`, then the config, and accepting a
/// plain file path as the database id.
fn resolver_for(target: &Target, cfg: &SearchConfig) -> DatabaseResolver {
    let root = target
        .databases_dir
        .clone()
        .or_else(|| cfg.execution.databases_dir.clone());
    let mut resolver = DatabaseResolver::new(root);
    let as_path = Path::new(&target.db);
    if as_path.is_file() {
        resolver.register(target.db.clone(), as_path);
    }
    resolver
}

fn introspect_target(target: &Target, cfg: &SearchConfig) -> Result<SchemaSnapshot> {
    let path = resolver_for(target, cfg)
        .resolve(&target.db)
        .ok_or_else(|| anyhow!("database {} not found", target.db))?;
    introspect_sqlite(&path)
}
