//! Test-only fixtures: a small shop schema, its SQLite database, and
//! deterministic oracle and executor doubles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use tempfile::NamedTempFile;

use crate::core::node::{NodeContext, NodeId, SearchNode};
use crate::core::schema::{ColumnRef, ColumnSchema, SchemaSnapshot, TableSchema};
use crate::core::types::{ActionKind, ExecutionResult};
use crate::io::exec_cache::normalize_sql;
use crate::io::oracle::Oracle;
use crate::io::sqlite::SqlExecutor;

pub const FIXTURE_DB_ID: &str = "shop";
pub const FIXTURE_QUESTION: &str = "Which customers live in the North region?";
pub const FIXTURE_HINT: &str = "North is a value of regions.name";

fn column(name: &str, data_type: &str, primary_key: bool) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type: Some(data_type.to_string()),
        primary_key,
        foreign_keys: Vec::new(),
        referenced_by: Vec::new(),
    }
}

fn foreign_key(name: &str, table: &str, target: &str) -> ColumnSchema {
    ColumnSchema {
        foreign_keys: vec![ColumnRef {
            table: table.to_string(),
            column: target.to_string(),
        }],
        ..column(name, "INTEGER", false)
    }
}

/// regions, customers and orders, with reverse references linked.
pub fn sample_schema() -> SchemaSnapshot {
    let mut schema = SchemaSnapshot {
        tables: vec![
            TableSchema {
                name: "regions".to_string(),
                columns: vec![column("id", "INTEGER", true), column("name", "TEXT", false)],
            },
            TableSchema {
                name: "customers".to_string(),
                columns: vec![
                    column("id", "INTEGER", true),
                    column("name", "TEXT", false),
                    column("email", "TEXT", false),
                    foreign_key("region_id", "regions", "id"),
                ],
            },
            TableSchema {
                name: "orders".to_string(),
                columns: vec![
                    column("id", "INTEGER", true),
                    foreign_key("customer_id", "customers", "id"),
                    column("amount", "REAL", false),
                ],
            },
        ],
    };
    schema.link_references();
    schema
}

/// SQLite file whose schema matches [`sample_schema`].
pub fn fixture_database() -> Result<NamedTempFile> {
    let file = NamedTempFile::new().context("create fixture file")?;
    let conn = Connection::open(file.path()).context("open fixture")?;
    conn.execute_batch(
        "CREATE TABLE regions (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE customers (
             id INTEGER PRIMARY KEY,
             name TEXT,
             email TEXT,
             region_id INTEGER REFERENCES regions(id)
         );
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             customer_id INTEGER REFERENCES customers(id),
             amount REAL
         );
         INSERT INTO regions VALUES (1, 'North'), (2, 'South');
         INSERT INTO customers VALUES
             (1, 'Ada', 'ada@example.com', 1),
             (2, 'Bo', 'bo@example.com', 2),
             (3, 'Cy', 'cy@example.com', 1);
         INSERT INTO orders VALUES (1, 1, 10.0), (2, 1, 5.5), (3, 3, 20.0);",
    )
    .context("populate fixture")?;
    Ok(file)
}

pub fn root_context() -> NodeContext {
    NodeContext::new(
        FIXTURE_DB_ID,
        FIXTURE_QUESTION,
        FIXTURE_HINT,
        Arc::new(sample_schema()),
    )
}

pub fn root_node() -> Arc<SearchNode> {
    Arc::new(SearchNode::root(0, root_context()))
}

/// Child of `parent` with the field `action` is responsible for filled in.
pub fn child_of(parent: &Arc<SearchNode>, id: NodeId, action: ActionKind) -> Arc<SearchNode> {
    let mut ctx = parent.context.as_ref().clone();
    match action {
        ActionKind::RephraseQuestion => {
            ctx.rephrased_question = Some(format!("rephrased question {id}"));
        }
        ActionKind::SchemaSelection => {
            ctx.selected_schema_context = Some(format!("Table: selection {id}"));
        }
        ActionKind::IdentifyColumnValues => {
            ctx.identified_column_values = Some(format!("values {id}"));
        }
        ActionKind::IdentifyColumnFunctions => {
            ctx.identified_column_functions = Some(format!("functions {id}"));
        }
        ActionKind::SqlGeneration => {
            ctx.sql_query = Some(format!("SELECT {id}"));
            ctx.is_valid_sql_query = Some(true);
            ctx.consistency_score = Some(1.0);
        }
        ActionKind::SqlRevision => {
            ctx.revised_sql_query = Some(format!("SELECT {id}"));
            ctx.is_valid_sql_query = Some(true);
            ctx.consistency_score = Some(1.0);
        }
        ActionKind::End => {
            ctx.final_sql_query = Some(ctx.current_sql().unwrap_or("SELECT 1").to_string());
        }
    }
    Arc::new(SearchNode::child(parent, id, action, ctx))
}

/// Title from a prompt's leading `## Task: <title>` line.
pub fn task_of(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix("## Task:"))
        .map(str::trim)
}

/// Queue of completion batches; the last batch repeats once the rest are used.
#[derive(Debug, Default)]
struct BatchQueue {
    batches: VecDeque<Vec<String>>,
}

impl BatchQueue {
    fn next(&mut self) -> Option<Vec<String>> {
        if self.batches.len() > 1 {
            self.batches.pop_front()
        } else {
            self.batches.front().cloned()
        }
    }
}

fn owned(batch: &[&str]) -> Vec<String> {
    batch.iter().map(|s| s.to_string()).collect()
}

/// Oracle answering each prompt from the script registered for its task.
#[derive(Debug, Default)]
pub struct RoutedOracle {
    routes: Mutex<HashMap<String, BatchQueue>>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl RoutedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one batch of completions for prompts titled `task`.
    pub fn route(self, task: &str, batch: &[&str]) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes
                .entry(task.to_string())
                .or_default()
                .batches
                .push_back(owned(batch));
        }
        self
    }

    /// `(task, n)` for every call, in call order.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_for(&self, task: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(called, _)| called == task)
            .count()
    }
}

impl Oracle for RoutedOracle {
    fn generate(&self, prompt: &str, _temperature: f64, n: usize) -> Result<Vec<String>> {
        let task = task_of(prompt)
            .ok_or_else(|| anyhow!("prompt has no task header"))?
            .to_string();
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls lock poisoned"))?
            .push((task.clone(), n));
        let mut routes = self
            .routes
            .lock()
            .map_err(|_| anyhow!("routes lock poisoned"))?;
        let batch = routes
            .get_mut(&task)
            .and_then(BatchQueue::next)
            .ok_or_else(|| anyhow!("no scripted completions for task {task}"))?;
        Ok(batch.into_iter().take(n).collect())
    }
}

/// Oracle returning scripted batches in order, whatever the prompt.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    queue: Mutex<BatchQueue>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(batches: &[&[&str]]) -> Self {
        Self {
            queue: Mutex::new(BatchQueue {
                batches: batches.iter().map(|batch| owned(batch)).collect(),
            }),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

impl Oracle for ScriptedOracle {
    fn generate(&self, prompt: &str, _temperature: f64, n: usize) -> Result<Vec<String>> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompts lock poisoned"))?
            .push(prompt.to_string());
        let batch = self
            .queue
            .lock()
            .map_err(|_| anyhow!("queue lock poisoned"))?
            .next()
            .ok_or_else(|| anyhow!("script exhausted"))?;
        Ok(batch.into_iter().take(n).collect())
    }
}

/// Executor answering from a table keyed by normalized SQL.
///
/// Unknown queries fail with `no such table`.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    results: HashMap<String, ExecutionResult>,
    calls: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sql: &str, result: ExecutionResult) -> Self {
        self.results.insert(normalize_sql(sql), result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SqlExecutor for FakeExecutor {
    fn execute(&self, _db_id: &str, sql: &str, _timeout: Duration) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .get(&normalize_sql(sql))
            .cloned()
            .unwrap_or_else(|| ExecutionResult::Failed {
                reason: format!("no such table in: {sql}"),
            })
    }
}
