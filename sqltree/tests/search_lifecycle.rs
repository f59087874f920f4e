//! End-to-end search tests against a real SQLite fixture database.
//!
//! The oracle is scripted per prompt task; everything else (execution,
//! caching, templates, voting) runs for real.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use sqltree::actions::{ActionContext, apply};
use sqltree::core::error::SearchError;
use sqltree::core::invariants::validate_tree;
use sqltree::core::policy::PipelinePolicy;
use sqltree::core::schema::TableSelection;
use sqltree::core::types::{ActionKind, NodeType};
use sqltree::io::config::SearchConfig;
use sqltree::io::exec_cache::ExecutionCache;
use sqltree::io::oracle::Oracle;
use sqltree::io::prompt::PromptStore;
use sqltree::io::sqlite::{DatabaseResolver, SqliteExecutor};
use sqltree::io::trace::write_trace;
use sqltree::search::SearchSession;
use sqltree::tree::SearchTree;
use sqltree::test_support::{
    FIXTURE_DB_ID, RoutedOracle, child_of, fixture_database, root_context, root_node,
};

const NORTH_JOIN: &str = "SELECT c.name FROM customers c JOIN regions r ON c.region_id = r.id WHERE r.name = 'North'";
const NORTH_BY_ID: &str = "SELECT name FROM customers WHERE region_id = 1";

fn fenced(sql: &str) -> String {
    format!("Reasoning first.\n```sql\n{sql};\n```")
}

fn executor_for(db: &tempfile::NamedTempFile) -> Arc<SqliteExecutor> {
    let mut resolver = DatabaseResolver::default();
    resolver.register(FIXTURE_DB_ID, db.path());
    Arc::new(SqliteExecutor::new(resolver))
}

struct Services {
    executions: ExecutionCache,
    prompts: PromptStore,
    config: SearchConfig,
}

impl Services {
    fn new(db: &tempfile::NamedTempFile) -> Self {
        Self {
            executions: ExecutionCache::new(executor_for(db), Duration::from_secs(5)),
            prompts: PromptStore::builtin().expect("prompts"),
            config: SearchConfig::default(),
        }
    }

    fn context<'a>(&'a self, oracle: &'a dyn Oracle) -> ActionContext<'a> {
        ActionContext {
            oracle,
            executions: &self.executions,
            prompts: &self.prompts,
            config: &self.config,
        }
    }
}

fn generation_oracle(batch: &[String]) -> RoutedOracle {
    let batch: Vec<&str> = batch.iter().map(String::as_str).collect();
    RoutedOracle::new().route("SQL Generation", &batch)
}

/// Full pipeline: rephrase, annotate, select schema, generate, revise, end,
/// then vote across rollouts and write the audit trace.
#[test]
fn pipeline_search_answers_from_fixture_database() {
    let db = fixture_database().expect("fixture");
    let join = fenced(NORTH_JOIN);
    let by_id = fenced(NORTH_BY_ID);
    let oracle = RoutedOracle::new()
        .route(
            "Rephrase Question",
            &["List the names of customers whose region is named North."],
        )
        .route("Identify Column Values", &["regions.name = 'North'"])
        .route("Identify Column Functions", &["none"])
        .route(
            "Schema Selection",
            &["```json\n{\"customers\": [\"name\"], \"regions\": [\"name\"]}\n```"],
        )
        .route("SQL Generation", &[&by_id, &join, &by_id])
        .route("SQL Revision", &[&join, &join, &join, &join, &join]);
    let oracle = Arc::new(oracle);
    let config = SearchConfig {
        seed: Some(17),
        max_rollouts: 3,
        ..SearchConfig::default()
    };

    let mut session = SearchSession::new(
        root_context(),
        config,
        oracle.clone(),
        executor_for(&db),
        PromptStore::builtin().expect("prompts"),
    )
    .expect("session");
    let outcome = session
        .run(&mut PipelinePolicy::full())
        .expect("search");

    assert_eq!(outcome.final_sql, NORTH_JOIN);
    assert!(outcome.is_valid());
    assert_eq!(outcome.consistency_score(), 1.0);
    assert_eq!(
        outcome.path.last().map(|node| node.node_type),
        Some(NodeType::End)
    );
    assert!(validate_tree(session.tree()).is_empty());

    // One path through the tree exists, so later rollouts reuse it.
    assert_eq!(oracle.calls_for("Rephrase Question"), 1);
    assert_eq!(oracle.calls_for("SQL Revision"), 1);
    assert!(session.cache_stats().hits > 0);

    let schema_node = outcome
        .path
        .iter()
        .find(|node| node.node_type == NodeType::SchemaSelection)
        .expect("schema selection on path");
    let selected = schema_node
        .context
        .selected_schema
        .as_ref()
        .expect("selection");
    assert_eq!(
        selected.0.get("customers"),
        Some(&TableSelection::Columns(vec![
            "id".to_string(),
            "name".to_string(),
            "region_id".to_string(),
        ]))
    );

    let temp = tempfile::tempdir().expect("tempdir");
    let trace_path = temp.path().join("trace.json");
    write_trace(&trace_path, &outcome.path).expect("trace");
    let trace: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&trace_path).expect("read")).expect("json");
    assert_eq!(trace.as_array().map(Vec::len), Some(outcome.path.len()));
}

/// Five disjoint singleton results: any of them may win, with score 1/5.
#[test]
fn disjoint_candidates_split_the_vote() {
    let db = fixture_database().expect("fixture");
    let services = Services::new(&db);
    let batch: Vec<String> = (1..=5).map(|v| fenced(&format!("SELECT {v}"))).collect();
    let oracle = generation_oracle(&batch);
    let mut rng = StdRng::seed_from_u64(8);

    let children = apply(
        ActionKind::SqlGeneration,
        &root_node(),
        &services.context(&oracle),
        &mut rng,
    )
    .expect("generate");

    assert_eq!(children.len(), 1);
    assert_eq!(children[0].consistency_score, Some(0.2));
    assert_eq!(children[0].is_valid_sql_query, Some(true));
}

/// Three candidates agree on `[(1, "a")]`, two fail to execute.
#[test]
fn agreeing_majority_wins_despite_failures() {
    let db = fixture_database().expect("fixture");
    let services = Services::new(&db);
    let batch = vec![
        fenced("SELECT 1, 'a'"),
        fenced("SELECT * FROM suppliers"),
        fenced("SELECT id, 'a' FROM regions WHERE name = 'North'"),
        fenced("SELEC 1"),
        fenced("SELECT 1 AS n, 'a' AS s"),
    ];
    let oracle = generation_oracle(&batch);
    let mut rng = StdRng::seed_from_u64(8);

    let children = apply(
        ActionKind::SqlGeneration,
        &root_node(),
        &services.context(&oracle),
        &mut rng,
    )
    .expect("generate");

    assert_eq!(children[0].consistency_score, Some(1.0));
    assert_eq!(children[0].is_valid_sql_query, Some(true));
    assert_eq!(children[0].sql_query.as_deref(), Some("SELECT 1, 'a'"));
}

/// Every candidate fails: the retry budget runs out and one is accepted
/// unvalidated.
#[test]
fn all_failures_force_an_unvalidated_answer() {
    let db = fixture_database().expect("fixture");
    let services = Services::new(&db);
    let batch: Vec<String> = ["suppliers", "vendors", "invoices", "stores", "staff"]
        .iter()
        .map(|table| fenced(&format!("SELECT * FROM {table}")))
        .collect();
    let oracle = generation_oracle(&batch);
    let mut rng = StdRng::seed_from_u64(8);

    let children = apply(
        ActionKind::SqlGeneration,
        &root_node(),
        &services.context(&oracle),
        &mut rng,
    )
    .expect("generate");

    assert_eq!(children[0].consistency_score, Some(0.0));
    assert_eq!(children[0].is_valid_sql_query, Some(false));
    // Five distinct failing queries, each executed once despite 20 samples.
    assert_eq!(services.executions.stats().misses, 5);

    let forced_sql = children[0].sql_query.clone().expect("forced sql");
    let mut tree = SearchTree::new(root_context());
    let ids = tree
        .attach(0, ActionKind::SqlGeneration, children)
        .expect("attach");
    let forced = tree.node(ids[0]).expect("forced node");

    let end = apply(
        ActionKind::End,
        forced,
        &services.context(&oracle),
        &mut rng,
    )
    .expect("end");
    assert_eq!(end[0].final_sql_query.as_deref(), Some(forced_sql.as_str()));
    assert_eq!(end[0].is_valid_sql_query, Some(false));
}

/// When nothing ever executes, the session still ends with an answer, marked
/// unvalidated.
#[test]
fn search_answers_even_when_every_candidate_fails() {
    let db = fixture_database().expect("fixture");
    let generated: Vec<String> = ["suppliers", "vendors", "invoices", "stores", "staff"]
        .iter()
        .map(|table| fenced(&format!("SELECT * FROM {table}")))
        .collect();
    let revised: Vec<String> = ["ledger", "payments", "returns", "shipments", "carts"]
        .iter()
        .map(|table| fenced(&format!("SELECT * FROM {table}")))
        .collect();
    let generated: Vec<&str> = generated.iter().map(String::as_str).collect();
    let revised: Vec<&str> = revised.iter().map(String::as_str).collect();
    let oracle = RoutedOracle::new()
        .route("SQL Generation", &generated)
        .route("SQL Revision", &revised);
    let config = SearchConfig {
        seed: Some(3),
        max_rollouts: 2,
        ..SearchConfig::default()
    };

    let mut session = SearchSession::new(
        root_context(),
        config,
        Arc::new(oracle),
        executor_for(&db),
        PromptStore::builtin().expect("prompts"),
    )
    .expect("session");
    let mut policy = PipelinePolicy::new(vec![
        ActionKind::SqlGeneration,
        ActionKind::SqlRevision,
        ActionKind::End,
    ]);
    let outcome = session.run(&mut policy).expect("search");

    assert!(!outcome.final_sql.is_empty());
    assert!(outcome.final_sql.starts_with("SELECT * FROM"));
    assert!(!outcome.is_valid());
    assert_eq!(outcome.consistency_score(), 0.0);
    assert_eq!(
        outcome.path.last().map(|node| node.node_type),
        Some(NodeType::End)
    );
    assert!(validate_tree(session.tree()).is_empty());
}

/// Selecting `customers.name` with `regions` keeps the `region_id` join key.
#[test]
fn schema_selection_keeps_join_key() {
    let db = fixture_database().expect("fixture");
    let mut services = Services::new(&db);
    services.config.schema_selection.n = 2;
    let oracle = RoutedOracle::new().route(
        "Schema Selection",
        &[
            "{\"customers\": [\"name\"], \"regions\": [\"name\"]}",
            "{\"Customers\": [\"NAME\", \"region_id\"], \"REGIONS\": [\"id\", \"name\"]}",
        ],
    );
    let mut rng = StdRng::seed_from_u64(8);

    let children = apply(
        ActionKind::SchemaSelection,
        &root_node(),
        &services.context(&oracle),
        &mut rng,
    )
    .expect("select");

    // The second response closes to the same pairs as the first.
    assert_eq!(children.len(), 1);
    let rendered = children[0]
        .selected_schema_context
        .as_deref()
        .expect("context");
    assert!(rendered.contains("  - region_id (INTEGER) [references regions.id]"));
    assert!(!rendered.contains("email"));
    assert!(!rendered.contains("Table: orders"));
}

#[test]
fn illegal_transition_surfaces_as_search_error() {
    let db = fixture_database().expect("fixture");
    let services = Services::new(&db);
    let oracle = RoutedOracle::new();
    let mut rng = StdRng::seed_from_u64(8);
    let end = child_of(
        &child_of(&root_node(), 1, ActionKind::SqlGeneration),
        2,
        ActionKind::End,
    );

    let err = apply(
        ActionKind::SqlRevision,
        &child_of(&root_node(), 1, ActionKind::RephraseQuestion),
        &services.context(&oracle),
        &mut rng,
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SearchError>(),
        Some(SearchError::IllegalTransition {
            from: NodeType::RephraseQuestion,
            action: ActionKind::SqlRevision,
        })
    ));

    let err = apply(
        ActionKind::End,
        &end,
        &services.context(&oracle),
        &mut rng,
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SearchError>(),
        Some(SearchError::TerminalNode { node: 2 })
    ));
    assert!(oracle.calls().is_empty());
}
