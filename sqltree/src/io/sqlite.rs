//! SQL execution service backed by SQLite.
//!
//! Queries run on read-only connections. The wall-clock limit is enforced
//! inside the engine through a progress handler, so a runaway query is
//! interrupted by SQLite itself and reported as [`ExecutionResult::TimedOut`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::{debug, instrument};

use crate::core::types::{ExecutionResult, Row, SqlValue};

/// Executes SQL against a named database.
pub trait SqlExecutor: Send + Sync {
    /// Execute `sql` on `db_id`, never taking longer than `timeout`.
    ///
    /// Failures and timeouts are results, not errors.
    fn execute(&self, db_id: &str, sql: &str, timeout: Duration) -> ExecutionResult;
}

/// SQLite virtual-machine steps between deadline checks.
const PROGRESS_STEPS: i32 = 1_000;

/// Resolves database ids to SQLite files.
///
/// Explicit registrations win; otherwise `<root>/<id>/<id>.sqlite` and then
/// `<root>/<id>.sqlite` are tried.
#[derive(Debug, Clone, Default)]
pub struct DatabaseResolver {
    root: Option<PathBuf>,
    registered: HashMap<String, PathBuf>,
}

impl DatabaseResolver {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            registered: HashMap::new(),
        }
    }

    pub fn register(&mut self, db_id: impl Into<String>, path: impl Into<PathBuf>) {
        self.registered.insert(db_id.into(), path.into());
    }

    pub fn resolve(&self, db_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.registered.get(db_id) {
            return Some(path.clone());
        }
        let root = self.root.as_ref()?;
        [
            root.join(db_id).join(format!("{db_id}.sqlite")),
            root.join(format!("{db_id}.sqlite")),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
    }
}

/// [`SqlExecutor`] over SQLite database files.
#[derive(Debug, Clone, Default)]
pub struct SqliteExecutor {
    resolver: DatabaseResolver,
}

impl SqliteExecutor {
    pub fn new(resolver: DatabaseResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &DatabaseResolver {
        &self.resolver
    }
}

impl SqlExecutor for SqliteExecutor {
    #[instrument(skip_all, fields(db_id, timeout_ms = timeout.as_millis() as u64))]
    fn execute(&self, db_id: &str, sql: &str, timeout: Duration) -> ExecutionResult {
        let Some(path) = self.resolver.resolve(db_id) else {
            return ExecutionResult::Failed {
                reason: format!("unknown database {db_id}"),
            };
        };
        let conn = match open_read_only(&path) {
            Ok(conn) => conn,
            Err(err) => {
                return ExecutionResult::Failed {
                    reason: format!("open {}: {err}", path.display()),
                };
            }
        };
        let result = run_query(&conn, sql, timeout);
        debug!(success = result.is_success(), "query executed");
        result
    }
}

/// Open a read-only connection to `path`.
pub fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

/// Run one statement on `conn` with an engine-enforced deadline.
pub fn run_query(conn: &Connection, sql: &str, timeout: Duration) -> ExecutionResult {
    let deadline = Instant::now() + timeout;
    conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
    let result = collect_rows(conn, sql);
    conn.progress_handler(PROGRESS_STEPS, None::<fn() -> bool>);

    match result {
        Ok(rows) => ExecutionResult::Rows { rows },
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::OperationInterrupted => {
            ExecutionResult::TimedOut
        }
        Err(err) => ExecutionResult::Failed {
            reason: err.to_string(),
        },
    }
}

fn collect_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<Row>> {
    let sql = sql.trim().trim_end_matches(';');
    let mut stmt = conn.prepare(sql)?;
    let width = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(to_value(row.get_ref(idx)?));
        }
        out.push(values);
    }
    Ok(out)
}

fn to_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture_database;

    fn executor_for(path: &Path) -> SqliteExecutor {
        let mut resolver = DatabaseResolver::default();
        resolver.register("shop", path);
        SqliteExecutor::new(resolver)
    }

    #[test]
    fn returns_rows_for_valid_query() {
        let db = fixture_database().expect("fixture");
        let executor = executor_for(db.path());
        let result = executor.execute(
            "shop",
            "SELECT id, name FROM regions ORDER BY id;",
            Duration::from_secs(5),
        );
        assert_eq!(
            result,
            ExecutionResult::Rows {
                rows: vec![
                    vec![SqlValue::Integer(1), SqlValue::Text("North".to_string())],
                    vec![SqlValue::Integer(2), SqlValue::Text("South".to_string())],
                ],
            }
        );
    }

    #[test]
    fn reports_failure_for_missing_table() {
        let db = fixture_database().expect("fixture");
        let executor = executor_for(db.path());
        match executor.execute("shop", "SELECT * FROM suppliers", Duration::from_secs(5)) {
            ExecutionResult::Failed { reason } => assert!(reason.contains("suppliers")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn interrupts_runaway_query() {
        let db = fixture_database().expect("fixture");
        let executor = executor_for(db.path());
        let started = Instant::now();
        let result = executor.execute(
            "shop",
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
            Duration::from_millis(100),
        );
        assert_eq!(result, ExecutionResult::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn connections_are_read_only() {
        let db = fixture_database().expect("fixture");
        let executor = executor_for(db.path());
        let result = executor.execute("shop", "DELETE FROM regions", Duration::from_secs(5));
        assert!(matches!(result, ExecutionResult::Failed { .. }));
    }

    #[test]
    fn resolver_uses_directory_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let nested = temp.path().join("shop");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(nested.join("shop.sqlite"), b"").expect("write");
        std::fs::write(temp.path().join("flat.sqlite"), b"").expect("write");

        let resolver = DatabaseResolver::new(Some(temp.path().to_path_buf()));
        assert_eq!(resolver.resolve("shop"), Some(nested.join("shop.sqlite")));
        assert_eq!(
            resolver.resolve("flat"),
            Some(temp.path().join("flat.sqlite"))
        );
        assert_eq!(resolver.resolve("missing"), None);
    }

    #[test]
    fn unknown_database_is_a_failure() {
        let executor = SqliteExecutor::default();
        assert!(matches!(
            executor.execute("nope", "SELECT 1", Duration::from_secs(1)),
            ExecutionResult::Failed { .. }
        ));
    }
}
