//! Session-wide execution cache.
//!
//! Each `(database, normalized SQL)` pair is executed at most once per
//! session, timeouts and failures included. Concurrent callers asking for the
//! same key block on the first caller's execution instead of repeating it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use tracing::trace;

use crate::core::types::ExecutionResult;
use crate::io::sqlite::SqlExecutor;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub db_id: String,
    pub sql: String,
}

impl CacheKey {
    pub fn new(db_id: &str, sql: &str) -> Self {
        Self {
            db_id: db_id.to_string(),
            sql: normalize_sql(sql),
        }
    }
}

/// Normalize SQL text for cache lookups.
///
/// Comments (`-- ...` to end of line, `/* ... */`) are dropped, trailing
/// semicolons are dropped, whitespace runs collapse to one space and ASCII
/// letters are lowercased, except inside quoted regions (`'...'`, `"..."`,
/// `` `...` ``, `[...]`), which are kept verbatim.
pub fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut closing: Option<char> = None;
    let mut pending_space = false;

    while let Some(ch) = chars.next() {
        if let Some(close) = closing {
            out.push(ch);
            if ch == close {
                closing = None;
            }
            continue;
        }
        match ch {
            '-' if chars.peek() == Some(&'-') => {
                // The terminating newline separates tokens like any whitespace.
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                pending_space = true;
                continue;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                pending_space = true;
                continue;
            }
            c if c.is_whitespace() => {
                pending_space = true;
                continue;
            }
            _ => {}
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        match ch {
            '\'' | '"' | '`' => {
                closing = Some(ch);
                out.push(ch);
            }
            '[' => {
                closing = Some(']');
                out.push(ch);
            }
            _ => out.push(ch.to_ascii_lowercase()),
        }
    }

    let kept = out
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .len();
    out.truncate(kept);
    out
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Thread-safe, compute-once cache in front of a [`SqlExecutor`].
pub struct ExecutionCache {
    executor: Arc<dyn SqlExecutor>,
    timeout: Duration,
    entries: DashMap<CacheKey, Arc<OnceLock<ExecutionResult>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ExecutionCache {
    pub fn new(executor: Arc<dyn SqlExecutor>, timeout: Duration) -> Self {
        Self {
            executor,
            timeout,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute through the cache.
    pub fn execute(&self, db_id: &str, sql: &str) -> ExecutionResult {
        let key = CacheKey::new(db_id, sql);
        // Clone the cell out so the shard lock is released before executing.
        let cell = Arc::clone(self.entries.entry(key).or_default().value());
        let mut executed = false;
        let result = cell.get_or_init(|| {
            executed = true;
            self.executor.execute(db_id, sql, self.timeout)
        });
        if executed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(db_id, "execution cache hit");
        }
        result.clone()
    }

    /// Execute unconditionally and replace any cached result.
    pub fn execute_uncached(&self, db_id: &str, sql: &str) -> ExecutionResult {
        let result = self.executor.execute(db_id, sql, self.timeout);
        self.misses.fetch_add(1, Ordering::Relaxed);
        let cell = OnceLock::new();
        let _ = cell.set(result.clone());
        self.entries
            .insert(CacheKey::new(db_id, sql), Arc::new(cell));
        result
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
