//! Parsing of oracle completions.
//!
//! A completion that yields nothing parseable is simply discarded by the
//! caller; these helpers never fail loudly.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::schema::{KEEP_ALL, SchemaSnapshot, SelectedSchema, TableSelection};

static SQL_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```sql\s*(.*?)```").expect("sql block regex"));
static JSON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```json\s*(.*?)```").expect("json block regex"));

/// SQL from the last fenced `sql` block of a completion.
pub fn extract_sql(completion: &str) -> Option<String> {
    let caps = SQL_BLOCK_RE.captures_iter(completion).last()?;
    let sql = caps.get(1)?.as_str().trim();
    let sql = sql.trim_end_matches(';').trim_end();
    if sql.is_empty() {
        return None;
    }
    Some(sql.to_string())
}

/// Parse a schema selection: a JSON object mapping table to a column list
/// (or to `"keep_all"` / `["*"]`).
///
/// Names are matched case-insensitively and rewritten to the snapshot's
/// spelling. Unknown tables or an empty selection reject the completion;
/// unknown columns are ignored.
pub fn parse_selection(schema: &SchemaSnapshot, completion: &str) -> Option<SelectedSchema> {
    let value = json_payload(completion)?;
    let object = value.as_object()?;

    let mut selected = BTreeMap::new();
    for (table_name, columns) in object {
        let table = schema.table(table_name)?;
        let selection = match columns {
            Value::String(s) if s.eq_ignore_ascii_case(KEEP_ALL) || s == "*" => {
                TableSelection::KeepAll
            }
            Value::Array(items) => {
                let names: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                if names.iter().any(|name| *name == "*") {
                    TableSelection::KeepAll
                } else {
                    TableSelection::Columns(
                        names
                            .iter()
                            .filter_map(|name| table.column(name))
                            .map(|column| column.name.clone())
                            .collect(),
                    )
                }
            }
            _ => return None,
        };
        selected.insert(table.name.clone(), selection);
    }
    if selected.is_empty() {
        return None;
    }
    Some(SelectedSchema(selected))
}

fn json_payload(completion: &str) -> Option<Value> {
    if let Some(caps) = JSON_BLOCK_RE.captures_iter(completion).last() {
        return serde_json::from_str(caps.get(1)?.as_str().trim()).ok();
    }
    last_object(completion)
}

/// The last top-level JSON object embedded in free text.
///
/// Each `{` is tried as the start of a value; braces in the surrounding prose
/// that do not open a valid object are skipped.
fn last_object(text: &str) -> Option<Value> {
    let mut found = None;
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => {
                pos = start + stream.byte_offset();
                found = Some(value);
            }
            _ => pos = start + 1,
        }
    }
    found
}

/// Non-blank completions with exact duplicates removed, in order.
///
/// Duplicates are matched on the raw text, so responses differing only in
/// surrounding whitespace are distinct.
pub fn unique_responses(completions: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    completions
        .into_iter()
        .filter(|text| !text.trim().is_empty())
        .filter(|text| seen.insert(text.clone()))
        .collect()
}
