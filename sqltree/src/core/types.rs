//! Shared deterministic types for the search core.
//!
//! These types define stable contracts between core components. They do not
//! depend on external state or I/O.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of reasoning state a node represents.
///
/// Every non-root node type is named after the action that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Root,
    RephraseQuestion,
    SchemaSelection,
    IdentifyColumnValues,
    IdentifyColumnFunctions,
    SqlGeneration,
    SqlRevision,
    End,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::RephraseQuestion => "rephrase_question",
            NodeType::SchemaSelection => "schema_selection",
            NodeType::IdentifyColumnValues => "identify_column_values",
            NodeType::IdentifyColumnFunctions => "identify_column_functions",
            NodeType::SqlGeneration => "sql_generation",
            NodeType::SqlRevision => "sql_revision",
            NodeType::End => "end",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == NodeType::End
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of actions that turn a node into children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RephraseQuestion,
    SchemaSelection,
    IdentifyColumnValues,
    IdentifyColumnFunctions,
    SqlGeneration,
    SqlRevision,
    End,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::RephraseQuestion,
        ActionKind::SchemaSelection,
        ActionKind::IdentifyColumnValues,
        ActionKind::IdentifyColumnFunctions,
        ActionKind::SqlGeneration,
        ActionKind::SqlRevision,
        ActionKind::End,
    ];

    /// Node type of the children this action produces.
    pub fn produces(self) -> NodeType {
        match self {
            ActionKind::RephraseQuestion => NodeType::RephraseQuestion,
            ActionKind::SchemaSelection => NodeType::SchemaSelection,
            ActionKind::IdentifyColumnValues => NodeType::IdentifyColumnValues,
            ActionKind::IdentifyColumnFunctions => NodeType::IdentifyColumnFunctions,
            ActionKind::SqlGeneration => NodeType::SqlGeneration,
            ActionKind::SqlRevision => NodeType::SqlRevision,
            ActionKind::End => NodeType::End,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.produces().as_str()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cell returned by the execution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    fn key(&self) -> KeyCell {
        match self {
            SqlValue::Null => KeyCell::Null,
            SqlValue::Integer(v) => KeyCell::Integer(*v),
            SqlValue::Real(v) => {
                // Integral reals compare equal to the matching integer.
                if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    KeyCell::Integer(*v as i64)
                } else {
                    KeyCell::Real(v.to_bits())
                }
            }
            SqlValue::Text(v) => KeyCell::Text(v.clone()),
            SqlValue::Blob(v) => KeyCell::Blob(v.clone()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v:?}"),
            SqlValue::Blob(v) => write!(f, "<blob {} bytes>", v.len()),
        }
    }
}

pub type Row = Vec<SqlValue>;

/// Outcome of executing one SQL string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Rows { rows: Vec<Row> },
    Failed { reason: String },
    TimedOut,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Rows { .. })
    }

    /// Canonical grouping key for successful results.
    pub fn result_key(&self) -> Option<ResultKey> {
        match self {
            ExecutionResult::Rows { rows } => Some(ResultKey::from_rows(rows)),
            _ => None,
        }
    }

    /// Short human-readable description used in revision prompts.
    pub fn summary(&self, max_rows: usize) -> String {
        match self {
            ExecutionResult::Rows { rows } if rows.is_empty() => {
                "query executed successfully and returned no rows".to_string()
            }
            ExecutionResult::Rows { rows } => {
                let mut lines = vec![format!("query returned {} row(s)", rows.len())];
                for row in rows.iter().take(max_rows) {
                    let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
                    lines.push(format!("({})", cells.join(", ")));
                }
                if rows.len() > max_rows {
                    lines.push(format!("... {} more", rows.len() - max_rows));
                }
                lines.join("\n")
            }
            ExecutionResult::Failed { reason } => format!("query failed: {reason}"),
            ExecutionResult::TimedOut => "query timed out".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum KeyCell {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

/// Order-independent representation of a row-set.
///
/// Two results with the same rows in a different order (or with repeated
/// rows) share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultKey(BTreeSet<Vec<KeyCell>>);

impl ResultKey {
    pub fn from_rows(rows: &[Row]) -> Self {
        Self(
            rows.iter()
                .map(|row| row.iter().map(SqlValue::key).collect())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
