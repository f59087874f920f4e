//! Schema snapshot loading: JSON files validated against a JSON Schema, or
//! introspection of a live SQLite database.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::schema::{ColumnRef, ColumnSchema, SchemaSnapshot, TableSchema};
use crate::io::sqlite::open_read_only;

const SNAPSHOT_SCHEMA: &str = include_str!("schemas/schema_snapshot.schema.json");

/// Load a snapshot from a JSON file and fill in reverse foreign-key edges.
pub fn load_snapshot(path: &Path) -> Result<SchemaSnapshot> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read schema {}", path.display()))?;
    parse_snapshot(&raw).with_context(|| format!("load schema {}", path.display()))
}

/// Parse and validate snapshot JSON.
pub fn parse_snapshot(raw: &str) -> Result<SchemaSnapshot> {
    let instance: Value = serde_json::from_str(raw).context("parse schema json")?;
    let schema: Value =
        serde_json::from_str(SNAPSHOT_SCHEMA).context("parse built-in snapshot schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile snapshot schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    let mut snapshot: SchemaSnapshot =
        serde_json::from_value(instance).context("deserialize schema snapshot")?;
    snapshot.link_references();
    Ok(snapshot)
}

/// Build a snapshot from the tables of a SQLite database.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn introspect_sqlite(path: &Path) -> Result<SchemaSnapshot> {
    let conn =
        open_read_only(path).with_context(|| format!("open database {}", path.display()))?;

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
        )
        .context("list tables")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read table names")?;

    let mut tables = Vec::with_capacity(names.len());
    // (table index, column index, target table, target column if named)
    let mut pending: Vec<(usize, usize, String, Option<String>)> = Vec::new();
    for name in names {
        let mut column_stmt = conn
            .prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
            .context("prepare table_info")?;
        let columns = column_stmt
            .query_map([&name], |row| {
                let data_type: Option<String> = row.get(1)?;
                Ok(ColumnSchema {
                    name: row.get(0)?,
                    data_type: data_type.filter(|value| !value.is_empty()),
                    primary_key: row.get::<_, i64>(2)? > 0,
                    foreign_keys: Vec::new(),
                    referenced_by: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("read columns of {name}"))?;

        let mut fk_stmt = conn
            .prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)")
            .context("prepare foreign_key_list")?;
        let fks = fk_stmt
            .query_map([&name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("read foreign keys of {name}"))?;

        let table_idx = tables.len();
        for (from, target_table, target_column) in fks {
            if let Some(column_idx) = columns
                .iter()
                .position(|column| column.name.eq_ignore_ascii_case(&from))
            {
                pending.push((table_idx, column_idx, target_table, target_column));
            }
        }
        tables.push(TableSchema { name, columns });
    }

    // A foreign key without a target column points at the target's primary key.
    for (table_idx, column_idx, target_table, target_column) in pending {
        let column = match target_column {
            Some(column) => column,
            None => {
                let Some(pk) = tables
                    .iter()
                    .find(|table| table.name.eq_ignore_ascii_case(&target_table))
                    .and_then(|table| table.columns.iter().find(|column| column.primary_key))
                else {
                    continue;
                };
                pk.name.clone()
            }
        };
        tables[table_idx].columns[column_idx]
            .foreign_keys
            .push(ColumnRef {
                table: target_table,
                column,
            });
    }

    let mut snapshot = SchemaSnapshot { tables };
    snapshot.link_references();
    debug!(tables = snapshot.tables.len(), "schema introspected");
    Ok(snapshot)
}
