//! Database schema snapshots and schema-selection closure.
//!
//! A [`SchemaSnapshot`] is read-only input. Schema selection derives filtered
//! views from it: the closure rule keeps every key column needed for joins
//! between selected tables, and selections are deduplicated by their
//! case-insensitive set of `(table, column)` pairs.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize, Serializer};

/// Sentinel meaning "every column of this table".
pub const KEEP_ALL: &str = "keep_all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    /// Columns this column references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ColumnRef>,
    /// Columns that reference this column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl SchemaSnapshot {
    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name))
    }

    /// Fill `referenced_by` from every column's `foreign_keys`.
    pub fn link_references(&mut self) {
        let mut reverse: Vec<(String, String, ColumnRef)> = Vec::new();
        for table in &self.tables {
            for column in &table.columns {
                for target in &column.foreign_keys {
                    reverse.push((
                        target.table.to_lowercase(),
                        target.column.to_lowercase(),
                        ColumnRef {
                            table: table.name.clone(),
                            column: column.name.clone(),
                        },
                    ));
                }
            }
        }
        for (table_key, column_key, source) in reverse {
            let Some(table) = self
                .tables
                .iter_mut()
                .find(|table| table.name.to_lowercase() == table_key)
            else {
                continue;
            };
            let Some(column) = table
                .columns
                .iter_mut()
                .find(|column| column.name.to_lowercase() == column_key)
            else {
                continue;
            };
            if !column.referenced_by.contains(&source) {
                column.referenced_by.push(source);
            }
        }
    }
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }
}

/// Columns chosen for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSelection {
    KeepAll,
    Columns(Vec<String>),
}

impl Serialize for TableSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TableSelection::KeepAll => serializer.serialize_str(KEEP_ALL),
            TableSelection::Columns(columns) => columns.serialize(serializer),
        }
    }
}

/// Table name (snapshot spelling) to selected columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectedSchema(pub BTreeMap<String, TableSelection>);

impl SelectedSchema {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn selects(&self, table: &str) -> Option<&TableSelection> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, selection)| selection)
    }
}

/// Apply the closure rule to a requested selection.
///
/// For every selected table, a column survives when it was requested, is a
/// primary key, references a selected table, or is referenced from a
/// selected table. `KeepAll` tables stay `KeepAll`; tables absent from the
/// snapshot are dropped.
pub fn close_selection(schema: &SchemaSnapshot, requested: &SelectedSchema) -> SelectedSchema {
    let selected_tables: HashSet<String> = requested
        .0
        .keys()
        .map(|name| name.to_lowercase())
        .collect();
    let is_selected = |table: &str| selected_tables.contains(&table.to_lowercase());

    let mut closed = BTreeMap::new();
    for table in &schema.tables {
        let Some(selection) = requested.selects(&table.name) else {
            continue;
        };
        let requested_columns: HashSet<String> = match selection {
            TableSelection::KeepAll => {
                closed.insert(table.name.clone(), TableSelection::KeepAll);
                continue;
            }
            TableSelection::Columns(columns) => {
                columns.iter().map(|column| column.to_lowercase()).collect()
            }
        };
        let kept = table
            .columns
            .iter()
            .filter(|column| {
                requested_columns.contains(&column.name.to_lowercase())
                    || column.primary_key
                    || column.foreign_keys.iter().any(|fk| is_selected(&fk.table))
                    || column.referenced_by.iter().any(|rf| is_selected(&rf.table))
            })
            .map(|column| column.name.clone())
            .collect();
        closed.insert(table.name.clone(), TableSelection::Columns(kept));
    }
    SelectedSchema(closed)
}

/// Case-insensitive `(table, column)` pairs covered by `selection`.
pub fn canonical_form(
    schema: &SchemaSnapshot,
    selection: &SelectedSchema,
) -> BTreeSet<(String, String)> {
    let mut pairs = BTreeSet::new();
    for (table_name, table_selection) in &selection.0 {
        let table_key = table_name.to_lowercase();
        match table_selection {
            TableSelection::KeepAll => {
                if let Some(table) = schema.table(table_name) {
                    for column in &table.columns {
                        pairs.insert((table_key.clone(), column.name.to_lowercase()));
                    }
                }
            }
            TableSelection::Columns(columns) => {
                for column in columns {
                    pairs.insert((table_key.clone(), column.to_lowercase()));
                }
            }
        }
    }
    pairs
}

/// Accepted selections, unique by canonical form, in first-seen order.
#[derive(Debug, Default)]
pub struct SelectionSet {
    seen: HashSet<BTreeSet<(String, String)>>,
    accepted: Vec<SelectedSchema>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close `requested` and keep it unless an equivalent selection was seen.
    pub fn insert(&mut self, schema: &SchemaSnapshot, requested: &SelectedSchema) -> bool {
        let closed = close_selection(schema, requested);
        if closed.is_empty() {
            return false;
        }
        if !self.seen.insert(canonical_form(schema, &closed)) {
            return false;
        }
        self.accepted.push(closed);
        true
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    pub fn into_vec(self) -> Vec<SelectedSchema> {
        self.accepted
    }
}

/// Render the full schema in snapshot order.
pub fn render_schema(schema: &SchemaSnapshot) -> String {
    let mut blocks = Vec::with_capacity(schema.tables.len());
    for table in &schema.tables {
        let columns: Vec<&ColumnSchema> = table.columns.iter().collect();
        blocks.push(render_table(&table.name, &columns));
    }
    blocks.join("\n\n")
}

/// Render a filtered schema; columns inside each table come out shuffled.
pub fn render_selected<R: Rng + ?Sized>(
    schema: &SchemaSnapshot,
    selection: &SelectedSchema,
    rng: &mut R,
) -> String {
    let mut blocks = Vec::new();
    for table in &schema.tables {
        let Some(table_selection) = selection.selects(&table.name) else {
            continue;
        };
        let mut columns: Vec<&ColumnSchema> = match table_selection {
            TableSelection::KeepAll => table.columns.iter().collect(),
            TableSelection::Columns(names) => table
                .columns
                .iter()
                .filter(|column| names.iter().any(|n| n.eq_ignore_ascii_case(&column.name)))
                .collect(),
        };
        columns.shuffle(rng);
        blocks.push(render_table(&table.name, &columns));
    }
    blocks.join("\n\n")
}

fn render_table(name: &str, columns: &[&ColumnSchema]) -> String {
    let mut lines = vec![format!("Table: {name}")];
    for column in columns {
        lines.push(render_column(column));
    }
    lines.join("\n")
}

fn render_column(column: &ColumnSchema) -> String {
    let mut line = format!("  - {}", column.name);
    if let Some(data_type) = column.data_type.as_deref().filter(|t| !t.is_empty()) {
        line.push_str(&format!(" ({data_type})"));
    }
    if column.primary_key {
        line.push_str(" [primary key]");
    }
    for target in &column.foreign_keys {
        line.push_str(&format!(" [references {}.{}]", target.table, target.column));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_schema;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn select(pairs: &[(&str, &[&str])]) -> SelectedSchema {
        SelectedSchema(
            pairs
                .iter()
                .map(|(table, columns)| {
                    (
                        table.to_string(),
                        TableSelection::Columns(columns.iter().map(|c| c.to_string()).collect()),
                    )
                })
                .collect(),
        )
    }

    fn columns_of<'a>(selection: &'a SelectedSchema, table: &str) -> &'a [String] {
        match selection.0.get(table) {
            Some(TableSelection::Columns(columns)) => columns,
            other => panic!("expected explicit columns for {table}, got {other:?}"),
        }
    }

    #[test]
    fn closure_keeps_foreign_key_to_selected_table() {
        let schema = sample_schema();
        let closed = close_selection(
            &schema,
            &select(&[("customers", &["name"]), ("regions", &["name"])]),
        );

        let customers = columns_of(&closed, "customers");
        assert!(customers.contains(&"name".to_string()));
        assert!(customers.contains(&"region_id".to_string()));
        assert!(customers.contains(&"id".to_string()));
        assert!(!customers.contains(&"email".to_string()));
        // regions.id is both a primary key and referenced by customers.
        assert!(columns_of(&closed, "regions").contains(&"id".to_string()));
    }

    #[test]
    fn closure_drops_foreign_key_to_unselected_table() {
        let schema = sample_schema();
        let closed = close_selection(&schema, &select(&[("customers", &["name"])]));
        let customers = columns_of(&closed, "customers");
        assert!(!customers.contains(&"region_id".to_string()));
        assert_eq!(customers, &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn closure_keeps_columns_referenced_from_selected_table() {
        let schema = sample_schema();
        let closed = close_selection(
            &schema,
            &select(&[("orders", &["amount"]), ("customers", &["email"])]),
        );
        assert!(columns_of(&closed, "orders").contains(&"customer_id".to_string()));
        assert!(columns_of(&closed, "customers").contains(&"id".to_string()));
    }

    #[test]
    fn selection_set_dedupes_case_insensitively() {
        let schema = sample_schema();
        let mut set = SelectionSet::new();
        assert!(set.insert(&schema, &select(&[("customers", &["name"])])));
        assert!(!set.insert(&schema, &select(&[("CUSTOMERS", &["NAME", "id"])])));
        assert!(set.insert(&schema, &select(&[("customers", &["email"])])));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn keep_all_expands_in_canonical_form() {
        let schema = sample_schema();
        let mut all = SelectedSchema::default();
        all.0.insert("regions".to_string(), TableSelection::KeepAll);
        let explicit = select(&[("regions", &["id", "name"])]);
        assert_eq!(
            canonical_form(&schema, &all),
            canonical_form(&schema, &close_selection(&schema, &explicit))
        );
    }

    #[test]
    fn link_references_fills_reverse_edges() {
        let mut schema = sample_schema();
        for table in &mut schema.tables {
            for column in &mut table.columns {
                column.referenced_by.clear();
            }
        }
        schema.link_references();
        let regions_id = schema
            .table("regions")
            .and_then(|t| t.column("id"))
            .expect("regions.id");
        assert_eq!(
            regions_id.referenced_by,
            vec![ColumnRef {
                table: "customers".to_string(),
                column: "region_id".to_string(),
            }]
        );
    }

    #[test]
    fn render_selected_only_lists_selected_columns() {
        let schema = sample_schema();
        let closed = close_selection(&schema, &select(&[("customers", &["name"])]));
        let mut rng = StdRng::seed_from_u64(7);
        let rendered = render_selected(&schema, &closed, &mut rng);
        assert!(rendered.starts_with("Table: customers"));
        assert!(rendered.contains("  - name"));
        assert!(rendered.contains("  - id (INTEGER) [primary key]"));
        assert!(!rendered.contains("email"));
        assert!(!rendered.contains("Table: regions"));
    }

    #[test]
    fn render_schema_marks_foreign_keys() {
        let rendered = render_schema(&sample_schema());
        assert!(rendered.contains("  - region_id (INTEGER) [references regions.id]"));
    }
}
