//! Live schema introspection.

use djinn_core::SqlValue;
use djinn_orm::{Connection, Record};
use indexmap::IndexMap;

use crate::error::Result;

/// A column as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, as written in the DDL.
    pub sql_type: String,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
    /// Default expression, if any.
    pub default: Option<String>,
}

impl ColumnInfo {
    /// Returns the base type: uppercased, without length or precision.
    #[must_use]
    pub fn base_type(&self) -> String {
        base_type(&self.sql_type)
    }
}

/// An index created with `CREATE INDEX`, as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// Normalizes a type name for comparison: `varchar(200)` and `VARCHAR`
/// compare equal.
#[must_use]
pub fn base_type(sql_type: &str) -> String {
    sql_type
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase()
}

/// Reads the structure of existing tables.
#[allow(async_fn_in_trait)]
pub trait Introspect {
    /// Returns whether `table` exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Returns the columns of `table` in table order, empty when the
    /// table does not exist.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Returns whether an index named `name` exists.
    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Returns the explicitly created indexes of `table`. Indexes backing
    /// PRIMARY KEY and UNIQUE constraints are left out.
    async fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>>;
}

/// Introspects SQLite through `sqlite_master` and `pragma_table_info`.
#[derive(Debug, Clone)]
pub struct SqliteIntrospector {
    conn: Connection,
}

impl SqliteIntrospector {
    /// Creates an introspector over `conn`.
    #[must_use]
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn master_entry_exists(&self, kind: &str, name: &str) -> Result<bool> {
        let rows = self
            .conn
            .fetch_all(
                "SELECT name FROM sqlite_master WHERE type = ? AND name = ?",
                &[
                    SqlValue::Text(kind.to_string()),
                    SqlValue::Text(name.to_string()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

impl Introspect for SqliteIntrospector {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        self.master_entry_exists("table", table).await
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self
            .conn
            .fetch_all(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        Ok(rows.iter().map(column_info).collect())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        self.master_entry_exists("index", name).await
    }

    async fn indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = self
            .conn
            .fetch_all(
                "SELECT il.name AS name, il.\"unique\" AS is_unique, ii.name AS column_name \
                 FROM pragma_index_list(?) AS il JOIN pragma_index_info(il.name) AS ii \
                 WHERE il.origin = 'c' ORDER BY il.name, ii.seqno",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;

        let mut indexes: IndexMap<String, IndexInfo> = IndexMap::new();
        for row in &rows {
            let Some(name) = row.get("name").and_then(SqlValue::as_str) else {
                continue;
            };
            let index = indexes.entry(name.to_string()).or_insert_with(|| IndexInfo {
                name: name.to_string(),
                columns: Vec::new(),
                unique: row.get("is_unique").and_then(SqlValue::as_i64).unwrap_or(0) != 0,
            });
            if let Some(column) = row.get("column_name").and_then(SqlValue::as_str) {
                index.columns.push(column.to_string());
            }
        }
        Ok(indexes.into_values().collect())
    }
}

fn column_info(row: &Record) -> ColumnInfo {
    let text = |key: &str| {
        row.get(key)
            .and_then(SqlValue::as_str)
            .map(str::to_string)
    };
    let flag = |key: &str| row.get(key).and_then(SqlValue::as_i64).unwrap_or(0);

    ColumnInfo {
        name: text("name").unwrap_or_default(),
        sql_type: text("type").unwrap_or_default(),
        nullable: flag("notnull") == 0,
        primary_key: flag("pk") > 0,
        default: text("dflt_value"),
    }
}
