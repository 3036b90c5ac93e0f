//! Schema synchronization.
//!
//! [`SchemaSync::migrate`] brings the live schema in line with the declared
//! models without replaying any history:
//!
//! - a missing table is created together with its join tables and indexes
//! - an existing table loses the columns no model declares, along with the
//!   indexes over them, and gains the declared columns it lacks
//! - a NOT NULL column added to a table that already has rows is added as
//!   nullable, since existing rows have no value for it
//! - a declared column whose type changed is reported and left alone
//!
//! Each table is handled on its own. A failing table is logged and
//! collected, the remaining tables are still processed, and every failure
//! is returned at the end as [`MigrateError::Multiple`].

use std::collections::HashSet;
use std::sync::Arc;

use djinn_orm::{Connection, Model};
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::error::{MigrateError, Result};
use crate::introspect::{Introspect, SqliteIntrospector};
use crate::schema::TableDefinition;

/// What synchronization did to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// The table did not exist and was created.
    Created,
    /// Nothing had to change.
    UpToDate,
    /// The table existed and was altered.
    Synchronized {
        /// Columns dropped because no model declares them.
        dropped: Vec<String>,
        /// Declared columns that were added.
        added: Vec<String>,
    },
}

/// The result of a synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Every executed statement, in order.
    pub statements: Vec<String>,
    /// Outcome per table, in model order.
    pub tables: IndexMap<String, TableOutcome>,
}

impl SyncReport {
    /// Returns whether no statement was executed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Synchronizes model tables with the live schema.
#[derive(Debug, Clone)]
pub struct SchemaSync<I: Introspect = SqliteIntrospector> {
    conn: Connection,
    introspector: I,
}

impl SchemaSync {
    /// Creates a synchronizer introspecting SQLite through `conn`.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        let introspector = SqliteIntrospector::new(conn.clone());
        Self { conn, introspector }
    }
}

impl<I: Introspect> SchemaSync<I> {
    /// Creates a synchronizer with a custom introspector.
    #[must_use]
    pub const fn with_introspector(conn: Connection, introspector: I) -> Self {
        Self { conn, introspector }
    }

    /// Synchronizes every model's table.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Multiple`] holding one
    /// [`MigrateError::TableFailed`] per failed table, after every table
    /// has been processed.
    pub async fn migrate(&self, models: &[Arc<Model>]) -> Result<SyncReport> {
        let dialect = self.conn.dialect();
        let mut report = SyncReport::default();
        let mut failures = Vec::new();

        for definition in TableDefinition::for_models(models, dialect) {
            let table = definition.table.clone();
            match self.sync_table(&definition, &mut report).await {
                Ok(outcome) => {
                    report.tables.insert(table, outcome);
                }
                Err(err) => {
                    error!(table = %table, error = %err, "failed to synchronize table");
                    failures.push(MigrateError::TableFailed {
                        table,
                        source: Box::new(err),
                    });
                }
            }
        }

        if failures.is_empty() {
            info!(statements = report.statements.len(), "schema synchronized");
            Ok(report)
        } else {
            Err(MigrateError::Multiple(failures))
        }
    }

    async fn execute(&self, sql: String, report: &mut SyncReport) -> Result<()> {
        debug!(sql = %sql, "Executing SQL");
        self.conn.execute(&sql, &[]).await?;
        report.statements.push(sql);
        Ok(())
    }

    async fn sync_table(
        &self,
        definition: &TableDefinition,
        report: &mut SyncReport,
    ) -> Result<TableOutcome> {
        let table = &definition.table;

        if !self.introspector.table_exists(table).await? {
            self.execute(definition.create_sql(), report).await?;
            self.ensure_related(definition, report).await?;
            info!(table = %table, "created");
            return Ok(TableOutcome::Created);
        }

        let before = report.statements.len();
        let actual = self.introspector.columns(table).await?;

        for info in &actual {
            if let Some(declared) = definition.columns.get(&info.name) {
                let (declared_type, actual_type) = (declared.base_type(), info.base_type());
                if declared_type != actual_type {
                    warn!(table = %table, column = %info.name, declared = %declared_type, actual = %actual_type, "column type mismatch");
                    return Err(MigrateError::SchemaMismatch {
                        table: table.clone(),
                        column: info.name.clone(),
                        declared: declared_type,
                        actual: actual_type,
                    });
                }
            }
        }

        let mut dropped = Vec::new();
        let extra: Vec<&str> = actual
            .iter()
            .map(|info| info.name.as_str())
            .filter(|name| !definition.columns.contains_key(*name))
            .collect();
        if !extra.is_empty() {
            self.drop_indexes_covering(table, &extra, report).await?;
        }
        for info in &actual {
            if !definition.columns.contains_key(&info.name) {
                info!(table = %table, column = %info.name, "dropping column");
                self.execute(format!("ALTER TABLE {table} DROP COLUMN {}", info.name), report)
                    .await?;
                dropped.push(info.name.clone());
            }
        }

        let present: HashSet<String> = if dropped.is_empty() {
            actual.into_iter().map(|info| info.name).collect()
        } else {
            self.introspector
                .columns(table)
                .await?
                .into_iter()
                .map(|info| info.name)
                .collect()
        };

        let mut added = Vec::new();
        let mut populated = None;
        for column in definition.columns.values() {
            if present.contains(&column.name) {
                continue;
            }
            let mut sql = &column.definition;
            if let Some(nullable) = &column.nullable_definition {
                let has_rows = match populated {
                    Some(has_rows) => has_rows,
                    None => {
                        let has_rows = self.has_rows(table).await?;
                        populated = Some(has_rows);
                        has_rows
                    }
                };
                if has_rows {
                    warn!(table = %table, column = %column.name, "table has rows, adding NOT NULL column as nullable");
                    sql = nullable;
                }
            }
            info!(table = %table, column = %column.name, "adding column");
            self.execute(format!("ALTER TABLE {table} ADD COLUMN {sql}"), report)
                .await?;
            added.push(column.name.clone());
        }

        self.ensure_related(definition, report).await?;

        if report.statements.len() == before {
            info!(table = %table, "up to date");
            Ok(TableOutcome::UpToDate)
        } else {
            info!(table = %table, dropped = dropped.len(), added = added.len(), "synchronized");
            Ok(TableOutcome::Synchronized { dropped, added })
        }
    }

    async fn has_rows(&self, table: &str) -> Result<bool> {
        let rows = self
            .conn
            .fetch_all(&format!("SELECT 1 AS present FROM {table} LIMIT 1"), &[])
            .await?;
        Ok(!rows.is_empty())
    }

    /// Drops the indexes over any of `columns`; SQLite refuses to drop an
    /// indexed column.
    async fn drop_indexes_covering(
        &self,
        table: &str,
        columns: &[&str],
        report: &mut SyncReport,
    ) -> Result<()> {
        let dialect = self.conn.dialect();
        for index in self.introspector.indexes(table).await? {
            if index.columns.iter().any(|column| columns.contains(&column.as_str())) {
                info!(table = %table, index = %index.name, "dropping index");
                self.execute(
                    format!("DROP INDEX IF EXISTS {}", dialect.quote_identifier(&index.name)),
                    report,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Creates the join tables and indexes that do not exist yet.
    async fn ensure_related(&self, definition: &TableDefinition, report: &mut SyncReport) -> Result<()> {
        for join in &definition.join_tables {
            if !self.introspector.table_exists(&join.name).await? {
                info!(table = %join.name, "creating join table");
                self.execute(join.create_sql(), report).await?;
            }
        }
        for index in &definition.indexes {
            if !self.introspector.index_exists(&index.name).await? {
                self.execute(index.create_sql(), report).await?;
            }
        }
        Ok(())
    }
}

/// Synchronizes the tables of `models` over `conn`.
///
/// # Errors
///
/// See [`SchemaSync::migrate`].
pub async fn migrate(conn: &Connection, models: &[Arc<Model>]) -> Result<SyncReport> {
    SchemaSync::new(conn.clone()).migrate(models).await
}
