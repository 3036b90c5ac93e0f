//! Schema synchronization and migration files for djinn models.
//!
//! `djinn-migrate` keeps the database schema in line with the declared
//! [`Model`](djinn_orm::Model)s:
//!
//! - **Introspection** ([`introspect`]) reads the live schema
//! - **Schema** ([`schema`]) derives the declared tables, join tables and
//!   indexes from model metadata
//! - **Sync** ([`sync`]) creates missing tables, drops undeclared columns
//!   and adds missing ones
//! - **History** ([`history`]) writes migration snapshots and tracks which
//!   have been applied
//!
//! Column types are never altered in place: a declared column whose type
//! differs from the live one fails its table with
//! [`MigrateError::SchemaMismatch`].
//!
//! # Example
//!
//! ```rust,ignore
//! use djinn_migrate::{migrate, migrate_recorded, MigrationStore};
//!
//! let models: Vec<_> = registry.models().cloned().collect();
//!
//! // Synchronize directly.
//! let report = migrate(registry.connection(), &models).await?;
//! for (table, outcome) in &report.tables {
//!     println!("{table}: {outcome:?}");
//! }
//!
//! // Or snapshot first, then synchronize and record.
//! let store = MigrationStore::default();
//! store.makemigrations(&models, registry.connection().dialect())?;
//! migrate_recorded(&store, registry.connection(), &models).await?;
//! ```

pub mod error;
pub mod history;
pub mod introspect;
pub mod schema;
pub mod sync;

pub use error::{MigrateError, Result};
pub use history::{migrate_recorded, snapshot, MigrationStore, Snapshot};
pub use introspect::{ColumnInfo, IndexInfo, Introspect, SqliteIntrospector};
pub use schema::{ColumnDefinition, IndexDefinition, JoinSide, JoinTable, TableDefinition};
pub use sync::{migrate, SchemaSync, SyncReport, TableOutcome};
