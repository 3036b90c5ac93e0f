//! Migration files and the applied-migrations index.
//!
//! `makemigrations` snapshots the declared schema into
//! `<dir>/<NNNN>_auto_<YYYYmmddHHMMSS>.json`, a JSON object mapping each
//! table to its rendered column definitions. The index file
//! `<dir>/migrations.json` records which snapshots have been applied:
//!
//! ```json
//! { "applied": ["0001_auto_20250101120000", "0002_auto_20250102093000"] }
//! ```
//!
//! Snapshots document the schema's history; applying them never replays
//! it. [`migrate_recorded`] synchronizes against the live schema and then
//! marks every pending snapshot applied.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use djinn_core::Dialect;
use djinn_orm::{Connection, Model};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::schema::TableDefinition;
use crate::sync::{migrate, SyncReport};

/// Default directory holding migration files.
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Name of the index file inside the migrations directory.
pub const INDEX_FILE: &str = "migrations.json";

/// A schema snapshot: table -> column -> rendered definition.
pub type Snapshot = IndexMap<String, IndexMap<String, String>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    applied: Vec<String>,
}

/// Builds the snapshot of `models`, join tables included.
#[must_use]
pub fn snapshot(models: &[Arc<Model>], dialect: Dialect) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for definition in TableDefinition::for_models(models, dialect) {
        for join in &definition.join_tables {
            snapshot.insert(
                join.name.clone(),
                join.columns()
                    .into_iter()
                    .map(|column| (column.name, column.definition))
                    .collect(),
            );
        }
        snapshot.insert(
            definition.table,
            definition
                .columns
                .into_values()
                .map(|column| (column.name, column.definition))
                .collect(),
        );
    }
    snapshot
}

/// Migration files on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStore {
    dir: PathBuf,
}

impl Default for MigrationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MIGRATIONS_DIR)
    }
}

impl MigrationStore {
    /// Creates a store rooted at `dir`. Nothing is touched until a
    /// migration is written.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the migrations directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the index file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn migration_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Returns the names of every migration file, oldest first.
    pub fn migrations(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if is_migration_name(stem) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns the applied migration names in the order they were applied.
    ///
    /// A missing index means nothing has been applied.
    pub fn applied(&self) -> Result<Vec<String>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let index: Index = serde_json::from_str(&content).map_err(|e| MigrateError::ParseError {
            path,
            message: e.to_string(),
        })?;
        Ok(index.applied)
    }

    /// Returns the migration files not recorded as applied.
    pub fn pending(&self) -> Result<Vec<String>> {
        let applied = self.applied()?;
        Ok(self
            .migrations()?
            .into_iter()
            .filter(|name| !applied.contains(name))
            .collect())
    }

    /// Reads a migration file.
    pub fn load(&self, name: &str) -> Result<Snapshot> {
        let path = self.migration_path(name);
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| MigrateError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Records `names` as applied, keeping earlier entries.
    pub fn mark_applied(&self, names: &[String]) -> Result<()> {
        let mut applied = self.applied()?;
        for name in names {
            if !applied.contains(name) {
                applied.push(name.clone());
            }
        }
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(&Index { applied })?;
        fs::write(self.index_path(), content)?;
        Ok(())
    }

    /// Writes a snapshot of `models` as the next migration file and returns
    /// its name, or `None` when the schema matches the latest snapshot.
    pub fn makemigrations(&self, models: &[Arc<Model>], dialect: Dialect) -> Result<Option<String>> {
        let current = snapshot(models, dialect);
        let existing = self.migrations()?;

        if let Some(latest) = existing.last() {
            if self.load(latest)? == current {
                info!(latest = %latest, "No changes detected");
                return Ok(None);
            }
        }

        let name = format!(
            "{:04}_auto_{}",
            existing.len() + 1,
            Utc::now().format("%Y%m%d%H%M%S")
        );
        fs::create_dir_all(&self.dir)?;
        fs::write(
            self.migration_path(&name),
            serde_json::to_string_pretty(&current)?,
        )?;
        info!(name = %name, tables = current.len(), "Created migration");
        Ok(Some(name))
    }
}

/// Whether `stem` looks like `NNNN_<label>`.
fn is_migration_name(stem: &str) -> bool {
    stem.split_once('_').is_some_and(|(number, label)| {
        number.len() == 4 && number.bytes().all(|b| b.is_ascii_digit()) && !label.is_empty()
    })
}

/// Synchronizes the live schema with `models`, then marks every pending
/// migration file applied. Returns the report and the newly applied names.
///
/// # Errors
///
/// Nothing is marked applied when synchronization fails.
pub async fn migrate_recorded(
    store: &MigrationStore,
    conn: &Connection,
    models: &[Arc<Model>],
) -> Result<(SyncReport, Vec<String>)> {
    let pending = store.pending()?;
    let report = migrate(conn, models).await?;
    store.mark_applied(&pending)?;
    for name in &pending {
        info!(name = %name, "Marked migration applied");
    }
    Ok((report, pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinn_orm::fields::Field;

    fn models() -> Vec<Arc<Model>> {
        let tags = Model::builder("Tag", "tags")
            .field("name", Field::char(50))
            .build()
            .unwrap();
        let posts = Model::builder("Post", "posts")
            .field("title", Field::char(200))
            .field("tags", Field::many_to_many("tags"))
            .build()
            .unwrap();
        vec![Arc::new(tags), Arc::new(posts)]
    }

    #[test]
    fn test_migration_names() {
        assert!(is_migration_name("0001_auto_20250101120000"));
        assert!(is_migration_name("0012_initial"));
        assert!(!is_migration_name("migrations"));
        assert!(!is_migration_name("1_auto"));
        assert!(!is_migration_name("0001_"));
    }

    #[test]
    fn test_snapshot_includes_join_tables() {
        let snapshot = snapshot(&models(), Dialect::Sqlite);
        let tables: Vec<_> = snapshot.keys().map(String::as_str).collect();
        assert_eq!(tables, ["tags", "posts_tags", "posts"]);
        assert_eq!(snapshot["posts"]["title"], "title TEXT NOT NULL");
        assert_eq!(snapshot["posts_tags"].len(), 2);
    }

    #[test]
    fn test_makemigrations_writes_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path().join("migrations"));
        assert!(store.migrations().unwrap().is_empty());

        let first = store.makemigrations(&models(), Dialect::Sqlite).unwrap().unwrap();
        assert!(first.starts_with("0001_auto_"));
        assert_eq!(first.len(), "0001_auto_".len() + 14);
        assert!(store.dir().join(format!("{first}.json")).exists());

        assert_eq!(store.makemigrations(&models(), Dialect::Sqlite).unwrap(), None);

        let mut changed = models();
        changed.push(Arc::new(Model::builder("User", "users").build().unwrap()));
        let second = store.makemigrations(&changed, Dialect::Sqlite).unwrap().unwrap();
        assert!(second.starts_with("0002_auto_"));
        assert_eq!(store.migrations().unwrap(), [first, second]);
    }

    #[test]
    fn test_index_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        assert!(store.applied().unwrap().is_empty());

        let name = store.makemigrations(&models(), Dialect::Sqlite).unwrap().unwrap();
        assert_eq!(store.pending().unwrap(), [name.clone()]);

        store.mark_applied(&[name.clone()]).unwrap();
        store.mark_applied(&[name.clone()]).unwrap();
        assert_eq!(store.applied().unwrap(), [name]);
        assert!(store.pending().unwrap().is_empty());

        let index: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.index_path()).unwrap()).unwrap();
        assert_eq!(index["applied"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        fs::write(store.index_path(), "{ not json").unwrap();
        assert!(matches!(
            store.applied(),
            Err(MigrateError::ParseError { .. })
        ));
    }
}
