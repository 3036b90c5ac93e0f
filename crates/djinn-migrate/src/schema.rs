//! Declared schema derived from model metadata.
//!
//! A [`TableDefinition`] is what the models say a table should look like:
//! its columns with their rendered definitions, the join tables of its
//! many-to-many fields and the indexes of its `db_index` fields. The
//! synchronizer compares it with the live schema; `makemigrations`
//! snapshots it.

use std::sync::Arc;

use djinn_core::Dialect;
use djinn_orm::fields::{DefaultValue, Field, OnDelete, ReferencedKey};
use djinn_orm::Model;
use indexmap::IndexMap;

use crate::introspect::base_type;

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Bare column type.
    pub sql_type: String,
    /// Full definition fragment, e.g. `title TEXT NOT NULL`.
    pub definition: String,
    /// Definition used when adding the column to a table that already
    /// has rows. Set for NOT NULL columns without a static default, which
    /// existing rows could not satisfy.
    pub nullable_definition: Option<String>,
}

impl ColumnDefinition {
    /// Returns the base type used for comparisons.
    #[must_use]
    pub fn base_type(&self) -> String {
        base_type(&self.sql_type)
    }
}

/// One side of a join table: the referenced table and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSide {
    /// Join table column.
    pub column: String,
    /// Referenced table.
    pub table: String,
    /// Referenced key and its type.
    pub key: ReferencedKey,
}

impl JoinSide {
    fn definition(&self) -> ColumnDefinition {
        ColumnDefinition {
            name: self.column.clone(),
            sql_type: self.key.sql_type.clone(),
            definition: format!(
                "{} {} NOT NULL REFERENCES {}({}) ON DELETE {}",
                self.column,
                self.key.sql_type,
                self.table,
                self.key.column,
                OnDelete::Cascade.to_sql()
            ),
            nullable_definition: None,
        }
    }
}

/// The join table of a many-to-many field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    /// Join table name.
    pub name: String,
    /// Side referencing the declaring table.
    pub source: JoinSide,
    /// Side referencing the target table.
    pub target: JoinSide,
}

impl JoinTable {
    /// Returns the column definitions: both foreign keys, cascading on
    /// delete and typed after the keys they reference.
    #[must_use]
    pub fn columns(&self) -> Vec<ColumnDefinition> {
        vec![self.source.definition(), self.target.definition()]
    }

    /// Returns the `CREATE TABLE IF NOT EXISTS` statement, with a composite
    /// primary key over both columns.
    #[must_use]
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns().into_iter().map(|c| c.definition).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}, {}))",
            self.name,
            columns.join(", "),
            self.source.column,
            self.target.column
        )
    }
}

/// An index over one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index name, `idx_<table>_<column>`.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed column.
    pub column: String,
}

impl IndexDefinition {
    /// Returns the `CREATE INDEX IF NOT EXISTS` statement.
    #[must_use]
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.name, self.table, self.column
        )
    }
}

/// The declared shape of one model's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name.
    pub table: String,
    /// Columns in declaration order, keyed by name.
    pub columns: IndexMap<String, ColumnDefinition>,
    /// Join tables of the many-to-many fields.
    pub join_tables: Vec<JoinTable>,
    /// Indexes of the `db_index` fields.
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    /// Builds the definition of `model` on its own. Relations to other
    /// models are assumed to reference an integer `id`.
    #[must_use]
    pub fn for_model(model: &Model, dialect: Dialect) -> Self {
        Self::build(model, &[], dialect)
    }

    /// Builds the definition of every model, resolving the keys that
    /// foreign keys and join tables reference among `models`.
    #[must_use]
    pub fn for_models(models: &[Arc<Model>], dialect: Dialect) -> Vec<Self> {
        models
            .iter()
            .map(|model| Self::build(model, models, dialect))
            .collect()
    }

    fn build(model: &Model, models: &[Arc<Model>], dialect: Dialect) -> Self {
        let table = model.table().to_string();
        let resolve = |target: &str, column: Option<&str>| {
            find_model(model, models, target)
                .and_then(|target| target.referenced_key(column, dialect))
                .unwrap_or_else(|| ReferencedKey::unresolved(column))
        };

        let mut columns = IndexMap::new();
        let mut indexes = Vec::new();
        for (name, field) in model.fields() {
            let target = field
                .kind
                .foreign_key()
                .map(|spec| resolve(&spec.to, spec.to_field.as_deref()));
            let (Some(sql_type), Some(definition)) = (
                field.sql_type_for(dialect, target.as_ref()),
                field.render_column_sql_for(name, dialect, target.as_ref()),
            ) else {
                continue;
            };
            let column = field.column_name(name);
            if field.db_index && !field.primary_key && !field.unique {
                indexes.push(IndexDefinition {
                    name: format!("idx_{table}_{column}"),
                    table: table.clone(),
                    column: column.clone(),
                });
            }
            let nullable_definition = needs_backfill(field).then(|| {
                field
                    .clone()
                    .null(true)
                    .render_column_sql_for(name, dialect, target.as_ref())
                    .unwrap_or_else(|| definition.clone())
            });
            columns.insert(
                column.clone(),
                ColumnDefinition {
                    name: column,
                    sql_type,
                    definition,
                    nullable_definition,
                },
            );
        }

        let join_tables = model
            .many_to_many()
            .filter_map(|(_, field)| field.kind.many_to_many())
            .map(|spec| {
                let (source_column, target_column) = spec.join_columns(&table);
                JoinTable {
                    name: spec.join_table(&table),
                    source: JoinSide {
                        column: source_column,
                        table: table.clone(),
                        key: resolve(&table, None),
                    },
                    target: JoinSide {
                        column: target_column,
                        table: spec.to.clone(),
                        key: resolve(&spec.to, None),
                    },
                }
            })
            .collect();

        Self {
            table,
            columns,
            join_tables,
            indexes,
        }
    }

    /// Returns the `CREATE TABLE` statement for the declared columns.
    #[must_use]
    pub fn create_sql(&self) -> String {
        let columns: Vec<&str> = self
            .columns
            .values()
            .map(|column| column.definition.as_str())
            .collect();
        format!("CREATE TABLE {} ({})", self.table, columns.join(", "))
    }
}

/// Finds the model stored in `table`, `model` itself included.
fn find_model<'a>(model: &'a Model, models: &'a [Arc<Model>], table: &str) -> Option<&'a Model> {
    if model.table() == table {
        return Some(model);
    }
    models
        .iter()
        .find(|candidate| candidate.table() == table)
        .map(AsRef::as_ref)
}

/// Whether existing rows could not satisfy the column: NOT NULL with no
/// default the database can fill in.
fn needs_backfill(field: &Field) -> bool {
    !field.null
        && !field.primary_key
        && !field.kind.is_auto()
        && !matches!(field.default, Some(DefaultValue::Value(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinn_orm::fields::Field;

    fn post() -> Model {
        Model::builder("Post", "posts")
            .field("title", Field::char(200).db_index(true))
            .field("author", Field::foreign_key("users"))
            .field("tags", Field::many_to_many("tags"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_sql() {
        let def = TableDefinition::for_model(&post(), Dialect::Sqlite);
        assert_eq!(
            def.create_sql(),
            "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, \
             author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE)"
        );
        assert_eq!(def.columns["author_id"].sql_type, "INTEGER");
        assert_eq!(
            def.indexes[0].create_sql(),
            "CREATE INDEX IF NOT EXISTS idx_posts_title ON posts (title)"
        );
    }

    #[test]
    fn test_postgres_types() {
        let def = TableDefinition::for_model(&post(), Dialect::Postgres);
        assert_eq!(def.columns["id"].definition, "id SERIAL PRIMARY KEY");
        assert_eq!(def.columns["title"].sql_type, "VARCHAR(200)");
        assert_eq!(def.columns["title"].base_type(), "VARCHAR");
    }

    #[test]
    fn test_join_table() {
        let def = TableDefinition::for_model(&post(), Dialect::Sqlite);
        assert_eq!(def.join_tables.len(), 1);
        assert_eq!(
            def.join_tables[0].create_sql(),
            "CREATE TABLE IF NOT EXISTS posts_tags (\
             posts_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE, \
             tags_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE, \
             PRIMARY KEY (posts_id, tags_id))"
        );
    }

    #[test]
    fn test_join_table_resolves_target_key() {
        let tags = Model::builder("Tag", "tags")
            .field("slug", Field::slug().primary_key(true))
            .build()
            .unwrap();
        let defs = TableDefinition::for_models(&[Arc::new(post()), Arc::new(tags)], Dialect::Sqlite);
        let join = &defs[0].join_tables[0];
        assert_eq!(join.target.key.column, "slug");
        assert_eq!(
            join.columns()[1].definition,
            "tags_id TEXT NOT NULL REFERENCES tags(slug) ON DELETE CASCADE"
        );
        assert_eq!(join.columns()[0].sql_type, "INTEGER");
        assert!(defs[1].join_tables.is_empty());
    }

    #[test]
    fn test_foreign_key_resolves_target_key() {
        let countries = Model::builder("Country", "countries")
            .field("code", Field::char(2).primary_key(true))
            .build()
            .unwrap();
        let cities = Model::builder("City", "cities")
            .field("country", Field::foreign_key("countries"))
            .field("parent", Field::foreign_key("cities").null(true))
            .build()
            .unwrap();

        let defs = TableDefinition::for_models(&[Arc::new(countries), Arc::new(cities)], Dialect::Postgres);
        let country = &defs[1].columns["country_id"];
        assert_eq!(country.sql_type, "VARCHAR(2)");
        assert_eq!(
            country.definition,
            "country_id VARCHAR(2) NOT NULL REFERENCES countries(code) ON DELETE CASCADE"
        );
        assert_eq!(
            defs[1].columns["parent_id"].definition,
            "parent_id INTEGER REFERENCES cities(id) ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_nullable_definition_for_backfill() {
        let people = Model::builder("Person", "people")
            .field("email", Field::email())
            .field("nickname", Field::char(20).null(true))
            .field("active", Field::boolean().default(true))
            .field("joined", Field::datetime().auto_now_add(true))
            .build()
            .unwrap();
        let def = TableDefinition::for_model(&people, Dialect::Sqlite);
        assert_eq!(def.columns["id"].nullable_definition, None);
        assert_eq!(
            def.columns["email"].nullable_definition.as_deref(),
            Some("email TEXT")
        );
        assert_eq!(def.columns["nickname"].nullable_definition, None);
        assert_eq!(def.columns["active"].nullable_definition, None);
        assert_eq!(
            def.columns["joined"].nullable_definition.as_deref(),
            Some("joined TEXT")
        );
    }
}
