//! Model metadata and fetched instances.
//!
//! A [`Model`] describes one table: its name, its ordered fields and its
//! primary key. Models are declared at runtime with [`ModelBuilder`] and are
//! immutable once built.
//!
//! # Example
//!
//! ```rust
//! use djinn_orm::fields::Field;
//! use djinn_orm::Model;
//!
//! let post = Model::builder("Post", "posts")
//!     .field("title", Field::char(200))
//!     .field("author", Field::foreign_key("users"))
//!     .field("tags", Field::many_to_many("tags"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(post.pk_name(), "id");
//! assert_eq!(post.column_names(), ["id", "title", "author_id"]);
//! ```

use std::sync::Arc;

use djinn_core::{check_identifier, Dialect, SqlValue, ToSqlValue};
use indexmap::IndexMap;

use crate::error::{OrmError, Result};
use crate::fields::{Field, ReferencedKey};

/// A row as an ordered map of column name to value.
pub type Record = IndexMap<String, SqlValue>;

/// Immutable metadata for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    name: String,
    table: String,
    fields: IndexMap<String, Field>,
    pk_name: String,
}

impl Model {
    /// Starts declaring a model.
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name, table)
    }

    /// Returns the model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub const fn fields(&self) -> &IndexMap<String, Field> {
        &self.fields
    }

    /// Returns a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Returns the primary key column name.
    #[must_use]
    pub fn pk_name(&self) -> &str {
        &self.pk_name
    }

    /// Returns the primary key field.
    #[must_use]
    pub fn pk_field(&self) -> Option<&Field> {
        self.fields.get(&self.pk_name)
    }

    /// Returns the column storing the primary key.
    #[must_use]
    pub fn pk_column(&self) -> String {
        self.pk_field()
            .map_or_else(|| self.pk_name.clone(), |field| field.column_name(&self.pk_name))
    }

    /// Returns the key a relation to this model points at: `column` when
    /// given, the primary key otherwise. `None` when no stored field has
    /// that column.
    #[must_use]
    pub fn referenced_key(&self, column: Option<&str>, dialect: Dialect) -> Option<ReferencedKey> {
        let column = column.map_or_else(|| self.pk_column(), str::to_string);
        let (column, _, field) = self.resolve_column(&column)?;
        Some(ReferencedKey {
            column,
            sql_type: field.reference_type(dialect)?,
        })
    }

    /// Iterates over `(column, field name, field)` for every field stored in
    /// the model's table.
    pub fn columns(&self) -> impl Iterator<Item = (String, &str, &Field)> {
        self.fields
            .iter()
            .filter(|(_, field)| field.has_column())
            .map(|(name, field)| (field.column_name(name), name.as_str(), field))
    }

    /// Returns the table's column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns().map(|(column, _, _)| column).collect()
    }

    /// Resolves a column name or a foreign key field name to its column
    /// and field.
    #[must_use]
    pub fn resolve_column(&self, key: &str) -> Option<(String, &str, &Field)> {
        self.columns()
            .find(|(column, name, _)| column == key || *name == key)
    }

    /// Iterates over the many-to-many fields.
    pub fn many_to_many(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields
            .iter()
            .filter(|(_, field)| !field.has_column())
            .map(|(name, field)| (name.as_str(), field))
    }
}

/// Builder for [`Model`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    name: String,
    table: String,
    fields: Vec<(String, Field)>,
}

impl ModelBuilder {
    /// Creates a builder for the model `name` stored in `table`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Validates the declaration and builds the model.
    ///
    /// Adds an auto-incrementing `id` primary key when none is declared.
    ///
    /// # Errors
    ///
    /// - [`OrmError::InvalidIdentifier`] when the table or a field name is
    ///   not a safe SQL identifier
    /// - [`OrmError::Configuration`] for duplicate field names, more than
    ///   one primary key, or a non-key field named `id` on a model without
    ///   a primary key
    pub fn build(self) -> Result<Model> {
        check_identifier(&self.table)?;

        let mut fields = IndexMap::with_capacity(self.fields.len() + 1);
        for (name, field) in self.fields {
            check_identifier(&name)?;
            check_identifier(&field.column_name(&name))?;
            if let Some(spec) = field.kind.foreign_key() {
                check_identifier(&spec.to)?;
                if let Some(to_field) = &spec.to_field {
                    check_identifier(to_field)?;
                }
            }
            if let Some(spec) = field.kind.many_to_many() {
                check_identifier(&spec.to)?;
                check_identifier(&spec.join_table(&self.table))?;
            }
            if fields.insert(name.clone(), field).is_some() {
                return Err(OrmError::Configuration(format!(
                    "model {} declares field {name:?} twice",
                    self.name
                )));
            }
        }

        let mut keys = fields
            .iter()
            .filter(|(_, field)| field.primary_key)
            .map(|(name, _)| name.clone());
        let pk_name = match (keys.next(), keys.next()) {
            (Some(pk), None) => pk,
            (Some(first), Some(second)) => {
                return Err(OrmError::Configuration(format!(
                    "model {} declares more than one primary key ({first}, {second})",
                    self.name
                )));
            }
            (None, _) => {
                if fields.contains_key("id") {
                    return Err(OrmError::Configuration(format!(
                        "model {} has a field named id that is not its primary key",
                        self.name
                    )));
                }
                fields.shift_insert(0, String::from("id"), Field::auto());
                String::from("id")
            }
        };

        Ok(Model {
            name: self.name,
            table: self.table,
            fields,
            pk_name,
        })
    }
}

static NULL: SqlValue = SqlValue::Null;

/// A fetched row bound to its model.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    model: Arc<Model>,
    record: Record,
}

impl Instance {
    /// Wraps a record fetched for `model`.
    #[must_use]
    pub const fn new(model: Arc<Model>, record: Record) -> Self {
        Self { model, record }
    }

    /// Returns the model.
    #[must_use]
    pub const fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns a column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.record.get(column)
    }

    /// Returns the primary key value, NULL if the row lacks it.
    #[must_use]
    pub fn pk(&self) -> &SqlValue {
        self.record
            .get(&self.model.pk_column())
            .unwrap_or(&NULL)
    }

    /// Sets a value in memory. Field names resolve to their column; nothing
    /// is written until the instance is saved.
    pub fn set(&mut self, key: &str, value: impl ToSqlValue) {
        let column = self
            .model
            .resolve_column(key)
            .map_or_else(|| key.to_string(), |(column, _, _)| column);
        self.record.insert(column, value.to_sql_value());
    }

    /// Returns the underlying record.
    #[must_use]
    pub const fn record(&self) -> &Record {
        &self.record
    }

    /// Consumes the instance and returns its record.
    #[must_use]
    pub fn into_record(self) -> Record {
        self.record
    }

    /// Converts the row into a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.record
                .iter()
                .map(|(column, value)| (column.clone(), value.to_json()))
                .collect(),
        )
    }
}
