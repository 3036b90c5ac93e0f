//! Relation registry.
//!
//! Relations are resolved explicitly rather than attached to model types:
//! once every model is known, [`RelationRegistry::register_models`] walks
//! the relational fields and records, per `(table, name)`, how to reach the
//! related rows. [`RelationRegistry::related`] then turns an instance and a
//! relation name into a queryset or a join-table accessor.
//!
//! Given `Post { author: ForeignKey(users), tags: ManyToMany(tags) }`:
//!
//! | table | name | relation |
//! |---|---|---|
//! | `users` | `posts_set` | posts where `author_id = user.id` |
//! | `posts` | `tags` | tags joined through `posts_tags` |
//! | `tags` | `posts_set` | posts joined through `posts_tags` |

use std::sync::Arc;

use djinn_core::{SqlValue, ToSqlValue};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{OrmError, Result};
use crate::model::{Instance, Model};
use crate::query::Criteria;
use crate::queryset::QuerySet;

/// How to reach related rows from an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    /// Rows of `source` whose `column` references the instance.
    Reverse {
        /// Model declaring the foreign key.
        source: Arc<Model>,
        /// Foreign key column on `source`.
        column: String,
        /// Referenced column on the instance's table.
        target_field: String,
    },
    /// Rows of `target` linked through a join table.
    ManyToMany {
        /// Model reached through the join table.
        target: Arc<Model>,
        /// Join table name.
        join_table: String,
        /// Join column referencing the instance.
        owner_column: String,
        /// Join column referencing `target`.
        target_column: String,
    },
}

/// The resolved side of a relation.
#[derive(Debug, Clone)]
pub enum Related {
    /// Reverse foreign key: a filtered queryset of the declaring model.
    Many(QuerySet),
    /// Many-to-many: an accessor over the join table.
    Through(ManyToManyAccessor),
}

impl Related {
    /// Returns the queryset of a reverse foreign key.
    #[must_use]
    pub fn into_queryset(self) -> Option<QuerySet> {
        match self {
            Self::Many(qs) => Some(qs),
            Self::Through(_) => None,
        }
    }

    /// Returns the accessor of a many-to-many relation.
    #[must_use]
    pub fn into_accessor(self) -> Option<ManyToManyAccessor> {
        match self {
            Self::Many(_) => None,
            Self::Through(accessor) => Some(accessor),
        }
    }
}

/// Every relation of a set of models, keyed by `(table, relation name)`.
#[derive(Debug, Clone)]
pub struct RelationRegistry {
    conn: Connection,
    relations: IndexMap<(String, String), Relation>,
}

impl RelationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            relations: IndexMap::new(),
        }
    }

    /// Returns the relation registered as `name` on `table`.
    #[must_use]
    pub fn get(&self, table: &str, name: &str) -> Option<&Relation> {
        self.relations
            .get(&(table.to_string(), name.to_string()))
    }

    /// Returns the names of the relations registered on `table`.
    pub fn names<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.relations
            .keys()
            .filter(move |(t, _)| t == table)
            .map(|(_, name)| name.as_str())
    }

    /// Returns the number of registered relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Returns whether no relation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Registers the relations of every foreign key, one-to-one and
    /// many-to-many field of `models`.
    ///
    /// Registering an identical relation twice is a no-op. A different
    /// relation under a name already taken is skipped; every such name is
    /// reported once all models have been processed.
    ///
    /// # Errors
    ///
    /// - [`OrmError::UnknownModel`] when a many-to-many field targets a
    ///   table none of `models` is stored in (nothing is registered)
    /// - [`OrmError::RelationCollision`] listing the skipped
    ///   `table.name` pairs
    pub fn register_models(&mut self, models: &[Arc<Model>]) -> Result<()> {
        let by_table: IndexMap<&str, &Arc<Model>> =
            models.iter().map(|model| (model.table(), model)).collect();

        for model in models {
            for (_, field) in model.many_to_many() {
                if let Some(spec) = field.kind.many_to_many() {
                    if !by_table.contains_key(spec.to.as_str()) {
                        return Err(OrmError::UnknownModel(spec.to.clone()));
                    }
                }
            }
        }

        let mut pending = Vec::new();
        for model in models {
            let source = model.table();
            for (name, field) in model.fields() {
                if let Some(spec) = field.kind.foreign_key() {
                    let reverse = spec
                        .related_name
                        .clone()
                        .unwrap_or_else(|| format!("{source}_set"));
                    let target_field = spec.to_field.clone().unwrap_or_else(|| {
                        by_table
                            .get(spec.to.as_str())
                            .map_or_else(|| String::from("id"), |target| target.pk_column())
                    });
                    pending.push((
                        spec.to.clone(),
                        reverse,
                        Relation::Reverse {
                            source: Arc::clone(model),
                            column: field.column_name(name),
                            target_field,
                        },
                    ));
                } else if let Some(spec) = field.kind.many_to_many() {
                    let Some(target) = by_table.get(spec.to.as_str()) else {
                        continue;
                    };
                    let join_table = spec.join_table(source);
                    let (source_column, target_column) = spec.join_columns(source);
                    pending.push((
                        source.to_string(),
                        name.clone(),
                        Relation::ManyToMany {
                            target: Arc::clone(target),
                            join_table: join_table.clone(),
                            owner_column: source_column.clone(),
                            target_column: target_column.clone(),
                        },
                    ));
                    let reverse = spec
                        .related_name
                        .clone()
                        .unwrap_or_else(|| format!("{source}_set"));
                    pending.push((
                        spec.to.clone(),
                        reverse,
                        Relation::ManyToMany {
                            target: Arc::clone(model),
                            join_table,
                            owner_column: target_column,
                            target_column: source_column,
                        },
                    ));
                }
            }
        }

        let mut collisions = Vec::new();
        for (table, name, relation) in pending {
            let key = (table, name);
            match self.relations.get(&key) {
                Some(existing) if *existing == relation => {}
                Some(_) => {
                    warn!(table = %key.0, relation = %key.1, "relation name already taken, skipping");
                    collisions.push(format!("{}.{}", key.0, key.1));
                }
                None => {
                    debug!(table = %key.0, relation = %key.1, "registered relation");
                    self.relations.insert(key, relation);
                }
            }
        }

        if collisions.is_empty() {
            Ok(())
        } else {
            Err(OrmError::RelationCollision(collisions))
        }
    }

    /// Resolves the relation `name` for `instance`.
    ///
    /// Nothing is fetched here; the returned queryset or accessor queries
    /// on every call.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownRelation`] when `name` is not registered
    /// on the instance's table.
    pub fn related(&self, instance: &Instance, name: &str) -> Result<Related> {
        let table = instance.model().table();
        let relation = self.get(table, name).ok_or_else(|| OrmError::UnknownRelation {
            table: table.to_string(),
            name: name.to_string(),
        })?;

        Ok(match relation {
            Relation::Reverse {
                source,
                column,
                target_field,
            } => {
                let value = instance.get(target_field).cloned().unwrap_or(SqlValue::Null);
                Related::Many(
                    QuerySet::new(Arc::clone(source), self.conn.clone())
                        .filter(Criteria::new().eq(column.clone(), value)),
                )
            }
            Relation::ManyToMany {
                target,
                join_table,
                owner_column,
                target_column,
            } => Related::Through(ManyToManyAccessor {
                conn: self.conn.clone(),
                owner: instance.pk().clone(),
                target: Arc::clone(target),
                join_table: join_table.clone(),
                owner_column: owner_column.clone(),
                target_column: target_column.clone(),
            }),
        })
    }
}

/// Reads and edits the join rows of one instance.
#[derive(Debug, Clone)]
pub struct ManyToManyAccessor {
    conn: Connection,
    owner: SqlValue,
    target: Arc<Model>,
    join_table: String,
    owner_column: String,
    target_column: String,
}

impl ManyToManyAccessor {
    /// Returns the model reached through the join table.
    #[must_use]
    pub const fn target(&self) -> &Arc<Model> {
        &self.target
    }

    /// Returns the join table name.
    #[must_use]
    pub fn join_table(&self) -> &str {
        &self.join_table
    }

    /// Fetches every linked row, ordered by the target's primary key.
    pub async fn all(&self) -> Result<Vec<Instance>> {
        let pk = self.target.pk_column();
        let select = self
            .target
            .column_names()
            .iter()
            .map(|column| format!("t.{column} AS {column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {select} FROM {} t INNER JOIN {} j ON j.{} = t.{pk} WHERE j.{} = ? ORDER BY t.{pk} ASC",
            self.target.table(),
            self.join_table,
            self.target_column,
            self.owner_column,
        );
        let records = self
            .conn
            .fetch_all(&sql, std::slice::from_ref(&self.owner))
            .await?;
        Ok(records
            .into_iter()
            .map(|record| Instance::new(Arc::clone(&self.target), record))
            .collect())
    }

    /// Links the row whose primary key is `pk`. Linking twice is a no-op.
    pub async fn add(&self, pk: impl ToSqlValue) -> Result<()> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
            self.join_table, self.owner_column, self.target_column
        );
        self.conn
            .execute(&sql, &[self.owner.clone(), pk.to_sql_value()])
            .await?;
        Ok(())
    }

    /// Unlinks the row whose primary key is `pk`. Returns whether a link
    /// existed.
    pub async fn remove(&self, pk: impl ToSqlValue) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            self.join_table, self.owner_column, self.target_column
        );
        let removed = self
            .conn
            .execute(&sql, &[self.owner.clone(), pk.to_sql_value()])
            .await?;
        Ok(removed > 0)
    }

    /// Unlinks every row. Returns the number of removed links.
    pub async fn clear(&self) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE {} = ?", self.join_table, self.owner_column);
        self.conn
            .execute(&sql, std::slice::from_ref(&self.owner))
            .await
    }

    /// Returns the number of linked rows.
    pub async fn count(&self) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE {} = ?",
            self.join_table, self.owner_column
        );
        let records = self
            .conn
            .fetch_all(&sql, std::slice::from_ref(&self.owner))
            .await?;
        let count = records
            .first()
            .and_then(|record| record.get("count"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
