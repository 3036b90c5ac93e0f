//! Manager for database access.
//!
//! The Manager is the per-model entry point for database operations,
//! similar to Django's Manager class. It holds no query state: every call
//! starts from a fresh [`QuerySet`].

use std::sync::Arc;

use indexmap::IndexMap;

use crate::connection::Connection;
use crate::error::Result;
use crate::model::{Instance, Model, Record};
use crate::query::{Aggregate, Criteria};
use crate::queryset::{QuerySet, Row, RowStream};

/// A Manager provides database access methods for a Model.
///
/// Managers are lightweight and can be created freely, usually through
/// [`Registry::manager`](crate::Registry::manager).
///
/// # Example
///
/// ```ignore
/// use djinn_orm::{record, Criteria};
///
/// let users = registry.manager("User")?;
///
/// let alice = users.create(record! { "username" => "alice" }).await?;
/// let found = users.get(Criteria::new().eq("username", "alice")).await?;
/// let active = users.filter(Criteria::new().eq("is_active", true)).count().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Manager {
    model: Arc<Model>,
    conn: Connection,
}

impl Manager {
    /// Creates a new Manager.
    #[must_use]
    pub const fn new(model: Arc<Model>, conn: Connection) -> Self {
        Self { model, conn }
    }

    /// Returns the managed model.
    #[must_use]
    pub const fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns a QuerySet over every object.
    #[must_use]
    pub fn queryset(&self) -> QuerySet {
        QuerySet::new(Arc::clone(&self.model), self.conn.clone())
    }

    /// Returns a QuerySet filtered by `criteria`.
    #[must_use]
    pub fn filter(&self, criteria: Criteria) -> QuerySet {
        self.queryset().filter(criteria)
    }

    /// Returns a QuerySet excluding objects matching `criteria`.
    #[must_use]
    pub fn exclude(&self, criteria: Criteria) -> QuerySet {
        self.queryset().exclude(criteria)
    }

    /// Returns an ordered QuerySet.
    #[must_use]
    pub fn order_by<I, S>(&self, columns: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.queryset().order_by(columns)
    }

    /// Returns a QuerySet yielding records of the given columns.
    #[must_use]
    pub fn values<I, S>(&self, columns: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queryset().values(columns)
    }

    /// Returns a QuerySet yielding tuples of the given columns.
    #[must_use]
    pub fn values_list<I, S>(&self, columns: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queryset().values_list(columns)
    }

    /// Returns a QuerySet loading only the given fields into instances.
    #[must_use]
    pub fn only<I, S>(&self, fields: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queryset().only(fields)
    }

    /// Returns a QuerySet leaving the given fields out of instances.
    #[must_use]
    pub fn defer<I, S>(&self, fields: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queryset().defer(fields)
    }

    /// Fetches every object.
    pub async fn all(&self) -> Result<Vec<Instance>> {
        let rows = self.queryset().all().await?;
        Ok(rows.into_iter().filter_map(Row::into_instance).collect())
    }

    /// Gets the single object matching `criteria`, or `None`.
    pub async fn get(&self, criteria: Criteria) -> Result<Option<Instance>> {
        Ok(self.queryset().get(criteria).await?.and_then(Row::into_instance))
    }

    /// Returns the object with the lowest primary key.
    pub async fn first(&self) -> Result<Option<Instance>> {
        Ok(self.queryset().first().await?.and_then(Row::into_instance))
    }

    /// Returns the object with the highest primary key.
    pub async fn last(&self) -> Result<Option<Instance>> {
        Ok(self.queryset().last().await?.and_then(Row::into_instance))
    }

    /// Returns the object with the smallest `field`, the primary key by
    /// default.
    pub async fn earliest(&self, field: Option<&str>) -> Result<Option<Instance>> {
        Ok(self.queryset().earliest(field).await?.and_then(Row::into_instance))
    }

    /// Returns the object with the largest `field`, the primary key by
    /// default.
    pub async fn latest(&self, field: Option<&str>) -> Result<Option<Instance>> {
        Ok(self.queryset().latest(field).await?.and_then(Row::into_instance))
    }

    /// See [`QuerySet::in_bulk`].
    pub async fn in_bulk(&self, field: Option<&str>) -> Result<IndexMap<String, Instance>> {
        self.queryset().in_bulk(field).await
    }

    /// Returns whether any object exists.
    pub async fn exists(&self) -> Result<bool> {
        self.queryset().exists().await
    }

    /// Returns the number of objects.
    pub async fn count(&self) -> Result<u64> {
        self.queryset().count().await
    }

    /// Creates an object.
    pub async fn create(&self, data: Record) -> Result<Instance> {
        self.queryset().create(data).await
    }

    /// Creates several objects in order.
    pub async fn bulk_create(&self, rows: Vec<Record>) -> Result<Vec<Instance>> {
        self.queryset().bulk_create(rows).await
    }

    /// Updates the objects matching `criteria`.
    pub async fn update(&self, criteria: Criteria, data: Record) -> Result<u64> {
        self.queryset().update(criteria, data).await
    }

    /// See [`QuerySet::bulk_update`].
    pub async fn bulk_update(&self, instances: &[Instance], fields: &[&str]) -> Result<u64> {
        self.queryset().bulk_update(instances, fields).await
    }

    /// Inserts or updates an instance. See [`QuerySet::save`].
    pub async fn save(&self, instance: &Instance) -> Result<Instance> {
        self.queryset().save(instance).await
    }

    /// Deletes the row of an instance. See [`QuerySet::delete_instance`].
    pub async fn delete_instance(&self, instance: &Instance) -> Result<bool> {
        self.queryset().delete_instance(instance).await
    }

    /// Deletes the objects matching `criteria`. Empty criteria are refused.
    pub async fn delete(&self, criteria: Criteria) -> Result<u64> {
        self.queryset().delete(criteria).await
    }

    /// See [`QuerySet::update_or_create`].
    pub async fn update_or_create(&self, lookup: Criteria, data: Record) -> Result<(Instance, bool)> {
        self.queryset().update_or_create(lookup, data).await
    }

    /// See [`QuerySet::get_or_create`].
    pub async fn get_or_create(&self, lookup: Criteria, defaults: Record) -> Result<(Instance, bool)> {
        self.queryset().get_or_create(lookup, defaults).await
    }

    /// Computes aggregates over every object.
    pub async fn aggregate<I, K>(&self, aggregates: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, Aggregate)>,
        K: Into<String>,
    {
        self.queryset().aggregate(aggregates).await
    }

    /// Streams every object in batches.
    pub fn iterator(&self, batch_size: u64) -> Result<RowStream> {
        self.queryset().iterator(batch_size)
    }
}
