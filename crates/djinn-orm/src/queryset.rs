//! QuerySet implementation for lazy, chainable database queries.
//!
//! QuerySets are lazy: nothing runs until an executing method such as
//! [`QuerySet::all`], [`QuerySet::first`] or [`QuerySet::count`] is awaited.
//! Chaining never mutates the receiver; every chain method returns a new
//! QuerySet, so a base query can be reused freely.

use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use djinn_core::{check_identifier, SqlValue};
use futures::Stream;
use indexmap::IndexMap;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{OrmError, Result};
use crate::model::{Instance, Model, Record};
use crate::query::{Aggregate, Criteria};

/// Order direction for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    Asc,
    /// Descending order (DESC)
    Desc,
}

/// An ordering specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to order by
    pub column: String,
    /// Order direction
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Creates a new ascending order specification.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Creates a new descending order specification.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Parses a Django-style order specification.
    ///
    /// Prefix with `-` for descending order.
    /// Example: `"-created_at"` for descending, `"name"` for ascending.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        spec.strip_prefix('-')
            .map_or_else(|| Self::asc(spec), Self::desc)
    }

    /// Returns the same column in the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            column: self.column.clone(),
            direction: match self.direction {
                OrderDirection::Asc => OrderDirection::Desc,
                OrderDirection::Desc => OrderDirection::Asc,
            },
        }
    }

    fn to_sql(&self, resolve: &dyn Fn(&str) -> String) -> Result<String> {
        let column = resolve(&self.column);
        check_identifier(&column)?;
        Ok(match self.direction {
            OrderDirection::Asc => format!("{column} ASC"),
            OrderDirection::Desc => format!("{column} DESC"),
        })
    }
}

/// What each fetched row is turned into.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Model instances with every column.
    #[default]
    Model,
    /// Records holding the listed columns (all columns when empty).
    Values(Vec<String>),
    /// Tuples of the listed columns (all columns when empty).
    ValuesList(Vec<String>),
    /// The single listed column.
    Flat(String),
    /// Model instances loading only the listed fields and the primary key.
    Only(Vec<String>),
    /// Model instances loading every field except the listed ones. The
    /// primary key is always loaded.
    Defer(Vec<String>),
}

/// A set operation combining two querysets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperation {
    /// UNION
    Union,
    /// INTERSECT
    Intersect,
    /// EXCEPT
    Except,
}

impl SetOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

#[derive(Debug, Clone)]
struct Compound {
    operation: SetOperation,
    all: bool,
    other: Box<QuerySet>,
}

/// A fetched row, shaped by the queryset's [`Projection`].
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// A model instance.
    Instance(Instance),
    /// A column-name keyed record.
    Record(Record),
    /// Column values in select order.
    Tuple(Vec<SqlValue>),
    /// A single value.
    Scalar(SqlValue),
}

impl Row {
    /// Returns the instance, if this row is one.
    #[must_use]
    pub fn into_instance(self) -> Option<Instance> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Returns the instance, if this row is one.
    #[must_use]
    pub const fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Returns a column value of an instance or record row.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        match self {
            Self::Instance(instance) => instance.get(column),
            Self::Record(record) => record.get(column),
            Self::Tuple(_) | Self::Scalar(_) => None,
        }
    }
}

/// A lazily evaluated, finite stream of rows.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row>> + Send>>;

fn row_stream<S>(stream: S) -> RowStream
where
    S: Stream<Item = Result<Row>> + Send + 'static,
{
    Box::pin(stream)
}

/// A lazy, chainable query over one model.
///
/// # Example
///
/// ```ignore
/// use djinn_orm::Criteria;
///
/// let recent = posts
///     .filter(Criteria::new().eq("status", "published"))
///     .exclude(Criteria::new().is_null("published_at"))
///     .order_by(["-published_at"])
///     .limit(10);
///
/// let rows = recent.all().await?;
/// let total = recent.count().await?;
/// ```
#[derive(Debug, Clone)]
pub struct QuerySet {
    model: Arc<Model>,
    conn: Connection,
    filters: Criteria,
    excludes: Criteria,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
    projection: Projection,
    group_by: Vec<String>,
    annotations: IndexMap<String, Aggregate>,
    compound: Option<Compound>,
    empty: bool,
}

impl QuerySet {
    /// Creates a QuerySet over every row of `model`.
    #[must_use]
    pub fn new(model: Arc<Model>, conn: Connection) -> Self {
        Self {
            model,
            conn,
            filters: Criteria::new(),
            excludes: Criteria::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            projection: Projection::Model,
            group_by: Vec::new(),
            annotations: IndexMap::new(),
            compound: None,
            empty: false,
        }
    }

    /// Returns the model this queryset reads.
    #[must_use]
    pub const fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns the connection queries run on.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the current projection.
    #[must_use]
    pub const fn projection(&self) -> &Projection {
        &self.projection
    }

    fn derive(&self, change: impl FnOnce(&mut Self)) -> Self {
        let mut qs = self.clone();
        change(&mut qs);
        qs
    }

    /// Narrows the rows to those matching `criteria`.
    #[must_use]
    pub fn filter(&self, criteria: Criteria) -> Self {
        self.derive(|qs| qs.filters = qs.filters.merged(&criteria))
    }

    /// Removes rows matching any lookup of `criteria`.
    #[must_use]
    pub fn exclude(&self, criteria: Criteria) -> Self {
        self.derive(|qs| qs.excludes = qs.excludes.merged(&criteria))
    }

    /// Replaces the ordering. Prefix a column with `-` for descending.
    #[must_use]
    pub fn order_by<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let order_by = columns
            .into_iter()
            .map(|spec| OrderBy::parse(spec.as_ref()))
            .collect();
        self.derive(|qs| qs.order_by = order_by)
    }

    /// Sets the LIMIT.
    #[must_use]
    pub fn limit(&self, n: u64) -> Self {
        self.derive(|qs| qs.limit = Some(n))
    }

    /// Sets the OFFSET.
    #[must_use]
    pub fn offset(&self, n: u64) -> Self {
        self.derive(|qs| qs.offset = Some(n))
    }

    /// Selects distinct rows.
    #[must_use]
    pub fn distinct(&self) -> Self {
        self.derive(|qs| qs.distinct = true)
    }

    /// Returns records of the given columns instead of instances.
    #[must_use]
    pub fn values<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        self.derive(|qs| qs.projection = Projection::Values(columns))
    }

    /// Returns tuples of the given columns instead of instances.
    #[must_use]
    pub fn values_list<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        self.derive(|qs| qs.projection = Projection::ValuesList(columns))
    }

    /// Returns the bare values of a single column.
    #[must_use]
    pub fn values_list_flat(&self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.derive(|qs| qs.projection = Projection::Flat(column))
    }

    /// Loads only the given fields, plus the primary key, into instances.
    #[must_use]
    pub fn only<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields.into_iter().map(Into::into).collect();
        self.derive(|qs| qs.projection = Projection::Only(fields))
    }

    /// Leaves the given fields out of loaded instances.
    #[must_use]
    pub fn defer<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields.into_iter().map(Into::into).collect();
        self.derive(|qs| qs.projection = Projection::Defer(fields))
    }

    /// Adds an aggregate column named `alias` to every row.
    #[must_use]
    pub fn annotate(&self, alias: impl Into<String>, aggregate: Aggregate) -> Self {
        let alias = alias.into();
        self.derive(|qs| {
            qs.annotations.insert(alias, aggregate);
        })
    }

    /// Groups rows by the given columns.
    #[must_use]
    pub fn group_by<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        self.derive(|qs| qs.group_by = columns)
    }

    fn combine(&self, operation: SetOperation, other: &Self, all: bool) -> Self {
        let other = Box::new(other.clone());
        self.derive(|qs| {
            qs.compound = Some(Compound {
                operation,
                all,
                other,
            });
        })
    }

    /// Rows of either queryset. Replaces any earlier set operation.
    #[must_use]
    pub fn union(&self, other: &Self, all: bool) -> Self {
        self.combine(SetOperation::Union, other, all)
    }

    /// Rows present in both querysets. Replaces any earlier set operation.
    #[must_use]
    pub fn intersect(&self, other: &Self, all: bool) -> Self {
        self.combine(SetOperation::Intersect, other, all)
    }

    /// Rows of this queryset absent from `other`. Replaces any earlier set
    /// operation.
    #[must_use]
    pub fn except(&self, other: &Self, all: bool) -> Self {
        self.combine(SetOperation::Except, other, all)
    }

    /// A queryset that matches nothing.
    #[must_use]
    pub fn none(&self) -> Self {
        self.derive(|qs| qs.empty = true)
    }

    /// Flips the direction of every ordering column.
    #[must_use]
    pub fn reverse(&self) -> Self {
        self.derive(|qs| qs.order_by = qs.order_by.iter().map(OrderBy::reversed).collect())
    }

    fn resolve(&self, name: &str) -> String {
        self.model
            .resolve_column(name)
            .map_or_else(|| name.to_string(), |(column, _, _)| column)
    }

    fn checked_column(&self, name: &str) -> Result<String> {
        let column = self.resolve(name);
        check_identifier(&column)?;
        Ok(column)
    }

    fn field_column(&self, key: &str) -> Result<String> {
        self.model
            .resolve_column(key)
            .map(|(column, _, _)| column)
            .ok_or_else(|| OrmError::InvalidField {
                model: self.model.name().to_string(),
                field: key.to_string(),
            })
    }

    /// Model columns narrowed by `only` (`keep_listed`) or `defer`.
    fn loaded_columns(&self, listed: &[String], keep_listed: bool) -> Result<Vec<String>> {
        let listed = listed
            .iter()
            .map(|key| self.field_column(key))
            .collect::<Result<Vec<_>>>()?;
        let pk = self.model.pk_column();
        Ok(self
            .model
            .column_names()
            .into_iter()
            .filter(|column| *column == pk || listed.contains(column) == keep_listed)
            .collect())
    }

    fn select_list(&self) -> Result<String> {
        let mut items = match &self.projection {
            Projection::Model => self.model.column_names(),
            Projection::Values(columns) | Projection::ValuesList(columns)
                if columns.is_empty() =>
            {
                self.model.column_names()
            }
            Projection::Values(columns) | Projection::ValuesList(columns) => columns
                .iter()
                .map(|column| self.checked_column(column))
                .collect::<Result<Vec<_>>>()?,
            Projection::Flat(column) => vec![self.checked_column(column)?],
            Projection::Only(fields) => self.loaded_columns(fields, true)?,
            Projection::Defer(fields) => self.loaded_columns(fields, false)?,
        };

        for (alias, aggregate) in &self.annotations {
            check_identifier(alias)?;
            let expr = aggregate.to_sql(&|c| self.resolve(c))?;
            items.push(format!("{expr} AS {alias}"));
        }

        Ok(items.join(", "))
    }

    /// Builds the WHERE conditions, with `extra` merged over the filters.
    fn where_clause(&self, extra: Option<&Criteria>, params: &mut Vec<SqlValue>) -> Result<String> {
        let resolve = |c: &str| self.resolve(c);

        let mut conditions = match extra {
            Some(extra) => self.filters.merged(extra).compile(false, &resolve, params)?,
            None => self.filters.compile(false, &resolve, params)?,
        };
        conditions.extend(self.excludes.compile(true, &resolve, params)?);
        if self.empty {
            conditions.push(String::from("1 = 0"));
        }

        Ok(conditions.join(" AND "))
    }

    /// SELECT, FROM, WHERE and GROUP BY.
    fn select_core(&self, params: &mut Vec<SqlValue>) -> Result<String> {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&self.select_list()?);
        sql.push_str(" FROM ");
        sql.push_str(self.model.table());

        let where_clause = self.where_clause(None, params)?;
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        if !self.group_by.is_empty() {
            let columns = self
                .group_by
                .iter()
                .map(|column| self.checked_column(column))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&columns.join(", "));
        }

        Ok(sql)
    }

    /// ORDER BY, LIMIT and OFFSET.
    fn order_and_window(&self) -> Result<String> {
        let mut sql = String::new();

        if !self.order_by.is_empty() {
            let resolve = |c: &str| self.resolve(c);
            let parts = self
                .order_by
                .iter()
                .map(|order| order.to_sql(&resolve))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {limit}"));
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        Ok(sql)
    }

    /// Compiles the query into SQL and its bound parameters.
    ///
    /// # Errors
    ///
    /// Fails when an identifier is unsafe or a lookup is malformed.
    pub fn to_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        let mut params = Vec::new();
        let mut sql = self.select_core(&mut params)?;

        if let Some(compound) = &self.compound {
            let (other, other_params) = compound.other.to_sql()?;
            let all = if compound.all { " ALL" } else { "" };
            sql = format!(
                "SELECT * FROM ({sql}) AS lhs {}{all} SELECT * FROM ({other}) AS rhs",
                compound.operation.as_str()
            );
            params.extend(other_params);
        }

        sql.push_str(&self.order_and_window()?);
        Ok((sql, params))
    }

    /// Whether counting or probing must wrap the full query.
    fn needs_subquery(&self) -> bool {
        self.distinct
            || self.limit.is_some()
            || self.offset.is_some()
            || self.compound.is_some()
            || !self.group_by.is_empty()
            || !self.annotations.is_empty()
    }

    /// Compiles `SELECT <select> FROM <table> WHERE ..`, or wraps the full
    /// query as a subquery when its state demands it.
    fn build_over(&self, select: &str, extra: &str) -> Result<(String, Vec<SqlValue>)> {
        if self.needs_subquery() {
            let (inner, params) = self.to_sql()?;
            return Ok((format!("SELECT {select} FROM ({inner}) AS sub{extra}"), params));
        }

        let mut params = Vec::new();
        let mut sql = format!("SELECT {select} FROM {}", self.model.table());
        let where_clause = self.where_clause(None, &mut params)?;
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }
        sql.push_str(extra);
        Ok((sql, params))
    }

    /// Builds the `SELECT COUNT(*)` query.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled.
    pub fn count_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        self.build_over("COUNT(*) AS count", "")
    }

    /// Builds the `SELECT 1 .. LIMIT 1` existence check.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled.
    pub fn exists_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        self.build_over("1", " LIMIT 1")
    }

    fn to_row(&self, record: Record) -> Row {
        match &self.projection {
            Projection::Model | Projection::Only(_) | Projection::Defer(_) => {
                Row::Instance(Instance::new(Arc::clone(&self.model), record))
            }
            Projection::Values(_) => Row::Record(record),
            Projection::ValuesList(_) => Row::Tuple(record.into_values().collect()),
            Projection::Flat(_) => {
                Row::Scalar(record.into_values().next().unwrap_or(SqlValue::Null))
            }
        }
    }

    fn with_pk_order(&self, descending: bool) -> Self {
        let pk = self.model.pk_column();
        self.derive(|qs| {
            qs.order_by = vec![if descending {
                OrderBy::desc(pk)
            } else {
                OrderBy::asc(pk)
            }];
        })
    }

    fn as_instances(&self) -> Self {
        self.derive(|qs| {
            qs.projection = Projection::Model;
            qs.annotations.clear();
        })
    }

    fn pk_criteria(&self, pk: SqlValue) -> Criteria {
        Criteria::new().eq(self.model.pk_column(), pk)
    }

    /// A queryset over every row, for writes addressed by primary key.
    fn unfiltered(&self) -> Self {
        Self::new(Arc::clone(&self.model), self.conn.clone())
    }

    /// Executes the query and returns all matching rows.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or executed.
    pub async fn all(&self) -> Result<Vec<Row>> {
        let (sql, params) = self.to_sql()?;
        let records = self.conn.fetch_all(&sql, &params).await?;
        Ok(records.into_iter().map(|record| self.to_row(record)).collect())
    }

    /// Returns the single row matching `criteria`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::MultipleObjectsReturned`] when more than one row
    /// matches.
    pub async fn get(&self, criteria: Criteria) -> Result<Option<Row>> {
        let mut rows = self.filter(criteria).limit(2).all().await?;
        if rows.len() > 1 {
            return Err(OrmError::MultipleObjectsReturned {
                model: self.model.name().to_string(),
            });
        }
        Ok(rows.pop())
    }

    /// Returns the first row, ordered by primary key unless an ordering is
    /// set.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or executed.
    pub async fn first(&self) -> Result<Option<Row>> {
        let qs = if self.order_by.is_empty() {
            self.with_pk_order(false)
        } else {
            self.clone()
        };
        Ok(qs.limit(1).all().await?.into_iter().next())
    }

    /// Returns the last row: the explicit ordering reversed, or the highest
    /// primary key.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or executed.
    pub async fn last(&self) -> Result<Option<Row>> {
        let qs = if self.order_by.is_empty() {
            self.with_pk_order(true)
        } else {
            self.reverse()
        };
        Ok(qs.limit(1).all().await?.into_iter().next())
    }

    /// Returns the row with the smallest `field`, the primary key by
    /// default.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or executed.
    pub async fn earliest(&self, field: Option<&str>) -> Result<Option<Row>> {
        let column = field.map_or_else(|| self.model.pk_column(), str::to_string);
        self.order_by([column]).first().await
    }

    /// Returns the row with the largest `field`, the primary key by
    /// default.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or executed.
    pub async fn latest(&self, field: Option<&str>) -> Result<Option<Row>> {
        let column = field.map_or_else(|| self.model.pk_column(), str::to_string);
        self.order_by([format!("-{column}")]).first().await
    }

    /// Fetches the matching instances keyed by the rendered value of
    /// `field`, the primary key by default. Rows where the value is NULL
    /// are skipped; on duplicate values the last row wins.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::InvalidField`] when `field` is not declared.
    pub async fn in_bulk(&self, field: Option<&str>) -> Result<IndexMap<String, Instance>> {
        let column = match field {
            Some(key) => self.field_column(key)?,
            None => self.model.pk_column(),
        };
        let rows = self.as_instances().all().await?;
        Ok(rows
            .into_iter()
            .filter_map(Row::into_instance)
            .filter_map(|instance| {
                let key = instance
                    .get(&column)
                    .filter(|value| !value.is_null())?
                    .to_string();
                Some((key, instance))
            })
            .collect())
    }

    /// Returns SQLite's query plan, one record per step.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or explained.
    pub async fn explain(&self) -> Result<Vec<Record>> {
        let (sql, params) = self.to_sql()?;
        self.conn
            .fetch_all(&format!("EXPLAIN QUERY PLAN {sql}"), &params)
            .await
    }

    /// Returns whether any row matches.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or executed.
    pub async fn exists(&self) -> Result<bool> {
        let (sql, params) = self.exists_sql()?;
        Ok(!self.conn.fetch_all(&sql, &params).await?.is_empty())
    }

    /// Returns the number of matching rows.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled or executed.
    pub async fn count(&self) -> Result<u64> {
        let (sql, params) = self.count_sql()?;
        let records = self.conn.fetch_all(&sql, &params).await?;
        let count = records
            .first()
            .and_then(|record| record.get("count"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Computes aggregates over the matching rows, keyed by alias.
    ///
    /// # Errors
    ///
    /// Fails when an alias or column is unsafe or the query fails.
    pub async fn aggregate<I, K>(&self, aggregates: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, Aggregate)>,
        K: Into<String>,
    {
        let mut select = Vec::new();
        for (alias, aggregate) in aggregates {
            let alias = alias.into();
            check_identifier(&alias)?;
            let expr = aggregate.to_sql(&|c| self.resolve(c))?;
            select.push(format!("{expr} AS {alias}"));
        }
        if select.is_empty() {
            return Err(OrmError::QueryError(String::from(
                "aggregate needs at least one aggregate",
            )));
        }

        let (sql, params) = self.build_over(&select.join(", "), "")?;
        let mut records = self.conn.fetch_all(&sql, &params).await?;
        Ok(records.pop().unwrap_or_default())
    }

    /// Streams the matching rows in LIMIT/OFFSET windows of `batch_size`.
    ///
    /// The stream is lazy and stops after the first short page. Rows are
    /// ordered by primary key unless an ordering is set, so pages do not
    /// overlap.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::QueryError`] when `batch_size` is zero. Query
    /// failures are yielded by the stream.
    pub fn iterator(&self, batch_size: u64) -> Result<RowStream> {
        if batch_size == 0 {
            return Err(OrmError::QueryError(String::from(
                "iterator batch size must be positive",
            )));
        }

        let base = if self.order_by.is_empty() {
            self.with_pk_order(false)
        } else {
            self.clone()
        };
        let start = self.offset.unwrap_or(0);
        let cap = self.limit;

        Ok(row_stream(async_stream::try_stream! {
            let mut offset = start;
            let mut fetched = 0_u64;
            loop {
                let take = cap.map_or(batch_size, |cap| batch_size.min(cap - fetched));
                if take == 0 {
                    break;
                }
                let page = base.limit(take).offset(offset).all().await?;
                let len = u64::try_from(page.len()).unwrap_or(u64::MAX);
                for row in page {
                    yield row;
                }
                fetched += len;
                offset += len;
                if len < take {
                    break;
                }
            }
        }))
    }

    /// Maps caller keys (column or field names) onto columns.
    fn resolve_data(&self, data: Record) -> Result<Record> {
        data.into_iter()
            .map(|(key, value)| match self.model.resolve_column(&key) {
                Some((column, _, _)) => Ok((column, value)),
                None => Err(OrmError::InvalidField {
                    model: self.model.name().to_string(),
                    field: key,
                }),
            })
            .collect()
    }

    async fn fetch_instance(&self, pk: SqlValue) -> Result<Instance> {
        self.unfiltered()
            .get(self.pk_criteria(pk))
            .await?
            .and_then(Row::into_instance)
            .ok_or_else(|| OrmError::DoesNotExist {
                model: self.model.name().to_string(),
            })
    }

    /// Inserts a row and returns it as stored.
    ///
    /// Omitted columns get their field's initial value; auto primary keys
    /// are left to the database. Every value is validated before any SQL
    /// runs.
    ///
    /// # Errors
    ///
    /// - [`OrmError::InvalidField`] for a key the model does not declare
    /// - [`OrmError::Validation`] when a value violates its field
    /// - [`OrmError::Database`] when the insert fails
    pub async fn create(&self, data: Record) -> Result<Instance> {
        let mut provided = self.resolve_data(data)?;
        let now = Utc::now();

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, name, field) in self.model.columns() {
            let value = match provided.shift_remove(&column) {
                Some(value) => value,
                None if field.kind.is_auto() => continue,
                None => field.initial_value(&now),
            };
            field.validate(name, &value)?;
            columns.push(column);
            values.push(value);
        }

        let table = self.model.table();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        let rowid = self.conn.insert(&sql, &values).await?;

        let pk_column = self.model.pk_column();
        let pk = columns
            .iter()
            .position(|column| *column == pk_column)
            .map(|i| values[i].clone())
            .filter(|value| !value.is_null())
            .unwrap_or(SqlValue::Int(rowid));
        debug!(table = %table, pk = %pk, "created row");

        self.fetch_instance(pk).await
    }

    /// Creates each record in turn.
    ///
    /// # Errors
    ///
    /// Stops at the first failing record; earlier rows stay inserted.
    pub async fn bulk_create(&self, rows: Vec<Record>) -> Result<Vec<Instance>> {
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            created.push(self.create(row).await?);
        }
        Ok(created)
    }

    /// Updates the rows matching this queryset and `criteria`.
    ///
    /// `auto_now` timestamps are always re-stamped. Returns the number of
    /// updated rows, 0 when there is nothing to set.
    ///
    /// # Errors
    ///
    /// - [`OrmError::InvalidField`] for a key the model does not declare
    /// - [`OrmError::Validation`] when a value violates its field
    pub async fn update(&self, criteria: Criteria, data: Record) -> Result<u64> {
        let mut assignments = self.resolve_data(data)?;
        let now = Utc::now();
        for (column, _, field) in self.model.columns() {
            if field.is_auto_now() {
                assignments.insert(column, field.initial_value(&now));
            }
        }
        if assignments.is_empty() {
            return Ok(0);
        }

        for (column, value) in &assignments {
            if let Some((_, name, field)) = self.model.resolve_column(column) {
                field.validate(name, value)?;
            }
        }

        let table = self.model.table();
        let set = assignments
            .keys()
            .map(|column| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<SqlValue> = assignments.into_values().collect();
        let mut sql = format!("UPDATE {table} SET {set}");
        let where_clause = self.where_clause(Some(&criteria), &mut params)?;
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        let updated = self.conn.execute(&sql, &params).await?;
        debug!(table = %table, updated, "updated rows");
        Ok(updated)
    }

    /// Writes `fields` of each instance back to its row, addressed by
    /// primary key. Instances without a primary key are skipped. Returns the
    /// number of updated rows.
    ///
    /// # Errors
    ///
    /// - [`OrmError::QueryError`] when `fields` is empty
    /// - [`OrmError::InvalidField`] for a field the model does not declare
    pub async fn bulk_update(&self, instances: &[Instance], fields: &[&str]) -> Result<u64> {
        if fields.is_empty() {
            return Err(OrmError::QueryError(String::from(
                "bulk_update needs at least one field",
            )));
        }
        let columns = fields
            .iter()
            .map(|key| self.field_column(key))
            .collect::<Result<Vec<_>>>()?;

        let base = self.unfiltered();
        let mut updated = 0;
        for instance in instances {
            let pk = instance.pk();
            if pk.is_null() {
                continue;
            }
            let data: Record = columns
                .iter()
                .filter_map(|column| Some((column.clone(), instance.get(column)?.clone())))
                .collect();
            updated += base.update(self.pk_criteria(pk.clone()), data).await?;
        }
        debug!(table = %self.model.table(), updated, "bulk updated rows");
        Ok(updated)
    }

    /// Stores an instance: updates its row when the primary key is already
    /// stored, inserts it otherwise. Returns the row as stored.
    ///
    /// Only the columns the instance holds are written, so an instance
    /// loaded with [`QuerySet::only`] leaves the other columns untouched.
    ///
    /// # Errors
    ///
    /// - [`OrmError::QueryError`] when the instance belongs to another model
    /// - any error of [`QuerySet::update`] or [`QuerySet::create`]
    pub async fn save(&self, instance: &Instance) -> Result<Instance> {
        self.check_owner(instance)?;
        let pk_column = self.model.pk_column();
        let pk = instance.pk().clone();
        let base = self.unfiltered();

        if !pk.is_null() && base.filter(self.pk_criteria(pk.clone())).exists().await? {
            let data: Record = instance
                .record()
                .iter()
                .filter(|(column, _)| **column != pk_column)
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            base.update(self.pk_criteria(pk.clone()), data).await?;
            return self.fetch_instance(pk).await;
        }

        let mut record = instance.record().clone();
        if pk.is_null() {
            record.shift_remove(&pk_column);
        }
        base.create(record).await
    }

    /// Deletes the row of an instance. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// - [`OrmError::UnsafeOperation`] when the instance has no primary key
    /// - [`OrmError::QueryError`] when the instance belongs to another model
    pub async fn delete_instance(&self, instance: &Instance) -> Result<bool> {
        self.check_owner(instance)?;
        let pk = instance.pk();
        if pk.is_null() {
            return Err(OrmError::UnsafeOperation(format!(
                "cannot delete an unsaved {} instance",
                self.model.name()
            )));
        }
        let deleted = self.unfiltered().delete(self.pk_criteria(pk.clone())).await?;
        Ok(deleted > 0)
    }

    fn check_owner(&self, instance: &Instance) -> Result<()> {
        if instance.model().table() == self.model.table() {
            Ok(())
        } else {
            Err(OrmError::QueryError(format!(
                "{} instance passed to the {} queryset",
                instance.model().name(),
                self.model.name()
            )))
        }
    }

    /// Deletes the rows matching this queryset and `criteria`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnsafeOperation`] when no condition restricts the
    /// delete.
    pub async fn delete(&self, criteria: Criteria) -> Result<u64> {
        let mut params = Vec::new();
        let where_clause = self.where_clause(Some(&criteria), &mut params)?;
        let table = self.model.table();
        if where_clause.is_empty() {
            return Err(OrmError::UnsafeOperation(format!(
                "refusing to delete every row of {table} without criteria"
            )));
        }

        let sql = format!("DELETE FROM {table} WHERE {where_clause}");
        let deleted = self.conn.execute(&sql, &params).await?;
        debug!(table = %table, deleted, "deleted rows");
        Ok(deleted)
    }

    /// Updates the first row matching `lookup` with `data`, or creates one
    /// from both. Returns the row and whether it was created.
    ///
    /// Not atomic: concurrent callers may both create. Declare a UNIQUE
    /// field when at most one row must exist.
    ///
    /// # Errors
    ///
    /// Propagates errors from the lookup, update or create.
    pub async fn update_or_create(&self, lookup: Criteria, data: Record) -> Result<(Instance, bool)> {
        let existing = self
            .as_instances()
            .filter(lookup.clone())
            .first()
            .await?
            .and_then(Row::into_instance);

        match existing {
            Some(instance) => {
                let pk = instance.pk().clone();
                self.unfiltered()
                    .update(self.pk_criteria(pk.clone()), data)
                    .await?;
                Ok((self.fetch_instance(pk).await?, false))
            }
            None => {
                let mut record = lookup.exact_values();
                record.extend(data);
                Ok((self.create(record).await?, true))
            }
        }
    }

    /// Returns the first row matching `lookup`, or creates one from the
    /// lookup and `defaults`. Returns the row and whether it was created.
    ///
    /// Not atomic, like [`QuerySet::update_or_create`].
    ///
    /// # Errors
    ///
    /// Propagates errors from the lookup or create.
    pub async fn get_or_create(&self, lookup: Criteria, defaults: Record) -> Result<(Instance, bool)> {
        let existing = self
            .as_instances()
            .filter(lookup.clone())
            .first()
            .await?
            .and_then(Row::into_instance);

        if let Some(instance) = existing {
            return Ok((instance, false));
        }

        let mut record = lookup.exact_values();
        record.extend(defaults);
        Ok((self.create(record).await?, true))
    }
}
