//! Database connection handle.
//!
//! A [`Connection`] wraps a pool capped at one connection, so every
//! statement issued through it is serialized. The composition root opens it
//! once and hands clones to managers, querysets and the migration engine;
//! clones share the same underlying connection.

use std::str::FromStr;

use djinn_core::{Dialect, SqlValue};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::{OrmError, Result};
use crate::model::Record;
use crate::rows::{bind_value, decode_row};

/// Default database URL used by [`ConnectOptions::default`].
pub const DEFAULT_DATABASE_URL: &str = "sqlite:djinn.sqlite3";

/// Options for opening a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Database URL, e.g. `sqlite:app.db` or `sqlite::memory:`.
    pub url: String,
    /// Dialect used to render column definitions.
    pub dialect: Dialect,
    /// Create the database file if it does not exist.
    pub create_if_missing: bool,
    /// Enforce foreign key constraints.
    pub foreign_keys: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            url: String::from(DEFAULT_DATABASE_URL),
            dialect: Dialect::Sqlite,
            create_if_missing: true,
            foreign_keys: true,
        }
    }
}

impl ConnectOptions {
    /// Creates options for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Options for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Reads `DATABASE_URL` and `DJINN_DIALECT` from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Configuration`] when `DJINN_DIALECT` names an
    /// unknown dialect.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| String::from(DEFAULT_DATABASE_URL));
        let dialect = match std::env::var("DJINN_DIALECT") {
            Ok(name) => Dialect::from_str(&name)
                .map_err(|e| OrmError::Configuration(e.to_string()))?,
            Err(_) => Dialect::Sqlite,
        };
        Ok(Self::new(url).dialect(dialect))
    }

    /// Sets the URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the dialect.
    #[must_use]
    pub const fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Sets whether a missing database file is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether foreign keys are enforced.
    #[must_use]
    pub const fn foreign_keys(mut self, value: bool) -> Self {
        self.foreign_keys = value;
        self
    }
}

/// A shared handle to the single database connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pool: SqlitePool,
    dialect: Dialect,
}

impl Connection {
    /// Opens a connection.
    ///
    /// # Errors
    ///
    /// Returns a database error when the URL is malformed or the database
    /// cannot be opened.
    pub async fn open(options: ConnectOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::from_str(&options.url)?
            .create_if_missing(options.create_if_missing)
            .foreign_keys(options.foreign_keys);

        // An in-memory database lives as long as its only connection, so
        // the connection must never be recycled.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await?;

        info!(url = %options.url, dialect = %options.dialect, "opened database connection");
        Ok(Self {
            pool,
            dialect: options.dialect,
        })
    }

    /// Opens a private in-memory SQLite database.
    ///
    /// # Errors
    ///
    /// Returns a database error if SQLite cannot be initialized.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(ConnectOptions::in_memory()).await
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the dialect used for rendering column definitions.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Closes the connection. Clones become unusable.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("closed database connection");
    }

    /// Executes a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns a database error if the statement fails.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        debug!(sql = %sql, params = params.len(), "execute");
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param.clone());
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Executes an INSERT and returns the rowid of the new row.
    ///
    /// # Errors
    ///
    /// Returns a database error if the statement fails.
    pub async fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        debug!(sql = %sql, params = params.len(), "insert");
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param.clone());
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    /// Runs a query and decodes every row into a [`Record`].
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails or a column cannot be
    /// decoded.
    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        debug!(sql = %sql, params = params.len(), "fetch");
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }
}
