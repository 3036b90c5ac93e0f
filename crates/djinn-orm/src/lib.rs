//! # djinn-orm
//!
//! A minimal Django-like ORM over a single SQLite connection.
//!
//! This crate provides:
//! - [`fields`] for declaring columns, with validation and dialect-aware
//!   column rendering
//! - [`Model`] metadata built at runtime and a [`Registry`] of models
//! - [`Manager`] as the per-model entry point
//! - [`QuerySet`] for lazy, chainable queries
//! - [`RelationRegistry`] for reverse foreign keys and many-to-many joins
//!
//! ## Quick Start
//!
//! ```ignore
//! use djinn_orm::fields::Field;
//! use djinn_orm::{record, Connection, Criteria, Model, Registry};
//!
//! async fn example() -> djinn_orm::Result<()> {
//!     let conn = Connection::open_in_memory().await?;
//!     let mut registry = Registry::new(conn);
//!     registry.register(
//!         Model::builder("User", "users")
//!             .field("username", Field::char(150).unique(true))
//!             .field("is_active", Field::boolean().default(true))
//!             .build()?,
//!     )?;
//!
//!     let users = registry.manager("User")?;
//!     users.create(record! { "username" => "alice" }).await?;
//!
//!     let active = users
//!         .filter(Criteria::new().eq("is_active", true))
//!         .order_by(["-id"])
//!         .count()
//!         .await?;
//!     assert_eq!(active, 1);
//!     Ok(())
//! }
//! ```
//!
//! ## QuerySet Operations
//!
//! QuerySets are lazy and chainable. Chaining never mutates the receiver:
//!
//! ```ignore
//! let active = users.filter(Criteria::new().eq("is_active", true));
//! let page = active
//!     .exclude(Criteria::new().in_list("role", ["banned"]))
//!     .order_by(["-created_at"])
//!     .limit(10);
//!
//! // `active` is unchanged and can be reused.
//! let total = active.count().await?;
//! let rows = page.all().await?;
//! ```
//!
//! ## Lookups
//!
//! ```ignore
//! use djinn_orm::Criteria;
//!
//! // age > 18 AND status = 'active'
//! let adults = Criteria::new().gt("age", 18).eq("status", "active");
//!
//! // deleted_at IS NULL
//! let live = Criteria::new().is_null("deleted_at");
//!
//! // role IN ('admin', 'staff')
//! let staff = Criteria::new().in_list("role", ["admin", "staff"]);
//! ```

mod connection;
mod error;
pub mod fields;
mod manager;
mod model;
pub mod query;
mod queryset;
mod registry;
mod relations;
mod rows;

pub use connection::{ConnectOptions, Connection, DEFAULT_DATABASE_URL};
pub use error::{OrmError, Result, ValidationError};
pub use manager::Manager;
pub use model::{Instance, Model, ModelBuilder, Record};
pub use query::{
    avg, count, count_all, count_distinct, max, min, sum, Aggregate, Criteria, Criterion,
};
pub use queryset::{OrderBy, OrderDirection, Projection, QuerySet, Row, RowStream, SetOperation};
pub use registry::Registry;
pub use relations::{ManyToManyAccessor, Related, Relation, RelationRegistry};

pub use djinn_core::{Dialect, SqlValue, ToSqlValue};

/// Builds a [`Record`] from `column => value` pairs.
///
/// Values go through [`ToSqlValue`], so any supported Rust value works.
///
/// ```rust
/// use djinn_orm::{record, SqlValue};
///
/// let row = record! { "title" => "Hello", "views" => 3, "published_at" => None::<String> };
/// assert_eq!(row["views"], SqlValue::Int(3));
/// assert!(row["published_at"].is_null());
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(
            record.insert(
                ::std::string::String::from($column),
                $crate::ToSqlValue::to_sql_value($value),
            );
        )+
        record
    }};
}
