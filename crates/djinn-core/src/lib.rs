//! # djinn-core
//!
//! Building blocks shared by the djinn ORM and its migration engine.
//!
//! This crate provides:
//! - [`SqlValue`] and [`ToSqlValue`] for parameter binding and row values
//! - [`Dialect`] for dialect-aware column rendering (SQLite, PostgreSQL)
//! - An identifier allow-list check, applied to every table and column
//!   name before it is interpolated into SQL
//!
//! ## SQL Injection Prevention
//!
//! Values are never interpolated; they travel as bound parameters.
//! Identifiers cannot be bound, so they must pass [`check_identifier`]:
//!
//! ```rust
//! use djinn_core::{check_identifier, is_safe_identifier};
//!
//! assert!(is_safe_identifier("posts.author_id"));
//! assert!(check_identifier("name; DROP TABLE users").is_err());
//! ```

pub mod dialect;
pub mod ident;
pub mod value;

pub use dialect::{Dialect, UnknownDialect};
pub use ident::{check_identifier, is_safe_identifier, IdentifierError};
pub use value::{SqlValue, ToSqlValue};
