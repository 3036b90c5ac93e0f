//! Error types for the ORM.

use djinn_core::IdentifierError;
use thiserror::Error;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A value was rejected by its field before any SQL was issued.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Multiple objects found when at most one was expected.
    #[error("multiple {model} objects returned when one was expected")]
    MultipleObjectsReturned {
        /// Model name.
        model: String,
    },

    /// No object found where one was required.
    #[error("{model} matching query does not exist")]
    DoesNotExist {
        /// Model name.
        model: String,
    },

    /// An operation refused to run because it would touch every row.
    #[error("unsafe operation: {0}")]
    UnsafeOperation(String),

    /// A table or column name failed the identifier allow-list.
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    /// The field is not declared on the model.
    #[error("invalid field {field:?} for model {model}")]
    InvalidField {
        /// Model name.
        model: String,
        /// Offending key.
        field: String,
    },

    /// No model registered under that name.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Model or connection configuration is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Relation names that clashed while building the relation registry.
    #[error("relation name collision: {}", .0.join(", "))]
    RelationCollision(Vec<String>),

    /// No relation with that name on the model.
    #[error("unknown relation {name:?} on table {table}")]
    UnknownRelation {
        /// Table of the model the relation was looked up on.
        table: String,
        /// Relation name.
        name: String,
    },

    /// Query building error.
    #[error("query error: {0}")]
    QueryError(String),
}

/// A constraint violated by a field value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// NULL given for a non-nullable field.
    #[error("field {field:?} does not allow null values")]
    NullNotAllowed {
        /// Field name.
        field: String,
    },

    /// Value outside the declared choices.
    #[error("value {value} for field {field:?} is not one of the allowed choices")]
    NotInChoices {
        /// Field name.
        field: String,
        /// Rejected value, rendered for display.
        value: String,
    },

    /// Text longer than the field's `max_length`.
    #[error("field {field:?} allows at most {max_length} characters, got {length}")]
    TooLong {
        /// Field name.
        field: String,
        /// Declared maximum.
        max_length: usize,
        /// Actual length in characters.
        length: usize,
    },
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
