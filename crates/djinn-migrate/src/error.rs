//! Error types for the migration engine.

use std::path::PathBuf;

use djinn_orm::OrmError;

/// Errors that can occur during schema synchronization or while handling
/// migration files.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Database error during introspection or DDL execution.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Error raised by the ORM layer.
    #[error(transparent)]
    Orm(#[from] OrmError),

    /// IO error (reading/writing migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A declared column exists with a different type. Types are never
    /// changed in place.
    #[error("Schema mismatch on {table}.{column}: declared {declared}, found {actual}")]
    SchemaMismatch {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Declared base type.
        declared: String,
        /// Introspected base type.
        actual: String,
    },

    /// Synchronizing one table failed.
    #[error("Table '{table}' failed: {source}")]
    TableFailed {
        /// Table name.
        table: String,
        /// Underlying failure.
        source: Box<MigrateError>,
    },

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<MigrateError>),

    /// Failed to parse a migration file or the index.
    #[error("Failed to parse migration file '{path}': {message}")]
    ParseError {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_lists_every_error() {
        let err = MigrateError::Multiple(vec![
            MigrateError::TableFailed {
                table: String::from("posts"),
                source: Box::new(MigrateError::SchemaMismatch {
                    table: String::from("posts"),
                    column: String::from("views"),
                    declared: String::from("INTEGER"),
                    actual: String::from("TEXT"),
                }),
            },
            MigrateError::Orm(OrmError::UnknownModel(String::from("tags"))),
        ]);
        let message = err.to_string();
        assert!(message.contains("  - Table 'posts' failed: Schema mismatch on posts.views"));
        assert!(message.contains("tags"));
    }
}
