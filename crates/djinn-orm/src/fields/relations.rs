//! Relational field specifications for foreign keys and many-to-many
//! relationships.

/// Behavior when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Cascade the deletion to referencing rows.
    #[default]
    Cascade,
    /// Refuse the deletion while references exist.
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Set the foreign key to its default value.
    SetDefault,
    /// Do nothing (leave dangling references).
    DoNothing,
}

impl OnDelete {
    /// Returns the SQL representation.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Protect => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::DoNothing => "NO ACTION",
        }
    }
}

/// Target of a foreign key or one-to-one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    /// Table of the referenced model.
    pub to: String,
    /// Referenced column on the target table, the target's primary key
    /// when unset.
    pub to_field: Option<String>,
    /// What happens to this row when the target is deleted.
    pub on_delete: OnDelete,
    /// Name of the reverse relation on the target model.
    pub related_name: Option<String>,
}

impl ForeignKeySpec {
    /// Creates a foreign key to `to`'s primary key.
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            to_field: None,
            on_delete: OnDelete::Cascade,
            related_name: None,
        }
    }
}

/// The column a relation points at, resolved against the target model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedKey {
    /// Referenced column.
    pub column: String,
    /// Type of the columns referencing it.
    pub sql_type: String,
}

impl ReferencedKey {
    /// The key assumed when the target model is unknown: `column`, or an
    /// integer `id`.
    #[must_use]
    pub fn unresolved(column: Option<&str>) -> Self {
        Self {
            column: column.unwrap_or("id").to_string(),
            sql_type: String::from("INTEGER"),
        }
    }
}

/// A many-to-many relationship, stored in a join table rather than a
/// column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToManySpec {
    /// Table of the related model.
    pub to: String,
    /// Custom join table name.
    pub through: Option<String>,
    /// Name of the reverse relation on the target model.
    pub related_name: Option<String>,
}

impl ManyToManySpec {
    /// Creates a many-to-many relationship to `to`.
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            through: None,
            related_name: None,
        }
    }

    /// Returns the join table name for a relation declared on `source`.
    ///
    /// Uses `through` when set, `<source>_<target>` otherwise.
    #[must_use]
    pub fn join_table(&self, source: &str) -> String {
        self.through
            .clone()
            .unwrap_or_else(|| format!("{source}_{}", self.to))
    }

    /// Returns the `(source, target)` column names of the join table.
    ///
    /// Self-referential relations would otherwise produce two identical
    /// columns, so they get `from_` and `to_` prefixes.
    #[must_use]
    pub fn join_columns(&self, source: &str) -> (String, String) {
        if source == self.to {
            (format!("from_{source}_id"), format!("to_{}_id", self.to))
        } else {
            (format!("{source}_id"), format!("{}_id", self.to))
        }
    }
}
