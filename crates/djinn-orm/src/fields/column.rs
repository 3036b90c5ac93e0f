//! Column definition rendering.

use djinn_core::{Dialect, SqlValue};

use super::{DefaultValue, Field, FieldKind, ReferencedKey};

impl Field {
    /// Returns the bare column type, or `None` for many-to-many fields.
    ///
    /// Foreign keys are typed as integers; see [`Field::sql_type_for`].
    #[must_use]
    pub fn sql_type(&self, dialect: Dialect) -> Option<String> {
        self.sql_type_for(dialect, None)
    }

    /// Returns the bare column type, typing a foreign key after the key it
    /// references when `target` is known.
    #[must_use]
    pub fn sql_type_for(&self, dialect: Dialect, target: Option<&ReferencedKey>) -> Option<String> {
        let pg = dialect.is_postgres();
        let ty = match &self.kind {
            FieldKind::Auto => pick(pg, "SERIAL", "INTEGER"),
            FieldKind::BigAuto => pick(pg, "BIGSERIAL", "INTEGER"),
            FieldKind::ForeignKey(_) | FieldKind::OneToOne(_) => target
                .map_or_else(|| String::from("INTEGER"), |key| key.sql_type.clone()),
            FieldKind::Integer | FieldKind::PositiveInteger | FieldKind::Duration => {
                String::from("INTEGER")
            }
            FieldKind::SmallInteger => String::from("SMALLINT"),
            FieldKind::BigInteger => String::from("BIGINT"),
            FieldKind::Float => String::from("REAL"),
            FieldKind::Decimal {
                max_digits,
                decimal_places,
            } => {
                if pg {
                    format!("NUMERIC({max_digits}, {decimal_places})")
                } else {
                    String::from("REAL")
                }
            }
            FieldKind::Char { max_length }
            | FieldKind::Email { max_length }
            | FieldKind::Url { max_length }
            | FieldKind::Slug { max_length } => {
                if pg {
                    format!("VARCHAR({max_length})")
                } else {
                    String::from("TEXT")
                }
            }
            FieldKind::Text
            | FieldKind::Uuid
            | FieldKind::Date
            | FieldKind::Time
            | FieldKind::DateTime { .. }
            | FieldKind::File => String::from("TEXT"),
            FieldKind::Boolean => pick(pg, "BOOLEAN", "INTEGER"),
            FieldKind::Binary => pick(pg, "BYTEA", "BLOB"),
            FieldKind::Json => pick(pg, "JSONB", "TEXT"),
            FieldKind::ManyToMany(_) => return None,
        };
        Some(ty)
    }

    /// Returns the type of a column referencing this one. Auto keys are
    /// referenced as plain integers.
    #[must_use]
    pub fn reference_type(&self, dialect: Dialect) -> Option<String> {
        match self.kind {
            FieldKind::Auto => Some(String::from("INTEGER")),
            FieldKind::BigAuto => Some(pick(dialect.is_postgres(), "BIGINT", "INTEGER")),
            _ => self.sql_type(dialect),
        }
    }

    /// Renders the full column definition, `<column> <type> <constraints>`.
    ///
    /// Returns `None` for many-to-many fields, which live in a join table.
    /// Foreign keys reference `to_field` or `id`; see
    /// [`Field::render_column_sql_for`].
    #[must_use]
    pub fn render_column_sql(&self, name: &str, dialect: Dialect) -> Option<String> {
        self.render_column_sql_for(name, dialect, None)
    }

    /// Renders the full column definition, pointing a foreign key at
    /// `target` when the referenced model is known.
    #[must_use]
    pub fn render_column_sql_for(
        &self,
        name: &str,
        dialect: Dialect,
        target: Option<&ReferencedKey>,
    ) -> Option<String> {
        let ty = self.sql_type_for(dialect, target)?;
        let column = self.column_name(name);

        if self.kind.is_auto() {
            return Some(if dialect.is_postgres() {
                format!("{column} {ty} PRIMARY KEY")
            } else {
                format!("{column} {ty} PRIMARY KEY AUTOINCREMENT")
            });
        }

        let mut sql = format!("{column} {ty}");

        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            return Some(sql);
        }

        if !self.null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(DefaultValue::Value(value)) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default_literal(value, dialect));
        }

        if let Some(fk) = self.kind.foreign_key() {
            let column = target.map_or_else(
                || fk.to_field.as_deref().unwrap_or("id"),
                |key| key.column.as_str(),
            );
            sql.push_str(&format!(
                " REFERENCES {}({column}) ON DELETE {}",
                fk.to,
                fk.on_delete.to_sql()
            ));
        }

        Some(sql)
    }
}

fn pick(pg: bool, postgres: &str, sqlite: &str) -> String {
    String::from(if pg { postgres } else { sqlite })
}

fn default_literal(value: &SqlValue, dialect: Dialect) -> String {
    match (value, dialect) {
        (SqlValue::Bool(b), Dialect::Postgres) => String::from(if *b { "TRUE" } else { "FALSE" }),
        _ => value.to_sql_inline(),
    }
}
