//! Field types for model definitions.
//!
//! A [`Field`] is a [`FieldKind`] plus the options every kind shares
//! (nullability, uniqueness, defaults, choices). Fields know how to render
//! their column definition for a [`Dialect`](djinn_core::Dialect), validate
//! a value before it reaches SQL, and produce the value `create` uses when
//! the caller leaves the column out.
//!
//! ```rust
//! use djinn_core::Dialect;
//! use djinn_orm::fields::Field;
//!
//! let status = Field::char(20).default("pending").choices(["pending", "done"]);
//! assert_eq!(
//!     status.render_column_sql("status", Dialect::Sqlite).as_deref(),
//!     Some("status TEXT NOT NULL DEFAULT 'pending'"),
//! );
//! ```

mod column;
mod relations;

use chrono::{DateTime, Utc};
use djinn_core::{SqlValue, ToSqlValue};

pub use relations::{ForeignKeySpec, ManyToManySpec, OnDelete, ReferencedKey};

use crate::error::ValidationError;

/// Default `max_length` for bounded text kinds built without one.
pub const DEFAULT_MAX_LENGTH: usize = 255;

/// The closed set of column kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Auto-incrementing integer primary key.
    Auto,
    /// Auto-incrementing 64-bit primary key.
    BigAuto,
    /// Integer.
    Integer,
    /// Small integer.
    SmallInteger,
    /// 64-bit integer.
    BigInteger,
    /// Non-negative integer (not enforced by the database).
    PositiveInteger,
    /// Floating point number.
    Float,
    /// Fixed precision decimal.
    Decimal {
        /// Total number of digits.
        max_digits: u32,
        /// Digits after the decimal point.
        decimal_places: u32,
    },
    /// Bounded text.
    Char {
        /// Maximum length in characters.
        max_length: usize,
    },
    /// Unbounded text.
    Text,
    /// Email address.
    Email {
        /// Maximum length in characters.
        max_length: usize,
    },
    /// URL.
    Url {
        /// Maximum length in characters.
        max_length: usize,
    },
    /// Slug.
    Slug {
        /// Maximum length in characters.
        max_length: usize,
    },
    /// UUID stored as text.
    Uuid,
    /// Boolean.
    Boolean,
    /// ISO 8601 date.
    Date,
    /// ISO 8601 time.
    Time,
    /// ISO 8601 timestamp.
    DateTime {
        /// Re-stamped on every create and update.
        auto_now: bool,
        /// Stamped once on create.
        auto_now_add: bool,
    },
    /// Duration in seconds.
    Duration,
    /// Binary data.
    Binary,
    /// JSON document.
    Json,
    /// File path.
    File,
    /// Reference to another table's row.
    ForeignKey(ForeignKeySpec),
    /// Unique reference to another table's row.
    OneToOne(ForeignKeySpec),
    /// Relationship through a join table. Has no column.
    ManyToMany(ManyToManySpec),
}

impl FieldKind {
    /// Returns the `max_length` of bounded text kinds.
    #[must_use]
    pub const fn max_length(&self) -> Option<usize> {
        match self {
            Self::Char { max_length }
            | Self::Email { max_length }
            | Self::Url { max_length }
            | Self::Slug { max_length } => Some(*max_length),
            _ => None,
        }
    }

    /// Returns the foreign key target for FK and one-to-one kinds.
    #[must_use]
    pub const fn foreign_key(&self) -> Option<&ForeignKeySpec> {
        match self {
            Self::ForeignKey(spec) | Self::OneToOne(spec) => Some(spec),
            _ => None,
        }
    }

    /// Returns the relationship for many-to-many kinds.
    #[must_use]
    pub const fn many_to_many(&self) -> Option<&ManyToManySpec> {
        match self {
            Self::ManyToMany(spec) => Some(spec),
            _ => None,
        }
    }

    /// Returns true for the auto-incrementing kinds.
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::Auto | Self::BigAuto)
    }
}

/// A default computed when `create` fills an omitted column.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// A static literal, also emitted as the column's `DEFAULT`.
    Value(SqlValue),
    /// The current time.
    Now,
    /// A fresh random UUID.
    Uuid,
}

/// A model field: its kind plus shared options.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column kind.
    pub kind: FieldKind,
    /// Whether the column accepts NULL.
    pub null: bool,
    /// Whether the column carries a UNIQUE constraint.
    pub unique: bool,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Whether to create an index for the column.
    pub db_index: bool,
    /// Value used when the caller omits the column.
    pub default: Option<DefaultValue>,
    /// Allowed values.
    pub choices: Option<Vec<SqlValue>>,
    /// Help text.
    pub help_text: Option<String>,
}

impl Field {
    /// Creates a field of the given kind with default options.
    #[must_use]
    pub const fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            null: false,
            unique: false,
            primary_key: false,
            db_index: false,
            default: None,
            choices: None,
            help_text: None,
        }
    }

    /// An auto-incrementing integer primary key.
    #[must_use]
    pub fn auto() -> Self {
        Self::new(FieldKind::Auto).primary_key(true)
    }

    /// An auto-incrementing 64-bit primary key.
    #[must_use]
    pub fn big_auto() -> Self {
        Self::new(FieldKind::BigAuto).primary_key(true)
    }

    /// An integer.
    #[must_use]
    pub const fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    /// A small integer.
    #[must_use]
    pub const fn small_integer() -> Self {
        Self::new(FieldKind::SmallInteger)
    }

    /// A 64-bit integer.
    #[must_use]
    pub const fn big_integer() -> Self {
        Self::new(FieldKind::BigInteger)
    }

    /// A non-negative integer.
    #[must_use]
    pub const fn positive_integer() -> Self {
        Self::new(FieldKind::PositiveInteger)
    }

    /// A float.
    #[must_use]
    pub const fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    /// A fixed precision decimal.
    #[must_use]
    pub const fn decimal(max_digits: u32, decimal_places: u32) -> Self {
        Self::new(FieldKind::Decimal {
            max_digits,
            decimal_places,
        })
    }

    /// Text of at most `max_length` characters.
    #[must_use]
    pub const fn char(max_length: usize) -> Self {
        Self::new(FieldKind::Char { max_length })
    }

    /// Unbounded text.
    #[must_use]
    pub const fn text() -> Self {
        Self::new(FieldKind::Text)
    }

    /// An email address.
    #[must_use]
    pub const fn email() -> Self {
        Self::new(FieldKind::Email {
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// A URL.
    #[must_use]
    pub const fn url() -> Self {
        Self::new(FieldKind::Url {
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// A slug.
    #[must_use]
    pub const fn slug() -> Self {
        Self::new(FieldKind::Slug {
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// A UUID.
    #[must_use]
    pub const fn uuid() -> Self {
        Self::new(FieldKind::Uuid)
    }

    /// A boolean.
    #[must_use]
    pub const fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    /// A date.
    #[must_use]
    pub const fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    /// A time of day.
    #[must_use]
    pub const fn time() -> Self {
        Self::new(FieldKind::Time)
    }

    /// A timestamp.
    #[must_use]
    pub const fn datetime() -> Self {
        Self::new(FieldKind::DateTime {
            auto_now: false,
            auto_now_add: false,
        })
    }

    /// A duration.
    #[must_use]
    pub const fn duration() -> Self {
        Self::new(FieldKind::Duration)
    }

    /// Binary data.
    #[must_use]
    pub const fn binary() -> Self {
        Self::new(FieldKind::Binary)
    }

    /// A JSON document.
    #[must_use]
    pub const fn json() -> Self {
        Self::new(FieldKind::Json)
    }

    /// A file path.
    #[must_use]
    pub const fn file() -> Self {
        Self::new(FieldKind::File)
    }

    /// A foreign key to the table `to`.
    #[must_use]
    pub fn foreign_key(to: impl Into<String>) -> Self {
        Self::new(FieldKind::ForeignKey(ForeignKeySpec::new(to)))
    }

    /// A one-to-one reference to the table `to`.
    #[must_use]
    pub fn one_to_one(to: impl Into<String>) -> Self {
        Self::new(FieldKind::OneToOne(ForeignKeySpec::new(to))).unique(true)
    }

    /// A many-to-many relationship to the table `to`.
    #[must_use]
    pub fn many_to_many(to: impl Into<String>) -> Self {
        Self::new(FieldKind::ManyToMany(ManyToManySpec::new(to)))
    }

    /// Sets the null option.
    #[must_use]
    pub fn null(mut self, value: bool) -> Self {
        self.null = value;
        self
    }

    /// Sets the unique option.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets the primary_key option.
    #[must_use]
    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Sets the db_index option.
    #[must_use]
    pub fn db_index(mut self, value: bool) -> Self {
        self.db_index = value;
        self
    }

    /// Sets a static default value.
    #[must_use]
    pub fn default(mut self, value: impl ToSqlValue) -> Self {
        self.default = Some(DefaultValue::Value(value.to_sql_value()));
        self
    }

    /// Defaults to the current time.
    #[must_use]
    pub fn default_now(mut self) -> Self {
        self.default = Some(DefaultValue::Now);
        self
    }

    /// Defaults to a fresh v4 UUID.
    #[must_use]
    pub fn default_uuid(mut self) -> Self {
        self.default = Some(DefaultValue::Uuid);
        self
    }

    /// Restricts values to `choices`.
    #[must_use]
    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        self.choices = Some(choices.into_iter().map(ToSqlValue::to_sql_value).collect());
        self
    }

    /// Sets the help_text option.
    #[must_use]
    pub fn help_text(mut self, value: impl Into<String>) -> Self {
        self.help_text = Some(value.into());
        self
    }

    /// Changes the `max_length` of a bounded text field. Other kinds are
    /// left untouched.
    #[must_use]
    pub fn max_length(mut self, value: usize) -> Self {
        match &mut self.kind {
            FieldKind::Char { max_length }
            | FieldKind::Email { max_length }
            | FieldKind::Url { max_length }
            | FieldKind::Slug { max_length } => *max_length = value,
            _ => {}
        }
        self
    }

    /// Re-stamps a timestamp field on every create and update.
    #[must_use]
    pub fn auto_now(mut self, value: bool) -> Self {
        if let FieldKind::DateTime { auto_now, .. } = &mut self.kind {
            *auto_now = value;
        }
        self
    }

    /// Stamps a timestamp field once, on create.
    #[must_use]
    pub fn auto_now_add(mut self, value: bool) -> Self {
        if let FieldKind::DateTime { auto_now_add, .. } = &mut self.kind {
            *auto_now_add = value;
        }
        self
    }

    /// Sets the on-delete policy of a foreign key.
    #[must_use]
    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        if let FieldKind::ForeignKey(spec) | FieldKind::OneToOne(spec) = &mut self.kind {
            spec.on_delete = policy;
        }
        self
    }

    /// Sets the referenced column of a foreign key.
    #[must_use]
    pub fn to_field(mut self, column: impl Into<String>) -> Self {
        if let FieldKind::ForeignKey(spec) | FieldKind::OneToOne(spec) = &mut self.kind {
            spec.to_field = Some(column.into());
        }
        self
    }

    /// Names the reverse relation on the target model.
    #[must_use]
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        match &mut self.kind {
            FieldKind::ForeignKey(spec) | FieldKind::OneToOne(spec) => {
                spec.related_name = Some(name.into());
            }
            FieldKind::ManyToMany(spec) => spec.related_name = Some(name.into()),
            _ => {}
        }
        self
    }

    /// Sets a custom join table for a many-to-many field.
    #[must_use]
    pub fn through(mut self, table: impl Into<String>) -> Self {
        if let FieldKind::ManyToMany(spec) = &mut self.kind {
            spec.through = Some(table.into());
        }
        self
    }

    /// Returns the column that stores this field.
    ///
    /// Foreign keys are stored in `<name>_id`.
    #[must_use]
    pub fn column_name(&self, name: &str) -> String {
        match self.kind {
            FieldKind::ForeignKey(_) | FieldKind::OneToOne(_) => format!("{name}_id"),
            _ => name.to_string(),
        }
    }

    /// Returns true when the field maps onto a column of its model's table.
    #[must_use]
    pub const fn has_column(&self) -> bool {
        !matches!(self.kind, FieldKind::ManyToMany(_))
    }

    /// Returns true for timestamps re-stamped on every write.
    #[must_use]
    pub const fn is_auto_now(&self) -> bool {
        matches!(self.kind, FieldKind::DateTime { auto_now: true, .. })
    }

    /// Checks `value` against the field's constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self, name: &str, value: &SqlValue) -> Result<(), ValidationError> {
        if value.is_null() {
            if self.null || self.primary_key {
                return Ok(());
            }
            return Err(ValidationError::NullNotAllowed {
                field: name.to_string(),
            });
        }

        if let Some(choices) = &self.choices {
            if !choices.iter().any(|choice| choice_matches(choice, value)) {
                return Err(ValidationError::NotInChoices {
                    field: name.to_string(),
                    value: value.to_sql_inline(),
                });
            }
        }

        if let (Some(max_length), SqlValue::Text(text)) = (self.kind.max_length(), value) {
            let length = text.chars().count();
            if length > max_length {
                return Err(ValidationError::TooLong {
                    field: name.to_string(),
                    max_length,
                    length,
                });
            }
        }

        Ok(())
    }

    /// Returns the value `create` stores when the caller omits this field.
    #[must_use]
    pub fn initial_value(&self, now: &DateTime<Utc>) -> SqlValue {
        if let FieldKind::DateTime {
            auto_now,
            auto_now_add,
        } = self.kind
        {
            if auto_now || auto_now_add {
                return now.to_sql_value();
            }
        }

        match &self.default {
            Some(DefaultValue::Value(value)) => value.clone(),
            Some(DefaultValue::Now) => match self.kind {
                FieldKind::Date => now.date_naive().to_sql_value(),
                FieldKind::Time => SqlValue::Text(now.format("%H:%M:%S%.6f").to_string()),
                _ => now.to_sql_value(),
            },
            Some(DefaultValue::Uuid) => uuid::Uuid::new_v4().to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

/// Booleans come back from SQLite as integers, so a `true` choice must
/// accept a stored `1`.
fn choice_matches(choice: &SqlValue, value: &SqlValue) -> bool {
    match (choice, value) {
        (SqlValue::Bool(_), _) | (_, SqlValue::Bool(_)) => {
            choice.as_bool().is_some() && choice.as_bool() == value.as_bool()
        }
        _ => choice == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_column_name() {
        assert_eq!(Field::foreign_key("users").column_name("author"), "author_id");
        assert_eq!(Field::one_to_one("users").column_name("owner"), "owner_id");
        assert_eq!(Field::text().column_name("body"), "body");
    }

    #[test]
    fn test_validate_null() {
        let err = Field::text().validate("body", &SqlValue::Null).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NullNotAllowed {
                field: String::from("body")
            }
        );
        assert!(Field::text().null(true).validate("body", &SqlValue::Null).is_ok());
        assert!(Field::auto().validate("id", &SqlValue::Null).is_ok());
    }

    #[test]
    fn test_validate_choices() {
        let status = Field::char(10).choices(["draft", "published"]);
        assert!(status.validate("status", &"draft".to_sql_value()).is_ok());
        let err = status
            .validate("status", &"archived".to_sql_value())
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotInChoices { .. }));
    }

    #[test]
    fn test_validate_boolean_choices_accept_integers() {
        let flag = Field::boolean().choices([true]);
        assert!(flag.validate("flag", &SqlValue::Int(1)).is_ok());
        assert!(flag.validate("flag", &SqlValue::Int(0)).is_err());
    }

    #[test]
    fn test_validate_max_length_counts_characters() {
        let name = Field::char(3);
        assert!(name.validate("name", &"héé".to_sql_value()).is_ok());
        let err = name.validate("name", &"abcd".to_sql_value()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TooLong {
                field: String::from("name"),
                max_length: 3,
                length: 4,
            }
        );
    }

    #[test]
    fn test_initial_value() {
        let now = fixed_now();
        assert_eq!(Field::integer().initial_value(&now), SqlValue::Null);
        assert_eq!(
            Field::char(10).default("pending").initial_value(&now),
            SqlValue::Text(String::from("pending"))
        );
        assert_eq!(
            Field::datetime().auto_now_add(true).initial_value(&now),
            SqlValue::Text(String::from("2024-05-01T12:30:00.000000Z"))
        );
        assert_eq!(
            Field::date().default_now().initial_value(&now),
            SqlValue::Text(String::from("2024-05-01"))
        );
    }

    #[test]
    fn test_initial_value_uuid_is_fresh() {
        let field = Field::uuid().default_uuid();
        let now = fixed_now();
        let a = field.initial_value(&now);
        let b = field.initial_value(&now);
        assert_ne!(a, b);
        assert_eq!(a.as_str().map(str::len), Some(36));
    }

    #[test]
    fn test_builders_only_touch_matching_kinds() {
        let field = Field::text().auto_now(true).max_length(4).through("x");
        assert_eq!(field.kind, FieldKind::Text);
        assert!(Field::datetime().auto_now(true).is_auto_now());
        assert_eq!(Field::email().max_length(100).kind.max_length(), Some(100));
    }
}
