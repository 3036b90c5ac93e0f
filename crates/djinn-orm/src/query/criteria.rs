//! Lookup criteria for filtering querysets.
//!
//! [`Criteria`] is an insertion-ordered map from lookup key to
//! [`Criterion`]. A key is a column name, optionally suffixed with a range
//! lookup (`__gt`, `__gte`, `__lt`, `__lte`, `__ne`, `__exact`). Adding a key
//! that is already present replaces its criterion.
//!
//! ```rust
//! use djinn_orm::Criteria;
//!
//! let criteria = Criteria::new()
//!     .eq("status", "published")
//!     .gte("views", 100)
//!     .in_list("author_id", [1, 2, 3])
//!     .is_null("deleted_at");
//! assert_eq!(criteria.len(), 4);
//! ```

use djinn_core::{check_identifier, SqlValue, ToSqlValue};
use indexmap::IndexMap;

use crate::error::{OrmError, Result};
use crate::model::Record;

/// The right-hand side of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// Compare against a value.
    Value(SqlValue),
    /// Match NULL (`IS NULL`).
    Null,
    /// Match any value of the list (`IN`).
    In(Vec<SqlValue>),
}

impl From<SqlValue> for Criterion {
    fn from(value: SqlValue) -> Self {
        if value.is_null() {
            Self::Null
        } else {
            Self::Value(value)
        }
    }
}

/// The comparison a lookup key asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// `=`
    Exact,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

impl Lookup {
    /// Splits a lookup key into its column and comparison.
    #[must_use]
    pub fn split(key: &str) -> (&str, Self) {
        const SUFFIXES: [(&str, Lookup); 6] = [
            ("__exact", Lookup::Exact),
            ("__ne", Lookup::Ne),
            ("__gte", Lookup::Gte),
            ("__gt", Lookup::Gt),
            ("__lte", Lookup::Lte),
            ("__lt", Lookup::Lt),
        ];
        for (suffix, lookup) in SUFFIXES {
            if let Some(column) = key.strip_suffix(suffix) {
                return (column, lookup);
            }
        }
        (key, Self::Exact)
    }

    const fn operator(self, negate: bool) -> &'static str {
        match (self, negate) {
            (Self::Exact, false) | (Self::Ne, true) => "=",
            (Self::Exact, true) | (Self::Ne, false) => "!=",
            (Self::Gt, false) | (Self::Lte, true) => ">",
            (Self::Gte, false) | (Self::Lt, true) => ">=",
            (Self::Lt, false) | (Self::Gte, true) => "<",
            (Self::Lte, false) | (Self::Gt, true) => "<=",
        }
    }

    const fn is_range(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

/// Insertion-ordered lookups, AND'ed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    lookups: IndexMap<String, Criterion>,
}

impl Criteria {
    /// Creates empty criteria.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a lookup.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, criterion: Criterion) -> Self {
        self.lookups.insert(key.into(), criterion);
        self
    }

    /// `column = value`, or `column IS NULL` when the value is NULL.
    #[must_use]
    pub fn eq(self, column: impl Into<String>, value: impl ToSqlValue) -> Self {
        self.with(column, Criterion::from(value.to_sql_value()))
    }

    /// `column != value`.
    #[must_use]
    pub fn ne(self, column: &str, value: impl ToSqlValue) -> Self {
        self.with(format!("{column}__ne"), Criterion::from(value.to_sql_value()))
    }

    /// `column > value`.
    #[must_use]
    pub fn gt(self, column: &str, value: impl ToSqlValue) -> Self {
        self.with(format!("{column}__gt"), Criterion::from(value.to_sql_value()))
    }

    /// `column >= value`.
    #[must_use]
    pub fn gte(self, column: &str, value: impl ToSqlValue) -> Self {
        self.with(format!("{column}__gte"), Criterion::from(value.to_sql_value()))
    }

    /// `column < value`.
    #[must_use]
    pub fn lt(self, column: &str, value: impl ToSqlValue) -> Self {
        self.with(format!("{column}__lt"), Criterion::from(value.to_sql_value()))
    }

    /// `column <= value`.
    #[must_use]
    pub fn lte(self, column: &str, value: impl ToSqlValue) -> Self {
        self.with(format!("{column}__lte"), Criterion::from(value.to_sql_value()))
    }

    /// `column IS NULL`.
    #[must_use]
    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.with(column, Criterion::Null)
    }

    /// `column IN (values..)`. An empty list matches nothing.
    #[must_use]
    pub fn in_list<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        let values = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        self.with(column, Criterion::In(values))
    }

    /// Returns a copy with `other`'s lookups added; `other` wins on
    /// duplicate keys.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut lookups = self.lookups.clone();
        for (key, criterion) in &other.lookups {
            lookups.insert(key.clone(), criterion.clone());
        }
        Self { lookups }
    }

    /// Returns true when there are no lookups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    /// Returns the number of lookups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    /// Iterates over the lookups in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Criterion)> {
        self.lookups.iter().map(|(key, criterion)| (key.as_str(), criterion))
    }

    /// Returns the plain equality lookups as a record, the values a row
    /// matching these criteria is known to hold.
    #[must_use]
    pub fn exact_values(&self) -> Record {
        self.lookups
            .iter()
            .filter_map(|(key, criterion)| match (Lookup::split(key), criterion) {
                ((column, Lookup::Exact), Criterion::Value(value)) => {
                    Some((column.to_string(), value.clone()))
                }
                ((column, Lookup::Exact), Criterion::Null) => {
                    Some((column.to_string(), SqlValue::Null))
                }
                _ => None,
            })
            .collect()
    }

    /// Compiles every lookup into a SQL condition, pushing bound values
    /// onto `params`.
    ///
    /// `resolve` maps a lookup column onto the stored column name. When
    /// `negate` is set each lookup is negated on its own.
    pub(crate) fn compile(
        &self,
        negate: bool,
        resolve: &dyn Fn(&str) -> String,
        params: &mut Vec<SqlValue>,
    ) -> Result<Vec<String>> {
        let mut conditions = Vec::with_capacity(self.lookups.len());
        for (key, criterion) in &self.lookups {
            let (column, lookup) = Lookup::split(key);
            let column = resolve(column);
            check_identifier(&column)?;
            conditions.push(compile_lookup(&column, lookup, criterion, negate, params)?);
        }
        Ok(conditions)
    }
}

impl<K: Into<String>> FromIterator<(K, Criterion)> for Criteria {
    fn from_iter<T: IntoIterator<Item = (K, Criterion)>>(iter: T) -> Self {
        Self {
            lookups: iter.into_iter().map(|(k, c)| (k.into(), c)).collect(),
        }
    }
}

fn compile_lookup(
    column: &str,
    lookup: Lookup,
    criterion: &Criterion,
    negate: bool,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if lookup.is_range() && !matches!(criterion, Criterion::Value(_)) {
        return Err(OrmError::QueryError(format!(
            "range lookup on {column} needs a single non-null value"
        )));
    }

    // `__ne` is an inverted exact match.
    let inverted = negate ^ (lookup == Lookup::Ne);

    let sql = match criterion {
        Criterion::Value(value) => {
            params.push(value.clone());
            format!("{column} {} ?", lookup.operator(negate))
        }
        Criterion::Null => {
            if inverted {
                format!("{column} IS NOT NULL")
            } else {
                format!("{column} IS NULL")
            }
        }
        Criterion::In(values) if values.is_empty() => {
            String::from(if inverted { "1 = 1" } else { "1 = 0" })
        }
        Criterion::In(values) => {
            params.extend(values.iter().cloned());
            let placeholders = vec!["?"; values.len()].join(", ");
            if inverted {
                format!("{column} NOT IN ({placeholders})")
            } else {
                format!("{column} IN ({placeholders})")
            }
        }
    };
    Ok(sql)
}
