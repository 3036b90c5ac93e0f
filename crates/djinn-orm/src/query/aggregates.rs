//! Aggregate functions for `annotate` and `aggregate`.

use djinn_core::check_identifier;

use crate::error::Result;

/// The SQL aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// COUNT
    Count,
    /// SUM
    Sum,
    /// AVG
    Avg,
    /// MAX
    Max,
    /// MIN
    Min,
}

impl AggregateFunction {
    /// Returns the SQL function name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }
}

/// An aggregate over one column, or over all rows for `COUNT(*)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// Function applied.
    pub function: AggregateFunction,
    /// Column, or `*`.
    pub column: String,
    /// Whether only distinct values are aggregated.
    pub distinct: bool,
}

impl Aggregate {
    /// Creates an aggregate of `function` over `column`.
    pub fn new(function: AggregateFunction, column: impl Into<String>) -> Self {
        Self {
            function,
            column: column.into(),
            distinct: false,
        }
    }

    /// Aggregates distinct values only.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Renders the aggregate, mapping the column through `resolve`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::OrmError::InvalidIdentifier`] for an unsafe column.
    pub fn to_sql(&self, resolve: &dyn Fn(&str) -> String) -> Result<String> {
        let column = if self.column == "*" {
            String::from("*")
        } else {
            let column = resolve(&self.column);
            check_identifier(&column)?;
            column
        };
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        Ok(format!("{}({distinct}{column})", self.function.as_str()))
    }
}

/// `COUNT(*)`
#[must_use]
pub fn count_all() -> Aggregate {
    Aggregate::new(AggregateFunction::Count, "*")
}

/// `COUNT(column)`
#[must_use]
pub fn count(column: &str) -> Aggregate {
    Aggregate::new(AggregateFunction::Count, column)
}

/// `COUNT(DISTINCT column)`
#[must_use]
pub fn count_distinct(column: &str) -> Aggregate {
    count(column).distinct()
}

/// `SUM(column)`
#[must_use]
pub fn sum(column: &str) -> Aggregate {
    Aggregate::new(AggregateFunction::Sum, column)
}

/// `AVG(column)`
#[must_use]
pub fn avg(column: &str) -> Aggregate {
    Aggregate::new(AggregateFunction::Avg, column)
}

/// `MAX(column)`
#[must_use]
pub fn max(column: &str) -> Aggregate {
    Aggregate::new(AggregateFunction::Max, column)
}

/// `MIN(column)`
#[must_use]
pub fn min(column: &str) -> Aggregate {
    Aggregate::new(AggregateFunction::Min, column)
}
