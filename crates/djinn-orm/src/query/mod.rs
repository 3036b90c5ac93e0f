//! Query building types for the ORM.
//!
//! This module provides lookup criteria and aggregate functions.

mod aggregates;
mod criteria;

pub use aggregates::{
    avg, count, count_all, count_distinct, max, min, sum, Aggregate, AggregateFunction,
};
pub use criteria::{Criteria, Criterion, Lookup};
