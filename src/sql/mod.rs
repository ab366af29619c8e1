//! SQL generation module: the sibling backend. Given the same
//! [`crate::types::External`] snapshot the `druid` planner consumes, lowers
//! it to a SQL string across several relational dialects instead of a
//! native query document.
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations
//! - [`plan`] - adapts `External`/`Expression` into a [`query::Query`]

pub mod dialect;
pub mod expr;
pub mod plan;
pub mod query;
pub mod token;
pub mod types;

pub use types::DataType as SqlDataType;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    avg, coalesce, col, count, count_distinct, count_star, func, lag_offset, lit_bool, lit_float,
    lit_int, lit_null, lit_str, max, min, star, sum, table_col, table_star, BinaryOperator, Expr,
    ExprExt, Literal, UnaryOperator, WindowExt, WindowFrame, WindowOrderBy,
};
pub use plan::plan_sql;
pub use query::{
    Cte, Join, JoinType, LimitOffset, NullsOrder, OrderByExpr, Query, SelectExpr, SortDir, TableRef,
};
pub use token::{Token, TokenStream};
