//! # druid-planner
//!
//! A backend query planner for a dataset expression algebra.
//!
//! Takes a typed, pre-simplified [`expr::Expression`] tree plus an
//! [`types::External`] configuration snapshot and lowers it to a native
//! analytics-engine query document (`timeseries` / `topN` / `groupBy` /
//! `scan` / `timeBoundary` / `segmentMetadata`) together with a streaming
//! [`types::RowTransform`] that reshapes result rows back into the
//! algebra's value space.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     Expression (dataset algebra)                │
//! └────────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [druid::Planner]
//! ┌────────────────────────────────────────────────────────────────┐
//! │   ExpressionLowerer · ExtractionFnBuilder · FilterBuilder       │
//! │   AggregationBuilder                                           │
//! └────────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │     QueryAndPostTransform { query, context, postTransform }     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The SQL backend (`sql` module) is a simpler sibling: it targets the same
//! `External` snapshot but lowers to a SQL string across several relational
//! dialects, and is covered only insofar as it defines the contract the
//! planner must satisfy.

pub mod druid;
pub mod error;
pub mod expr;
pub mod sql;
pub mod types;

pub use error::{PlanError, PlanResult};
