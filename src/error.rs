//! Unified error type for the planner.
//!
//! Mirrors the taxonomy the planner is specified against: a type mismatch
//! at a tree position, an expression the backend cannot express, a
//! configuration the backend refuses outright, and a malformed response
//! from introspection. Each variant carries enough structured context
//! (the offending expression's debug rendering, the attribute name, the
//! op name) to produce an actionable message without relying on ad hoc
//! string formatting at the call site.

use crate::expr::ExpressionType;

/// Result type used throughout the planner.
pub type PlanResult<T> = Result<T, PlanError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    /// An expression's declared type conflicts with its resolved type.
    #[error("type error: expected {expected:?}, found {found:?} in `{context}`")]
    TypeError {
        expected: ExpressionType,
        found: ExpressionType,
        context: String,
    },

    /// The expression cannot be lowered to the backend.
    #[error("unsupported expression in {component}: {reason}")]
    UnsupportedExpression { component: &'static str, reason: String },

    /// The requested configuration is invalid for this backend.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// An introspection or scan response could not be interpreted.
    #[error("invalid result from backend: {reason}")]
    InvalidResult { reason: String },
}

impl PlanError {
    pub fn unsupported(component: &'static str, reason: impl Into<String>) -> Self {
        PlanError::UnsupportedExpression {
            component,
            reason: reason.into(),
        }
    }

    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        PlanError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub fn invalid_result(reason: impl Into<String>) -> Self {
        PlanError::InvalidResult {
            reason: reason.into(),
        }
    }
}
