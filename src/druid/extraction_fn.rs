//! Maps a scalar expression over a single column to a dimension extraction
//! function: a backend-side transform (lookup, substring, regex, bucket,
//! time-format) applied to a column's raw values before grouping.
//!
//! Refuses (returns `Err`) rather than approximates when the expression
//! doesn't decompose into a chain of extraction-fn-eligible ops terminating
//! at a bare [`Expression::Ref`].

use serde_json::json;

use crate::error::{PlanError, PlanResult};
use crate::expr::Expression;

const COMPONENT: &str = "ExtractionFnBuilder";

/// Build an extraction function for `expr`, which must resolve to exactly
/// one underlying column reference. Returns `(column_name, extraction_fn)`
/// on success.
pub fn build_extraction_fn(expr: &Expression) -> PlanResult<(String, serde_json::Value)> {
    let chain = flatten_cascade(expr)?;
    match chain.split_first() {
        Some((Expression::Ref { name, nest, .. }, rest)) => {
            if *nest > 0 {
                return Err(PlanError::unsupported(
                    COMPONENT,
                    format!("ref `{name}` is out of scope (nest={nest})"),
                ));
            }
            if rest.is_empty() {
                return Ok((name.clone(), json!({ "type": "identity" })));
            }
            let mut fns = Vec::with_capacity(rest.len());
            for node in rest {
                fns.push(single_extraction_fn(node)?);
            }
            if fns.len() == 1 {
                Ok((name.clone(), fns.remove(0)))
            } else {
                Ok((
                    name.clone(),
                    json!({ "type": "cascade", "extractionFns": fns }),
                ))
            }
        }
        _ => Err(PlanError::unsupported(
            COMPONENT,
            "expression does not terminate at a bare column reference",
        )),
    }
}

/// Flatten a right-leaning chain of chainable-unary ops down to the
/// terminal `Ref`, in application order (outermost op last).
fn flatten_cascade(expr: &Expression) -> PlanResult<Vec<Expression>> {
    fn walk(expr: &Expression, acc: &mut Vec<Expression>) -> PlanResult<()> {
        match expr {
            Expression::Ref { .. } => {
                acc.push(expr.clone());
                Ok(())
            }
            Expression::Substr { operand, .. }
            | Expression::Lookup { operand, .. }
            | Expression::TimeFloor { operand, .. }
            | Expression::TimeBucket { operand, .. }
            | Expression::TimePart { operand, .. }
            | Expression::NumberBucket { operand, .. }
            | Expression::MatchRegex { operand, .. }
            | Expression::Cast { operand, .. } => {
                walk(operand, acc)?;
                acc.push(expr.clone());
                Ok(())
            }
            Expression::Then { .. } => Err(PlanError::unsupported(
                COMPONENT,
                "`then` expressions cannot become extraction functions",
            )),
            other => Err(PlanError::unsupported(
                COMPONENT,
                format!("{other:?} is not extraction-fn eligible"),
            )),
        }
    }
    let mut acc = Vec::new();
    walk(expr, &mut acc)?;
    Ok(acc)
}

fn single_extraction_fn(node: &Expression) -> PlanResult<serde_json::Value> {
    match node {
        Expression::Substr { position, length, .. } => Ok(json!({
            "type": "substring",
            "index": position,
            "length": length,
        })),
        Expression::Lookup { lookup_fn, .. } => Ok(json!({
            "type": "lookup",
            "lookup": { "type": "map", "name": lookup_fn },
        })),
        Expression::TimeFloor { period, time_zone, .. } | Expression::TimeBucket { period, time_zone, .. } => {
            Ok(json!({
                "type": "timeFormat",
                "granularity": { "type": "period", "period": period, "timeZone": time_zone },
            }))
        }
        Expression::TimePart { part, time_zone, .. } => Ok(json!({
            "type": "timeFormat",
            "format": part,
            "timeZone": time_zone,
        })),
        Expression::NumberBucket { size, offset, .. } => Ok(json!({
            "type": "bucket",
            "size": size,
            "offset": offset,
        })),
        Expression::MatchRegex { regex, .. } => Ok(json!({
            "type": "regex",
            "expr": regex,
        })),
        Expression::Cast { .. } => Ok(json!({ "type": "identity" })),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("{other:?} is not extraction-fn eligible"),
        )),
    }
}

/// True when `expr` is a "complex fallback": a fallback whose operand is a
/// chainable op over a chainable op over a ref (a carve-out
/// — these never get an extraction fn even at free-reference-count 1).
pub fn is_complex_fallback(expr: &Expression) -> bool {
    let Expression::Fallback { operand, .. } = expr else {
        return false;
    };
    fn is_chainable(e: &Expression) -> bool {
        matches!(
            e,
            Expression::Substr { .. }
                | Expression::Lookup { .. }
                | Expression::TimeFloor { .. }
                | Expression::TimeBucket { .. }
                | Expression::TimePart { .. }
                | Expression::NumberBucket { .. }
                | Expression::MatchRegex { .. }
                | Expression::Cast { .. }
        )
    }
    fn inner_operand(e: &Expression) -> Option<&Expression> {
        match e {
            Expression::Substr { operand, .. }
            | Expression::Lookup { operand, .. }
            | Expression::TimeFloor { operand, .. }
            | Expression::TimeBucket { operand, .. }
            | Expression::TimePart { operand, .. }
            | Expression::NumberBucket { operand, .. }
            | Expression::MatchRegex { operand, .. }
            | Expression::Cast { operand, .. } => Some(operand),
            _ => None,
        }
    }
    is_chainable(operand) && inner_operand(operand).map(is_chainable).unwrap_or(false)
}

/// True if `expr` contains a `then` op anywhere.
pub fn contains_then(expr: &Expression) -> bool {
    let mut found = false;
    expr.walk(&mut |node| {
        if matches!(node, Expression::Then { .. }) {
            found = true;
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExpressionType;

    #[test]
    fn bare_ref_gets_identity_extraction() {
        let e = Expression::ref_("country", ExpressionType::String);
        let (col, fn_) = build_extraction_fn(&e).unwrap();
        assert_eq!(col, "country");
        assert_eq!(fn_["type"], "identity");
    }

    #[test]
    fn single_substring_builds_substring_fn() {
        let e = Expression::ref_("path", ExpressionType::String).substring(0, 3);
        let (col, fn_) = build_extraction_fn(&e).unwrap();
        assert_eq!(col, "path");
        assert_eq!(fn_["type"], "substring");
        assert_eq!(fn_["index"], 0);
    }

    #[test]
    fn time_bucket_becomes_time_format() {
        let e = Expression::ref_("__time", ExpressionType::Time).time_bucket("P1D", "Etc/UTC");
        let (col, fn_) = build_extraction_fn(&e).unwrap();
        assert_eq!(col, "__time");
        assert_eq!(fn_["type"], "timeFormat");
    }

    #[test]
    fn chained_ops_build_a_cascade() {
        let e = Expression::ref_("path", ExpressionType::String)
            .substring(0, 3)
            .match_regex("^a");
        let (_, fn_) = build_extraction_fn(&e).unwrap();
        assert_eq!(fn_["type"], "cascade");
        assert_eq!(fn_["extractionFns"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn aggregate_expression_is_not_eligible() {
        let e = Expression::ref_("main", ExpressionType::Dataset).count();
        assert!(build_extraction_fn(&e).is_err());
    }

    #[test]
    fn contains_then_detects_nested_then() {
        let then = Expression::ref_("x", ExpressionType::Boolean).then(Expression::number(1.0));
        assert!(contains_then(&then));
        assert!(!contains_then(&Expression::ref_("y", ExpressionType::Number)));
    }
}
