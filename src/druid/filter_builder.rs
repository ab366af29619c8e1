//! Partitions a filter expression into a time-interval set over the time
//! column and a residual dimension filter the backend evaluates row by row.
//!
//! Time and non-time constraints live in different parts of a native query
//! document (`intervals` vs `filter`), so this builder walks the boolean
//! structure once and routes each leaf to the side that can express it.

use serde_json::{json, Value};

use crate::error::{PlanError, PlanResult};
use crate::expr::{Expression, LiteralValue};

const COMPONENT: &str = "FilterBuilder";

/// The two pieces a filter decomposes into: time bounds plus whatever the
/// backend's dimension-filter language can still express.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParts {
    /// `[start, end)` ISO-8601 interval strings. Empty means unbounded
    /// (eternity), which the caller must gate behind `allowEternity`.
    pub intervals: Vec<(String, String)>,
    pub dimension_filter: Option<Value>,
}

/// Reject expressions the backend's filter language structurally cannot
/// express, before attempting to lower them. `cardinality` references are
/// the only such case.
pub fn can_handle_filter(expr: &Expression, time_attribute: &str) -> PlanResult<()> {
    let mut offending = false;
    expr.walk(&mut |node| {
        if let Expression::Cardinality { .. } = node {
            offending = true;
        }
    });
    if offending {
        return Err(PlanError::unsupported(
            COMPONENT,
            "filter references a cardinality expression, which cannot be evaluated row-wise",
        ));
    }
    let _ = time_attribute;
    Ok(())
}

/// Build `FilterParts` from a filter expression (or `None` for "no filter",
/// which yields an empty-intervals/no-dimension-filter pair the caller
/// interprets as eternity).
pub fn build_filter(expr: Option<&Expression>, time_attribute: &str) -> PlanResult<FilterParts> {
    let Some(expr) = expr else {
        return Ok(FilterParts::default());
    };
    can_handle_filter(expr, time_attribute)?;
    partition(expr, time_attribute)
}

fn partition(expr: &Expression, time_attribute: &str) -> PlanResult<FilterParts> {
    match expr {
        Expression::And { operand, expression } => {
            let left = partition(operand, time_attribute)?;
            let right = partition(expression, time_attribute)?;
            Ok(FilterParts {
                intervals: intersect_intervals(left.intervals, right.intervals),
                dimension_filter: and_dimension_filters(left.dimension_filter, right.dimension_filter),
            })
        }
        Expression::Or { operand, expression } => {
            let left = partition(operand, time_attribute)?;
            let right = partition(expression, time_attribute)?;
            let left_is_time = !left.intervals.is_empty() && left.dimension_filter.is_none();
            let right_is_time = !right.intervals.is_empty() && right.dimension_filter.is_none();
            if left_is_time != right_is_time {
                return Err(PlanError::unsupported(
                    COMPONENT,
                    "OR cannot mix a time-attribute disjunct with a non-time disjunct",
                ));
            }
            if left_is_time && right_is_time {
                Ok(FilterParts {
                    intervals: union_intervals(left.intervals, right.intervals),
                    dimension_filter: None,
                })
            } else {
                Ok(FilterParts {
                    intervals: Vec::new(),
                    dimension_filter: or_dimension_filters(left.dimension_filter, right.dimension_filter),
                })
            }
        }
        _ => {
            if let Some(interval) = as_time_interval(expr, time_attribute)? {
                Ok(FilterParts {
                    intervals: vec![interval],
                    dimension_filter: None,
                })
            } else {
                Ok(FilterParts {
                    intervals: Vec::new(),
                    dimension_filter: Some(lower_dimension_filter(expr)?),
                })
            }
        }
    }
}

/// Recognize a leaf comparing the time ref to a bounded range, returning
/// `[start, end)` if so. Returns `Ok(None)` (not an error) when this leaf
/// isn't a time constraint — the caller routes it to the dimension filter.
fn as_time_interval(expr: &Expression, time_attribute: &str) -> PlanResult<Option<(String, String)>> {
    let is_time_ref = |e: &Expression| matches!(e, Expression::Ref { name, nest: 0, .. } if name == time_attribute);

    match expr {
        Expression::In { operand, expression } if is_time_ref(operand) => match expression.as_ref() {
            Expression::Literal {
                value: LiteralValue::Set(items),
                ..
            } if items.len() == 2 => {
                let start = time_literal_string(&items[0])?;
                let end = time_literal_string(&items[1])?;
                Ok(Some((start, end)))
            }
            _ => Err(PlanError::unsupported(
                COMPONENT,
                "time-attribute IN filter must be a two-element literal range",
            )),
        },
        Expression::Is { operand, expression } if is_time_ref(operand) => {
            let t = time_literal_string(literal_value(expression)?)?;
            Ok(Some((t.clone(), t)))
        }
        _ => Ok(None),
    }
}

fn literal_value(expr: &Expression) -> PlanResult<&LiteralValue> {
    match expr {
        Expression::Literal { value, .. } => Ok(value),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("expected a literal, found {other:?}"),
        )),
    }
}

fn time_literal_string(value: &LiteralValue) -> PlanResult<String> {
    match value {
        LiteralValue::Time(s) => Ok(s.clone()),
        LiteralValue::String(s) => Ok(s.clone()),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("time bound must be a TIME or STRING literal, found {other:?}"),
        )),
    }
}

fn intersect_intervals(a: Vec<(String, String)>, b: Vec<(String, String)>) -> Vec<(String, String)> {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b,
        (_, true) => a,
        _ => {
            let mut out = Vec::new();
            for (as_, ae) in &a {
                for (bs, be) in &b {
                    let start = if as_ >= bs { as_ } else { bs };
                    let end = if ae <= be { ae } else { be };
                    if start < end {
                        out.push((start.clone(), end.clone()));
                    }
                }
            }
            out
        }
    }
}

fn union_intervals(mut a: Vec<(String, String)>, b: Vec<(String, String)>) -> Vec<(String, String)> {
    a.extend(b);
    a
}

fn and_dimension_filters(a: Option<Value>, b: Option<Value>) -> Option<Value> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(json!({ "type": "and", "fields": [x, y] })),
    }
}

fn or_dimension_filters(a: Option<Value>, b: Option<Value>) -> Option<Value> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(json!({ "type": "or", "fields": [x, y] })),
    }
}

/// Lower a non-boolean-connective leaf (or a nested And/Or within a
/// non-time residual) into the backend's dimension-filter JSON.
fn lower_dimension_filter(expr: &Expression) -> PlanResult<Value> {
    match expr {
        Expression::And { operand, expression } => Ok(json!({
            "type": "and",
            "fields": [lower_dimension_filter(operand)?, lower_dimension_filter(expression)?],
        })),
        Expression::Or { operand, expression } => Ok(json!({
            "type": "or",
            "fields": [lower_dimension_filter(operand)?, lower_dimension_filter(expression)?],
        })),
        Expression::Not { operand } => Ok(json!({
            "type": "not",
            "field": lower_dimension_filter(operand)?,
        })),
        Expression::Is { operand, expression } => {
            let (dim, extraction_fn) = dimension_for(operand)?;
            let value = literal_value(expression)?;
            Ok(selector_filter(&dim, value, extraction_fn))
        }
        Expression::In { operand, expression } => {
            let (dim, extraction_fn) = dimension_for(operand)?;
            let values = literal_set(expression)?;
            let mut filter = json!({
                "type": "in",
                "dimension": dim,
                "values": values.iter().map(literal_as_str).collect::<Vec<_>>(),
            });
            if let Some(f) = extraction_fn {
                filter["extractionFn"] = f;
            }
            Ok(filter)
        }
        Expression::Contains { operand, expression } => {
            let (dim, extraction_fn) = dimension_for(operand)?;
            let needle = literal_value(expression)?;
            let mut filter = json!({
                "type": "search",
                "dimension": dim,
                "query": { "type": "contains", "value": literal_as_str(needle) },
            });
            if let Some(f) = extraction_fn {
                filter["extractionFn"] = f;
            }
            Ok(filter)
        }
        Expression::MatchRegex { operand, regex } => {
            regex::Regex::new(regex)
                .map_err(|e| PlanError::invalid_configuration(format!("invalid regex `{regex}`: {e}")))?;
            let (dim, extraction_fn) = dimension_for(operand)?;
            let mut filter = json!({ "type": "regex", "dimension": dim, "pattern": regex });
            if let Some(f) = extraction_fn {
                filter["extractionFn"] = f;
            }
            Ok(filter)
        }
        Expression::Overlap { operand, expression } => {
            let (dim, extraction_fn) = dimension_for(operand)?;
            let values = literal_set(expression)?;
            let mut filter = json!({
                "type": "in",
                "dimension": dim,
                "values": values.iter().map(literal_as_str).collect::<Vec<_>>(),
            });
            if let Some(f) = extraction_fn {
                filter["extractionFn"] = f;
            }
            Ok(filter)
        }
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("{other:?} cannot be lowered to a dimension filter"),
        )),
    }
}

fn dimension_for(expr: &Expression) -> PlanResult<(String, Option<Value>)> {
    match crate::druid::extraction_fn::build_extraction_fn(expr) {
        Ok((name, fn_)) if fn_["type"] == "identity" => Ok((name, None)),
        Ok((name, fn_)) => Ok((name, Some(fn_))),
        Err(_) => match expr {
            Expression::Ref { name, nest: 0, .. } => Ok((name.clone(), None)),
            other => Err(PlanError::unsupported(
                COMPONENT,
                format!("{other:?} does not resolve to a single dimension"),
            )),
        },
    }
}

fn literal_set(expr: &Expression) -> PlanResult<Vec<LiteralValue>> {
    match expr {
        Expression::Literal {
            value: LiteralValue::Set(items),
            ..
        } => Ok(items.clone()),
        Expression::Literal { value, .. } => Ok(vec![value.clone()]),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("expected a literal set, found {other:?}"),
        )),
    }
}

fn literal_as_str(value: &LiteralValue) -> String {
    match value {
        LiteralValue::String(s) => s.clone(),
        LiteralValue::Time(s) => s.clone(),
        LiteralValue::Number(n) => n.to_string(),
        LiteralValue::Boolean(b) => b.to_string(),
        LiteralValue::Null => String::new(),
        LiteralValue::Set(_) => String::new(),
    }
}

fn selector_filter(dimension: &str, value: &LiteralValue, extraction_fn: Option<Value>) -> Value {
    let mut filter = json!({
        "type": "selector",
        "dimension": dimension,
        "value": literal_as_str(value),
    });
    if let Some(f) = extraction_fn {
        filter["extractionFn"] = f;
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExpressionType;

    fn time_ref() -> Expression {
        Expression::ref_("__time", ExpressionType::Time)
    }

    #[test]
    fn no_filter_yields_empty_parts() {
        let parts = build_filter(None, "__time").unwrap();
        assert!(parts.intervals.is_empty());
        assert!(parts.dimension_filter.is_none());
    }

    #[test]
    fn bare_time_range_becomes_an_interval() {
        let range = Expression::literal(
            LiteralValue::Set(vec![
                LiteralValue::Time("2020-01-01T00:00:00Z".into()),
                LiteralValue::Time("2020-01-02T00:00:00Z".into()),
            ]),
            ExpressionType::set_of(ExpressionType::Time),
        );
        let filter = time_ref().in_(range);
        let parts = build_filter(Some(&filter), "__time").unwrap();
        assert_eq!(
            parts.intervals,
            vec![("2020-01-01T00:00:00Z".to_string(), "2020-01-02T00:00:00Z".to_string())]
        );
        assert!(parts.dimension_filter.is_none());
    }

    #[test]
    fn and_of_time_and_dimension_splits_both_ways() {
        let range = Expression::literal(
            LiteralValue::Set(vec![
                LiteralValue::Time("2020-01-01T00:00:00Z".into()),
                LiteralValue::Time("2020-01-02T00:00:00Z".into()),
            ]),
            ExpressionType::set_of(ExpressionType::Time),
        );
        let time_part = time_ref().in_(range);
        let dim_part = Expression::ref_("country", ExpressionType::String).is(Expression::string("US"));
        let parts = build_filter(Some(&time_part.and(dim_part)), "__time").unwrap();
        assert_eq!(parts.intervals.len(), 1);
        assert_eq!(parts.dimension_filter.unwrap()["type"], "selector");
    }

    #[test]
    fn or_mixing_time_and_dimension_is_rejected() {
        let range = Expression::literal(
            LiteralValue::Set(vec![
                LiteralValue::Time("2020-01-01T00:00:00Z".into()),
                LiteralValue::Time("2020-01-02T00:00:00Z".into()),
            ]),
            ExpressionType::set_of(ExpressionType::Time),
        );
        let time_part = time_ref().in_(range);
        let dim_part = Expression::ref_("country", ExpressionType::String).is(Expression::string("US"));
        assert!(build_filter(Some(&time_part.or(dim_part)), "__time").is_err());
    }

    #[test]
    fn cardinality_reference_is_rejected() {
        let filter = Expression::ref_("tags", ExpressionType::set_of(ExpressionType::String))
            .cardinality()
            .is(Expression::number(3.0));
        assert!(can_handle_filter(&filter, "__time").is_err());
    }

    #[test]
    fn match_regex_lowers_to_regex_filter() {
        let filter = Expression::ref_("country", ExpressionType::String).match_regex("^US.*");
        let parts = build_filter(Some(&filter), "__time").unwrap();
        let dim_filter = parts.dimension_filter.unwrap();
        assert_eq!(dim_filter["type"], "regex");
        assert_eq!(dim_filter["pattern"], "^US.*");
    }

    #[test]
    fn malformed_regex_is_rejected() {
        let filter = Expression::ref_("country", ExpressionType::String).match_regex("(unclosed");
        assert!(build_filter(Some(&filter), "__time").is_err());
    }

    #[test]
    fn in_set_lowers_to_in_filter() {
        let set = Expression::literal(
            LiteralValue::Set(vec![LiteralValue::String("a".into()), LiteralValue::String("b".into())]),
            ExpressionType::set_of(ExpressionType::String),
        );
        let filter = Expression::ref_("tags", ExpressionType::String).in_(set);
        let parts = build_filter(Some(&filter), "__time").unwrap();
        let dim_filter = parts.dimension_filter.unwrap();
        assert_eq!(dim_filter["type"], "in");
        assert_eq!(dim_filter["dimension"], "tags");
    }
}
