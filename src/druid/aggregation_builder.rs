//! Lowers a list of named aggregate expressions ([`Apply`]) into the
//! backend's `(aggregations, postAggregations)` pair.
//!
//! A bare aggregate (`count`, `sum`, …) becomes one aggregator named after
//! the apply. Arithmetic over aggregates becomes a post-aggregation tree
//! whose leaves are aggregators given `!`-prefixed intermediate names, so
//! the post-transform can drop them from the visible output.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::error::{PlanError, PlanResult};
use crate::expr::{Expression, ExpressionType, LiteralValue};
use crate::types::{AttributeInfo, External};

const COMPONENT: &str = "AggregationBuilder";

pub struct AggregationResult {
    pub aggregations: Vec<Value>,
    pub post_aggregations: Vec<Value>,
    /// `!`-prefixed aggregator names allocated for post-aggregation
    /// leaves — present in the emitted `aggregations` but must be dropped
    /// from the post-transform's visible output.
    pub intermediate_names: Vec<String>,
}

struct Ctx<'a> {
    aggregations: Vec<Value>,
    names: std::collections::HashSet<String>,
    intermediate_names: Vec<String>,
    counter: usize,
    custom_aggregations: &'a HashMap<String, String>,
    raw_attributes: &'a [AttributeInfo],
    time_attribute: &'a str,
}

impl<'a> Ctx<'a> {
    fn fresh_name(&mut self) -> String {
        loop {
            let candidate = format!("!a{}", self.counter);
            self.counter += 1;
            if self.names.insert(candidate.clone()) {
                self.intermediate_names.push(candidate.clone());
                return candidate;
            }
        }
    }

    fn attribute_of(&self, expr: &Expression) -> Option<&AttributeInfo> {
        if let Expression::Ref { name, nest: 0, .. } = expr {
            self.raw_attributes.iter().find(|a| &a.name == name)
        } else {
            None
        }
    }
}

/// Lower every apply into aggregator/post-aggregator JSON. `names` are
/// seeded with the apply names so intermediate names never collide.
pub fn build_aggregations(applies: &[crate::types::Apply], external: &External) -> PlanResult<AggregationResult> {
    let mut ctx = Ctx {
        aggregations: Vec::new(),
        names: applies.iter().map(|a| a.name.clone()).collect(),
        intermediate_names: Vec::new(),
        counter: 0,
        custom_aggregations: &external.custom_aggregations,
        raw_attributes: &external.raw_attributes,
        time_attribute: &external.time_attribute,
    };
    let mut post_aggregations = Vec::new();

    for apply in applies {
        if apply.expression.is_aggregate() {
            lower_aggregator(&apply.expression, &apply.name, apply.force_finalize, &mut ctx)?;
        } else {
            let tree = lower_post_agg_node(&apply.expression, &mut ctx)?;
            post_aggregations.push(json!({
                "type": "expression",
                "name": apply.name,
                "expr": tree,
            }));
        }
    }

    Ok(AggregationResult {
        aggregations: ctx.aggregations,
        post_aggregations,
        intermediate_names: ctx.intermediate_names,
    })
}

/// Lower a node appearing inside a post-aggregation expression tree:
/// either an aggregate (which gets materialized as a real aggregator with
/// an intermediate name and referenced by field access) or an arithmetic
/// combinator over such nodes.
fn lower_post_agg_node(expr: &Expression, ctx: &mut Ctx) -> PlanResult<Value> {
    if expr.is_aggregate() {
        let name = ctx.fresh_name();
        lower_aggregator(expr, &name, false, ctx)?;
        return Ok(json!({ "type": "fieldAccess", "fieldName": name }));
    }

    match expr {
        Expression::Literal { value, .. } => Ok(lower_constant(value)),
        Expression::Add { operand, expression } => arithmetic("+", operand, expression, ctx),
        Expression::Subtract { operand, expression } => arithmetic("-", operand, expression, ctx),
        Expression::Multiply { operand, expression } => arithmetic("*", operand, expression, ctx),
        Expression::Divide { operand, expression } => {
            let l = lower_post_agg_node(operand, ctx)?;
            let r = lower_post_agg_node(expression, ctx)?;
            // Safe-divide: a zero divisor yields null rather than the
            // backend's own division error or an infinity.
            Ok(json!({ "type": "safeDivide", "fields": [l, r] }))
        }
        Expression::Power { operand, expression } => arithmetic("pow", operand, expression, ctx),
        Expression::Log { operand, expression } => arithmetic("log", operand, expression, ctx),
        Expression::Absolute { operand } => {
            let inner = lower_post_agg_node(operand, ctx)?;
            Ok(json!({ "type": "arithmetic", "fn": "abs", "fields": [inner] }))
        }
        Expression::Cast { operand, output_type } => {
            let inner = lower_post_agg_node(operand, ctx)?;
            Ok(json!({ "type": "cast", "field": inner, "outputType": cast_type_name(output_type) }))
        }
        Expression::Fallback { operand, expression } => {
            let l = lower_post_agg_node(operand, ctx)?;
            let r = lower_post_agg_node(expression, ctx)?;
            Ok(json!({ "type": "arithmetic", "fn": "nvl", "fields": [l, r] }))
        }
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("{other:?} has no post-aggregation representation"),
        )),
    }
}

fn arithmetic(op: &str, l: &Expression, r: &Expression, ctx: &mut Ctx) -> PlanResult<Value> {
    let l = lower_post_agg_node(l, ctx)?;
    let r = lower_post_agg_node(r, ctx)?;
    Ok(json!({ "type": "arithmetic", "fn": op, "fields": [l, r] }))
}

fn lower_constant(value: &LiteralValue) -> Value {
    match value {
        LiteralValue::Number(n) => json!({ "type": "constant", "value": n }),
        other => json!({ "type": "constant", "value": format!("{other:?}") }),
    }
}

fn cast_type_name(ty: &ExpressionType) -> &'static str {
    match ty {
        ExpressionType::Number => "DOUBLE",
        ExpressionType::Time => "LONG",
        ExpressionType::Boolean => "LONG",
        _ => "STRING",
    }
}

/// Build and push one real aggregator under `name`, unwrapping a `filter`
/// operand into the backend's `filtered` wrapper first.
fn lower_aggregator(expr: &Expression, name: &str, force_finalize: bool, ctx: &mut Ctx) -> PlanResult<()> {
    let (base, filter_expr) = match expr {
        Expression::Count { operand } => (AggKind::Count, filter_of(operand)),
        Expression::Sum { operand, expression } => (AggKind::Sum(expression.as_ref().clone()), filter_of(operand)),
        Expression::Min { operand, expression } => (AggKind::Min(expression.as_ref().clone()), filter_of(operand)),
        Expression::Max { operand, expression } => (AggKind::Max(expression.as_ref().clone()), filter_of(operand)),
        Expression::CountDistinct { operand, expression } => {
            (AggKind::CountDistinct(expression.as_ref().clone()), filter_of(operand))
        }
        Expression::Quantile { operand, expression, quantile } => (
            AggKind::Quantile(expression.as_ref().clone(), *quantile),
            filter_of(operand),
        ),
        Expression::Custom {
            operand,
            custom_name,
            expression,
        } => (
            AggKind::Custom(custom_name.clone(), expression.as_ref().map(|e| e.as_ref().clone())),
            filter_of(operand),
        ),
        other => {
            return Err(PlanError::unsupported(
                COMPONENT,
                format!("{other:?} is not an aggregate node"),
            ))
        }
    };

    let mut aggregator = base.to_json(name, ctx)?;
    if force_finalize {
        if let Value::Object(ref mut obj) = aggregator {
            obj.insert("forceFinalize".to_string(), json!(true));
        }
    }

    if let Some(filter_expr) = filter_expr {
        let parts = crate::druid::filter_builder::build_filter(Some(&filter_expr), ctx.time_attribute)?;
        let mut filter_json = parts.dimension_filter;
        if !parts.intervals.is_empty() {
            let interval_filter = json!({
                "type": "interval",
                "dimension": ctx.time_attribute,
                "intervals": parts.intervals.iter().map(|(s, e)| format!("{s}/{e}")).collect::<Vec<_>>(),
            });
            filter_json = Some(match filter_json {
                Some(existing) => json!({ "type": "and", "fields": [interval_filter, existing] }),
                None => interval_filter,
            });
        }
        if let Some(f) = filter_json {
            aggregator = json!({ "type": "filtered", "filter": f, "aggregator": aggregator });
        }
    }

    ctx.aggregations.push(aggregator);
    Ok(())
}

/// Aggregate operands wrap their source dataset in `Filter` when the apply
/// is conditional; anything else means "no per-row filter".
fn filter_of(operand: &Expression) -> Option<Expression> {
    match operand {
        Expression::Filter { expression, .. } => Some(expression.as_ref().clone()),
        _ => None,
    }
}

enum AggKind {
    Count,
    Sum(Expression),
    Min(Expression),
    Max(Expression),
    CountDistinct(Expression),
    Quantile(Expression, f64),
    Custom(String, Option<Expression>),
}

impl AggKind {
    fn to_json(&self, name: &str, ctx: &Ctx) -> PlanResult<Value> {
        match self {
            AggKind::Count => Ok(json!({ "type": "count", "name": name })),
            AggKind::Sum(field) => {
                let field_name = field_name_of(field)?;
                let variant = if is_long(field, ctx) { "longSum" } else { "doubleSum" };
                Ok(json!({ "type": variant, "name": name, "fieldName": field_name }))
            }
            AggKind::Min(field) => {
                let field_name = field_name_of(field)?;
                let variant = if is_long(field, ctx) { "longMin" } else { "doubleMin" };
                Ok(json!({ "type": variant, "name": name, "fieldName": field_name }))
            }
            AggKind::Max(field) => {
                let field_name = field_name_of(field)?;
                let variant = if is_long(field, ctx) { "longMax" } else { "doubleMax" };
                Ok(json!({ "type": variant, "name": name, "fieldName": field_name }))
            }
            AggKind::CountDistinct(field) => {
                let field_name = field_name_of(field)?;
                let variant = if native_type_of(field, ctx) == Some("hyperUnique") {
                    "hyperUnique"
                } else {
                    "cardinality"
                };
                Ok(json!({ "type": variant, "name": name, "fieldName": field_name }))
            }
            AggKind::Quantile(field, quantile) => {
                let field_name = field_name_of(field)?;
                let is_sketch = native_type_of(field, ctx)
                    .map(|t| t.to_lowercase().contains("sketch"))
                    .unwrap_or(false);
                if is_sketch {
                    Ok(json!({
                        "type": "quantilesDoublesSketchToQuantile",
                        "name": name,
                        "fieldName": field_name,
                        "fraction": quantile,
                    }))
                } else {
                    Ok(json!({
                        "type": "approximateHistogramFold",
                        "name": name,
                        "fieldName": field_name,
                        "fraction": quantile,
                    }))
                }
            }
            AggKind::Custom(custom_name, field) => {
                let definition = ctx.custom_aggregations.get(custom_name).cloned().ok_or_else(|| {
                    PlanError::invalid_configuration(format!("no custom aggregation registered for `{custom_name}`"))
                })?;
                let mut agg = json!({
                    "type": "custom",
                    "name": name,
                    "customName": custom_name,
                    "definition": definition,
                });
                if let Some(field) = field {
                    agg["fieldName"] = json!(field_name_of(field)?);
                }
                Ok(agg)
            }
        }
    }
}

fn field_name_of(expr: &Expression) -> PlanResult<String> {
    match expr {
        Expression::Ref { name, nest: 0, .. } => Ok(name.clone()),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("aggregator field must be a bare column reference, found {other:?}"),
        )),
    }
}

fn is_long(field: &Expression, ctx: &Ctx) -> bool {
    native_type_of(field, ctx)
        .map(|t| t.eq_ignore_ascii_case("long"))
        .unwrap_or(false)
}

fn native_type_of<'a>(field: &Expression, ctx: &'a Ctx) -> Option<&'a str> {
    ctx.attribute_of(field).map(|a| a.native_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Apply;

    fn external_with(attrs: Vec<AttributeInfo>) -> External {
        let mut ext = External::new("wiki");
        ext.raw_attributes = attrs;
        ext
    }

    #[test]
    fn bare_count_emits_count_aggregator_named_after_apply() {
        let applies = vec![Apply::new("rows", Expression::ref_("main", ExpressionType::Dataset).count())];
        let ext = external_with(vec![]);
        let result = build_aggregations(&applies, &ext).unwrap();
        assert_eq!(result.aggregations.len(), 1);
        assert_eq!(result.aggregations[0]["type"], "count");
        assert_eq!(result.aggregations[0]["name"], "rows");
        assert!(result.post_aggregations.is_empty());
    }

    #[test]
    fn sum_uses_long_variant_for_long_attribute() {
        let applies = vec![Apply::new(
            "total",
            Expression::ref_("main", ExpressionType::Dataset).sum(Expression::ref_("count", ExpressionType::Number)),
        )];
        let ext = external_with(vec![AttributeInfo::new("count", ExpressionType::Number, "LONG")]);
        let result = build_aggregations(&applies, &ext).unwrap();
        assert_eq!(result.aggregations[0]["type"], "longSum");
    }

    #[test]
    fn arithmetic_over_two_sums_emits_post_aggregation_and_intermediates() {
        let a = Expression::ref_("main", ExpressionType::Dataset).sum(Expression::ref_("a", ExpressionType::Number));
        let b = Expression::ref_("main", ExpressionType::Dataset).sum(Expression::ref_("b", ExpressionType::Number));
        let applies = vec![Apply::new("ratio", a.divide(b))];
        let ext = external_with(vec![
            AttributeInfo::new("a", ExpressionType::Number, "DOUBLE"),
            AttributeInfo::new("b", ExpressionType::Number, "DOUBLE"),
        ]);
        let result = build_aggregations(&applies, &ext).unwrap();
        assert_eq!(result.aggregations.len(), 2);
        assert_eq!(result.post_aggregations.len(), 1);
        assert_eq!(result.post_aggregations[0]["name"], "ratio");
        assert_eq!(result.post_aggregations[0]["expr"]["type"], "safeDivide");
    }

    #[test]
    fn filtered_count_wraps_aggregator() {
        let filtered = Expression::ref_("main", ExpressionType::Dataset)
            .filter(Expression::ref_("country", ExpressionType::String).is(Expression::string("US")))
            .count();
        let applies = vec![Apply::new("usRows", filtered)];
        let ext = external_with(vec![]);
        let result = build_aggregations(&applies, &ext).unwrap();
        assert_eq!(result.aggregations[0]["type"], "filtered");
        assert_eq!(result.aggregations[0]["aggregator"]["type"], "count");
    }

    #[test]
    fn unregistered_custom_aggregation_fails() {
        let custom = Expression::ref_("main", ExpressionType::Dataset).custom("p95", None);
        let applies = vec![Apply::new("p95", custom)];
        let ext = external_with(vec![]);
        assert!(build_aggregations(&applies, &ext).is_err());
    }
}
