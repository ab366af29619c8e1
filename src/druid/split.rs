//! Lowers one split key: either an extraction over an existing
//! column, or a virtual-column formula, plus the having-filter push-down
//! for SET/STRING dimensions.

use serde_json::{json, Value};

use super::{expression_lowerer, extraction_fn};
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expression, ExpressionType, LiteralValue};
use crate::types::{External, Inflater};

const COMPONENT: &str = "Planner";

/// Any output name beginning with `__` collides with backend-reserved
/// prefixes and is rewritten; the post-transform strips it back off.
pub fn rewrite_output_name(name: &str) -> String {
    if name.starts_with("__") {
        format!("***{name}")
    } else {
        name.to_string()
    }
}

pub struct DimensionSpec {
    pub dimension: Value,
    pub output_name: String,
    pub virtual_column: Option<Value>,
    pub inflater: Option<Inflater>,
}

pub fn lower_split_key(output_name: &str, expr: &Expression, external: &External) -> PlanResult<DimensionSpec> {
    reject_unsplitable(expr, external)?;

    let output_name = rewrite_output_name(output_name);
    let free_refs = expr.free_references();

    if free_refs.len() == 1 && !extraction_fn::is_complex_fallback(expr) && !extraction_fn::contains_then(expr) {
        if let Ok((column, fn_json)) = extraction_fn::build_extraction_fn(expr) {
            let is_time_column = column == external.time_attribute;
            let output_type = scalar_output_type(&expr.resolved_type(), is_time_column);
            let mut dimension = if fn_json["type"] == "identity" {
                json!({ "type": "default", "dimension": column, "outputName": output_name, "outputType": output_type })
            } else {
                json!({
                    "type": "extraction",
                    "dimension": column,
                    "outputName": output_name,
                    "outputType": output_type,
                    "extractionFn": fn_json,
                })
            };
            if let Expression::Cardinality { .. } = expr {
                dimension = json!({ "type": "default", "dimension": column, "outputName": output_name, "outputType": "DOUBLE" });
                return Ok(DimensionSpec {
                    dimension,
                    output_name,
                    virtual_column: None,
                    inflater: Some(Inflater::SetCardinality),
                });
            }
            return Ok(DimensionSpec {
                dimension,
                output_name: output_name.clone(),
                virtual_column: None,
                inflater: inflater_for(expr)?,
            });
        }
    }

    let formula = expression_lowerer::lower_expression(expr)?;
    let vcol_name = format!("v:{output_name}");
    let output_type = scalar_output_type(&expr.resolved_type(), false);
    let virtual_column = json!({ "type": "expression", "name": vcol_name, "expression": formula, "outputType": output_type });
    let dimension = json!({ "type": "default", "dimension": vcol_name, "outputName": output_name, "outputType": output_type });
    Ok(DimensionSpec {
        dimension,
        output_name,
        virtual_column: Some(virtual_column),
        inflater: inflater_for(expr)?,
    })
}

fn inflater_for(expr: &Expression) -> PlanResult<Option<Inflater>> {
    let ty = expr.resolved_type();
    match Inflater::for_type(&ty) {
        Some(i) => Ok(Some(i)),
        None => match ty {
            ExpressionType::String | ExpressionType::Null => Ok(None),
            other => Err(PlanError::unsupported(
                COMPONENT,
                format!("split key of type {other:?} has no dimension inflater"),
            )),
        },
    }
}

fn scalar_output_type(ty: &ExpressionType, is_time_column: bool) -> &'static str {
    if is_time_column {
        return "LONG";
    }
    match ty {
        ExpressionType::Number | ExpressionType::NumberRange => "DOUBLE",
        ExpressionType::Boolean => "LONG",
        _ => "STRING",
    }
}

fn reject_unsplitable(expr: &Expression, external: &External) -> PlanResult<()> {
    let mut offending = None;
    expr.walk(&mut |node| {
        if let Expression::Ref { name, nest: 0, .. } = node {
            if offending.is_none() {
                if let Some(attr) = external.attribute(name) {
                    if attr.unsplitable {
                        offending = Some(name.clone());
                    }
                }
            }
        }
    });
    if let Some(name) = offending {
        return Err(PlanError::invalid_configuration(format!(
            "split expression references an un-splitable metric `{name}`"
        )));
    }
    Ok(())
}

fn flatten_and(expr: &Expression) -> Vec<Expression> {
    match expr {
        Expression::And { operand, expression } => {
            let mut v = flatten_and(operand);
            v.extend(flatten_and(expression));
            v
        }
        other => vec![other.clone()],
    }
}

fn is_direct_constraint(expr: &Expression, column: &str) -> bool {
    let operand_matches = |operand: &Expression| matches!(operand, Expression::Ref { name, nest: 0, .. } if name == column);
    match expr {
        Expression::Is { operand, .. } | Expression::In { operand, .. } | Expression::MatchRegex { operand, .. } => {
            operand_matches(operand)
        }
        _ => false,
    }
}

fn literal_as_str(value: &LiteralValue) -> String {
    match value {
        LiteralValue::String(s) | LiteralValue::Time(s) => s.clone(),
        LiteralValue::Number(n) => n.to_string(),
        LiteralValue::Boolean(b) => b.to_string(),
        _ => String::new(),
    }
}

fn literal_set_strings(expr: &Expression) -> Vec<String> {
    match expr {
        Expression::Literal {
            value: LiteralValue::Set(items),
            ..
        } => items.iter().map(literal_as_str).collect(),
        Expression::Literal { value, .. } => vec![literal_as_str(value)],
        _ => Vec::new(),
    }
}

/// Push the part of `having` that directly constrains `dimension`'s
/// underlying `column` (a `match regex`, `is literal`, or `in literal set`)
/// into the dimension spec as `regexFiltered`/`listFiltered`; return the
/// residue that must still be evaluated as a having filter.
pub fn push_down_having(having: &Expression, column: &str, dimension: &mut Value) -> Option<Expression> {
    let conjuncts = flatten_and(having);
    let mut direct = None;
    let mut residue = Vec::new();
    for conjunct in conjuncts {
        if direct.is_none() && is_direct_constraint(&conjunct, column) {
            direct = Some(conjunct);
        } else {
            residue.push(conjunct);
        }
    }

    if let Some(constraint) = direct {
        match constraint {
            Expression::MatchRegex { regex, .. } => {
                *dimension = json!({ "type": "regexFiltered", "delegate": dimension.clone(), "pattern": regex });
            }
            Expression::Is { expression, .. } => {
                let value = match expression.as_ref() {
                    Expression::Literal { value, .. } => literal_as_str(value),
                    _ => String::new(),
                };
                *dimension = json!({ "type": "listFiltered", "delegate": dimension.clone(), "values": [value] });
            }
            Expression::In { expression, .. } => {
                let values = literal_set_strings(&expression);
                *dimension = json!({ "type": "listFiltered", "delegate": dimension.clone(), "values": values });
            }
            _ => {}
        }
    }

    residue.into_iter().reduce(|a, b| a.and(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_starting_with_dunder_gets_rewritten() {
        assert_eq!(rewrite_output_name("__time"), "***__time");
        assert_eq!(rewrite_output_name("country"), "country");
    }

    #[test]
    fn bare_ref_split_emits_default_dimension() {
        let ext = External::new("wiki");
        let spec = lower_split_key("country", &Expression::ref_("country", ExpressionType::String), &ext).unwrap();
        assert_eq!(spec.dimension["type"], "default");
        assert_eq!(spec.dimension["dimension"], "country");
        assert!(spec.virtual_column.is_none());
    }

    #[test]
    fn arithmetic_split_allocates_virtual_column() {
        let ext = External::new("wiki");
        let expr = Expression::ref_("a", ExpressionType::Number).add(Expression::ref_("b", ExpressionType::Number));
        let spec = lower_split_key("total", &expr, &ext).unwrap();
        assert!(spec.virtual_column.is_some());
        assert_eq!(spec.dimension["dimension"], "v:total");
    }

    #[test]
    fn unsplitable_attribute_is_rejected() {
        use crate::types::AttributeInfo;
        let mut ext = External::new("wiki");
        ext.raw_attributes = vec![AttributeInfo::new("revenue", ExpressionType::Number, "hyperUnique").unsplitable()];
        let spec = lower_split_key("revenue", &Expression::ref_("revenue", ExpressionType::Number), &ext);
        assert!(spec.is_err());
    }

    #[test]
    fn having_push_down_extracts_in_constraint_and_leaves_residue() {
        let having = Expression::ref_("tags", ExpressionType::String)
            .in_(Expression::literal(
                LiteralValue::Set(vec![LiteralValue::String("a".into()), LiteralValue::String("b".into())]),
                ExpressionType::set_of(ExpressionType::String),
            ))
            .and(Expression::ref_("count", ExpressionType::Number).is(Expression::number(10.0)));
        let mut dimension = json!({ "type": "default", "dimension": "tags" });
        let residue = push_down_having(&having, "tags", &mut dimension);
        assert_eq!(dimension["type"], "listFiltered");
        assert!(residue.is_some());
    }
}
