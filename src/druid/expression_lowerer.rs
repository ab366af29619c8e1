//! Lowers a single scalar [`Expression`] to the backend's string formula
//! dialect (used for virtual-column definitions and post-aggregation
//! arithmetic that the native query shapes can't express structurally).
//!
//! Pure function: no I/O, no shared state. Refuses anything it cannot
//! represent as a formula string rather than emitting something the
//! backend would reject at query time.

use crate::error::{PlanError, PlanResult};
use crate::expr::{Expression, LiteralValue};

const COMPONENT: &str = "ExpressionLowerer";

/// Lower `expr` to the backend's formula-language string.
///
/// `nest` bookkeeping is the caller's responsibility — by the time an
/// expression reaches this builder, all `Ref`s should be `nest == 0`
/// relative to the row being formulated (the planner resolves nesting
/// before calling in).
pub fn lower_expression(expr: &Expression) -> PlanResult<String> {
    match expr {
        Expression::Ref { name, nest, .. } => {
            if *nest > 0 {
                return Err(PlanError::unsupported(
                    COMPONENT,
                    format!("ref `{name}` has nest={nest}, cannot be evaluated outside its parent context"),
                ));
            }
            Ok(quote_identifier(name))
        }
        Expression::Literal { value, .. } => Ok(lower_literal(value)),

        Expression::Add { operand, expression } => lower_binary(operand, "+", expression),
        Expression::Subtract { operand, expression } => lower_binary(operand, "-", expression),
        Expression::Multiply { operand, expression } => lower_binary(operand, "*", expression),
        Expression::Divide { operand, expression } => {
            // Formula-language division is not used for post-aggregations
            // (those go through the safe-divide post-aggregator directly);
            // this path only covers virtual-column scalar formulas where
            // the backend's own div-by-zero-is-null semantics apply.
            lower_binary(operand, "/", expression)
        }
        Expression::Power { operand, expression } => {
            let base = lower_expression(operand)?;
            let exp = lower_expression(expression)?;
            Ok(format!("pow({base},{exp})"))
        }
        Expression::Absolute { operand } => Ok(format!("abs({})", lower_expression(operand)?)),
        Expression::Log { operand, expression } => {
            let x = lower_expression(operand)?;
            let base = lower_expression(expression)?;
            Ok(format!("log({x},{base})"))
        }
        Expression::Cast { operand, output_type } => {
            let inner = lower_expression(operand)?;
            Ok(format!("cast({inner},'{}')", cast_type_name(output_type)))
        }

        Expression::And { operand, expression } => lower_binary(operand, "&&", expression),
        Expression::Or { operand, expression } => lower_binary(operand, "||", expression),
        Expression::Not { operand } => Ok(format!("!({})", lower_expression(operand)?)),
        Expression::Is { operand, expression } => lower_binary(operand, "==", expression),
        Expression::In { operand, expression } => {
            let lhs = lower_expression(operand)?;
            let literals = as_literal_set(expression)?;
            Ok(format!(
                "({})",
                literals
                    .iter()
                    .map(|l| format!("{lhs}=={}", lower_literal(l)))
                    .collect::<Vec<_>>()
                    .join("||")
            ))
        }

        Expression::TimeFloor { operand, period, time_zone } => Ok(format!(
            "timestamp_floor({},'{}','{}')",
            lower_expression(operand)?,
            period,
            time_zone
        )),
        Expression::TimeBucket { operand, period, time_zone } => Ok(format!(
            "timestamp_floor({},'{}','{}')",
            lower_expression(operand)?,
            period,
            time_zone
        )),
        Expression::TimePart { operand, part, time_zone } => Ok(format!(
            "timestamp_extract({},'{}','{}')",
            lower_expression(operand)?,
            part,
            time_zone
        )),
        Expression::NumberBucket { operand, size, offset } => {
            let inner = lower_expression(operand)?;
            Ok(format!("(floor(({inner}-{offset})/{size})*{size}+{offset})"))
        }
        Expression::Substr { operand, position, length } => Ok(format!(
            "substring({},{},{})",
            lower_expression(operand)?,
            position,
            length
        )),
        Expression::Fallback { operand, expression } => {
            let a = lower_expression(operand)?;
            let b = lower_expression(expression)?;
            Ok(format!("nvl({a},{b})"))
        }
        Expression::Then { operand, expression } => {
            let cond = lower_expression(operand)?;
            let then_branch = lower_expression(expression)?;
            Ok(format!("if({cond},{then_branch},null)"))
        }
        Expression::MatchRegex { operand, regex } => {
            Ok(format!("regexp_like({},'{}')", lower_expression(operand)?, escape_single_quotes(regex)))
        }

        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("{other:?} has no formula-language representation"),
        )),
    }
}

fn lower_binary(left: &Expression, op: &str, right: &Expression) -> PlanResult<String> {
    let l = lower_expression(left)?;
    let r = lower_expression(right)?;
    Ok(format!("({l}{op}{r})"))
}

fn lower_literal(value: &LiteralValue) -> String {
    match value {
        LiteralValue::Null => "null".to_string(),
        LiteralValue::Boolean(b) => b.to_string(),
        LiteralValue::Number(n) => format!("{n}"),
        LiteralValue::String(s) => format!("'{}'", escape_single_quotes(s)),
        LiteralValue::Time(t) => format!("'{t}'"),
        LiteralValue::Set(items) => format!(
            "[{}]",
            items.iter().map(lower_literal).collect::<Vec<_>>().join(",")
        ),
    }
}

fn as_literal_set(expr: &Expression) -> PlanResult<Vec<LiteralValue>> {
    match expr {
        Expression::Literal {
            value: LiteralValue::Set(items),
            ..
        } => Ok(items.clone()),
        Expression::Literal { value, .. } => Ok(vec![value.clone()]),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("IN requires a literal set, found {other:?}"),
        )),
    }
}

fn cast_type_name(ty: &crate::expr::ExpressionType) -> &'static str {
    use crate::expr::ExpressionType::*;
    match ty {
        Number => "DOUBLE",
        String => "STRING",
        Time => "LONG",
        Boolean => "LONG",
        _ => "STRING",
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExpressionType;

    #[test]
    fn lowers_ref_to_quoted_identifier() {
        let e = Expression::ref_("price", ExpressionType::Number);
        assert_eq!(lower_expression(&e).unwrap(), "\"price\"");
    }

    #[test]
    fn lowers_arithmetic_with_parens() {
        let e = Expression::ref_("a", ExpressionType::Number)
            .add(Expression::ref_("b", ExpressionType::Number));
        assert_eq!(lower_expression(&e).unwrap(), "(\"a\"+\"b\")");
    }

    #[test]
    fn lowers_time_floor() {
        let e = Expression::ref_("__time", ExpressionType::Time).time_floor("P1D", "Etc/UTC");
        assert_eq!(
            lower_expression(&e).unwrap(),
            "timestamp_floor(\"__time\",'P1D','Etc/UTC')"
        );
    }

    #[test]
    fn nested_ref_is_rejected() {
        let e = Expression::Ref {
            name: "outer".into(),
            nest: 1,
            ty: ExpressionType::Number,
            ignore_case: false,
        };
        assert!(lower_expression(&e).is_err());
    }

    #[test]
    fn in_literal_set_expands_to_disjunction() {
        let e = Expression::ref_("country", ExpressionType::String).in_(Expression::literal(
            LiteralValue::Set(vec![
                LiteralValue::String("US".into()),
                LiteralValue::String("CA".into()),
            ]),
            ExpressionType::set_of(ExpressionType::String),
        ));
        assert_eq!(
            lower_expression(&e).unwrap(),
            "(\"country\"=='US'||\"country\"=='CA')"
        );
    }
}
