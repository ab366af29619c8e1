//! Adapts the same [`External`] snapshot the `druid` planner consumes into
//! a [`Query`]. Where the native backend builds distinct
//! aggregator/post-aggregator JSON and a separate interval/dimension-filter
//! split, the SQL sibling stays inside one expression language: every
//! `Expression` node, aggregate or scalar, lowers through [`lower_expr`]
//! into the builder DSL in [`super::expr`].

use tracing::{debug, warn};

use super::dialect::{Dialect, SqlDialect};
use super::expr::{self, Expr, ExprExt};
use super::query::{OrderByExpr, Query, SelectExpr, TableRef};
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expression, LiteralValue, SortDirection};
use crate::types::{Apply, External, QueryMode};

const COMPONENT: &str = "SqlPlan";

/// Lower `external` to a [`Query`] for `dialect`.
pub fn plan_sql(external: &External, dialect: Dialect) -> PlanResult<Query> {
    debug!(source = %external.source, mode = ?external.mode, ?dialect, "planning SQL query");
    let result = match external.mode {
        QueryMode::Raw => plan_raw(external),
        QueryMode::Total => plan_aggregate(external, &external.applies, dialect),
        QueryMode::Value => {
            let value_expr = external
                .value_expression
                .clone()
                .ok_or_else(|| PlanError::invalid_configuration("value mode requires a valueExpression"))?;
            let applies = [Apply::new("value", value_expr)];
            plan_aggregate(external, &applies, dialect)
        }
        QueryMode::Split => plan_split(external, dialect),
    };
    if let Err(e) = &result {
        warn!(source = %external.source, "SQL planning failed: {e}");
    }
    result
}

fn base_query(external: &External) -> PlanResult<Query> {
    let mut query = Query::new().from(TableRef::new(&external.source));
    if let Some(filter) = &external.filter {
        query = query.filter(lower_expr(filter)?);
    }
    Ok(query)
}

/// `select` mode: raw mode emits dropped-origin attributes —
/// project exactly the requested columns, dropping anything else the
/// dataset carries.
fn plan_raw(external: &External) -> PlanResult<Query> {
    let mut query = base_query(external)?;

    let columns: Vec<String> = external
        .select
        .clone()
        .unwrap_or_else(|| external.raw_attributes.iter().map(|a| a.name.clone()).collect());
    if columns.is_empty() {
        query = query.select_star();
    } else {
        query = query.select(columns.iter().map(|c| expr::col(c)).collect());
    }

    if let Some(sort) = &external.sort {
        query = query.order_by(vec![order_by_expr(sort)]);
    }
    if let Some(limit) = external.limit {
        query = query.limit(limit as u64);
    }
    Ok(query)
}

/// `value`/`total` mode: applies fold the whole (filtered) dataset down to
/// one row. No split keys means no GROUP BY at all — "value mode emits an
/// empty group-by per dialect.
fn plan_aggregate(external: &External, applies: &[Apply], dialect: Dialect) -> PlanResult<Query> {
    let mut query = base_query(external)?;
    let select_exprs: Vec<SelectExpr> = applies
        .iter()
        .map(|apply| lower_expr(&apply.expression).map(|e| e.alias(&apply.name)))
        .collect::<PlanResult<Vec<_>>>()?;
    query = query.select(select_exprs);

    if let Some(having) = &external.having_filter {
        query = query.having(lower_expr(having)?);
    }
    if let Some(sort) = &external.sort {
        query = query.order_by(vec![order_by_expr(sort)]);
    }
    if let Some(limit) = external.limit {
        query = query.limit(limit as u64);
    }
    let _ = dialect;
    Ok(query)
}

/// `split` mode: splits become GROUP BY keys, applies become aggregates
/// projected alongside them.
fn plan_split(external: &External, dialect: Dialect) -> PlanResult<Query> {
    let split = external
        .split
        .as_ref()
        .ok_or_else(|| PlanError::invalid_configuration("split mode requires a split"))?;

    let mut query = base_query(external)?;

    let key_exprs = split
        .iter()
        .map(|(name, e)| lower_expr(e).map(|lowered| (name.clone(), lowered)))
        .collect::<PlanResult<Vec<_>>>()?;

    let mut select_exprs: Vec<SelectExpr> = Vec::new();
    for (name, lowered) in &key_exprs {
        select_exprs.push(lowered.clone().alias(name));
    }
    for apply in &external.applies {
        select_exprs.push(lower_expr(&apply.expression)?.alias(&apply.name));
    }
    query = query.select(select_exprs);

    let group_by_count = key_exprs.len();
    if group_by_count > 0 {
        if dialect.supports_positional_group_by() {
            query = query.group_by((1..=group_by_count as i64).map(expr::lit_int).collect());
        } else {
            query = query.group_by(key_exprs.iter().map(|(_, e)| e.clone()).collect());
        }
    }

    if let Some(having) = &external.having_filter {
        query = query.having(lower_expr(having)?);
    }
    if let Some(sort) = &external.sort {
        query = query.order_by(vec![order_by_expr(sort)]);
    }
    if let Some(limit) = external.limit {
        query = query.limit(limit as u64);
    }
    Ok(query)
}

fn order_by_expr(sort: &crate::types::Sort) -> OrderByExpr {
    let e = expr::col(&sort.ref_name);
    match sort.direction {
        SortDirection::Ascending => OrderByExpr::asc(e),
        SortDirection::Descending => OrderByExpr::desc(e),
    }
}

/// Lower one [`Expression`] node to the query builder's [`Expr`]. Handles
/// both scalar/boolean nodes and aggregate nodes uniformly — the SQL
/// sibling has no separate aggregator/post-aggregator split.
pub fn lower_expr(expr: &Expression) -> PlanResult<Expr> {
    match expr {
        Expression::Ref { name, nest, .. } => {
            if *nest > 0 {
                return Err(PlanError::unsupported(
                    COMPONENT,
                    format!("ref `{name}` has nest={nest}, cannot be evaluated outside its parent context"),
                ));
            }
            Ok(expr::col(name))
        }
        Expression::Literal { value, .. } => lower_literal(value),

        Expression::Add { operand, expression } => Ok(lower_expr(operand)?.add(lower_expr(expression)?)),
        Expression::Subtract { operand, expression } => Ok(lower_expr(operand)?.sub(lower_expr(expression)?)),
        Expression::Multiply { operand, expression } => Ok(lower_expr(operand)?.mul(lower_expr(expression)?)),
        Expression::Divide { operand, expression } => {
            Ok(expr::func("NULLIF", vec![lower_expr(expression)?, expr::lit_int(0)])
                .let_into(|divisor| lower_expr(operand).map(|n| n.div(divisor)))?)
        }
        Expression::Power { operand, expression } => {
            Ok(expr::func("POWER", vec![lower_expr(operand)?, lower_expr(expression)?]))
        }
        Expression::Absolute { operand } => Ok(expr::func("ABS", vec![lower_expr(operand)?])),
        Expression::Log { operand, expression } => {
            Ok(expr::func("LOG", vec![lower_expr(expression)?, lower_expr(operand)?]))
        }
        Expression::Cast { operand, output_type } => {
            Ok(expr::func(cast_function_name(output_type), vec![lower_expr(operand)?]))
        }
        Expression::Fallback { operand, expression } => {
            Ok(expr::coalesce(vec![lower_expr(operand)?, lower_expr(expression)?]))
        }
        Expression::Then { operand, expression } => Ok(Expr::Case {
            operand: None,
            when_clauses: vec![(lower_expr(operand)?, lower_expr(expression)?)],
            else_clause: None,
        }),

        Expression::And { operand, expression } => Ok(lower_expr(operand)?.and(lower_expr(expression)?)),
        Expression::Or { operand, expression } => Ok(lower_expr(operand)?.or(lower_expr(expression)?)),
        Expression::Not { operand } => Ok(lower_expr(operand)?.not()),
        Expression::Is { operand, expression } => Ok(lower_expr(operand)?.eq(lower_expr(expression)?)),
        Expression::In { operand, expression } => {
            let lhs = lower_expr(operand)?;
            let values = literal_set(expression)?
                .iter()
                .map(lower_literal)
                .collect::<PlanResult<Vec<_>>>()?;
            Ok(lhs.in_list(values))
        }
        Expression::Contains { operand, expression } => {
            let needle = lower_expr(expression)?;
            Ok(expr::func("STRPOS", vec![lower_expr(operand)?, needle]).gt(expr::lit_int(0)))
        }
        Expression::Overlap { operand, expression } => {
            let lhs = lower_expr(operand)?;
            let values = literal_set(expression)?
                .iter()
                .map(lower_literal)
                .collect::<PlanResult<Vec<_>>>()?;
            Ok(lhs.in_list(values))
        }
        Expression::MatchRegex { operand, regex } => {
            Ok(expr::func("REGEXP_MATCHES", vec![lower_expr(operand)?, expr::lit_str(regex)]))
        }

        // DATE_TRUNC/DATE_PART run in the session time zone in standard
        // SQL; a non-UTC `time_zone` would need a dialect-specific
        // `AT TIME ZONE` wrapper this sibling backend doesn't emit.
        Expression::TimeFloor { operand, period, .. } | Expression::TimeBucket { operand, period, .. } => {
            Ok(expr::func("DATE_TRUNC", vec![expr::lit_str(period_to_unit(period)), lower_expr(operand)?]))
        }
        Expression::TimePart { operand, part, .. } => {
            Ok(expr::func("DATE_PART", vec![expr::lit_str(part), lower_expr(operand)?]))
        }
        Expression::NumberBucket { operand, size, offset } => {
            let inner = lower_expr(operand)?;
            let shifted = inner.sub(expr::lit_float(*offset));
            let bucketed = expr::func("FLOOR", vec![shifted.div(expr::lit_float(*size))]);
            Ok(bucketed.mul(expr::lit_float(*size)).add(expr::lit_float(*offset)))
        }
        Expression::Substr { operand, position, length } => Ok(expr::func(
            "SUBSTRING",
            vec![lower_expr(operand)?, expr::lit_int(*position as i64 + 1), expr::lit_int(*length as i64)],
        )),
        Expression::Lookup { operand, lookup_fn } => {
            Ok(expr::func(lookup_fn, vec![lower_expr(operand)?]))
        }
        Expression::Cardinality { operand } => Ok(expr::count_distinct(lower_expr(operand)?)),

        Expression::Count { operand } => lower_filtered_agg(operand, |filter| match filter {
            Some(f) => Ok(expr::count(wrap_filtered(expr::lit_int(1), f)?)),
            None => Ok(expr::count_star()),
        }),
        Expression::Sum { operand, expression } => {
            let field = lower_expr(expression)?;
            lower_filtered_agg(operand, |filter| Ok(expr::sum(wrap_filtered_or(field.clone(), filter)?)))
        }
        Expression::Min { operand, expression } => {
            let field = lower_expr(expression)?;
            lower_filtered_agg(operand, |filter| Ok(expr::min(wrap_filtered_or(field.clone(), filter)?)))
        }
        Expression::Max { operand, expression } => {
            let field = lower_expr(expression)?;
            lower_filtered_agg(operand, |filter| Ok(expr::max(wrap_filtered_or(field.clone(), filter)?)))
        }
        Expression::CountDistinct { operand, expression } => {
            let field = lower_expr(expression)?;
            lower_filtered_agg(operand, |filter| Ok(expr::count_distinct(wrap_filtered_or(field.clone(), filter)?)))
        }
        Expression::Quantile { operand, expression, quantile } => {
            let field = lower_expr(expression)?;
            let q = *quantile;
            lower_filtered_agg(operand, move |filter| {
                Ok(expr::func(
                    "PERCENTILE_CONT",
                    vec![expr::lit_float(q), wrap_filtered_or(field.clone(), filter)?],
                ))
            })
        }
        Expression::Custom { operand, custom_name, expression } => {
            let args = match expression {
                Some(e) => vec![lower_expr(e)?],
                None => Vec::new(),
            };
            lower_filtered_agg(operand, |filter| {
                let mut call_args = args.clone();
                if let Some(f) = filter {
                    call_args.push(lower_expr(f)?);
                }
                Ok(expr::func(custom_name, call_args))
            })
        }

        other @ (Expression::Filter { .. }
        | Expression::Split { .. }
        | Expression::Apply { .. }
        | Expression::Sort { .. }
        | Expression::Limit { .. }) => Err(PlanError::unsupported(
            COMPONENT,
            format!("{other:?} is a dataset-shape node and cannot appear inside a value expression"),
        )),
    }
}

/// Aggregate operands wrap their source dataset in `Filter` when the apply
/// is conditional (mirrors the native planner's `filter_of`).
/// Builds the aggregate with `f(&filter_predicate)`, wrapping the aggregate
/// argument in a `CASE WHEN` rather than relying on a dialect-specific
/// `FILTER (WHERE ...)` clause, so the same form works everywhere.
fn lower_filtered_agg(
    operand: &Expression,
    f: impl FnOnce(Option<&Expression>) -> PlanResult<Expr>,
) -> PlanResult<Expr> {
    match operand {
        Expression::Filter { expression, .. } => f(Some(expression)),
        _ => f(None),
    }
}

fn wrap_filtered(value: Expr, filter: &Expression) -> PlanResult<Expr> {
    let predicate = lower_expr(filter)?;
    Ok(Expr::Case {
        operand: None,
        when_clauses: vec![(predicate, value)],
        else_clause: None,
    })
}

fn wrap_filtered_or(value: Expr, filter: Option<&Expression>) -> PlanResult<Expr> {
    match filter {
        Some(f) => wrap_filtered(value, f),
        None => Ok(value),
    }
}

fn lower_literal(value: &LiteralValue) -> PlanResult<Expr> {
    match value {
        LiteralValue::Null => Ok(expr::lit_null()),
        LiteralValue::Boolean(b) => Ok(expr::lit_bool(*b)),
        LiteralValue::Number(n) => Ok(expr::lit_float(*n)),
        LiteralValue::String(s) => Ok(expr::lit_str(s)),
        LiteralValue::Time(t) => Ok(expr::func("TIMESTAMP", vec![expr::lit_str(t)])),
        LiteralValue::Set(_) => Err(PlanError::unsupported(
            COMPONENT,
            "a SET literal cannot appear outside an IN/OVERLAP expression",
        )),
    }
}

fn literal_set(expr: &Expression) -> PlanResult<Vec<LiteralValue>> {
    match expr {
        Expression::Literal { value: LiteralValue::Set(items), .. } => Ok(items.clone()),
        Expression::Literal { value, .. } => Ok(vec![value.clone()]),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("IN/OVERLAP requires a literal set, found {other:?}"),
        )),
    }
}

fn cast_function_name(ty: &crate::expr::ExpressionType) -> &'static str {
    use crate::expr::ExpressionType::*;
    match ty {
        Number => "CAST_TO_DOUBLE",
        String => "CAST_TO_STRING",
        Time => "CAST_TO_TIMESTAMP",
        Boolean => "CAST_TO_BOOLEAN",
        _ => "CAST_TO_STRING",
    }
}

/// Maps the algebra's ISO-8601 period strings to `DATE_TRUNC` units for the
/// common cases; anything finer than a day/week/month falls back to day.
fn period_to_unit(period: &str) -> &str {
    match period {
        "PT1H" => "hour",
        "P1D" => "day",
        "P1W" => "week",
        "P1M" => "month",
        "P3M" => "quarter",
        "P1Y" => "year",
        _ => "day",
    }
}

trait LetInto: Sized {
    fn let_into<T>(self, f: impl FnOnce(Self) -> PlanResult<T>) -> PlanResult<T> {
        f(self)
    }
}

impl LetInto for Expr {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExpressionType;
    use crate::types::AttributeInfo;
    use std::collections::BTreeMap;

    fn source(name: &str) -> External {
        let mut external = External::new(name);
        external.raw_attributes = vec![
            AttributeInfo::new("added", ExpressionType::Number, "DOUBLE"),
            AttributeInfo::new("channel", ExpressionType::String, "STRING"),
        ];
        external
    }

    #[test]
    fn raw_mode_projects_selected_columns() {
        let mut external = source("wiki");
        external.mode = QueryMode::Raw;
        external.select = Some(vec!["channel".to_string()]);
        external.limit = Some(10);

        let query = plan_sql(&external, Dialect::Postgres).unwrap();
        let sql = query.to_sql(Dialect::Postgres);
        assert!(sql.starts_with("SELECT"));
        assert!(sql.contains("\"channel\""));
        assert!(sql.contains("LIMIT 10"));
    }

    #[test]
    fn total_mode_has_no_group_by() {
        let mut external = source("wiki");
        external.mode = QueryMode::Total;
        external.applies = vec![Apply::new("cnt", Expression::ref_("added", ExpressionType::Number).count())];

        let query = plan_sql(&external, Dialect::DuckDb).unwrap();
        let sql = query.to_sql(Dialect::DuckDb);
        assert!(sql.contains("COUNT(*)"));
        assert!(!sql.to_uppercase().contains("GROUP BY"));
    }

    #[test]
    fn split_mode_groups_by_position_when_supported() {
        let mut external = source("wiki");
        external.mode = QueryMode::Split;
        let mut splits = BTreeMap::new();
        splits.insert("channel".to_string(), Expression::ref_("channel", ExpressionType::String));
        external.split = Some(splits);
        external.applies = vec![Apply::new("cnt", Expression::ref_("added", ExpressionType::Number).count())];

        let query = plan_sql(&external, Dialect::Postgres).unwrap();
        let sql = query.to_sql(Dialect::Postgres);
        assert!(sql.contains("GROUP BY 1"));
    }

    #[test]
    fn split_mode_repeats_expressions_for_tsql() {
        let mut external = source("wiki");
        external.mode = QueryMode::Split;
        let mut splits = BTreeMap::new();
        splits.insert("channel".to_string(), Expression::ref_("channel", ExpressionType::String));
        external.split = Some(splits);
        external.applies = vec![Apply::new("cnt", Expression::ref_("added", ExpressionType::Number).count())];

        let query = plan_sql(&external, Dialect::TSql).unwrap();
        let sql = query.to_sql(Dialect::TSql);
        assert!(sql.contains("GROUP BY [channel]"));
    }

    #[test]
    fn filtered_count_becomes_a_case_expression() {
        let mut external = source("wiki");
        external.mode = QueryMode::Total;
        let filtered = Expression::ref_("added", ExpressionType::Number)
            .filter(Expression::ref_("channel", ExpressionType::String).is(Expression::string("en")));
        external.applies = vec![Apply::new("cnt", filtered.count())];

        let query = plan_sql(&external, Dialect::Postgres).unwrap();
        let sql = query.to_sql(Dialect::Postgres);
        assert!(sql.contains("CASE WHEN"));
    }

    #[test]
    fn nested_ref_is_rejected() {
        let e = Expression::Ref {
            name: "outer".into(),
            nest: 1,
            ty: ExpressionType::Number,
            ignore_case: false,
        };
        assert!(lower_expr(&e).is_err());
    }

    mod snapshot_tests {
        use super::*;
        use crate::sql::test_utils::validate_sql;
        use insta::assert_snapshot;

        #[test]
        fn split_with_having_snapshot_postgres() {
            let mut external = source("wiki");
            external.mode = QueryMode::Split;
            let mut splits = BTreeMap::new();
            splits.insert("channel".to_string(), Expression::ref_("channel", ExpressionType::String));
            external.split = Some(splits);
            external.applies = vec![Apply::new("cnt", Expression::ref_("added", ExpressionType::Number).count())];
            external.having_filter =
                Some(Expression::ref_("cnt", ExpressionType::Number).is(Expression::number(10.0)));
            external.limit = Some(5);

            let sql = plan_sql(&external, Dialect::Postgres).unwrap().to_sql(Dialect::Postgres);
            validate_sql(&sql, Dialect::Postgres).unwrap();
            assert_snapshot!(
                sql,
                @r#"
SELECT
  "channel" AS "channel",
  COUNT(*) AS "cnt"
FROM "wiki"
GROUP BY 1
HAVING "cnt" = 10.0
LIMIT 5
"#
            );
        }

        #[test]
        fn filtered_sum_snapshot_duckdb() {
            let mut external = source("wiki");
            external.mode = QueryMode::Total;
            let filtered = Expression::ref_("added", ExpressionType::Number)
                .filter(Expression::ref_("channel", ExpressionType::String).is(Expression::string("en")));
            external.applies = vec![Apply::new("enAdded", filtered.sum(Expression::ref_("added", ExpressionType::Number)))];

            let sql = plan_sql(&external, Dialect::DuckDb).unwrap().to_sql(Dialect::DuckDb);
            validate_sql(&sql, Dialect::DuckDb).unwrap();
            assert_snapshot!(
                sql,
                @r#"
SELECT
  SUM(CASE WHEN "channel" = 'en' THEN "added" END) AS "enAdded"
FROM "wiki"
"#
            );
        }
    }
}
