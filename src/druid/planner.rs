//! The top-level planner: picks a native query
//! shape from `(mode, applies, split, sort, limit)`, assembles dimensions,
//! aggregations, having, sort/limit, and the post-transform, and drives the
//! nested-group-by rewrite for re-split aggregates.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{aggregation_builder, expression_lowerer, filter_builder, split};
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expression, ExpressionType, SortDirection};
use crate::types::{
    AttributeInfo, Apply, External, FieldRename, Inflater, PlannerCapabilities, QueryAndPostTransform, QueryContext,
    QueryMode, QuerySelection, RowTransform, Sort,
};

const COMPONENT: &str = "Planner";

pub struct Planner;

impl Planner {
    /// Plan against the default backend capability set.
    pub fn plan(external: &External) -> PlanResult<QueryAndPostTransform> {
        Self::plan_with_capabilities(external, PlannerCapabilities::default())
    }

    /// Plan against an explicit [`PlannerCapabilities`] gate, for embedders
    /// talking to a backend that predates a given query-shape feature.
    pub fn plan_with_capabilities(
        external: &External,
        capabilities: PlannerCapabilities,
    ) -> PlanResult<QueryAndPostTransform> {
        debug!(source = %external.source, mode = ?external.mode, "planning query");
        let result = match external.mode {
            QueryMode::Raw => build_scan(external),
            QueryMode::Total => build_total_or_value(external, &external.applies),
            QueryMode::Value => {
                let expr = external
                    .value_expression
                    .clone()
                    .ok_or_else(|| PlanError::invalid_configuration("value mode requires a valueExpression"))?;
                build_total_or_value(external, &[Apply::new("value", expr)])
            }
            QueryMode::Split => build_split(external, capabilities),
        };
        if let Err(e) = &result {
            warn!(source = %external.source, "planning failed: {e}");
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Min,
    Max,
    Both,
}

fn is_time_ref(expr: &Expression, time_attribute: &str) -> bool {
    matches!(expr, Expression::Ref { name, nest: 0, .. } if name == time_attribute)
}

fn single_bound(expr: &Expression, time_attribute: &str) -> Option<Bound> {
    match expr {
        Expression::Min { expression, .. } if is_time_ref(expression, time_attribute) => Some(Bound::Min),
        Expression::Max { expression, .. } if is_time_ref(expression, time_attribute) => Some(Bound::Max),
        _ => None,
    }
}

fn combined_bound(applies: &[Apply], time_attribute: &str) -> Option<Bound> {
    if applies.is_empty() {
        return None;
    }
    let (mut has_min, mut has_max) = (false, false);
    for apply in applies {
        match single_bound(&apply.expression, time_attribute) {
            Some(Bound::Min) => has_min = true,
            Some(Bound::Max) => has_max = true,
            _ => return None,
        }
    }
    match (has_min, has_max) {
        (true, true) => Some(Bound::Both),
        (true, false) => Some(Bound::Min),
        (false, true) => Some(Bound::Max),
        (false, false) => None,
    }
}

/// Total/value mode: a `timeBoundary` shape when every apply is a bound on
/// the time ref, else a zero-dimension `timeseries`.
fn build_total_or_value(external: &External, applies: &[Apply]) -> PlanResult<QueryAndPostTransform> {
    if let Some(bound) = combined_bound(applies, &external.time_attribute) {
        return Ok(build_time_boundary(bound, applies, external));
    }
    build_aggregate_only_query(external, applies, false)
}

fn build_time_boundary(bound: Bound, applies: &[Apply], external: &External) -> QueryAndPostTransform {
    let mut query = json!({ "queryType": "timeBoundary", "dataSource": external.source });
    if bound != Bound::Both {
        query["bound"] = json!(match bound {
            Bound::Min => "minTime",
            Bound::Max => "maxTime",
            Bound::Both => unreachable!(),
        });
    }

    let mut renames = Vec::new();
    for apply in applies {
        match single_bound(&apply.expression, &external.time_attribute) {
            Some(Bound::Min) => renames.push(FieldRename {
                source_candidates: vec!["minTime".to_string()],
                output_name: apply.name.clone(),
                inflater: Inflater::Time,
            }),
            Some(Bound::Max) => renames.push(FieldRename {
                source_candidates: vec!["maxIngestedEventTime".to_string(), "maxTime".to_string()],
                output_name: apply.name.clone(),
                inflater: Inflater::Time,
            }),
            _ => {}
        }
    }

    QueryAndPostTransform {
        query,
        context: QueryContext::default(),
        post_transform: RowTransform {
            renames,
            ..RowTransform::empty()
        },
    }
}

/// A `timeseries` with no split key: one aggregate row over the whole
/// (filtered) interval.
fn build_aggregate_only_query(
    external: &External,
    applies: &[Apply],
    skip_empty_buckets: bool,
) -> PlanResult<QueryAndPostTransform> {
    let filter_parts = filter_builder::build_filter(external.filter.as_ref(), &external.time_attribute)?;
    if filter_parts.intervals.is_empty() && !external.allow_eternity {
        return Err(PlanError::invalid_configuration(
            "query has no bounded time filter and allowEternity is not set",
        ));
    }
    let agg = aggregation_builder::build_aggregations(applies, external)?;

    let mut query = json!({
        "queryType": "timeseries",
        "dataSource": external.source,
        "granularity": "all",
        "intervals": format_intervals(&filter_parts.intervals),
        "aggregations": agg.aggregations,
        "postAggregations": agg.post_aggregations,
    });
    if let Some(f) = &filter_parts.dimension_filter {
        query["filter"] = f.clone();
    }

    let mut context = QueryContext::default();
    if skip_empty_buckets {
        context.extra.insert("skipEmptyBuckets".to_string(), json!("true"));
    }

    let post_transform = build_apply_row_transform(applies, &agg.intermediate_names, None);
    Ok(QueryAndPostTransform { query, context, post_transform })
}

fn format_intervals(intervals: &[(String, String)]) -> Vec<String> {
    if intervals.is_empty() {
        vec!["0000-01-01T00:00:00.000Z/3000-01-01T00:00:00.000Z".to_string()]
    } else {
        intervals.iter().map(|(s, e)| format!("{s}/{e}")).collect()
    }
}

fn build_apply_row_transform(applies: &[Apply], intermediate_names: &[String], timestamp_label: Option<String>) -> RowTransform {
    let mut inflaters = Vec::new();
    let mut passthrough = Vec::new();
    for apply in applies {
        match Inflater::for_type(&apply.expression.resolved_type()) {
            Some(i) => inflaters.push((apply.name.clone(), i)),
            None => passthrough.push(apply.name.clone()),
        }
    }
    RowTransform {
        timestamp_label,
        inflaters,
        passthrough,
        drop: intermediate_names.to_vec(),
        renames: Vec::new(),
    }
}

// ---------------------------------------------------------------- split

fn topn_compatible_sort(sort: &Sort, applies: &[Apply]) -> bool {
    applies
        .iter()
        .find(|a| a.name == sort.ref_name)
        .map(|a| !contains_time_filter(&a.expression))
        .unwrap_or(false)
}

fn contains_time_filter(expr: &Expression) -> bool {
    let mut found = false;
    expr.walk(&mut |node| {
        if let Expression::Filter { expression, .. } = node {
            if expression.free_references().iter().any(|n| n == "__time") {
                found = true;
            }
        }
    });
    found
}

fn is_timestamp_compatible_sort(sort: &Option<Sort>, timestamp_label: &str) -> bool {
    match sort {
        None => true,
        Some(s) => s.ref_name == timestamp_label,
    }
}

/// `TimeBucket`/`TimeFloor` over the time ref → a period granularity;
/// the bare time ref → granularity `none`. Anything else can't drive a
/// `timeseries` shape.
fn split_granularity(expr: &Expression, time_attribute: &str) -> Option<Value> {
    match expr {
        Expression::Ref { name, nest: 0, .. } if name == time_attribute => Some(json!("none")),
        Expression::TimeBucket { operand, period, time_zone } | Expression::TimeFloor { operand, period, time_zone }
            if is_time_ref(operand, time_attribute) =>
        {
            Some(json!({ "type": "period", "period": period, "timeZone": time_zone }))
        }
        _ => None,
    }
}

fn build_split(external: &External, capabilities: PlannerCapabilities) -> PlanResult<QueryAndPostTransform> {
    let split = external
        .split
        .clone()
        .ok_or_else(|| PlanError::invalid_configuration("split mode requires a split"))?;

    if external.applies.iter().any(|a| a.expression.contains_split()) {
        return build_resplit(external, &split, capabilities);
    }

    let group_by_only = external.query_selection == QuerySelection::GroupByOnly;

    if split.len() == 1 && !group_by_only {
        let (name, key_expr) = split.iter().next().unwrap();
        if let Some(granularity) = split_granularity(key_expr, &external.time_attribute) {
            if is_timestamp_compatible_sort(&external.sort, &split::rewrite_output_name(name))
                && external.limit.is_none()
                && trivial_having(&external.having_filter)
            {
                return build_timeseries(external, name, key_expr, granularity, capabilities);
            }
        }
        if !external.exact_results_only && external.query_selection == QuerySelection::Any {
            if let Some(sort) = &external.sort {
                if topn_compatible_sort(sort, &external.applies) || external.limit.is_some() {
                    if let Ok(q) = build_topn(external, name, key_expr) {
                        return Ok(q);
                    }
                }
            } else if external.limit.is_some() {
                if let Ok(q) = build_topn(external, name, key_expr) {
                    return Ok(q);
                }
            }
        }
    }

    build_group_by(external, &split)
}

fn trivial_having(having: &Option<Expression>) -> bool {
    having.is_none()
}

fn build_timeseries(
    external: &External,
    output_name: &str,
    key_expr: &Expression,
    granularity: Value,
    capabilities: PlannerCapabilities,
) -> PlanResult<QueryAndPostTransform> {
    let dim_spec = split::lower_split_key(output_name, key_expr, external)?;
    let filter_parts = filter_builder::build_filter(external.filter.as_ref(), &external.time_attribute)?;
    if filter_parts.intervals.is_empty() && !external.allow_eternity {
        return Err(PlanError::invalid_configuration(
            "query has no bounded time filter and allowEternity is not set",
        ));
    }
    let agg = aggregation_builder::build_aggregations(&external.applies, external)?;

    let mut query = json!({
        "queryType": "timeseries",
        "dataSource": external.source,
        "granularity": granularity,
        "intervals": format_intervals(&filter_parts.intervals),
        "aggregations": agg.aggregations,
        "postAggregations": agg.post_aggregations,
    });
    if let Some(vc) = &dim_spec.virtual_column {
        query["virtualColumns"] = json!([vc]);
    }
    if let Some(f) = &filter_parts.dimension_filter {
        query["filter"] = f.clone();
    }
    if let Some(sort) = &external.sort {
        if sort.direction == SortDirection::Descending {
            if !capabilities.timeseries_descending {
                return Err(PlanError::invalid_configuration(
                    "backend does not support a descending timeseries; split into a groupBy instead",
                ));
            }
            query["descending"] = json!(true);
        }
    }

    let mut context = QueryContext::default();
    context.extra.insert("skipEmptyBuckets".to_string(), json!("true"));
    context.timestamp = Some(dim_spec.output_name.clone());

    let mut post_transform = build_apply_row_transform(&external.applies, &agg.intermediate_names, Some("timestamp".to_string()));
    post_transform.timestamp_label = Some("timestamp".to_string());
    Ok(QueryAndPostTransform { query, context, post_transform })
}

fn build_topn(external: &External, output_name: &str, key_expr: &Expression) -> PlanResult<QueryAndPostTransform> {
    let dim_spec = split::lower_split_key(output_name, key_expr, external)?;
    let filter_parts = filter_builder::build_filter(external.filter.as_ref(), &external.time_attribute)?;
    if filter_parts.intervals.is_empty() && !external.allow_eternity {
        return Err(PlanError::invalid_configuration(
            "query has no bounded time filter and allowEternity is not set",
        ));
    }
    let agg = aggregation_builder::build_aggregations(&external.applies, external)?;

    let (metric, ascending_is_natural) = match &external.sort {
        Some(sort) if sort.ref_name == dim_spec.output_name => {
            let ordering = if matches!(key_expr.resolved_type(), ExpressionType::Number) {
                "numeric"
            } else {
                "lexicographic"
            };
            (json!({ "type": "dimension", "ordering": ordering }), true)
        }
        Some(sort) => (json!(sort.ref_name), false),
        None => (json!(dim_spec.output_name), true),
    };
    let mut metric = metric;
    if let Some(sort) = &external.sort {
        let natural_ascending = ascending_is_natural;
        let wants_descending = sort.direction == SortDirection::Descending;
        if wants_descending == natural_ascending {
            metric = json!({ "type": "inverted", "metric": metric });
        }
    }

    let threshold = external.limit.unwrap_or(1000);

    let mut query = json!({
        "queryType": "topN",
        "dataSource": external.source,
        "granularity": "all",
        "intervals": format_intervals(&filter_parts.intervals),
        "dimension": dim_spec.dimension,
        "metric": metric,
        "threshold": threshold,
        "aggregations": agg.aggregations,
        "postAggregations": agg.post_aggregations,
    });
    if let Some(vc) = &dim_spec.virtual_column {
        query["virtualColumns"] = json!([vc]);
    }
    if let Some(f) = &filter_parts.dimension_filter {
        query["filter"] = f.clone();
    }

    let context = QueryContext::default();
    let mut post_transform = build_apply_row_transform(&external.applies, &agg.intermediate_names, None);
    post_transform
        .inflaters
        .insert(0, (dim_spec.output_name.clone(), dim_spec.inflater.unwrap_or(Inflater::Number)));
    Ok(QueryAndPostTransform { query, context, post_transform })
}

fn build_group_by(external: &External, split: &BTreeMap<String, Expression>) -> PlanResult<QueryAndPostTransform> {
    let filter_parts = filter_builder::build_filter(external.filter.as_ref(), &external.time_attribute)?;
    if filter_parts.intervals.is_empty() && !external.allow_eternity {
        return Err(PlanError::invalid_configuration(
            "query has no bounded time filter and allowEternity is not set",
        ));
    }
    let agg = aggregation_builder::build_aggregations(&external.applies, external)?;

    let mut dimensions = Vec::new();
    let mut virtual_columns = Vec::new();
    let mut dim_specs = Vec::new();
    for (name, expr) in split {
        let spec = split::lower_split_key(name, expr, external)?;
        if let Some(vc) = &spec.virtual_column {
            virtual_columns.push(vc.clone());
        }
        dimensions.push(spec.dimension.clone());
        dim_specs.push((name.clone(), expr.clone(), spec));
    }

    let mut leftover_having = external.having_filter.clone();
    if split.len() == 1 {
        if let Some(having) = external.having_filter.clone() {
            let (name, expr) = split.iter().next().unwrap();
            if matches!(expr.resolved_type(), ExpressionType::String | ExpressionType::Set(_)) {
                if let Expression::Ref { name: column, nest: 0, .. } = expr {
                    if let Some((_, _, spec)) = dim_specs.iter_mut().find(|(n, _, _)| n == name) {
                        leftover_having = split::push_down_having(&having, column, &mut spec.dimension);
                        dimensions.clear();
                        dimensions.extend(dim_specs.iter().map(|(_, _, s)| s.dimension.clone()));
                    }
                }
            }
        }
    }

    let mut query = json!({
        "queryType": "groupBy",
        "dataSource": external.source,
        "granularity": "all",
        "intervals": format_intervals(&filter_parts.intervals),
        "dimensions": dimensions,
        "aggregations": agg.aggregations,
        "postAggregations": agg.post_aggregations,
    });
    if !virtual_columns.is_empty() {
        query["virtualColumns"] = json!(virtual_columns);
    }
    if let Some(f) = &filter_parts.dimension_filter {
        query["filter"] = f.clone();
    }

    if let Some(sort) = &external.sort {
        let numeric = dim_specs
            .iter()
            .find(|(n, _, _)| *n == sort.ref_name)
            .map(|(_, e, _)| matches!(e.resolved_type(), ExpressionType::Number))
            .unwrap_or(false);
        let mut column = json!({ "dimension": sort.ref_name, "direction": match sort.direction {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
        }});
        if numeric {
            column["dimensionOrder"] = json!("numeric");
        }
        let mut limit_spec = json!({ "type": "default", "columns": [column] });
        if let Some(limit) = external.limit {
            limit_spec["limit"] = json!(limit);
        }
        query["limitSpec"] = limit_spec;
    } else if let Some(limit) = external.limit {
        query["limitSpec"] = json!({ "type": "default", "limit": limit, "columns": [] });
    }

    if let Some(having) = &leftover_having {
        query["having"] = lower_having(having)?;
    }

    let context = QueryContext::default();
    let mut post_transform = build_apply_row_transform(&external.applies, &agg.intermediate_names, None);
    for (name, _, spec) in &dim_specs {
        post_transform
            .inflaters
            .insert(0, (spec.output_name.clone(), spec.inflater.unwrap_or(Inflater::Number)));
        let _ = name;
    }
    Ok(QueryAndPostTransform { query, context, post_transform })
}

fn lower_having(having: &Expression) -> PlanResult<Value> {
    match having {
        Expression::And { operand, expression } => Ok(json!({
            "type": "and",
            "havingSpecs": [lower_having(operand)?, lower_having(expression)?],
        })),
        Expression::Or { operand, expression } => Ok(json!({
            "type": "or",
            "havingSpecs": [lower_having(operand)?, lower_having(expression)?],
        })),
        Expression::Not { operand } => Ok(json!({ "type": "not", "havingSpec": lower_having(operand)? })),
        Expression::Is { operand, expression } => {
            let agg_name = field_name(operand)?;
            Ok(json!({ "type": "equalTo", "aggregation": agg_name, "value": expression_lowerer::lower_expression(expression)? }))
        }
        other => {
            let formula = expression_lowerer::lower_expression(other)?;
            Ok(json!({ "type": "filter", "filter": { "type": "expression", "expression": formula } }))
        }
    }
}

fn field_name(expr: &Expression) -> PlanResult<String> {
    match expr {
        Expression::Ref { name, nest: 0, .. } => Ok(name.clone()),
        other => Err(PlanError::unsupported(COMPONENT, format!("having requires a field reference, found {other:?}"))),
    }
}

// ------------------------------------------------------------- scan

fn build_scan(external: &External) -> PlanResult<QueryAndPostTransform> {
    if !external.allow_select_queries {
        return Err(PlanError::invalid_configuration(
            "raw mode requires allowSelectQueries",
        ));
    }
    let filter_parts = filter_builder::build_filter(external.filter.as_ref(), &external.time_attribute)?;
    if filter_parts.intervals.is_empty() && !external.allow_eternity {
        return Err(PlanError::invalid_configuration(
            "query has no bounded time filter and allowEternity is not set",
        ));
    }

    let columns: Vec<String> = external
        .select
        .clone()
        .unwrap_or_else(|| external.raw_attributes.iter().map(|a| a.name.clone()).collect());

    let virtual_columns: Vec<serde_json::Value> = Vec::new();
    let mut inflaters = Vec::new();
    let mut resolved_columns = Vec::new();
    for name in &columns {
        let attr = external.attribute(name);
        if name == "__time" {
            resolved_columns.push("__time".to_string());
            inflaters.push((name.clone(), Inflater::Time));
            continue;
        }
        if let Some(attr) = attr {
            if let Some(inflater) = Inflater::for_type(&attr.ty) {
                inflaters.push((name.clone(), inflater));
            }
        }
        resolved_columns.push(name.clone());
    }

    let mut query = json!({
        "queryType": "scan",
        "dataSource": external.source,
        "resultFormat": "compactedList",
        "intervals": format_intervals(&filter_parts.intervals),
        "columns": resolved_columns,
    });
    if !virtual_columns.is_empty() {
        query["virtualColumns"] = json!(virtual_columns);
    }
    if let Some(f) = &filter_parts.dimension_filter {
        query["filter"] = f.clone();
    }
    if let Some(limit) = external.limit {
        query["limit"] = json!(limit);
    }
    if let Some(sort) = &external.sort {
        if sort.ref_name == external.time_attribute && columns.iter().any(|c| c == &external.time_attribute) {
            query["order"] = json!(match sort.direction {
                SortDirection::Ascending => "ascending",
                SortDirection::Descending => "descending",
            });
        }
    }

    let context = QueryContext::default();
    let post_transform = RowTransform {
        inflaters,
        passthrough: resolved_columns.iter().filter(|c| *c != "__time").cloned().collect(),
        ..RowTransform::empty()
    };
    Ok(QueryAndPostTransform { query, context, post_transform })
}

// --------------------------------------------------------- re-split (nested group-by)

/// A focused implementation of the re-split rewrite: supports
/// the common single-apply case (`outer-aggregate(apply(inner-split))`),
/// one or more plain sibling aggregates pulled through alongside it, and a
/// filtered inner apply. All re-split applies must share the same inner
/// split, per the spec.
fn build_resplit(
    external: &External,
    outer_split: &BTreeMap<String, Expression>,
    capabilities: PlannerCapabilities,
) -> PlanResult<QueryAndPostTransform> {
    let mut inner_split: Option<BTreeMap<String, Expression>> = None;
    let mut inner_applies: Vec<Apply> = Vec::new();
    let mut outer_applies: Vec<Apply> = Vec::new();
    let mut intermediate_attributes: Vec<AttributeInfo> = Vec::new();

    for apply in &external.applies {
        match parse_resplit_agg(&apply.expression) {
            Some(m) => {
                match &inner_split {
                    None => inner_split = Some(m.inner_split.clone()),
                    Some(existing) => {
                        if existing != &m.inner_split {
                            return Err(PlanError::invalid_configuration(
                                "all resplit aggregators must have the same split",
                            ));
                        }
                    }
                }

                let intermediate_name = format!("{}_0", apply.name);
                let inner_kind = classify_pull_through(&m.inner_apply)?;
                intermediate_attributes.push(intermediate_attribute(
                    &intermediate_name,
                    &inner_kind,
                    aggregate_value_field(&m.inner_apply),
                    &external.raw_attributes,
                ));
                inner_applies.push(Apply {
                    force_finalize: true,
                    ..Apply::new(intermediate_name.clone(), m.inner_apply)
                });

                let mut dataset = Expression::ref_("main", ExpressionType::Dataset);
                if let Some(predicate) = m.filter_predicate {
                    let def_name = format!("{}_def", apply.name);
                    intermediate_attributes.push(AttributeInfo::new(&def_name, ExpressionType::Number, "LONG"));
                    inner_applies.push(Apply::new(
                        def_name.clone(),
                        Expression::ref_("main", ExpressionType::Dataset).filter(predicate).count(),
                    ));
                    // Exclude buckets where the filter never matched a row.
                    let nonzero = Expression::ref_(def_name, ExpressionType::Number)
                        .is(Expression::number(0.0))
                        .not();
                    dataset = dataset.filter(nonzero);
                }
                let outer_expr =
                    m.kind.rebuild_over(dataset, Expression::ref_(intermediate_name, ExpressionType::Number));
                outer_applies.push(Apply::new(apply.name.clone(), outer_expr));
            }
            None => {
                let kind = classify_pull_through(&apply.expression)?;
                let intermediate_name = format!("{}_0", apply.name);
                intermediate_attributes.push(intermediate_attribute(
                    &intermediate_name,
                    &kind,
                    aggregate_value_field(&apply.expression),
                    &external.raw_attributes,
                ));
                inner_applies.push(Apply::new(intermediate_name.clone(), apply.expression.clone()));
                let dataset = Expression::ref_("main", ExpressionType::Dataset);
                let outer_expr = kind.rebuild_over(dataset, Expression::ref_(intermediate_name, ExpressionType::Number));
                outer_applies.push(Apply::new(apply.name.clone(), outer_expr));
            }
        }
    }

    let mut inner_split = inner_split
        .ok_or_else(|| PlanError::invalid_configuration("resplit rewrite found no re-split aggregate"))?;

    // Merge each outer split key into the inner query: a key shared with
    // the inner split (by expression equality) becomes a bare reference to
    // the already-grouped column; any other key is pulled into the inner
    // split too, "divvied" so a bucket expression is applied once per
    // level rather than duplicated verbatim on the outer query.
    let mut rewritten_outer_split = BTreeMap::new();
    for (name, expr) in outer_split {
        match inner_split.get(name) {
            Some(existing) if existing == expr => {
                rewritten_outer_split.insert(name.clone(), Expression::ref_(name.clone(), expr.resolved_type()));
            }
            Some(_) => {
                return Err(PlanError::invalid_configuration(format!(
                    "split key `{name}` is used by both the inner and outer split with different expressions"
                )));
            }
            None => match expr {
                Expression::TimeBucket { .. } | Expression::NumberBucket { .. } => {
                    inner_split.insert(name.clone(), expr.clone());
                    rewritten_outer_split.insert(name.clone(), rebucket_on_intermediate(expr, name));
                }
                _ => {
                    inner_split.insert(name.clone(), expr.clone());
                    rewritten_outer_split.insert(name.clone(), Expression::ref_(name.clone(), expr.resolved_type()));
                }
            },
        }
    }

    let mut inner_external = External::new(external.source.clone());
    inner_external.mode = QueryMode::Split;
    inner_external.split = Some(inner_split);
    inner_external.applies = inner_applies;
    inner_external.filter = external.filter.clone();
    inner_external.time_attribute = external.time_attribute.clone();
    inner_external.raw_attributes = external.raw_attributes.clone();
    inner_external.custom_aggregations = external.custom_aggregations.clone();
    inner_external.allow_eternity = external.allow_eternity;
    inner_external.query_selection = QuerySelection::GroupByOnly;
    let inner_query = Planner::plan(&inner_external)?;

    let mut outer_external = External::new(external.source.clone());
    outer_external.mode = QueryMode::Split;
    outer_external.split = Some(rewritten_outer_split);
    outer_external.applies = outer_applies;
    outer_external.sort = external.sort.clone();
    outer_external.limit = external.limit;
    outer_external.having_filter = external.having_filter.clone();
    outer_external.time_attribute = external.time_attribute.clone();
    outer_external.raw_attributes = intermediate_attributes;
    outer_external.allow_eternity = true;
    outer_external.query_selection = QuerySelection::GroupByOnly;

    let mut plan = build_split(&outer_external, capabilities)?;
    if let Value::Object(ref mut obj) = plan.query {
        obj.insert(
            "dataSource".to_string(),
            json!({ "type": "query", "query": inner_query.query }),
        );
        obj.insert("filter".to_string(), json!({ "type": "true" }));
    }
    Ok(plan)
}

/// Rebuild a `TimeBucket`/`NumberBucket` split-key expression over the
/// inner query's materialized intermediate column instead of its original
/// operand — the outer query re-applies the same bucket to the
/// already-bucketed value it receives as input.
fn rebucket_on_intermediate(expr: &Expression, intermediate_name: &str) -> Expression {
    match expr {
        Expression::TimeBucket { period, time_zone, .. } => Expression::TimeBucket {
            operand: Box::new(Expression::ref_(intermediate_name, ExpressionType::Time)),
            period: period.clone(),
            time_zone: time_zone.clone(),
        },
        Expression::NumberBucket { size, offset, .. } => Expression::NumberBucket {
            operand: Box::new(Expression::ref_(intermediate_name, ExpressionType::Number)),
            size: *size,
            offset: *offset,
        },
        other => unreachable!("rebucket_on_intermediate called on non-bucket expression {other:?}"),
    }
}

enum OuterAgg {
    Count,
    Sum,
    Min,
    Max,
    CountDistinct,
    Quantile(f64),
}

impl OuterAgg {
    /// Rebuild this aggregate over `intermediate`, folding `dataset` (the
    /// raw `main` reference, or a filtered view of it).
    fn rebuild_over(&self, dataset: Expression, intermediate: Expression) -> Expression {
        match self {
            OuterAgg::Count => dataset.sum(intermediate),
            OuterAgg::Sum => dataset.sum(intermediate),
            OuterAgg::Min => dataset.min(intermediate),
            OuterAgg::Max => dataset.max(intermediate),
            OuterAgg::CountDistinct => dataset.count_distinct(intermediate),
            OuterAgg::Quantile(q) => dataset.quantile(intermediate, *q),
        }
    }
}

struct ResplitMatch {
    kind: OuterAgg,
    inner_split: BTreeMap<String, Expression>,
    inner_apply: Expression,
    /// Set when the inner apply's own aggregate operand is a `Filter` —
    /// the outer aggregate must then exclude buckets the filter never
    /// matched rather than folding in their (absent) value.
    filter_predicate: Option<Expression>,
}

/// Recognize `aggregate(apply(split(ref | filter(ref))))` and return the
/// outer aggregate kind, the inner split, and the inner apply's
/// expression (the thing materialized per inner-split bucket).
fn parse_resplit_agg(expr: &Expression) -> Option<ResplitMatch> {
    let (kind, operand) = match expr {
        Expression::Count { operand } => (OuterAgg::Count, operand.as_ref()),
        Expression::Sum { operand, .. } => (OuterAgg::Sum, operand.as_ref()),
        Expression::Min { operand, .. } => (OuterAgg::Min, operand.as_ref()),
        Expression::Max { operand, .. } => (OuterAgg::Max, operand.as_ref()),
        _ => return None,
    };
    let Expression::Apply { operand, expression, .. } = operand else {
        return None;
    };
    let Expression::Split { splits, .. } = operand.as_ref() else {
        return None;
    };
    let inner_apply = expression.as_ref().clone();
    let filter_predicate = aggregate_filter(&inner_apply);
    Some(ResplitMatch { kind, inner_split: splits.clone(), inner_apply, filter_predicate })
}

/// Classify a non-re-split sibling apply for pull-through: its aggregate
/// kind is rebuilt over the inner query's per-bucket intermediate rather
/// than the base dataset (count folds to a sum of per-bucket counts;
/// every other chain-unary aggregate repeats itself over the
/// intermediate). Custom aggregates have no well-defined pull-through and
/// are rejected.
fn classify_pull_through(expr: &Expression) -> PlanResult<OuterAgg> {
    match expr {
        Expression::Count { .. } => Ok(OuterAgg::Count),
        Expression::Sum { .. } => Ok(OuterAgg::Sum),
        Expression::Min { .. } => Ok(OuterAgg::Min),
        Expression::Max { .. } => Ok(OuterAgg::Max),
        Expression::CountDistinct { .. } => Ok(OuterAgg::CountDistinct),
        Expression::Quantile { quantile, .. } => Ok(OuterAgg::Quantile(*quantile)),
        Expression::Custom { .. } => Err(PlanError::invalid_configuration(
            "a custom aggregate cannot be combined with a nested group-by resplit",
        )),
        other => Err(PlanError::unsupported(
            COMPONENT,
            format!("{other:?} cannot be pulled through a nested group-by resplit"),
        )),
    }
}

/// The dataset operand an aggregate folds over, shared by every aggregate
/// variant — used to detect a `Filter` wrapped directly under the
/// aggregate.
fn aggregate_operand(expr: &Expression) -> Option<&Expression> {
    match expr {
        Expression::Count { operand }
        | Expression::Sum { operand, .. }
        | Expression::Min { operand, .. }
        | Expression::Max { operand, .. }
        | Expression::CountDistinct { operand, .. }
        | Expression::Quantile { operand, .. }
        | Expression::Custom { operand, .. } => Some(operand.as_ref()),
        _ => None,
    }
}

fn aggregate_filter(expr: &Expression) -> Option<Expression> {
    match aggregate_operand(expr)? {
        Expression::Filter { expression, .. } => Some(expression.as_ref().clone()),
        _ => None,
    }
}

/// The value expression an aggregate folds (`expression` in `Sum`/`Min`/
/// `Max`/`CountDistinct`/`Quantile`); `None` for `Count`, which has none.
fn aggregate_value_field(expr: &Expression) -> Option<&Expression> {
    match expr {
        Expression::Sum { expression, .. }
        | Expression::Min { expression, .. }
        | Expression::Max { expression, .. }
        | Expression::CountDistinct { expression, .. }
        | Expression::Quantile { expression, .. } => Some(expression.as_ref()),
        _ => None,
    }
}

/// The `AttributeInfo` an intermediate column gets in the outer query's
/// schema: `count`-derived intermediates are always `LONG`; everything
/// else inherits its `nativeType` from the base field it folds, so the
/// outer aggregation builder's `longSum`/`doubleSum` (etc.) choice matches
/// the inner one.
fn intermediate_attribute(
    name: &str,
    kind: &OuterAgg,
    field: Option<&Expression>,
    raw_attributes: &[AttributeInfo],
) -> AttributeInfo {
    let native_type = match kind {
        OuterAgg::Count => "LONG",
        _ => {
            let is_long = field
                .and_then(|f| match f {
                    Expression::Ref { name, nest: 0, .. } => raw_attributes.iter().find(|a| &a.name == name),
                    _ => None,
                })
                .map(|a| a.native_type.eq_ignore_ascii_case("long"))
                .unwrap_or(false);
            if is_long {
                "LONG"
            } else {
                "DOUBLE"
            }
        }
    };
    AttributeInfo::new(name, ExpressionType::Number, native_type)
}
