//! End-to-end scenarios for the backend planner, one per literal-value seed
//! the planner is specified against: each builds an `External` snapshot and
//! checks the native query shape and post-transform the planner produces.

use std::collections::BTreeMap;

use druid_planner::druid::Planner;
use druid_planner::expr::{Expression, ExpressionType, SortDirection};
use druid_planner::types::{Apply, AttributeInfo, DatumValue, External, QueryMode, QuerySelection, Sort};

fn wiki(mode: QueryMode) -> External {
    let mut ext = External::new("wiki");
    ext.mode = mode;
    ext.allow_eternity = true;
    ext
}

#[test]
fn time_boundary_total() {
    let mut ext = wiki(QueryMode::Total);
    ext.applies = vec![Apply::new(
        "max",
        Expression::ref_("main", ExpressionType::Dataset).max(Expression::ref_("__time", ExpressionType::Time)),
    )];

    let plan = Planner::plan(&ext).unwrap();
    assert_eq!(plan.query["queryType"], "timeBoundary");
    assert_eq!(plan.query["bound"], "maxTime");

    let row = serde_json::json!({ "maxTime": "2020-01-02T00:00:00Z" });
    let out = plan.post_transform.apply_row(row.as_object().unwrap());
    assert_eq!(out.fields.get("max"), Some(&DatumValue::Time("2020-01-02T00:00:00Z".to_string())));
}

#[test]
fn timeseries_split() {
    let mut ext = wiki(QueryMode::Split);
    let mut split = BTreeMap::new();
    split.insert(
        "__time".to_string(),
        Expression::ref_("__time", ExpressionType::Time).time_bucket("P1D", "UTC"),
    );
    ext.split = Some(split);
    ext.sort = Some(Sort { ref_name: "***__time".to_string(), direction: SortDirection::Ascending });
    ext.applies = vec![Apply::new("rows", Expression::ref_("main", ExpressionType::Dataset).count())];

    let plan = Planner::plan(&ext).unwrap();
    assert_eq!(plan.query["queryType"], "timeseries");
    assert_eq!(plan.query["granularity"]["period"], "P1D");
    assert_eq!(plan.context.extra.get("skipEmptyBuckets").unwrap(), "true");
}

#[test]
fn topn_split() {
    let mut ext = wiki(QueryMode::Split);
    let mut split = BTreeMap::new();
    split.insert("country".to_string(), Expression::ref_("country", ExpressionType::String));
    ext.split = Some(split);
    ext.applies = vec![Apply::new(
        "revenue",
        Expression::ref_("main", ExpressionType::Dataset).sum(Expression::ref_("revenue", ExpressionType::Number)),
    )];
    ext.sort = Some(Sort { ref_name: "revenue".to_string(), direction: SortDirection::Descending });
    ext.limit = Some(50);

    let plan = Planner::plan(&ext).unwrap();
    assert_eq!(plan.query["queryType"], "topN");
    assert_eq!(plan.query["dimension"]["dimension"], "country");
    assert_eq!(plan.query["metric"], "revenue");
    assert_eq!(plan.query["threshold"], 50);
}

#[test]
fn group_by_pushes_having_down_onto_a_set_string_split() {
    let mut ext = wiki(QueryMode::Split);
    ext.query_selection = QuerySelection::GroupByOnly;
    ext.raw_attributes = vec![AttributeInfo::new(
        "tags",
        ExpressionType::set_of(ExpressionType::String),
        "STRING",
    )];
    let mut split = BTreeMap::new();
    split.insert(
        "tags".to_string(),
        Expression::ref_("tags", ExpressionType::set_of(ExpressionType::String)),
    );
    ext.split = Some(split);
    ext.applies = vec![Apply::new("count", Expression::ref_("main", ExpressionType::Dataset).count())];
    let in_set = Expression::ref_("tags", ExpressionType::set_of(ExpressionType::String)).in_(
        Expression::literal(
            druid_planner::expr::LiteralValue::Set(vec![
                druid_planner::expr::LiteralValue::String("a".into()),
                druid_planner::expr::LiteralValue::String("b".into()),
            ]),
            ExpressionType::set_of(ExpressionType::String),
        ),
    );
    let count_gt = Expression::ref_("count", ExpressionType::Number).is(Expression::number(10.0));
    ext.having_filter = Some(in_set.and(count_gt));

    let plan = Planner::plan(&ext).unwrap();
    assert_eq!(plan.query["queryType"], "groupBy");
    let dimension = &plan.query["dimensions"][0];
    assert_eq!(dimension["type"], "listFiltered");
    assert_eq!(dimension["values"], serde_json::json!(["a", "b"]));
}

#[test]
fn nested_group_by_for_a_resplit_aggregate() {
    let mut inner_split = BTreeMap::new();
    inner_split.insert("user".to_string(), Expression::ref_("user", ExpressionType::String));
    let inner = Expression::ref_("main", ExpressionType::Dataset)
        .split(inner_split, "data")
        .apply("x", Expression::ref_("data", ExpressionType::Dataset).count());
    let resplit_agg = inner.max(Expression::ref_("x", ExpressionType::Number));

    let mut ext = wiki(QueryMode::Split);
    let mut outer_split = BTreeMap::new();
    outer_split.insert("country".to_string(), Expression::ref_("country", ExpressionType::String));
    ext.split = Some(outer_split);
    ext.applies = vec![Apply::new("maxPerUser", resplit_agg)];

    let plan = Planner::plan(&ext).unwrap();
    assert_eq!(plan.query["queryType"], "groupBy");
    assert_eq!(plan.query["dataSource"]["type"], "query");
    let inner = &plan.query["dataSource"]["query"];
    assert_eq!(inner["queryType"], "groupBy");
    assert_eq!(inner["aggregations"][0]["type"], "count");
    assert_eq!(inner["aggregations"][0]["forceFinalize"], true);
    let inner_dims: Vec<String> =
        inner["dimensions"].as_array().unwrap().iter().map(|d| d["dimension"].as_str().unwrap().to_string()).collect();
    assert!(inner_dims.contains(&"user".to_string()));
    assert!(inner_dims.contains(&"country".to_string()));
    assert_eq!(plan.query["aggregations"][0]["type"], "longMax");
    assert_eq!(plan.query["dimensions"][0]["dimension"], "country");
    assert_eq!(plan.query["filter"]["type"], "true");
}

#[test]
fn nested_group_by_pulls_through_a_plain_sibling_aggregate() {
    let mut inner_split = BTreeMap::new();
    inner_split.insert("user".to_string(), Expression::ref_("user", ExpressionType::String));
    let inner = Expression::ref_("main", ExpressionType::Dataset)
        .split(inner_split, "data")
        .apply("x", Expression::ref_("data", ExpressionType::Dataset).count());
    let resplit_agg = inner.max(Expression::ref_("x", ExpressionType::Number));

    let mut ext = wiki(QueryMode::Split);
    let mut outer_split = BTreeMap::new();
    outer_split.insert("country".to_string(), Expression::ref_("country", ExpressionType::String));
    ext.split = Some(outer_split);
    ext.applies = vec![
        Apply::new("maxPerUser", resplit_agg),
        Apply::new("rows", Expression::ref_("main", ExpressionType::Dataset).count()),
    ];

    let plan = Planner::plan(&ext).unwrap();
    let inner = &plan.query["dataSource"]["query"];
    let inner_aggs: Vec<String> =
        inner["aggregations"].as_array().unwrap().iter().map(|a| a["name"].as_str().unwrap().to_string()).collect();
    assert!(inner_aggs.contains(&"rows_0".to_string()));
    let outer_rows = plan.query["aggregations"].as_array().unwrap().iter().find(|a| a["name"] == "rows").unwrap();
    assert_eq!(outer_rows["type"], "longSum");
    assert_eq!(outer_rows["fieldName"], "rows_0");
}

#[test]
fn nested_group_by_excludes_empty_buckets_for_a_filtered_inner_apply() {
    let mut inner_split = BTreeMap::new();
    inner_split.insert("user".to_string(), Expression::ref_("user", ExpressionType::String));
    let filtered = Expression::ref_("data", ExpressionType::Dataset)
        .filter(Expression::ref_("country", ExpressionType::String).is(Expression::string("US")))
        .count();
    let inner =
        Expression::ref_("main", ExpressionType::Dataset).split(inner_split, "data").apply("x", filtered);
    let resplit_agg = inner.max(Expression::ref_("x", ExpressionType::Number));

    let mut ext = wiki(QueryMode::Split);
    let mut outer_split = BTreeMap::new();
    outer_split.insert("country".to_string(), Expression::ref_("country", ExpressionType::String));
    ext.split = Some(outer_split);
    ext.applies = vec![Apply::new("maxPerUser", resplit_agg)];

    let plan = Planner::plan(&ext).unwrap();
    let inner = &plan.query["dataSource"]["query"];
    let inner_aggs: Vec<String> = inner["aggregations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().or_else(|| a["aggregator"]["name"].as_str()).unwrap().to_string())
        .collect();
    assert!(inner_aggs.contains(&"maxPerUser_def".to_string()));
    let outer_max = plan.query["aggregations"][0].clone();
    assert_eq!(outer_max["type"], "filtered");
    assert_eq!(outer_max["aggregator"]["type"], "longMax");
}

#[test]
fn nested_group_by_divvies_a_time_bucketed_outer_split_key() {
    let mut inner_split = BTreeMap::new();
    inner_split.insert("user".to_string(), Expression::ref_("user", ExpressionType::String));
    let inner = Expression::ref_("main", ExpressionType::Dataset)
        .split(inner_split, "data")
        .apply("x", Expression::ref_("data", ExpressionType::Dataset).count());
    let resplit_agg = inner.max(Expression::ref_("x", ExpressionType::Number));

    let mut ext = wiki(QueryMode::Split);
    let mut outer_split = BTreeMap::new();
    outer_split.insert("day".to_string(), Expression::ref_("__time", ExpressionType::Time).time_bucket("P1D", "UTC"));
    ext.split = Some(outer_split);
    ext.applies = vec![Apply::new("maxPerUser", resplit_agg)];

    let plan = Planner::plan(&ext).unwrap();
    let inner = &plan.query["dataSource"]["query"];
    let inner_dims: Vec<String> =
        inner["dimensions"].as_array().unwrap().iter().map(|d| d["dimension"].as_str().unwrap_or("").to_string()).collect();
    assert!(inner_dims.contains(&"user".to_string()));
    assert_eq!(plan.query["dimensions"][0]["dimension"], "day");
}

#[test]
fn scan_with_time_ordering() {
    let mut ext = wiki(QueryMode::Raw);
    ext.allow_select_queries = true;
    ext.select = Some(vec!["__time".to_string(), "country".to_string()]);
    ext.sort = Some(Sort { ref_name: "__time".to_string(), direction: SortDirection::Ascending });

    let plan = Planner::plan(&ext).unwrap();
    assert_eq!(plan.query["queryType"], "scan");
    assert_eq!(plan.query["resultFormat"], "compactedList");
    assert_eq!(plan.query["order"], "ascending");
    let columns: Vec<String> =
        serde_json::from_value(plan.query["columns"].clone()).unwrap();
    assert!(columns.contains(&"__time".to_string()));
}
