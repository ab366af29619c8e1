//! The data model surrounding a single planning call: the dataset schema
//! ([`AttributeInfo`]), the immutable request snapshot ([`External`]), and
//! the planner's output contract ([`QueryAndPostTransform`] /
//! [`RowTransform`]).
//!
//! Everything here is constructed once per planning call, consumed during
//! lowering, and discarded — there is no shared mutable state between
//! passes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expr::{Expression, ExpressionType};

/// Describes one column of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    pub ty: ExpressionType,
    /// The backend's own storage type (e.g. `"hyperUnique"`, `"STRING"`).
    pub native_type: String,
    /// `true` forbids using this column as a split dimension — typically a
    /// pre-aggregated ("rolled up") metric.
    pub unsplitable: bool,
    /// How this numeric column combines across rows, inferred during
    /// introspection: `sum`, `min`, `max`, or `count()`.
    pub maker: Option<AttributeMaker>,
    pub cardinality: Option<u64>,
    pub range: Option<(String, String)>,
}

impl AttributeInfo {
    pub fn new(name: impl Into<String>, ty: ExpressionType, native_type: impl Into<String>) -> Self {
        AttributeInfo {
            name: name.into(),
            ty,
            native_type: native_type.into(),
            unsplitable: false,
            maker: None,
            cardinality: None,
            range: None,
        }
    }

    pub fn unsplitable(mut self) -> Self {
        self.unsplitable = true;
        self
    }

    pub fn with_maker(mut self, maker: AttributeMaker) -> Self {
        self.maker = Some(maker);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeMaker {
    Sum,
    Min,
    Max,
    Count,
}

/// Planning mode, derived from the shape of the incoming query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    Raw,
    Value,
    Total,
    Split,
}

/// Which native shapes the caller is willing to accept for a `split` mode
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuerySelection {
    #[default]
    Any,
    GroupByOnly,
}

/// A single named aggregate contributing one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apply {
    pub name: String,
    pub expression: Expression,
    /// Hints the aggregation builder to force-finalize the aggregator (e.g.
    /// a sketch) rather than leave it in its intermediate, mergeable form —
    /// set on the inner apply of a nested group-by rewrite, whose output is
    /// consumed directly rather than merged further upstream.
    #[serde(default)]
    pub force_finalize: bool,
}

impl Apply {
    pub fn new(name: impl Into<String>, expression: Expression) -> Self {
        Apply { name: name.into(), expression, force_finalize: false }
    }
}

/// An ordering request over a split key or an apply's output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub ref_name: String,
    pub direction: crate::expr::SortDirection,
}

/// A group-by key set over dataset rows; maps output name to the
/// expression that computes it.
pub type Split = std::collections::BTreeMap<String, Expression>;

/// The immutable configuration snapshot for one planning pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct External {
    pub mode: QueryMode,
    pub source: String,
    pub filter: Option<Expression>,
    pub split: Option<Split>,
    pub applies: Vec<Apply>,
    pub value_expression: Option<Expression>,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
    pub having_filter: Option<Expression>,
    pub raw_attributes: Vec<AttributeInfo>,
    pub select: Option<Vec<String>>,
    pub time_attribute: String,
    pub custom_aggregations: HashMap<String, String>,
    pub custom_transforms: HashMap<String, String>,
    pub allow_eternity: bool,
    pub allow_select_queries: bool,
    pub exact_results_only: bool,
    pub query_selection: QuerySelection,
}

impl External {
    /// A minimal snapshot for `split` mode over `source`, with no applies,
    /// filter, sort, or limit yet — the common starting point for tests and
    /// for constructing the nested-group-by rewrite's inner/outer queries.
    pub fn new(source: impl Into<String>) -> Self {
        External {
            mode: QueryMode::Split,
            source: source.into(),
            filter: None,
            split: None,
            applies: Vec::new(),
            value_expression: None,
            sort: None,
            limit: None,
            having_filter: None,
            raw_attributes: Vec::new(),
            select: None,
            time_attribute: "__time".to_string(),
            custom_aggregations: HashMap::new(),
            custom_transforms: HashMap::new(),
            allow_eternity: false,
            allow_select_queries: false,
            exact_results_only: false,
            query_selection: QuerySelection::Any,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.raw_attributes.iter().find(|a| a.name == name)
    }
}

/// Context carried alongside the native query document, guiding both the
/// requester and the post-transform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Names the response column carrying the bucket timestamp.
    pub timestamp: Option<String>,
    /// Marks aggregation columns (prefixed `!`) that must be dropped from
    /// output.
    pub ignore_prefix: Option<String>,
    /// Marks output names rewritten (prefixed `***`) to avoid colliding with
    /// backend-reserved prefixes.
    pub dummy_prefix: Option<String>,
    /// Extra backend options the caller supplied verbatim (e.g.
    /// `skipEmptyBuckets`).
    pub extra: HashMap<String, serde_json::Value>,
}

/// Deployment-level feature gates for the native backend, supplied once by
/// the embedding runtime and threaded through a planning call — distinct
/// from `External`, which is the per-call request snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerCapabilities {
    /// Whether the backend accepts `"descending": true` on a `timeseries`
    /// query. Clusters running a backend version that predates this option
    /// must set this `false`; the planner then rejects a descending sort
    /// over a single time split instead of emitting a field the backend
    /// would ignore or reject.
    pub timeseries_descending: bool,
}

impl Default for PlannerCapabilities {
    fn default() -> Self {
        PlannerCapabilities { timeseries_descending: true }
    }
}

/// The planner's complete output for one call: the native query document,
/// its context, and the row transform that inflates results back into the
/// algebra's value space.
#[derive(Debug, Clone)]
pub struct QueryAndPostTransform {
    pub query: serde_json::Value,
    pub context: QueryContext,
    pub post_transform: RowTransform,
}

/// A per-column coercion from a raw backend value to an algebra-typed
/// value. Inflaters are total functions: an unrecognized raw value
/// produces a typed null rather than failing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inflater {
    Time,
    Boolean,
    Number,
    SetString,
    SetCardinality,
}

impl Inflater {
    /// Choose the dimension inflater for a split-key or selected column's
    /// type.
    pub fn for_type(ty: &ExpressionType) -> Option<Inflater> {
        match ty {
            ExpressionType::Time => Some(Inflater::Time),
            ExpressionType::Boolean => Some(Inflater::Boolean),
            ExpressionType::Number | ExpressionType::NumberRange => Some(Inflater::Number),
            ExpressionType::Set(_) | ExpressionType::String => Some(Inflater::SetString),
            ExpressionType::Null => None,
            ExpressionType::Dataset | ExpressionType::TimeRange => None,
        }
    }

    pub fn inflate(&self, raw: &serde_json::Value) -> DatumValue {
        match self {
            Inflater::Time => match raw.as_str() {
                Some(s) => DatumValue::Time(s.to_string()),
                None => DatumValue::Null,
            },
            Inflater::Boolean => match raw {
                serde_json::Value::Bool(b) => DatumValue::Boolean(*b),
                serde_json::Value::Number(n) => DatumValue::Boolean(n.as_f64().unwrap_or(0.0) != 0.0),
                _ => DatumValue::Null,
            },
            Inflater::Number => match raw.as_f64() {
                Some(n) => DatumValue::Number(n),
                None => DatumValue::Null,
            },
            Inflater::SetString => match raw {
                serde_json::Value::String(s) => DatumValue::String(s.clone()),
                serde_json::Value::Array(items) => DatumValue::Set(
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect(),
                ),
                _ => DatumValue::Null,
            },
            Inflater::SetCardinality => match raw.as_f64() {
                Some(n) => DatumValue::Number(n),
                None => DatumValue::Null,
            },
        }
    }
}

/// An inflated value in the algebra's value space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatumValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Time(String),
    Set(Vec<String>),
}

/// One inflated output row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    pub fields: HashMap<String, DatumValue>,
}

/// A streaming row transform: converts native result rows into
/// algebra-typed records, one at a time, without reordering or unbounded
/// buffering.
#[derive(Debug, Clone)]
pub struct RowTransform {
    pub timestamp_label: Option<String>,
    /// (output name, inflater) pairs, in the order inflated columns should
    /// be written into the resulting [`Datum`].
    pub inflaters: Vec<(String, Inflater)>,
    /// Output names carried through verbatim (no inflater: plain
    /// string/number, already in algebra shape).
    pub passthrough: Vec<String>,
    /// Output names that must be dropped (the `!`-prefixed intermediate
    /// aggregation columns).
    pub drop: Vec<String>,
    /// Fields whose native response key differs from the output name, or
    /// that may arrive under one of several candidate keys (e.g.
    /// `timeBoundary`'s `maxIngestedEventTime || maxTime`). Checked before
    /// `inflaters`/`passthrough`, in order, first candidate present wins.
    pub renames: Vec<FieldRename>,
}

/// One renamed, possibly-multi-candidate field.
#[derive(Debug, Clone)]
pub struct FieldRename {
    pub source_candidates: Vec<String>,
    pub output_name: String,
    pub inflater: Inflater,
}

impl RowTransform {
    pub fn empty() -> Self {
        RowTransform {
            timestamp_label: None,
            inflaters: Vec::new(),
            passthrough: Vec::new(),
            drop: Vec::new(),
            renames: Vec::new(),
        }
    }

    /// Apply this transform to one raw backend row, producing one algebra
    /// datum. Total: never fails, even for malformed input columns.
    pub fn apply_row(&self, row: &serde_json::Map<String, serde_json::Value>) -> Datum {
        let mut fields = HashMap::new();

        for rename in &self.renames {
            if let Some(v) = rename.source_candidates.iter().find_map(|k| row.get(k)) {
                fields.insert(rename.output_name.clone(), rename.inflater.inflate(v));
            }
        }

        if let Some(label) = &self.timestamp_label {
            if let Some(v) = row.get(label) {
                fields.insert(label.clone(), Inflater::Time.inflate(v));
            }
        }

        for (name, inflater) in &self.inflaters {
            if self.drop.contains(name) {
                continue;
            }
            if let Some(v) = row.get(name) {
                fields.insert(name.clone(), inflater.inflate(v));
            }
        }

        for name in &self.passthrough {
            if self.drop.contains(name) {
                continue;
            }
            if let Some(v) = row.get(name) {
                let value = match v {
                    serde_json::Value::Number(n) => DatumValue::Number(n.as_f64().unwrap_or(0.0)),
                    serde_json::Value::String(s) => DatumValue::String(s.clone()),
                    serde_json::Value::Bool(b) => DatumValue::Boolean(*b),
                    _ => DatumValue::Null,
                };
                fields.insert(name.clone(), value);
            }
        }

        Datum { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_new_defaults_to_split_mode_with_no_limit() {
        let ext = External::new("wiki");
        assert_eq!(ext.mode, QueryMode::Split);
        assert!(ext.limit.is_none());
        assert_eq!(ext.query_selection, QuerySelection::Any);
    }

    #[test]
    fn inflater_for_type_covers_every_expression_type() {
        assert_eq!(Inflater::for_type(&ExpressionType::Time), Some(Inflater::Time));
        assert_eq!(
            Inflater::for_type(&ExpressionType::Boolean),
            Some(Inflater::Boolean)
        );
        assert_eq!(
            Inflater::for_type(&ExpressionType::set_of(ExpressionType::String)),
            Some(Inflater::SetString)
        );
        assert_eq!(Inflater::for_type(&ExpressionType::Null), None);
    }

    #[test]
    fn row_transform_drops_ignore_prefixed_columns() {
        let transform = RowTransform {
            timestamp_label: None,
            inflaters: vec![("!tmp".to_string(), Inflater::Number)],
            passthrough: vec![],
            drop: vec!["!tmp".to_string()],
            renames: vec![],
        };
        let mut row = serde_json::Map::new();
        row.insert("!tmp".to_string(), serde_json::json!(42));
        let datum = transform.apply_row(&row);
        assert!(datum.fields.is_empty());
    }

    #[test]
    fn row_transform_inflates_time_label() {
        let transform = RowTransform {
            timestamp_label: Some("ts".to_string()),
            inflaters: vec![],
            passthrough: vec![],
            drop: vec![],
            renames: vec![],
        };
        let mut row = serde_json::Map::new();
        row.insert("ts".to_string(), serde_json::json!("2020-01-02T00:00:00Z"));
        let datum = transform.apply_row(&row);
        assert_eq!(
            datum.fields.get("ts"),
            Some(&DatumValue::Time("2020-01-02T00:00:00Z".to_string()))
        );
    }
}
