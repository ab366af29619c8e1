//! The dataset expression algebra the planner consumes.
//!
//! A tree of typed operations over datasets: filters, splits/group-bys,
//! applies/aggregations, sorts, limits, and scalar transforms, rooted at a
//! dataset reference. Every node carries its own resolved [`ExpressionType`]
//! rather than a generic operand/child pair — lowering dispatches on the
//! variant tag directly (exhaustive `match`), and a deserialization-time
//! registry is the only place that still needs to key off an `op` string.
//!
//! Construction is immutable: every combinator below returns a new, owned
//! `Expression` rather than mutating in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The type lattice for expression nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionType {
    Null,
    Boolean,
    Number,
    Time,
    String,
    NumberRange,
    TimeRange,
    Dataset,
    Set(Box<ExpressionType>),
}

impl ExpressionType {
    pub fn set_of(inner: ExpressionType) -> Self {
        ExpressionType::Set(Box::new(inner))
    }

    /// The scalar type underneath a `SET/<T>` wrapper, or itself if not a set.
    pub fn unwrap_set(&self) -> &ExpressionType {
        match self {
            ExpressionType::Set(inner) => inner,
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ExpressionType::Number | ExpressionType::NumberRange)
    }

    pub fn is_time(&self) -> bool {
        matches!(self, ExpressionType::Time | ExpressionType::TimeRange)
    }
}

/// Literal values held by [`Expression::Literal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// ISO-8601 instant.
    Time(String),
    Set(Vec<LiteralValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A node in the dataset expression algebra.
///
/// `nest` on [`Expression::Ref`] counts how many enclosing dataset scopes to
/// walk up before resolving `name`; a `Ref` with `nest > 0` can only be
/// evaluated inside the parent context that introduced that scope (e.g. the
/// `expression` of an `Apply` chained off a `Split`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Ref {
        name: String,
        nest: usize,
        ty: ExpressionType,
        ignore_case: bool,
    },
    Literal {
        value: LiteralValue,
        ty: ExpressionType,
    },

    // --- dataset shape ---
    Filter {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    /// A group-by: `splits` maps each output key name to the expression that
    /// produces it, evaluated against `operand`.
    Split {
        operand: Box<Expression>,
        splits: BTreeMap<String, Expression>,
        data_name: String,
    },
    Apply {
        operand: Box<Expression>,
        name: String,
        expression: Box<Expression>,
    },
    Sort {
        operand: Box<Expression>,
        refer: Box<Expression>,
        direction: SortDirection,
    },
    Limit {
        operand: Box<Expression>,
        value: usize,
    },

    // --- aggregates (operand is the dataset being folded, expression the value) ---
    Count {
        operand: Box<Expression>,
    },
    Sum {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Min {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Max {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    CountDistinct {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Quantile {
        operand: Box<Expression>,
        expression: Box<Expression>,
        quantile: f64,
    },
    Custom {
        operand: Box<Expression>,
        custom_name: String,
        expression: Option<Box<Expression>>,
    },

    // --- scalar / arithmetic (chainable-unary: operand chains, expression is the argument) ---
    Add {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Subtract {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Multiply {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Divide {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Power {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Absolute {
        operand: Box<Expression>,
    },
    Log {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Cast {
        operand: Box<Expression>,
        output_type: ExpressionType,
    },
    /// `operand ?? expression` — substitutes `expression` when `operand` is null.
    Fallback {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    /// `operand.then(expression)` — the true branch of a CASE-like construct;
    /// paired with a later `Fallback` for the else branch.
    Then {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },

    // --- boolean connectives ---
    And {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Or {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },
    Is {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    In {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Contains {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    Overlap {
        operand: Box<Expression>,
        expression: Box<Expression>,
    },
    MatchRegex {
        operand: Box<Expression>,
        regex: String,
    },

    // --- time / string transforms (extraction-fn eligible) ---
    TimeBucket {
        operand: Box<Expression>,
        period: String,
        time_zone: String,
    },
    TimeFloor {
        operand: Box<Expression>,
        period: String,
        time_zone: String,
    },
    TimePart {
        operand: Box<Expression>,
        part: String,
        time_zone: String,
    },
    NumberBucket {
        operand: Box<Expression>,
        size: f64,
        offset: f64,
    },
    Substr {
        operand: Box<Expression>,
        position: usize,
        length: usize,
    },
    Lookup {
        operand: Box<Expression>,
        lookup_fn: String,
    },
    /// Approximate distinct-count marker over a SET/STRING dimension.
    Cardinality {
        operand: Box<Expression>,
    },
}

impl Expression {
    pub fn ref_(name: impl Into<String>, ty: ExpressionType) -> Self {
        Expression::Ref {
            name: name.into(),
            nest: 0,
            ty,
            ignore_case: false,
        }
    }

    pub fn literal(value: LiteralValue, ty: ExpressionType) -> Self {
        Expression::Literal { value, ty }
    }

    pub fn number(n: f64) -> Self {
        Expression::literal(LiteralValue::Number(n), ExpressionType::Number)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expression::literal(LiteralValue::String(s.into()), ExpressionType::String)
    }

    pub fn filter(self, expression: Expression) -> Self {
        Expression::Filter {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn split(self, splits: BTreeMap<String, Expression>, data_name: impl Into<String>) -> Self {
        Expression::Split {
            operand: Box::new(self),
            splits,
            data_name: data_name.into(),
        }
    }

    pub fn apply(self, name: impl Into<String>, expression: Expression) -> Self {
        Expression::Apply {
            operand: Box::new(self),
            name: name.into(),
            expression: Box::new(expression),
        }
    }

    pub fn sort(self, refer: Expression, direction: SortDirection) -> Self {
        Expression::Sort {
            operand: Box::new(self),
            refer: Box::new(refer),
            direction,
        }
    }

    pub fn limit(self, value: usize) -> Self {
        Expression::Limit {
            operand: Box::new(self),
            value,
        }
    }

    pub fn count(self) -> Self {
        Expression::Count {
            operand: Box::new(self),
        }
    }

    pub fn sum(self, expression: Expression) -> Self {
        Expression::Sum {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn min(self, expression: Expression) -> Self {
        Expression::Min {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn max(self, expression: Expression) -> Self {
        Expression::Max {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn count_distinct(self, expression: Expression) -> Self {
        Expression::CountDistinct {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, expression: Expression) -> Self {
        Expression::Add {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn subtract(self, expression: Expression) -> Self {
        Expression::Subtract {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn multiply(self, expression: Expression) -> Self {
        Expression::Multiply {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn divide(self, expression: Expression) -> Self {
        Expression::Divide {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn power(self, expression: Expression) -> Self {
        Expression::Power {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn absolute(self) -> Self {
        Expression::Absolute {
            operand: Box::new(self),
        }
    }

    pub fn log(self, expression: Expression) -> Self {
        Expression::Log {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn cast(self, output_type: ExpressionType) -> Self {
        Expression::Cast {
            operand: Box::new(self),
            output_type,
        }
    }

    pub fn quantile(self, expression: Expression, quantile: f64) -> Self {
        Expression::Quantile {
            operand: Box::new(self),
            expression: Box::new(expression),
            quantile,
        }
    }

    pub fn custom(self, custom_name: impl Into<String>, expression: Option<Expression>) -> Self {
        Expression::Custom {
            operand: Box::new(self),
            custom_name: custom_name.into(),
            expression: expression.map(Box::new),
        }
    }

    pub fn contains(self, expression: Expression) -> Self {
        Expression::Contains {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn overlap(self, expression: Expression) -> Self {
        Expression::Overlap {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn substring(self, position: usize, length: usize) -> Self {
        Expression::Substr {
            operand: Box::new(self),
            position,
            length,
        }
    }

    pub fn lookup(self, lookup_fn: impl Into<String>) -> Self {
        Expression::Lookup {
            operand: Box::new(self),
            lookup_fn: lookup_fn.into(),
        }
    }

    pub fn time_part(self, part: impl Into<String>, time_zone: impl Into<String>) -> Self {
        Expression::TimePart {
            operand: Box::new(self),
            part: part.into(),
            time_zone: time_zone.into(),
        }
    }

    pub fn number_bucket(self, size: f64, offset: f64) -> Self {
        Expression::NumberBucket {
            operand: Box::new(self),
            size,
            offset,
        }
    }

    pub fn and(self, expression: Expression) -> Self {
        Expression::And {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn or(self, expression: Expression) -> Self {
        Expression::Or {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn not(self) -> Self {
        Expression::Not {
            operand: Box::new(self),
        }
    }

    pub fn is(self, expression: Expression) -> Self {
        Expression::Is {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn in_(self, expression: Expression) -> Self {
        Expression::In {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn match_regex(self, regex: impl Into<String>) -> Self {
        Expression::MatchRegex {
            operand: Box::new(self),
            regex: regex.into(),
        }
    }

    pub fn time_bucket(self, period: impl Into<String>, time_zone: impl Into<String>) -> Self {
        Expression::TimeBucket {
            operand: Box::new(self),
            period: period.into(),
            time_zone: time_zone.into(),
        }
    }

    pub fn time_floor(self, period: impl Into<String>, time_zone: impl Into<String>) -> Self {
        Expression::TimeFloor {
            operand: Box::new(self),
            period: period.into(),
            time_zone: time_zone.into(),
        }
    }

    pub fn cardinality(self) -> Self {
        Expression::Cardinality {
            operand: Box::new(self),
        }
    }

    pub fn fallback(self, expression: Expression) -> Self {
        Expression::Fallback {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    pub fn then(self, expression: Expression) -> Self {
        Expression::Then {
            operand: Box::new(self),
            expression: Box::new(expression),
        }
    }

    /// Walk the tree depth-first, operand/children before the node itself's
    /// siblings are not reordered; visits every reachable sub-expression.
    pub fn walk<F: FnMut(&Expression)>(&self, visitor: &mut F) {
        visitor(self);
        self.for_each_child(|child| child.walk(visitor));
    }

    fn for_each_child<F: FnMut(&Expression)>(&self, mut f: F) {
        match self {
            Expression::Ref { .. } | Expression::Literal { .. } => {}
            Expression::Filter { operand, expression }
            | Expression::Apply { operand, expression, .. }
            | Expression::Sum { operand, expression }
            | Expression::Min { operand, expression }
            | Expression::Max { operand, expression }
            | Expression::CountDistinct { operand, expression }
            | Expression::Add { operand, expression }
            | Expression::Subtract { operand, expression }
            | Expression::Multiply { operand, expression }
            | Expression::Divide { operand, expression }
            | Expression::Power { operand, expression }
            | Expression::Log { operand, expression }
            | Expression::Fallback { operand, expression }
            | Expression::Then { operand, expression }
            | Expression::And { operand, expression }
            | Expression::Or { operand, expression }
            | Expression::Is { operand, expression }
            | Expression::In { operand, expression }
            | Expression::Contains { operand, expression }
            | Expression::Overlap { operand, expression } => {
                f(operand);
                f(expression);
            }
            Expression::Quantile { operand, expression, .. } => {
                f(operand);
                f(expression);
            }
            Expression::Custom { operand, expression, .. } => {
                f(operand);
                if let Some(e) = expression {
                    f(e);
                }
            }
            Expression::Split { operand, splits, .. } => {
                f(operand);
                for v in splits.values() {
                    f(v);
                }
            }
            Expression::Sort { operand, refer, .. } => {
                f(operand);
                f(refer);
            }
            Expression::Limit { operand, .. }
            | Expression::Count { operand }
            | Expression::Absolute { operand }
            | Expression::Not { operand }
            | Expression::Cast { operand, .. }
            | Expression::TimeBucket { operand, .. }
            | Expression::TimeFloor { operand, .. }
            | Expression::TimePart { operand, .. }
            | Expression::NumberBucket { operand, .. }
            | Expression::Substr { operand, .. }
            | Expression::Lookup { operand, .. }
            | Expression::MatchRegex { operand, .. }
            | Expression::Cardinality { operand } => {
                f(operand);
            }
        }
    }

    /// Collect the names of every `nest == 0` [`Expression::Ref`] reachable
    /// from this node. Used to decide how many free columns a split-key or
    /// filter expression touches.
    pub fn free_references(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.walk(&mut |node| {
            if let Expression::Ref { name, nest: 0, .. } = node {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        });
        names
    }

    /// True if this node or any descendant is an aggregate op.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if node.is_aggregate() {
                found = true;
            }
        });
        found
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Expression::Count { .. }
                | Expression::Sum { .. }
                | Expression::Min { .. }
                | Expression::Max { .. }
                | Expression::CountDistinct { .. }
                | Expression::Quantile { .. }
                | Expression::Custom { .. }
        )
    }

    /// True if this or a descendant is a [`Expression::Split`].
    pub fn contains_split(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if matches!(node, Expression::Split { .. }) {
                found = true;
            }
        });
        found
    }

    /// The resolved type of this node, re-deriving composite types from
    /// their operands where the variant doesn't store one directly.
    pub fn resolved_type(&self) -> ExpressionType {
        match self {
            Expression::Ref { ty, .. } | Expression::Literal { ty, .. } => ty.clone(),
            Expression::Count { .. }
            | Expression::CountDistinct { .. }
            | Expression::Cardinality { .. } => ExpressionType::Number,
            Expression::Sum { expression, .. }
            | Expression::Min { expression, .. }
            | Expression::Max { expression, .. }
            | Expression::Quantile { expression, .. } => expression.resolved_type(),
            Expression::Add { operand, .. }
            | Expression::Subtract { operand, .. }
            | Expression::Multiply { operand, .. }
            | Expression::Divide { operand, .. }
            | Expression::Power { operand, .. }
            | Expression::Log { operand, .. }
            | Expression::Absolute { operand } => operand.resolved_type(),
            Expression::And { .. }
            | Expression::Or { .. }
            | Expression::Not { .. }
            | Expression::Is { .. }
            | Expression::In { .. }
            | Expression::Contains { .. }
            | Expression::Overlap { .. }
            | Expression::MatchRegex { .. } => ExpressionType::Boolean,
            Expression::Cast { output_type, .. } => output_type.clone(),
            Expression::TimeBucket { .. } | Expression::TimeFloor { .. } => ExpressionType::Time,
            Expression::TimePart { .. } | Expression::NumberBucket { .. } => {
                ExpressionType::Number
            }
            Expression::Substr { .. } | Expression::Lookup { .. } => ExpressionType::String,
            Expression::Fallback { operand, .. } | Expression::Then { operand, .. } => {
                operand.resolved_type()
            }
            Expression::Filter { operand, .. }
            | Expression::Split { operand, .. }
            | Expression::Apply { operand, .. }
            | Expression::Sort { operand, .. }
            | Expression::Limit { operand, .. } => operand.resolved_type(),
            Expression::Custom { expression, .. } => expression
                .as_ref()
                .map(|e| e.resolved_type())
                .unwrap_or(ExpressionType::Number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time_ref() -> Expression {
        Expression::ref_("__time", ExpressionType::Time)
    }

    #[test]
    fn ref_leaf_has_zero_nest_by_default() {
        let r = Expression::ref_("country", ExpressionType::String);
        assert!(matches!(r, Expression::Ref { nest: 0, .. }));
    }

    #[test]
    fn filter_wraps_operand_and_expression() {
        let f = time_ref().filter(Expression::ref_("ok", ExpressionType::Boolean));
        assert!(matches!(f, Expression::Filter { .. }));
    }

    #[test]
    fn free_references_collects_unique_nest_zero_refs() {
        let e = Expression::ref_("a", ExpressionType::Number)
            .add(Expression::ref_("b", ExpressionType::Number))
            .add(Expression::ref_("a", ExpressionType::Number));
        let mut names = e.free_references();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn free_references_ignores_nested_refs() {
        let nested = Expression::Ref {
            name: "outer".into(),
            nest: 1,
            ty: ExpressionType::Number,
            ignore_case: false,
        };
        let e = Expression::ref_("x", ExpressionType::Number).add(nested);
        assert_eq!(e.free_references(), vec!["x".to_string()]);
    }

    #[test]
    fn contains_aggregate_detects_sum() {
        let e = Expression::ref_("main", ExpressionType::Dataset)
            .sum(Expression::ref_("amount", ExpressionType::Number));
        assert!(e.contains_aggregate());
        assert!(!Expression::ref_("x", ExpressionType::Number).contains_aggregate());
    }

    #[test]
    fn contains_split_detects_resplit_pattern() {
        let inner_split = Expression::ref_("main", ExpressionType::Dataset).split(
            BTreeMap::from([("k".to_string(), Expression::ref_("k", ExpressionType::String))]),
            "data",
        );
        let resplit_agg = inner_split
            .apply("x", Expression::ref_("main", ExpressionType::Dataset).count())
            .max(Expression::ref_("x", ExpressionType::Number));
        assert!(resplit_agg.contains_split());
    }

    #[test]
    fn resolved_type_propagates_through_arithmetic() {
        let e = Expression::ref_("amount", ExpressionType::Number).add(Expression::number(1.0));
        assert_eq!(e.resolved_type(), ExpressionType::Number);
    }

    #[test]
    fn resolved_type_of_count_is_number() {
        assert_eq!(
            Expression::ref_("main", ExpressionType::Dataset)
                .count()
                .resolved_type(),
            ExpressionType::Number
        );
    }

    #[test]
    fn time_bucket_resolves_to_time() {
        let e = time_ref().time_bucket("P1D", "Etc/UTC");
        assert_eq!(e.resolved_type(), ExpressionType::Time);
    }
}
