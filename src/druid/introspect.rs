//! Schema introspection: issues a `segmentMetadata` query and
//! interprets the response into [`AttributeInfo`]s, optionally following up
//! with a `timeBoundary` query to fill in the time column's range.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PlanError, PlanResult};
use crate::expr::ExpressionType;
use crate::types::{AttributeInfo, AttributeMaker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectionDepth {
    Shallow,
    Medium,
    Deep,
}

impl IntrospectionDepth {
    fn analysis_types(self) -> Vec<&'static str> {
        let mut types = vec!["aggregators"];
        if self == IntrospectionDepth::Deep {
            types.push("cardinality");
            types.push("minmax");
        }
        types
    }
}

/// A transport-agnostic capability that issues a query document and
/// returns its response as a single JSON value. Real transports stream
/// rows for data queries; introspection queries are small and
/// answered as one document.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn request(&self, query: &Value) -> PlanResult<Value>;
}

/// Run segment-metadata introspection against `source`, returning the
/// inferred schema. Swallows failure of the deep-mode `timeBoundary`
/// follow-up — a missing range is left as `None` rather than
/// failing the whole call.
pub async fn introspect(
    requester: &dyn Requester,
    source: &str,
    depth: IntrospectionDepth,
) -> PlanResult<Vec<AttributeInfo>> {
    let query = serde_json::json!({
        "queryType": "segmentMetadata",
        "dataSource": source,
        "analysisTypes": depth.analysis_types(),
        "merge": true,
    });
    let response = requester.request(&query).await?;
    let mut attributes = interpret_segment_metadata(&response)?;

    if depth == IntrospectionDepth::Deep {
        if let Some(time_attr) = attributes.iter_mut().find(|a| a.ty == ExpressionType::Time) {
            if time_attr.range.is_none() {
                if let Ok(range) = fetch_time_boundary(requester, source).await {
                    time_attr.range = Some(range);
                }
            }
        }
    }

    Ok(attributes)
}

async fn fetch_time_boundary(requester: &dyn Requester, source: &str) -> PlanResult<(String, String)> {
    let query = serde_json::json!({ "queryType": "timeBoundary", "dataSource": source });
    let response = requester.request(&query).await?;
    let row = response
        .as_array()
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("result"))
        .ok_or_else(|| PlanError::invalid_result("timeBoundary follow-up response missing result"))?;
    let min = row
        .get("minTime")
        .and_then(Value::as_str)
        .ok_or_else(|| PlanError::invalid_result("timeBoundary response missing minTime"))?;
    let max = row
        .get("maxTime")
        .and_then(Value::as_str)
        .ok_or_else(|| PlanError::invalid_result("timeBoundary response missing maxTime"))?;
    Ok((min.to_string(), max.to_string()))
}

fn interpret_segment_metadata(response: &Value) -> PlanResult<Vec<AttributeInfo>> {
    let report = response
        .as_array()
        .and_then(|rows| rows.first())
        .ok_or_else(|| PlanError::invalid_result("segmentMetadata response is not a non-empty array"))?;
    let columns = report
        .get("columns")
        .and_then(Value::as_object)
        .ok_or_else(|| PlanError::invalid_result("segmentMetadata response missing `columns`"))?;
    let aggregators = report.get("aggregators").and_then(Value::as_object);

    let mut attributes = Vec::new();
    let mut found_time = false;

    for (name, column) in columns {
        let native_type = column.get("type").and_then(Value::as_str).unwrap_or("STRING").to_string();
        let has_multiple_values = column
            .get("hasMultipleValues")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let attribute = if name == "__time" {
            found_time = true;
            let range = column_range(column);
            AttributeInfo {
                name: name.clone(),
                ty: ExpressionType::Time,
                native_type: "__time".to_string(),
                unsplitable: false,
                maker: None,
                cardinality: None,
                range,
            }
        } else if native_type.eq_ignore_ascii_case("STRING") {
            let ty = if has_multiple_values {
                ExpressionType::set_of(ExpressionType::String)
            } else {
                ExpressionType::String
            };
            AttributeInfo {
                name: name.clone(),
                ty,
                native_type,
                unsplitable: false,
                maker: None,
                cardinality: column.get("cardinality").and_then(Value::as_u64),
                range: None,
            }
        } else if matches!(native_type.to_ascii_uppercase().as_str(), "LONG" | "FLOAT" | "DOUBLE") {
            let maker = aggregators
                .and_then(|a| a.get(name))
                .and_then(|spec| infer_maker(spec, name));
            AttributeInfo {
                name: name.clone(),
                ty: ExpressionType::Number,
                native_type,
                unsplitable: false,
                maker,
                cardinality: None,
                range: None,
            }
        } else {
            // Opaque sketches / hyperUnique / approximateHistogram: no
            // scalar representation, and never usable as a split key.
            AttributeInfo {
                name: name.clone(),
                ty: ExpressionType::Null,
                native_type,
                unsplitable: true,
                maker: None,
                cardinality: None,
                range: None,
            }
        };
        attributes.push(attribute);
    }

    if !found_time {
        return Err(PlanError::invalid_result(
            "segmentMetadata response has no __time column",
        ));
    }

    Ok(attributes)
}

fn column_range(column: &Value) -> Option<(String, String)> {
    let min = column.get("minValue").and_then(Value::as_str)?;
    let max = column.get("maxValue").and_then(Value::as_str)?;
    Some((min.to_string(), max.to_string()))
}

fn infer_maker(spec: &Value, field_name: &str) -> Option<AttributeMaker> {
    let ty = spec.get("type").and_then(Value::as_str)?;
    match ty {
        "longSum" if spec.get("fieldName").and_then(Value::as_str) == Some(field_name) => Some(AttributeMaker::Count),
        "longSum" | "doubleSum" => Some(AttributeMaker::Sum),
        "longMin" | "doubleMin" => Some(AttributeMaker::Min),
        "longMax" | "doubleMax" => Some(AttributeMaker::Max),
        "javascript" => {
            // An identity-combiner javascript aggregator behaves like sum
            // across segments.
            Some(AttributeMaker::Sum)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeRequester(Value);

    #[async_trait]
    impl Requester for FakeRequester {
        async fn request(&self, _query: &Value) -> PlanResult<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn introspection_parses_time_string_and_numeric_columns() {
        let response = json!([{
            "columns": {
                "__time": { "type": "LONG" },
                "country": { "type": "STRING", "hasMultipleValues": false },
                "count": { "type": "LONG" },
            },
            "aggregators": {
                "count": { "type": "longSum", "fieldName": "count" },
            },
        }]);
        let requester = FakeRequester(response);
        let attrs = introspect(&requester, "wiki", IntrospectionDepth::Shallow).await.unwrap();
        assert_eq!(attrs.len(), 3);
        let time_attr = attrs.iter().find(|a| a.name == "__time").unwrap();
        assert_eq!(time_attr.ty, ExpressionType::Time);
        let count_attr = attrs.iter().find(|a| a.name == "count").unwrap();
        assert_eq!(count_attr.maker, Some(AttributeMaker::Count));
    }

    #[tokio::test]
    async fn missing_time_column_fails() {
        let response = json!([{ "columns": { "country": { "type": "STRING" } } }]);
        let requester = FakeRequester(response);
        assert!(introspect(&requester, "wiki", IntrospectionDepth::Shallow).await.is_err());
    }

    #[tokio::test]
    async fn opaque_sketch_columns_are_unsplitable() {
        let response = json!([{
            "columns": {
                "__time": { "type": "LONG" },
                "hll": { "type": "hyperUnique" },
            },
        }]);
        let requester = FakeRequester(response);
        let attrs = introspect(&requester, "wiki", IntrospectionDepth::Shallow).await.unwrap();
        let hll = attrs.iter().find(|a| a.name == "hll").unwrap();
        assert!(hll.unsplitable);
        assert_eq!(hll.ty, ExpressionType::Null);
    }
}
