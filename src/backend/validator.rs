//! JSON Schema validator.

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;

use super::schema::grafana_dashboard_schema;
use super::{BackendError, ValidationIssue, ValidationReport, Validator};

/// Validates documents against a compiled JSON Schema and reports every
/// violation, not just the first.
pub struct SchemaValidator {
    schema: JSONSchema,
}

impl SchemaValidator {
    pub fn new(schema: &Value) -> Result<Self, BackendError> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| BackendError::Misconfigured(format!("invalid schema: {}", e)))?;
        Ok(Self { schema: compiled })
    }

    /// Validator for Grafana dashboards.
    pub fn grafana() -> Result<Self, BackendError> {
        Self::new(&grafana_dashboard_schema())
    }

    pub fn check(&self, document: &Value) -> ValidationReport {
        match self.schema.validate(document) {
            Ok(()) => ValidationReport::valid(),
            Err(errors) => ValidationReport::invalid(
                errors
                    .map(|error| {
                        let pointer = error.instance_path.to_string();
                        let location = if pointer.is_empty() {
                            "root".to_string()
                        } else {
                            pointer
                        };
                        ValidationIssue::new(location, error.to_string())
                    })
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl Validator for SchemaValidator {
    async fn validate(&self, document: &Value) -> Result<ValidationReport, BackendError> {
        let report = self.check(document);
        if !report.valid {
            tracing::debug!("Document failed validation with {} errors", report.errors.len());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::grafana().unwrap()
    }

    #[test]
    fn test_valid_dashboard() {
        let document = json!({
            "title": "Node health",
            "panels": [{
                "id": 1,
                "type": "timeseries",
                "title": "CPU",
                "gridPos": {"h": 8, "w": 12, "x": 0, "y": 0},
                "datasource": {"type": "prometheus", "uid": "prom"},
                "targets": [{"refId": "A", "expr": "rate(node_cpu_seconds_total[5m])"}]
            }]
        });
        let report = validator().check(&document);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_missing_title_is_reported_at_root() {
        let report = validator().check(&json!({"panels": []}));
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].location, "root");
        assert!(report.errors[0].message.contains("title"));
    }

    #[test]
    fn test_reports_every_violation_with_pointer() {
        let document = json!({
            "title": "Broken",
            "panels": [
                {"id": "one", "type": "graph", "title": "A"},
                {"id": 2, "type": "sparkline", "title": "B", "gridPos": {"h": 8, "w": 12, "x": 0}}
            ]
        });
        let report = validator().check(&document);
        assert!(!report.valid);
        let locations: Vec<&str> = report.errors.iter().map(|e| e.location.as_str()).collect();
        assert!(locations.contains(&"/panels/0/id"));
        assert!(locations.contains(&"/panels/1/type"));
        assert!(locations.contains(&"/panels/1/gridPos"));
        assert_eq!(report.errors.len(), 3);
    }

    #[tokio::test]
    async fn test_non_object_document_is_invalid_not_an_error() {
        let report = validator().validate(&json!("dashboard")).await.unwrap();
        assert!(!report.valid);
    }
}
