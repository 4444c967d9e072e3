//! Request dispatch.
//!
//! Requests are routed by their `name` key: each registered name maps to one
//! handler. Request files may be JSON or YAML; both deserialize into the
//! same envelope.

use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::ExptDbError;
use crate::experiments::ExperimentRequest;
use crate::expt_metrics::ExptMetricRequest;
use crate::harvest::HarvestRequest;
use crate::metric_types::MetricTypeRequest;
use crate::models::DbActionResponse;
use crate::plot::PlotRequest;
use crate::regions::RegionRequest;

/// All registered request names.
pub const REQUEST_NAMES: &[&str] = &[
    "region",
    "metric_type",
    "experiment",
    "expt_metrics",
    "harvest_metrics",
    "plot_metrics",
];

/// Route a raw request value to its handler and execute it.
///
/// Validation failures raise to the caller; handler execution failures come
/// back as failure responses.
pub async fn dispatch(pool: &SqlitePool, value: &Value) -> Result<DbActionResponse, ExptDbError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or(ExptDbError::MissingField { field: "name" })?;
    info!("dispatching {} request", name);
    match name {
        "region" => Ok(RegionRequest::from_value(value)?.submit(pool).await),
        "metric_type" => Ok(MetricTypeRequest::from_value(value)?.submit(pool).await),
        "experiment" => Ok(ExperimentRequest::from_value(value)?.submit(pool).await),
        "expt_metrics" => Ok(ExptMetricRequest::from_value(value)?.submit(pool).await),
        "harvest_metrics" => Ok(HarvestRequest::from_value(value)?.submit(pool).await),
        "plot_metrics" => Ok(PlotRequest::from_value(value)?.submit(pool).await),
        other => Err(ExptDbError::UnknownRequest {
            name: other.to_string(),
        }),
    }
}

/// Load a request value from a JSON or YAML file, chosen by extension.
pub fn load_request(path: &Path) -> Result<Value, ExptDbError> {
    let contents = fs::read_to_string(path)?;
    match path.extension().and_then(OsStr::to_str) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
        _ => Ok(serde_json::from_str(&contents)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{region_put, test_pool};
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn unknown_request_name_is_a_lookup_error() {
        let pool = test_pool().await;
        let value = json!({"name": "recipe", "method": "GET"});
        assert!(matches!(
            dispatch(&pool, &value).await,
            Err(ExptDbError::UnknownRequest { name }) if name == "recipe"
        ));
    }

    #[tokio::test]
    async fn missing_name_is_rejected() {
        let pool = test_pool().await;
        let value = json!({"method": "GET"});
        assert!(matches!(
            dispatch(&pool, &value).await,
            Err(ExptDbError::MissingField { field: "name" })
        ));
    }

    #[tokio::test]
    async fn region_request_routes_to_its_handler() {
        let pool = test_pool().await;
        let value = region_put(json!([
            {"name": "global", "min_lat": -90.0, "max_lat": 90.0},
        ]));
        let response = dispatch(&pool, &value).await.unwrap();
        assert!(response.success);
        assert_eq!("Inserted 1 new region/s", response.message);
    }

    #[test]
    fn request_files_load_from_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("request.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(file, r#"{{"name": "region", "method": "GET"}}"#).unwrap();
        let value = load_request(&json_path).unwrap();
        assert_eq!("region", value["name"]);

        let yaml_path = dir.path().join("request.yaml");
        let mut file = std::fs::File::create(&yaml_path).unwrap();
        write!(file, "name: experiment\nmethod: GET\n").unwrap();
        let value = load_request(&yaml_path).unwrap();
        assert_eq!("experiment", value["name"]);
    }
}
