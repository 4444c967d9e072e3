//! Utilities for use in test code.

use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::db;

/// Return an initialized in-memory database pool.
pub async fn test_pool() -> SqlitePool {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    db::init_schema(&pool).await.unwrap();
    pool
}

/// Return a region PUT request for the given region data list.
pub fn region_put(regions: Value) -> Value {
    json!({
        "name": "region",
        "method": "PUT",
        "body": {"regions": regions}
    })
}

/// Return a metric type PUT request for the given body.
pub fn metric_type_put(body: Value) -> Value {
    json!({
        "name": "metric_type",
        "method": "PUT",
        "body": body
    })
}

/// Return an experiment PUT request for the given body.
pub fn experiment_put(body: Value) -> Value {
    json!({
        "name": "experiment",
        "method": "PUT",
        "body": body
    })
}

/// Return a canned experiment registration body.
pub fn example_experiment_body(name: &str, wallclock_start: &str) -> Value {
    json!({
        "name": name,
        "datestr_format": "%Y-%m-%d %H:%M:%S",
        "cycle_start": "2016-01-01 00:00:00",
        "cycle_stop": "2016-01-31 18:00:00",
        "owner_id": "first.last@noaa.gov",
        "group_id": "gsienkf",
        "experiment_type": "C96L64.UFSRNR.GSI_3DVAR.012016",
        "platform": "pw_awv1",
        "wallclock_start": wallclock_start,
        "wallclock_end": "None",
        "description": {"unstructured": true}
    })
}

/// Return a canned metric type registration body.
pub fn example_metric_type_body(name: &str, stat_type: &str) -> Value {
    json!({
        "name": name,
        "measurement_type": "innov_stats",
        "measurement_units": "K",
        "stat_type": stat_type,
        "description": {"obs_type": "conventional"}
    })
}
