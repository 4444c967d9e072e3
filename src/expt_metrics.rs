//! Experiment metric storage and retrieval.
//!
//! Metric observations reference an experiment, a metric type and a region.
//! A GET joins all three parents and accepts composite filters addressing
//! them through `experiment`, `metric_types` and `regions` sub-maps; output
//! columns use renamed keys (`expt_name`, `metric_type`, `region`) to avoid
//! collisions. Re-harvested rows are reconciled at read time: of the rows
//! sharing a natural observation key, only the most recently created one is
//! returned. A PUT resolves its owning experiment and all referenced region
//! and metric type names before inserting anything, and stores all rows in
//! one transaction.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, error};

use crate::datetime;
use crate::error::ExptDbError;
use crate::filters::{self, OrderTerm, Predicate};
use crate::models::{DbActionResponse, Method, Request, ResponseDetails};
use crate::tables::{
    ExptMetricRecord, EXPT_METRIC_COLUMNS, EXPT_METRIC_ORDER_COLUMNS, METRIC_EXPERIMENT_COLUMNS,
    METRIC_REGION_COLUMNS, METRIC_TYPE_SUB_COLUMNS,
};

const FAILED_MESSAGE: &str = "Failed experiment metrics request";

const SELECT_METRICS: &str = "\
SELECT m.id, mt.name AS name, m.elevation, m.elevation_unit, m.value, \
 m.time_valid, e.id AS expt_id, e.name AS expt_name, e.wallclock_start, \
 mt.id AS metric_id, mt.measurement_type AS metric_type, \
 mt.measurement_units AS metric_unit, mt.stat_type AS metric_stat_type, \
 r.id AS region_id, r.name AS region, m.created_at \
FROM expt_metrics m \
JOIN experiments e ON e.id = m.experiment_id \
JOIN metric_types mt ON mt.id = m.metric_type_id \
JOIN regions r ON r.id = m.region_id \
WHERE 1 = 1";

/// One metric observation to store, with its parents referenced by name.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExptMetricInputData {
    /// Metric type name
    pub name: String,
    pub region_name: String,
    pub elevation: f64,
    pub elevation_unit: Option<String>,
    pub value: Option<f64>,
    pub time_valid: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct RawMetric {
    name: String,
    region_name: String,
    elevation: f64,
    elevation_unit: Option<String>,
    value: Option<f64>,
    time_valid: String,
}

#[derive(Debug, Deserialize)]
struct MetricsBody {
    expt_name: String,
    expt_wallclock_start: String,
    datestr_format: Option<String>,
    metrics: Vec<RawMetric>,
}

#[derive(Clone, Debug)]
struct MetricsPut {
    expt_name: String,
    wallclock_start_raw: String,
    wallclock_start: NaiveDateTime,
    metrics: Vec<ExptMetricInputData>,
}

/// A validated experiment metrics request.
#[derive(Clone, Debug)]
pub struct ExptMetricRequest {
    request: Value,
    method: Method,
    predicates: Vec<Predicate>,
    ordering: Vec<OrderTerm>,
    limit: Option<i64>,
    put_data: Option<MetricsPut>,
}

impl ExptMetricRequest {
    /// Validate a raw request value into an [ExptMetricRequest].
    pub fn from_value(value: &Value) -> Result<Self, ExptDbError> {
        let request = Request::from_value(value)?;
        let method = request.method()?;
        let params = request.params();
        let format = params.datestr_format.as_deref();

        let put_data = match method {
            Method::Put => {
                let body: MetricsBody =
                    serde_json::from_value(request.required_body()?.clone())?;
                let format = body.datestr_format.as_deref();
                let wallclock_start =
                    datetime::parse_datetime(&body.expt_wallclock_start, format)?;
                let metrics = body
                    .metrics
                    .into_iter()
                    .map(|raw| {
                        Ok(ExptMetricInputData {
                            name: raw.name,
                            region_name: raw.region_name,
                            elevation: raw.elevation,
                            elevation_unit: raw.elevation_unit,
                            value: raw.value,
                            time_valid: datetime::parse_datetime(&raw.time_valid, format)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ExptDbError>>()?;
                Some(MetricsPut {
                    expt_name: body.expt_name,
                    wallclock_start_raw: body.expt_wallclock_start,
                    wallclock_start,
                    metrics,
                })
            }
            Method::Get => None,
        };

        let filters = params.filters.as_ref();
        let mut predicates =
            METRIC_EXPERIMENT_COLUMNS.build_filters(sub_filters(filters, "experiment"), format)?;
        predicates.extend(
            METRIC_TYPE_SUB_COLUMNS.build_filters(sub_filters(filters, "metric_types"), format)?,
        );
        predicates
            .extend(METRIC_REGION_COLUMNS.build_filters(sub_filters(filters, "regions"), format)?);
        predicates.extend(EXPT_METRIC_COLUMNS.build_filters(filters, format)?);
        let ordering = EXPT_METRIC_ORDER_COLUMNS.build_ordering(params.ordering.as_deref())?;

        Ok(Self {
            request: value.clone(),
            method,
            predicates,
            ordering,
            limit: params.effective_limit(),
            put_data,
        })
    }

    /// Build a PUT request directly from harvested input data.
    pub fn from_input(
        expt_name: &str,
        expt_wallclock_start: &str,
        datestr_format: Option<&str>,
        metrics: Vec<ExptMetricInputData>,
    ) -> Result<Self, ExptDbError> {
        let wallclock_start = datetime::parse_datetime(expt_wallclock_start, datestr_format)?;
        let request = json!({
            "name": "expt_metrics",
            "method": "PUT",
            "body": {
                "expt_name": expt_name,
                "expt_wallclock_start": expt_wallclock_start,
                "datestr_format": datestr_format,
                "metrics": serde_json::to_value(&metrics)?,
            }
        });
        Ok(Self {
            request,
            method: Method::Put,
            predicates: vec![],
            ordering: vec![],
            limit: None,
            put_data: Some(MetricsPut {
                expt_name: expt_name.to_string(),
                wallclock_start_raw: expt_wallclock_start.to_string(),
                wallclock_start,
                metrics,
            }),
        })
    }

    /// Execute the request, converting any failure into a failure response.
    pub async fn submit(&self, pool: &SqlitePool) -> DbActionResponse {
        let result = match self.method {
            Method::Get => self.get(pool).await,
            Method::Put => self.put(pool).await,
        };
        result.unwrap_or_else(|err| {
            error!("experiment metrics request failed: {}", err);
            DbActionResponse::failed(self.request.clone(), FAILED_MESSAGE, &err)
        })
    }

    /// Run the joined metrics query and return deduplicated typed rows.
    pub async fn query(&self, pool: &SqlitePool) -> Result<Vec<ExptMetricRecord>, ExptDbError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_METRICS);
        filters::apply_filters(&mut builder, &self.predicates);
        filters::apply_ordering(&mut builder, &self.ordering);
        filters::apply_limit(&mut builder, self.limit);
        let rows = builder
            .build_query_as::<ExptMetricRecord>()
            .fetch_all(pool)
            .await?;
        debug!("metrics query matched {} records before dedup", rows.len());
        Ok(remove_duplicates(rows))
    }

    async fn get(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        let rows = self.query(pool).await?;
        Ok(DbActionResponse::ok(
            self.request.clone(),
            "Request for experiment metrics SUCCEEDED",
            ResponseDetails::for_records(&rows)?,
        ))
    }

    async fn put(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        // from_value guarantees put data for PUT
        let put_data = self
            .put_data
            .as_ref()
            .ok_or(ExptDbError::MissingField { field: "body" })?;
        let expt_id = resolve_experiment(pool, put_data).await?;
        let region_ids = resolve_regions(pool, &put_data.metrics).await?;
        let metric_type_ids = resolve_metric_types(pool, &put_data.metrics).await?;

        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await?;
        for metric in &put_data.metrics {
            // resolve_* guarantee membership for every referenced name
            let region_id = region_ids
                .get(&metric.region_name)
                .ok_or_else(|| ExptDbError::UnresolvedRegions {
                    names: vec![metric.region_name.clone()],
                })?;
            let metric_type_id = metric_type_ids.get(&metric.name).ok_or_else(|| {
                ExptDbError::UnresolvedMetricTypes {
                    names: vec![metric.name.clone()],
                }
            })?;
            let value = metric.value.filter(|value| !value.is_nan());
            sqlx::query(
                "INSERT INTO expt_metrics \
                 (experiment_id, metric_type_id, region_id, elevation, \
                  elevation_unit, value, time_valid, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(expt_id)
            .bind(metric_type_id)
            .bind(region_id)
            .bind(metric.elevation)
            .bind(&metric.elevation_unit)
            .bind(value)
            .bind(metric.time_valid)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            "inserted {} metric records for experiment {}",
            put_data.metrics.len(),
            put_data.expt_name
        );
        let message = format!(
            "Inserted {} experiment metric record/s",
            put_data.metrics.len()
        );
        let details = ResponseDetails {
            record_count: Some(put_data.metrics.len()),
            ..Default::default()
        };
        Ok(DbActionResponse::ok(self.request.clone(), &message, details))
    }
}

fn sub_filters<'a>(
    filters: Option<&'a serde_json::Map<String, Value>>,
    key: &str,
) -> Option<&'a serde_json::Map<String, Value>> {
    filters
        .and_then(|filters| filters.get(key))
        .and_then(Value::as_object)
}

async fn resolve_experiment(pool: &SqlitePool, put_data: &MetricsPut) -> Result<i64, ExptDbError> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT id FROM experiments WHERE name = ? AND wallclock_start = ?")
            .bind(&put_data.expt_name)
            .bind(put_data.wallclock_start)
            .fetch_all(pool)
            .await?;
    match rows.len() {
        0 => Err(ExptDbError::ExperimentNotFound {
            name: put_data.expt_name.clone(),
            wallclock_start: put_data.wallclock_start_raw.clone(),
        }),
        1 => Ok(rows[0].0),
        count => Err(ExptDbError::AmbiguousExperiment {
            name: put_data.expt_name.clone(),
            count,
        }),
    }
}

async fn resolve_names(
    pool: &SqlitePool,
    table: &str,
    names: &HashSet<String>,
) -> Result<HashMap<String, i64>, ExptDbError> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT id, name FROM {table} WHERE name IN ("));
    let mut separated = builder.separated(", ");
    for name in names {
        separated.push_bind(name.clone());
    }
    builder.push(") ORDER BY id");
    let rows: Vec<(i64, String)> = builder.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(id, name)| (name, id)).collect())
}

async fn resolve_regions(
    pool: &SqlitePool,
    metrics: &[ExptMetricInputData],
) -> Result<HashMap<String, i64>, ExptDbError> {
    let names: HashSet<String> = metrics
        .iter()
        .map(|metric| metric.region_name.clone())
        .collect();
    let resolved = resolve_names(pool, "regions", &names).await?;
    let mut missing: Vec<String> = names
        .into_iter()
        .filter(|name| !resolved.contains_key(name))
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(ExptDbError::UnresolvedRegions { names: missing });
    }
    Ok(resolved)
}

async fn resolve_metric_types(
    pool: &SqlitePool,
    metrics: &[ExptMetricInputData],
) -> Result<HashMap<String, i64>, ExptDbError> {
    let names: HashSet<String> = metrics.iter().map(|metric| metric.name.clone()).collect();
    let resolved = resolve_names(pool, "metric_types", &names).await?;
    let mut missing: Vec<String> = names
        .into_iter()
        .filter(|name| !resolved.contains_key(name))
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(ExptDbError::UnresolvedMetricTypes { names: missing });
    }
    Ok(resolved)
}

type NaturalKey = (String, u64, Option<String>, NaiveDateTime, i64, i64, i64);

fn natural_key(row: &ExptMetricRecord) -> NaturalKey {
    (
        row.name.clone(),
        row.elevation.to_bits(),
        row.elevation_unit.clone(),
        row.time_valid,
        row.expt_id,
        row.metric_id,
        row.region_id,
    )
}

/// Keep only the most recently created row per natural observation key.
/// Rows come back ordered by creation time, matching how re-harvested data
/// supersedes older runs.
fn remove_duplicates(mut rows: Vec<ExptMetricRecord>) -> Vec<ExptMetricRecord> {
    rows.sort_by_key(|row| row.created_at);
    let mut last_position: HashMap<NaturalKey, usize> = HashMap::new();
    for (position, row) in rows.iter().enumerate() {
        last_position.insert(natural_key(row), position);
    }
    rows.into_iter()
        .enumerate()
        .filter(|(position, row)| last_position[&natural_key(row)] == *position)
        .map(|(_, row)| row)
        .collect()
}
