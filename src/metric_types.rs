//! Metric type registration and lookup.
//!
//! A metric type describes one kind of measurement (name, measurement type
//! and units, statistic). The (name, measurement_type, measurement_units,
//! stat_type) tuple is unique; a PUT for an existing tuple updates only the
//! description and reports UPDATE instead of INSERT.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, error};
use validator::Validate;

use crate::error::ExptDbError;
use crate::filters::{self, OrderTerm, Predicate};
use crate::models::{DbActionResponse, Method, PutAction, Request, ResponseDetails};
use crate::tables::{MetricTypeRow, METRIC_TYPE_COLUMNS};

/// Metric type data in a PUT request body.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct MetricTypeBody {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub measurement_type: String,
    pub measurement_units: Option<String>,
    pub stat_type: Option<String>,
    /// Free-form JSON description, stored serialized
    pub description: Option<Value>,
}

/// A validated metric type request.
#[derive(Clone, Debug)]
pub struct MetricTypeRequest {
    request: Value,
    method: Method,
    body: Option<MetricTypeBody>,
    predicates: Vec<Predicate>,
    ordering: Vec<OrderTerm>,
    limit: Option<i64>,
}

impl MetricTypeRequest {
    /// Validate a raw request value into a [MetricTypeRequest].
    pub fn from_value(value: &Value) -> Result<Self, ExptDbError> {
        let request = Request::from_value(value)?;
        let method = request.method()?;
        let params = request.params();
        let body = match method {
            Method::Put => {
                let body: MetricTypeBody =
                    serde_json::from_value(request.required_body()?.clone())?;
                body.validate()?;
                Some(body)
            }
            Method::Get => None,
        };
        let predicates = METRIC_TYPE_COLUMNS
            .build_filters(params.filters.as_ref(), params.datestr_format.as_deref())?;
        let ordering = METRIC_TYPE_COLUMNS.build_ordering(params.ordering.as_deref())?;
        Ok(Self {
            request: value.clone(),
            method,
            body,
            predicates,
            ordering,
            limit: params.effective_limit(),
        })
    }

    /// Execute the request, converting any failure into a failure response.
    pub async fn submit(&self, pool: &SqlitePool) -> DbActionResponse {
        let result = match self.method {
            Method::Get => self.get(pool).await,
            Method::Put => self.put(pool).await,
        };
        result.unwrap_or_else(|err| {
            error!("metric type request failed: {}", err);
            DbActionResponse::failed(self.request.clone(), "Failed metric type request", &err)
        })
    }

    async fn get(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, measurement_type, measurement_units, stat_type, \
             description, created_at, updated_at FROM metric_types WHERE 1 = 1",
        );
        filters::apply_filters(&mut builder, &self.predicates);
        filters::apply_ordering(&mut builder, &self.ordering);
        filters::apply_limit(&mut builder, self.limit);
        let rows = builder
            .build_query_as::<MetricTypeRow>()
            .fetch_all(pool)
            .await?;
        debug!("metric type request matched {} records", rows.len());
        let message = format!("Request returned {} record/s", rows.len());
        Ok(DbActionResponse::ok(
            self.request.clone(),
            &message,
            ResponseDetails::for_records(&rows)?,
        ))
    }

    async fn put(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        // from_value guarantees a body for PUT
        let body = self
            .body
            .as_ref()
            .ok_or(ExptDbError::MissingField { field: "body" })?;
        let description = body
            .description
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().naive_utc();
        let (id, updated_at): (i64, Option<chrono::NaiveDateTime>) = sqlx::query_as(
            "INSERT INTO metric_types \
             (name, measurement_type, measurement_units, stat_type, description, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, NULL) \
             ON CONFLICT (name, measurement_type, measurement_units, stat_type) \
             DO UPDATE SET description = excluded.description, updated_at = ? \
             RETURNING id, updated_at",
        )
        .bind(&body.name)
        .bind(&body.measurement_type)
        .bind(&body.measurement_units)
        .bind(&body.stat_type)
        .bind(&description)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;
        // The conflict branch stamps updated_at; a fresh insert leaves it NULL.
        let action = match updated_at {
            Some(_) => PutAction::Update,
            None => PutAction::Insert,
        };
        debug!("metric type {} record {}", action, id);
        let message = format!("Attempt to {} metric type record SUCCEEDED", action);
        Ok(DbActionResponse::ok(
            self.request.clone(),
            &message,
            ResponseDetails::for_action(action, id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{example_metric_type_body, metric_type_put, test_pool};
    use serde_json::json;

    #[tokio::test]
    async fn put_reports_insert_then_update() {
        let pool = test_pool().await;
        let value = metric_type_put(example_metric_type_body("temperature", "bias"));
        let request = MetricTypeRequest::from_value(&value).unwrap();

        let first = request.submit(&pool).await;
        assert!(first.success);
        let details = first.details.unwrap();
        assert_eq!(Some(PutAction::Insert), details.action);
        let id = details.id.unwrap();

        let second = request.submit(&pool).await;
        assert!(second.success);
        let details = second.details.unwrap();
        assert_eq!(Some(PutAction::Update), details.action);
        assert_eq!(Some(id), details.id);
    }

    #[tokio::test]
    async fn distinct_stat_types_insert_separately() {
        let pool = test_pool().await;
        for stat_type in ["bias", "rmsd"] {
            let value = metric_type_put(example_metric_type_body("temperature", stat_type));
            let response = MetricTypeRequest::from_value(&value)
                .unwrap()
                .submit(&pool)
                .await;
            assert_eq!(Some(PutAction::Insert), response.details.unwrap().action);
        }
    }

    #[tokio::test]
    async fn get_filters_on_stat_type() {
        let pool = test_pool().await;
        for stat_type in ["bias", "rmsd"] {
            let value = metric_type_put(example_metric_type_body("temperature", stat_type));
            MetricTypeRequest::from_value(&value).unwrap().submit(&pool).await;
        }

        let get = json!({
            "name": "metric_type",
            "method": "GET",
            "params": {"filters": {"stat_type": {"exact": "rmsd"}}}
        });
        let response = MetricTypeRequest::from_value(&get).unwrap().submit(&pool).await;
        assert!(response.success);
        let details = response.details.unwrap();
        assert_eq!(Some(1), details.record_count);
        assert_eq!("rmsd", details.records.unwrap()[0]["stat_type"]);
    }

    #[tokio::test]
    async fn empty_name_fails_validation() {
        let value = metric_type_put(json!({
            "name": "",
            "measurement_type": "innov_stats"
        }));
        let result = MetricTypeRequest::from_value(&value);
        assert!(matches!(result, Err(ExptDbError::Validation(_))));
    }
}
