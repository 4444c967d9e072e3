//! Experiment registration and lookup.
//!
//! An experiment run is identified by (name, wallclock_start). A PUT for an
//! existing run updates its wallclock_end and reports UPDATE; otherwise the
//! full record is inserted. Date fields in the body are parsed with the
//! body's `datestr_format`, with absent and literal `"None"` values
//! defaulting to the epoch.

use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, error};
use validator::Validate;

use crate::datetime;
use crate::error::ExptDbError;
use crate::filters::{self, OrderTerm, Predicate};
use crate::models::{DbActionResponse, Method, PutAction, Request, ResponseDetails};
use crate::tables::{ExperimentRow, EXPERIMENT_COLUMNS};

/// Compute platforms an experiment may be registered against.
pub const VALID_PLATFORMS: &[&str] =
    &["hera", "orion", "pw_azv1", "pw_azv2", "pw_awv1", "pw_awv2"];

#[derive(Debug, Deserialize, Validate)]
struct ExperimentBody {
    #[validate(length(min = 1))]
    name: String,
    datestr_format: Option<String>,
    cycle_start: Option<String>,
    cycle_stop: Option<String>,
    #[validate(length(min = 1))]
    owner_id: String,
    group_id: Option<String>,
    experiment_type: Option<String>,
    platform: String,
    wallclock_start: Option<String>,
    wallclock_end: Option<String>,
    description: Option<Value>,
}

/// A validated experiment registration.
#[derive(Clone, Debug, PartialEq)]
pub struct Experiment {
    pub name: String,
    pub cycle_start: NaiveDateTime,
    pub cycle_stop: NaiveDateTime,
    pub owner_id: String,
    pub group_id: Option<String>,
    pub experiment_type: Option<String>,
    pub platform: String,
    pub wallclock_start: NaiveDateTime,
    pub wallclock_end: NaiveDateTime,
    /// Free-form JSON description, stored serialized
    pub description: Option<String>,
}

impl Experiment {
    /// Validate a PUT body into an [Experiment].
    pub fn from_body(body: &Value) -> Result<Self, ExptDbError> {
        let body: ExperimentBody = serde_json::from_value(body.clone())?;
        body.validate()?;
        let format = body.datestr_format.as_deref();
        let cycle_start = datetime::parse_datetime_or_epoch(body.cycle_start.as_deref(), format)?;
        let cycle_stop = datetime::parse_datetime_or_epoch(body.cycle_stop.as_deref(), format)?;
        let wallclock_start =
            datetime::parse_datetime_or_epoch(body.wallclock_start.as_deref(), format)?;
        let wallclock_end =
            datetime::parse_datetime_or_epoch(body.wallclock_end.as_deref(), format)?;
        if cycle_start > cycle_stop {
            return Err(ExptDbError::InvalidCycleWindow {
                start: cycle_start,
                stop: cycle_stop,
            });
        }
        if !VALID_PLATFORMS.contains(&body.platform.as_str()) {
            return Err(ExptDbError::InvalidPlatform {
                platform: body.platform,
                allowed: VALID_PLATFORMS,
            });
        }
        let description = body
            .description
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(Self {
            name: body.name,
            cycle_start,
            cycle_stop,
            owner_id: body.owner_id,
            group_id: body.group_id,
            experiment_type: body.experiment_type,
            platform: body.platform,
            wallclock_start,
            wallclock_end,
            description,
        })
    }
}

/// A validated experiment request.
#[derive(Clone, Debug)]
pub struct ExperimentRequest {
    request: Value,
    method: Method,
    experiment: Option<Experiment>,
    predicates: Vec<Predicate>,
    ordering: Vec<OrderTerm>,
    limit: Option<i64>,
}

impl ExperimentRequest {
    /// Validate a raw request value into an [ExperimentRequest].
    pub fn from_value(value: &Value) -> Result<Self, ExptDbError> {
        let request = Request::from_value(value)?;
        let method = request.method()?;
        let params = request.params();
        let experiment = match method {
            Method::Put => Some(Experiment::from_body(request.required_body()?)?),
            Method::Get => None,
        };
        let predicates = EXPERIMENT_COLUMNS
            .build_filters(params.filters.as_ref(), params.datestr_format.as_deref())?;
        let ordering = EXPERIMENT_COLUMNS.build_ordering(params.ordering.as_deref())?;
        Ok(Self {
            request: value.clone(),
            method,
            experiment,
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
            error!("experiment request failed: {}", err);
            DbActionResponse::failed(self.request.clone(), "Failed experiment request", &err)
        })
    }

    async fn get(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, cycle_start, cycle_stop, owner_id, group_id, \
             experiment_type, platform, wallclock_start, wallclock_end, \
             description, created_at, updated_at FROM experiments WHERE 1 = 1",
        );
        filters::apply_filters(&mut builder, &self.predicates);
        filters::apply_ordering(&mut builder, &self.ordering);
        filters::apply_limit(&mut builder, self.limit);
        let rows = builder
            .build_query_as::<ExperimentRow>()
            .fetch_all(pool)
            .await?;
        debug!("experiment request matched {} records", rows.len());
        let message = format!("Request returned {} record/s", rows.len());
        Ok(DbActionResponse::ok(
            self.request.clone(),
            &message,
            ResponseDetails::for_records(&rows)?,
        ))
    }

    async fn put(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        // from_value guarantees an experiment for PUT
        let experiment = self
            .experiment
            .as_ref()
            .ok_or(ExptDbError::MissingField { field: "body" })?;
        let now = Utc::now().naive_utc();
        let (id, updated_at): (i64, Option<NaiveDateTime>) = sqlx::query_as(
            "INSERT INTO experiments \
             (name, cycle_start, cycle_stop, owner_id, group_id, experiment_type, \
              platform, wallclock_start, wallclock_end, description, created_at, \
              updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL) \
             ON CONFLICT (name, wallclock_start) \
             DO UPDATE SET wallclock_end = excluded.wallclock_end, updated_at = ? \
             RETURNING id, updated_at",
        )
        .bind(&experiment.name)
        .bind(experiment.cycle_start)
        .bind(experiment.cycle_stop)
        .bind(&experiment.owner_id)
        .bind(&experiment.group_id)
        .bind(&experiment.experiment_type)
        .bind(&experiment.platform)
        .bind(experiment.wallclock_start)
        .bind(experiment.wallclock_end)
        .bind(&experiment.description)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;
        // The conflict branch stamps updated_at; a fresh insert leaves it NULL.
        let action = match updated_at {
            Some(_) => PutAction::Update,
            None => PutAction::Insert,
        };
        debug!("experiment {} record {}", action, id);
        let message = format!("Attempt to {} experiment record SUCCEEDED", action);
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
    use crate::test_utils::{example_experiment_body, experiment_put, test_pool};
    use serde_json::json;

    #[test]
    fn missing_dates_default_to_epoch() {
        let experiment = Experiment::from_body(&json!({
            "name": "C96L64.UFSRNR.GSI_3DVAR.012016",
            "owner_id": "first.last@noaa.gov",
            "platform": "hera"
        }))
        .unwrap();
        assert_eq!(datetime::epoch(), experiment.cycle_start);
        assert_eq!(datetime::epoch(), experiment.wallclock_end);
    }

    #[test]
    fn inverted_cycle_window_is_rejected() {
        let mut body = example_experiment_body("expt", "2021-07-22 09:22:05");
        body["cycle_start"] = json!("2016-02-01 00:00:00");
        let result = Experiment::from_body(&body);
        assert!(matches!(
            result,
            Err(ExptDbError::InvalidCycleWindow { start: _, stop: _ })
        ));
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let mut body = example_experiment_body("expt", "2021-07-22 09:22:05");
        body["platform"] = json!("cheyenne");
        let result = Experiment::from_body(&body);
        assert!(matches!(
            result,
            Err(ExptDbError::InvalidPlatform {
                platform: _,
                allowed: _
            })
        ));
    }

    #[tokio::test]
    async fn put_reports_insert_then_update() {
        let pool = test_pool().await;
        let value = experiment_put(example_experiment_body("expt", "2021-07-22 09:22:05"));
        let request = ExperimentRequest::from_value(&value).unwrap();

        let first = request.submit(&pool).await;
        assert!(first.success);
        assert_eq!("Attempt to INSERT experiment record SUCCEEDED", first.message);
        let id = first.details.unwrap().id.unwrap();

        let second = request.submit(&pool).await;
        assert!(second.success);
        assert_eq!("Attempt to UPDATE experiment record SUCCEEDED", second.message);
        assert_eq!(Some(id), second.details.unwrap().id);
    }

    #[tokio::test]
    async fn invalid_body_fails_before_any_write() {
        let pool = test_pool().await;
        let mut body = example_experiment_body("expt", "2021-07-22 09:22:05");
        body["cycle_start"] = json!("2016-02-01 00:00:00");
        let value = experiment_put(body);
        assert!(ExperimentRequest::from_value(&value).is_err());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM experiments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(0, count.0);
    }

    #[tokio::test]
    async fn asc_and_desc_orderings_are_inverse() {
        let pool = test_pool().await;
        for (name, wallclock_start) in [
            ("expt_b", "2021-07-22 09:22:05"),
            ("expt_c", "2022-01-14 06:23:41"),
            ("expt_a", "2022-08-03 12:01:44"),
        ] {
            let value = experiment_put(example_experiment_body(name, wallclock_start));
            ExperimentRequest::from_value(&value)
                .unwrap()
                .submit(&pool)
                .await;
        }

        async fn ordered_names(pool: &SqlitePool, direction: &str) -> Vec<String> {
            let get = json!({
                "name": "experiment",
                "method": "GET",
                "params": {"ordering": [{"name": "name", "order_by": direction}]}
            });
            let response = ExperimentRequest::from_value(&get)
                .unwrap()
                .submit(pool)
                .await;
            assert!(response.success);
            let records = response.details.unwrap().records.unwrap();
            records
                .as_array()
                .unwrap()
                .iter()
                .map(|record| record["name"].as_str().unwrap().to_string())
                .collect()
        }

        let ascending = ordered_names(&pool, "asc").await;
        assert_eq!(vec!["expt_a", "expt_b", "expt_c"], ascending);
        let mut descending = ordered_names(&pool, "desc").await;
        descending.reverse();
        assert_eq!(ascending, descending);
    }

    #[tokio::test]
    async fn get_filters_on_name_and_time() {
        let pool = test_pool().await;
        for (name, wallclock_start) in [
            ("expt_one", "2021-07-22 09:22:05"),
            ("expt_two", "2022-01-14 06:23:41"),
        ] {
            let value = experiment_put(example_experiment_body(name, wallclock_start));
            ExperimentRequest::from_value(&value)
                .unwrap()
                .submit(&pool)
                .await;
        }

        let get = json!({
            "name": "experiment",
            "method": "GET",
            "params": {
                "filters": {
                    "name": {"like": "%_two"},
                    "wallclock_start": {"from": "2022-01-01 00:00:00"}
                },
                "ordering": [{"name": "name", "order_by": "asc"}],
                "record_limit": 10
            }
        });
        let response = ExperimentRequest::from_value(&get)
            .unwrap()
            .submit(&pool)
            .await;
        assert!(response.success);
        let details = response.details.unwrap();
        assert_eq!(Some(1), details.record_count);
        assert_eq!("expt_two", details.records.unwrap()[0]["name"]);
    }
}
