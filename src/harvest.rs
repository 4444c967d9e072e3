//! Harvest pipeline.
//!
//! A harvest request walks a date range at a fixed six-hour cycle step. At
//! each cycle it considers every configured file template, skips those whose
//! `cycles` list does not include the cycle's offset from midnight, runs the
//! named harvester on the resolved file and stores the observations through
//! the experiment metrics PUT path. The first failed store fails the whole
//! request.

use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::datetime::{self, DateRange};
use crate::error::ExptDbError;
use crate::expt_metrics::{ExptMetricInputData, ExptMetricRequest};
use crate::harvester::{self, HarvestTask};
use crate::models::{DbActionResponse, Request, ResponseDetails};

const CYCLE_STEP_HOURS: i64 = 6;

#[derive(Debug, Deserialize)]
struct DateRangeConfig {
    datetime_str: Option<String>,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct HarvestFileConfig {
    /// strftime template for the directory holding the file
    filepath: String,
    /// strftime template for the file name
    filename: String,
    /// Cycle offsets from midnight, in seconds, this file exists for
    cycles: Vec<i64>,
    harvester: String,
    metrics: Vec<String>,
    stats: Vec<String>,
    elevation_unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarvestConfig {
    date_range: DateRangeConfig,
    files: Vec<HarvestFileConfig>,
    expt_name: String,
    expt_wallclk_strt: String,
}

/// A validated harvest request.
#[derive(Debug)]
pub struct HarvestRequest {
    request: Value,
    config: HarvestConfig,
    date_range: DateRange,
}

impl HarvestRequest {
    /// Validate a raw request value into a [HarvestRequest].
    pub fn from_value(value: &Value) -> Result<Self, ExptDbError> {
        let request = Request::from_value(value)?;
        let config: HarvestConfig = serde_json::from_value(request.required_body()?.clone())?;
        let format = config.date_range.datetime_str.as_deref();
        let start = datetime::parse_datetime(&config.date_range.start, format)?;
        let end = datetime::parse_datetime(&config.date_range.end, format)?;
        for file in &config.files {
            harvester::lookup(&file.harvester)?;
        }
        Ok(Self {
            request: value.clone(),
            config,
            date_range: DateRange::new(start, end),
        })
    }

    /// Execute the harvest loop, converting any failure into a failure
    /// response.
    pub async fn submit(&self, pool: &SqlitePool) -> DbActionResponse {
        self.run(pool).await.unwrap_or_else(|err| {
            error!("harvest request failed: {}", err);
            DbActionResponse::failed(self.request.clone(), "Failed harvest request", &err)
        })
    }

    async fn run(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        let format = self.config.date_range.datetime_str.as_deref();
        let mut date_range = self.date_range;
        let mut stored = 0usize;
        let mut cycles = 0usize;
        loop {
            cycles += 1;
            for file in &self.config.files {
                if !file.cycles.contains(&date_range.cycle_seconds()) {
                    continue;
                }
                let task = HarvestTask {
                    filepath_format: file.filepath.clone(),
                    filename_format: file.filename.clone(),
                    cycle_time: date_range.current(),
                    metrics: file.metrics.clone(),
                    stats: file.stats.clone(),
                    elevation_unit: file.elevation_unit.clone(),
                };
                let harvested = harvester::lookup(&file.harvester)?.harvest(&task)?;
                if harvested.is_empty() {
                    debug!("no observations harvested at {}", date_range.current());
                    continue;
                }
                let metrics: Vec<ExptMetricInputData> = harvested
                    .into_iter()
                    .map(|row| ExptMetricInputData {
                        name: row.name,
                        region_name: row.region_name,
                        elevation: row.elevation,
                        elevation_unit: row.elevation_unit,
                        value: row.value,
                        time_valid: task.cycle_time,
                    })
                    .collect();
                let count = metrics.len();
                let result = ExptMetricRequest::from_input(
                    &self.config.expt_name,
                    &self.config.expt_wallclk_strt,
                    format,
                    metrics,
                )?
                .submit(pool)
                .await;
                if !result.success {
                    return Ok(DbActionResponse {
                        request: self.request.clone(),
                        success: false,
                        message: "Failed harvest request".to_string(),
                        details: None,
                        errors: result.errors,
                    });
                }
                stored += count;
            }
            date_range.increment(0, CYCLE_STEP_HOURS);
            if date_range.at_end() {
                break;
            }
        }
        info!("harvest stored {} observations over {} cycles", stored, cycles);
        let message = format!("Harvested {stored} metric record/s over {cycles} cycle/s");
        let details = ResponseDetails {
            record_count: Some(stored),
            ..Default::default()
        };
        Ok(DbActionResponse::ok(self.request.clone(), &message, details))
    }
}
