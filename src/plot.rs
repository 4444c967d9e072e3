//! Plot pipeline.
//!
//! A plot request renders comparison figures for a set of experiments over a
//! date range. For every metric and statistic in each stat group it runs one
//! metrics query per experiment, averages the values per (experiment,
//! elevation, region), and writes one figure per region with one line per
//! experiment.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::datetime;
use crate::error::ExptDbError;
use crate::expt_metrics::ExptMetricRequest;
use crate::figure::{self, Series};
use crate::models::{DbActionResponse, Request, ResponseDetails};
use crate::plot_attrs;
use crate::tables::ExptMetricRecord;

#[derive(Debug, Deserialize)]
struct DateRangeConfig {
    datetime_str: Option<String>,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct PlotExperiment {
    name: String,
    wallclock_start: String,
    graph_color: String,
    graph_label: String,
}

#[derive(Debug, Deserialize)]
struct StatGroup {
    /// Template the stored metric type names follow, with `{metric}` and
    /// `{stat}` placeholders
    stat_group_frmt_str: String,
    metrics: Vec<String>,
    stats: Vec<String>,
    regions: Vec<String>,
    elevation_unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlotConfig {
    date_range: DateRangeConfig,
    experiments: Vec<PlotExperiment>,
    stat_groups: Vec<StatGroup>,
    work_dir: PathBuf,
    fig_base_fn: String,
}

/// A validated plot request.
#[derive(Debug)]
pub struct PlotRequest {
    request: Value,
    config: PlotConfig,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl PlotRequest {
    /// Validate a raw request value into a [PlotRequest].
    pub fn from_value(value: &Value) -> Result<Self, ExptDbError> {
        let request = Request::from_value(value)?;
        let config: PlotConfig = serde_json::from_value(request.required_body()?.clone())?;
        let format = config.date_range.datetime_str.as_deref();
        let start = datetime::parse_datetime(&config.date_range.start, format)?;
        let end = datetime::parse_datetime(&config.date_range.end, format)?;
        for group in &config.stat_groups {
            for metric in &group.metrics {
                for stat in &group.stats {
                    plot_attrs::lookup(metric, stat)?;
                }
            }
        }
        Ok(Self {
            request: value.clone(),
            config,
            start,
            end,
        })
    }

    /// Execute the plot pipeline, converting any failure into a failure
    /// response.
    pub async fn submit(&self, pool: &SqlitePool) -> DbActionResponse {
        self.run(pool).await.unwrap_or_else(|err| {
            error!("plot request failed: {}", err);
            DbActionResponse::failed(self.request.clone(), "Failed plot request", &err)
        })
    }

    async fn run(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        let mut figures: Vec<String> = vec![];
        for group in &self.config.stat_groups {
            for metric in &group.metrics {
                for stat in &group.stats {
                    let mut records = vec![];
                    for experiment in &self.config.experiments {
                        let request = self.metrics_request(group, experiment, metric, stat)?;
                        records.extend(
                            ExptMetricRequest::from_value(&request)?.query(pool).await?,
                        );
                    }
                    debug!("{metric} {stat}: {} metric records", records.len());
                    figures.extend(self.render(group, metric, stat, &records)?);
                }
            }
        }
        info!("plot request produced {} figures", figures.len());
        let message = format!("Generated {} figure/s", figures.len());
        let details = ResponseDetails {
            record_count: Some(figures.len()),
            records: Some(json!(figures)),
            ..Default::default()
        };
        Ok(DbActionResponse::ok(self.request.clone(), &message, details))
    }

    /// Build the metrics GET for one experiment and metric/stat pair.
    fn metrics_request(
        &self,
        group: &StatGroup,
        experiment: &PlotExperiment,
        metric: &str,
        stat: &str,
    ) -> Result<Value, ExptDbError> {
        let metric_name = group
            .stat_group_frmt_str
            .replace("{metric}", metric)
            .replace("{stat}", stat);
        // The experiment's wallclock_start follows the config's datetime_str;
        // the generated request carries the default format, so re-render it.
        let config_format = self.config.date_range.datetime_str.as_deref();
        let wallclock_start =
            datetime::parse_datetime(&experiment.wallclock_start, config_format)?;
        let format = datetime::DEFAULT_DATETIME_FORMAT;
        let wallclock_start = datetime::format_datetime(&wallclock_start, format)?;
        let time_valid_from = datetime::format_datetime(&self.start, format)?;
        let time_valid_to = datetime::format_datetime(&self.end, format)?;
        let mut filters = json!({
            "experiment": {
                "name": {"exact": experiment.name},
                "wallclock_start": {
                    "from": wallclock_start,
                    "to": wallclock_start
                }
            },
            "metric_types": {
                "name": {"exact": [metric_name]},
                "stat_type": {"exact": [stat]}
            },
            "regions": {"name": {"exact": group.regions}},
            "time_valid": {"from": time_valid_from, "to": time_valid_to}
        });
        if let Some(elevation_unit) = &group.elevation_unit {
            filters["elevation_unit"] = json!({"exact": [elevation_unit]});
        }
        Ok(json!({
            "name": "expt_metrics",
            "method": "GET",
            "params": {
                "filters": filters,
                "ordering": [
                    {"name": "time_valid", "order_by": "asc"},
                    {"name": "elevation", "order_by": "desc"}
                ]
            }
        }))
    }

    /// Average the records and write one figure per region holding data.
    fn render(
        &self,
        group: &StatGroup,
        metric: &str,
        stat: &str,
        records: &[ExptMetricRecord],
    ) -> Result<Vec<String>, ExptDbError> {
        let attrs = plot_attrs::lookup(metric, stat)?;
        let averages = mean_values(records);
        let mut figures = vec![];
        for region in &group.regions {
            let mut series = vec![];
            for experiment in &self.config.experiments {
                let mut points: Vec<(f64, f64)> = averages
                    .iter()
                    .filter(|((expt_name, _, region_name), _)| {
                        expt_name == &experiment.name && region_name == region
                    })
                    .map(|((_, elevation_bits, _), mean)| {
                        (*mean, f64::from_bits(*elevation_bits))
                    })
                    .collect();
                if points.is_empty() {
                    continue;
                }
                points.sort_by(|a, b| a.1.total_cmp(&b.1));
                series.push(Series {
                    label: experiment.graph_label.clone(),
                    color: experiment.graph_color.clone(),
                    points,
                });
            }
            if series.is_empty() {
                continue;
            }
            let document =
                figure::build_figure(attrs, plot_attrs::region_label(region), &series);
            let filename = figure::figure_filename(
                &self.config.fig_base_fn,
                metric,
                stat,
                region,
                &self.start,
                &self.end,
            )?;
            let path = figure::save_figure(&self.config.work_dir, &filename, &document)?;
            figures.push(path.display().to_string());
        }
        Ok(figures)
    }
}

type GroupKey = (String, u64, String);

/// Mean of `value` per (experiment, elevation, region); rows with no stored
/// value are skipped.
fn mean_values(records: &[ExptMetricRecord]) -> HashMap<GroupKey, f64> {
    let mut sums: HashMap<GroupKey, (f64, usize)> = HashMap::new();
    for record in records {
        let Some(value) = record.value else {
            continue;
        };
        let key = (
            record.expt_name.clone(),
            record.elevation.to_bits(),
            record.region.clone(),
        );
        let entry = sums.entry(key).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect()
}
