//! Diagnostic file harvesters.
//!
//! A harvester extracts metric observations from one diagnostic file. The
//! file's location is resolved from the path and name templates in the
//! harvest config, with strftime codes expanded against the current cycle
//! time. Implementations register by name; the `jsonl` harvester reads one
//! JSON observation per line and is the reference implementation.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use crate::datetime;
use crate::error::ExptDbError;

/// One harvesting unit of work: a resolvable diagnostic file plus the
/// metric and statistic names to keep.
#[derive(Clone, Debug)]
pub struct HarvestTask {
    /// strftime template for the directory holding the file
    pub filepath_format: String,
    /// strftime template for the file name
    pub filename_format: String,
    /// Cycle the file belongs to; templates resolve against this
    pub cycle_time: NaiveDateTime,
    /// Metric names to keep; empty keeps all
    pub metrics: Vec<String>,
    /// Statistic names to keep; empty keeps all
    pub stats: Vec<String>,
    /// Elevation unit assigned to observations that carry none
    pub elevation_unit: Option<String>,
}

impl HarvestTask {
    /// Resolve the templates against the cycle time into a concrete path.
    pub fn resolve_path(&self) -> Result<PathBuf, ExptDbError> {
        let directory = datetime::format_datetime(&self.cycle_time, &self.filepath_format)?;
        let filename = datetime::format_datetime(&self.cycle_time, &self.filename_format)?;
        Ok(PathBuf::from(directory).join(filename))
    }
}

/// One observation produced by a harvester.
#[derive(Clone, Debug, Deserialize)]
pub struct HarvestedMetric {
    /// Metric type name the observation stores under
    pub name: String,
    /// Base metric the name was derived from
    pub metric: String,
    /// Statistic the name was derived from
    pub stat: String,
    pub region_name: String,
    pub elevation: f64,
    pub elevation_unit: Option<String>,
    pub value: Option<f64>,
}

/// A source of metric observations held in diagnostic files.
pub trait Harvester {
    /// Registered name of this harvester.
    fn name(&self) -> &'static str;

    /// Extract the observations the task asks for from its file.
    fn harvest(&self, task: &HarvestTask) -> Result<Vec<HarvestedMetric>, ExptDbError>;
}

/// Harvester for files holding one JSON observation per line.
pub struct JsonlHarvester;

impl Harvester for JsonlHarvester {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn harvest(&self, task: &HarvestTask) -> Result<Vec<HarvestedMetric>, ExptDbError> {
        let path = task.resolve_path()?;
        debug!("harvesting {}", path.display());
        let reader = BufReader::new(File::open(&path)?);
        let mut harvested = vec![];
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut metric: HarvestedMetric = serde_json::from_str(&line)?;
            if !task.metrics.is_empty() && !task.metrics.contains(&metric.metric) {
                continue;
            }
            if !task.stats.is_empty() && !task.stats.contains(&metric.stat) {
                continue;
            }
            if metric.elevation_unit.is_none() {
                metric.elevation_unit = task.elevation_unit.clone();
            }
            harvested.push(metric);
        }
        debug!("harvested {} observations from {}", harvested.len(), path.display());
        Ok(harvested)
    }
}

static JSONL: JsonlHarvester = JsonlHarvester;

/// Look up a registered harvester by name.
pub fn lookup(name: &str) -> Result<&'static dyn Harvester, ExptDbError> {
    match name {
        "jsonl" => Ok(&JSONL),
        other => Err(ExptDbError::UnknownHarvester {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn task(dir: &str, filename_format: &str) -> HarvestTask {
        HarvestTask {
            filepath_format: dir.to_string(),
            filename_format: filename_format.to_string(),
            cycle_time: datetime::parse_datetime("2016-01-01 06:00:00", None).unwrap(),
            metrics: vec!["temperature".to_string()],
            stats: vec!["rmsd".to_string()],
            elevation_unit: Some("hPa".to_string()),
        }
    }

    #[test]
    fn templates_resolve_against_cycle_time() {
        let task = task("/data/%Y/%m", "innov_stats.metric.%Y%m%d%H.jsonl");
        assert_eq!(
            PathBuf::from("/data/2016/01/innov_stats.metric.2016010106.jsonl"),
            task.resolve_path().unwrap()
        );
    }

    #[test]
    fn unknown_harvester_is_a_lookup_error() {
        assert!(lookup("jsonl").is_ok());
        assert!(matches!(
            lookup("netcdf"),
            Err(ExptDbError::UnknownHarvester { name: _ })
        ));
    }

    #[test]
    fn jsonl_harvest_filters_metrics_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("innov_stats.2016010106.jsonl");
        let mut file = File::create(&path).unwrap();
        for line in [
            r#"{"name": "temperature_rmsd", "metric": "temperature", "stat": "rmsd", "region_name": "global", "elevation": 850.0, "value": 1.2}"#,
            r#"{"name": "temperature_bias", "metric": "temperature", "stat": "bias", "region_name": "global", "elevation": 850.0, "value": 0.1}"#,
            r#"{"name": "uvwind_rmsd", "metric": "uvwind", "stat": "rmsd", "region_name": "global", "elevation": 850.0, "value": 2.5}"#,
        ] {
            writeln!(file, "{line}").unwrap();
        }

        let task = task(
            dir.path().to_str().unwrap(),
            "innov_stats.%Y%m%d%H.jsonl",
        );
        let harvested = JsonlHarvester.harvest(&task).unwrap();
        assert_eq!(1, harvested.len());
        assert_eq!("temperature_rmsd", harvested[0].name);
        // Unit fell back to the task's.
        assert_eq!(Some("hPa".to_string()), harvested[0].elevation_unit);
    }
}
