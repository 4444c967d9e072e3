//! Error handling.

use std::error::Error;

use chrono::NaiveDateTime;
use thiserror::Error;

/// Experiment database error type
///
/// This type encapsulates the various errors that may occur while handling a
/// request. Input-validation and lookup errors are raised to the caller as
/// soon as they are detected; database failures are converted into a failure
/// response at the handler boundary.
#[derive(Debug, Error)]
pub enum ExptDbError {
    /// Request method other than GET or PUT
    #[error("request method must be one of GET, PUT - was {method}")]
    InvalidMethod { method: String },

    /// Request name with no registered handler
    #[error("no registered handler for request {name}")]
    UnknownRequest { name: String },

    /// Filter or ordering key that is not a column of the target table
    #[error("unknown column {column} for table {table}")]
    UnknownColumn { table: &'static str, column: String },

    /// Ordering direction other than asc or desc
    #[error("order_by must be one of asc, desc - was {value}")]
    InvalidOrderDirection { value: String },

    /// Datetime string that does not match the supplied format
    #[error("invalid datetime {value}, must be of format {format}")]
    InvalidDateTime { value: String, format: String },

    /// Datetime format string that strftime cannot interpret
    #[error("invalid datetime format string {format}")]
    InvalidDateTimeFormat { format: String },

    /// Time-range filter with inverted bounds
    #[error("'from' must be older than 'to' - from: {from}, to: {to}")]
    InvertedTimeRange {
        from: NaiveDateTime,
        to: NaiveDateTime,
    },

    /// Region GET filter_type outside the recognized set
    #[error("filter_type must be one of none, by_name, by_data - was {value}")]
    InvalidFilterType { value: String },

    /// Latitude bound outside [-90, 90]
    #[error(
        "min_lat and max_lat must be within [-90, 90] - min_lat: {min_lat}, max_lat: {max_lat}"
    )]
    LatitudeOutOfRange { min_lat: f64, max_lat: f64 },

    /// Region with min_lat above max_lat
    #[error("min_lat must not exceed max_lat - min_lat: {min_lat}, max_lat: {max_lat}")]
    InvertedLatitudeBounds { min_lat: f64, max_lat: f64 },

    /// Experiment with cycle_start after cycle_stop
    #[error("cycle_start must not be later than cycle_stop - start: {start}, stop: {stop}")]
    InvalidCycleWindow {
        start: NaiveDateTime,
        stop: NaiveDateTime,
    },

    /// Experiment platform outside the allow-list
    #[error("platform must be one of {allowed:?} - was {platform}")]
    InvalidPlatform {
        platform: String,
        allowed: &'static [&'static str],
    },

    /// Metric PUT referencing an experiment that is not registered
    #[error("no experiment record found for name {name}, wallclock_start {wallclock_start}")]
    ExperimentNotFound {
        name: String,
        wallclock_start: String,
    },

    /// Metric PUT matching more than one experiment record
    #[error("experiment lookup for name {name} matched {count} records, expected exactly one")]
    AmbiguousExperiment { name: String, count: usize },

    /// Metric PUT referencing region names absent from the regions table
    #[error("unresolved region names: {names:?}")]
    UnresolvedRegions { names: Vec<String> },

    /// Metric PUT referencing metric type names absent from the metric_types table
    #[error("unresolved metric type names: {names:?}")]
    UnresolvedMetricTypes { names: Vec<String> },

    /// Request missing a key its handler requires
    #[error("request is missing required field {field}")]
    MissingField { field: &'static str },

    /// Harvester name with no registered implementation
    #[error("no registered harvester named {name}")]
    UnknownHarvester { name: String },

    /// Plot request for a metric/stat pair with no plot attributes
    #[error("no plot attributes registered for {key}")]
    UnknownPlotAttrs { key: String },

    /// Error validating request data
    #[error("request data is not valid")]
    Validation(#[from] validator::ValidationErrors),

    /// Error executing a database statement
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// Error deserialising JSON request or config data
    #[error("request data is not valid JSON")]
    Json(#[from] serde_json::Error),

    /// Error deserialising a YAML request file
    #[error("request file is not valid YAML")]
    Yaml(#[from] serde_yaml::Error),

    /// Error reading a request, config or diagnostic file
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Render an error and its source chain as a single string, for the `errors`
/// field of a failure response.
pub fn error_chain(error: &ExptDbError) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        let cause = source.to_string();
        // Skip duplicate entries.
        if !message.ends_with(&cause) {
            message.push_str(" - caused by: ");
            message.push_str(&cause);
        }
        current = source.source();
    }
    message
}
