//! This crate provides a data access and reporting layer for scientific experiment
//! metrics. Experiments, metric types, geographic regions and time series metric
//! observations are stored in a relational database, and harvest and plot pipelines
//! ingest raw metric files and render summary figures from the stored records.
//!
//! All work is driven by request files: a JSON or YAML document naming a request
//! type, a method and its parameters. Each request executes against the database
//! and returns a structured response envelope.
//!
//! The service is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [SQLx](sqlx) provides compile-time checked, async access to the SQLite
//!   database backing the metric store.
//! * [Serde](serde) performs (de)serialisation of JSON and YAML request and
//!   response data.
//! * [Clap](clap) parses command line arguments.
//! * [chrono] handles the date and time arithmetic used by cycles and filters.
//! * [svg] renders the vertical profile figures produced by plot requests.

pub mod cli;
pub mod datetime;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod experiments;
pub mod expt_metrics;
pub mod figure;
pub mod filters;
pub mod harvest;
pub mod harvester;
pub mod metric_types;
pub mod models;
pub mod plot;
pub mod plot_attrs;
pub mod regions;
pub mod tables;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
