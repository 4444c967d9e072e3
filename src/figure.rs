//! SVG line-figure rendering.
//!
//! Figures plot one statistic against elevation, one line per experiment,
//! with the elevation axis inverted so higher pressures sit lower on the
//! page. Output names follow
//! `{base}__{metric}_{stat}_{region}__{start}_to_{end}.svg` with the date
//! bounds rendered as `%Y%m%dT%HZ`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use svg::node::element::{Line, Polyline, Rectangle, Text};
use svg::Document;
use tracing::info;

use crate::datetime;
use crate::error::ExptDbError;
use crate::plot_attrs::PlotAttrs;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 480.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 60.0;
const FIG_DATE_FORMAT: &str = "%Y%m%dT%HZ";

/// One plotted line: an experiment's (value, elevation) profile.
#[derive(Clone, Debug)]
pub struct Series {
    pub label: String,
    pub color: String,
    /// (value, elevation) pairs
    pub points: Vec<(f64, f64)>,
}

fn x_pixel(attrs: &PlotAttrs, value: f64) -> f64 {
    let span = attrs.axes.xmax - attrs.axes.xmin;
    MARGIN_LEFT + (value - attrs.axes.xmin) / span * (WIDTH - MARGIN_LEFT - MARGIN_RIGHT)
}

// The elevation axis is inverted: ymin renders at the top.
fn y_pixel(attrs: &PlotAttrs, value: f64) -> f64 {
    let span = attrs.axes.ymax - attrs.axes.ymin;
    MARGIN_TOP + (value - attrs.axes.ymin) / span * (HEIGHT - MARGIN_TOP - MARGIN_BOTTOM)
}

fn axis_ticks(min: f64, max: f64, interval: f64) -> Vec<f64> {
    let mut ticks = vec![];
    let mut value = min;
    while value <= max + 1.0e-6 {
        ticks.push(value);
        value += interval;
    }
    ticks
}

fn text(content: &str, x: f64, y: f64, anchor: &str, size: u32) -> Text {
    Text::new(content)
        .set("x", x)
        .set("y", y)
        .set("text-anchor", anchor)
        .set("font-size", size)
        .set("font-family", "sans-serif")
}

/// Render a figure for the given attributes, title and series.
pub fn build_figure(attrs: &PlotAttrs, title: &str, series: &[Series]) -> Document {
    let bottom = HEIGHT - MARGIN_BOTTOM;
    let right = WIDTH - MARGIN_RIGHT;
    let mut document = Document::new()
        .set("viewBox", (0, 0, WIDTH as u32, HEIGHT as u32))
        .add(
            Rectangle::new()
                .set("width", "100%")
                .set("height", "100%")
                .set("fill", "white"),
        )
        .add(text(title, WIDTH / 2.0, MARGIN_TOP / 2.0, "middle", 14))
        .add(
            Line::new()
                .set("x1", MARGIN_LEFT)
                .set("y1", bottom)
                .set("x2", right)
                .set("y2", bottom)
                .set("stroke", "black"),
        )
        .add(
            Line::new()
                .set("x1", MARGIN_LEFT)
                .set("y1", MARGIN_TOP)
                .set("x2", MARGIN_LEFT)
                .set("y2", bottom)
                .set("stroke", "black"),
        );

    for tick in axis_ticks(attrs.axes.xmin, attrs.axes.xmax, attrs.axes.xint) {
        let x = x_pixel(attrs, tick);
        document = document
            .add(
                Line::new()
                    .set("x1", x)
                    .set("y1", bottom)
                    .set("x2", x)
                    .set("y2", bottom + 4.0)
                    .set("stroke", "black"),
            )
            .add(text(&format!("{tick}"), x, bottom + 16.0, "middle", 10));
    }
    for tick in axis_ticks(attrs.axes.ymin, attrs.axes.ymax, attrs.axes.yint) {
        let y = y_pixel(attrs, tick);
        document = document
            .add(
                Line::new()
                    .set("x1", MARGIN_LEFT - 4.0)
                    .set("y1", y)
                    .set("x2", MARGIN_LEFT)
                    .set("y2", y)
                    .set("stroke", "black"),
            )
            .add(text(&format!("{tick}"), MARGIN_LEFT - 8.0, y + 3.0, "end", 10));
    }

    document = document
        .add(text(attrs.xlabel, WIDTH / 2.0, HEIGHT - 20.0, "middle", 12))
        .add(
            text(attrs.ylabel, 18.0, HEIGHT / 2.0, "middle", 12)
                .set("transform", format!("rotate(-90 18 {})", HEIGHT / 2.0)),
        );

    if attrs.zero_line() && attrs.axes.xmin <= 0.0 && attrs.axes.xmax >= 0.0 {
        let x = x_pixel(attrs, 0.0);
        document = document.add(
            Line::new()
                .set("x1", x)
                .set("y1", MARGIN_TOP)
                .set("x2", x)
                .set("y2", bottom)
                .set("stroke", "gray")
                .set("stroke-width", 0.5)
                .set("stroke-dasharray", "4 3"),
        );
    }

    for (index, line) in series.iter().enumerate() {
        let points: Vec<String> = line
            .points
            .iter()
            .map(|(value, elevation)| {
                format!(
                    "{:.2},{:.2}",
                    x_pixel(attrs, *value),
                    y_pixel(attrs, *elevation)
                )
            })
            .collect();
        document = document.add(
            Polyline::new()
                .set("points", points.join(" "))
                .set("fill", "none")
                .set("stroke", line.color.as_str())
                .set("stroke-width", 1.5),
        );
        // Legend in the upper right, one row per series.
        let legend_y = MARGIN_TOP + 14.0 + index as f64 * 16.0;
        document = document
            .add(
                Line::new()
                    .set("x1", right - 150.0)
                    .set("y1", legend_y - 4.0)
                    .set("x2", right - 130.0)
                    .set("y2", legend_y - 4.0)
                    .set("stroke", line.color.as_str())
                    .set("stroke-width", 1.5),
            )
            .add(text(&line.label, right - 125.0, legend_y, "start", 10));
    }

    document
}

/// Build the figure file name for a metric/stat/region over a date range.
pub fn figure_filename(
    fig_base_fn: &str,
    metric: &str,
    stat: &str,
    region: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> Result<String, ExptDbError> {
    let start = datetime::format_datetime(start, FIG_DATE_FORMAT)?;
    let end = datetime::format_datetime(end, FIG_DATE_FORMAT)?;
    Ok(format!(
        "{fig_base_fn}__{metric}_{stat}_{region}__{start}_to_{end}.svg"
    ))
}

/// Write a figure under the work directory, creating it if absent.
pub fn save_figure(
    work_dir: &Path,
    filename: &str,
    document: &Document,
) -> Result<PathBuf, ExptDbError> {
    fs::create_dir_all(work_dir)?;
    let path = work_dir.join(filename);
    svg::save(&path, document)?;
    info!("saved figure {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot_attrs;

    fn example_series() -> Vec<Series> {
        vec![Series {
            label: "C96L64 GSI".to_string(),
            color: "blue".to_string(),
            points: vec![(0.5, 250.0), (1.0, 500.0), (1.5, 850.0)],
        }]
    }

    #[test]
    fn figure_holds_series_and_labels() {
        let attrs = plot_attrs::lookup("temperature", "rmsd").unwrap();
        let document = build_figure(attrs, "Global Region Innovation Statistics", &example_series());
        let rendered = document.to_string();
        assert!(rendered.contains("Global Region Innovation Statistics"));
        assert!(rendered.contains("First-Guess Temperature RMSD (K)"));
        assert!(rendered.contains("polyline"));
        assert!(rendered.contains("C96L64 GSI"));
        // rmsd figures carry no zero reference line
        assert!(!rendered.contains("stroke-dasharray"));
    }

    #[test]
    fn bias_figure_carries_zero_line() {
        let attrs = plot_attrs::lookup("temperature", "bias").unwrap();
        let document = build_figure(attrs, "title", &example_series());
        assert!(document.to_string().contains("stroke-dasharray"));
    }

    #[test]
    fn filename_renders_date_bounds() {
        let start = datetime::parse_datetime("2016-01-01 00:00:00", None).unwrap();
        let end = datetime::parse_datetime("2016-01-31 18:00:00", None).unwrap();
        let filename =
            figure_filename("innov_stats", "temperature", "rmsd", "global", &start, &end)
                .unwrap();
        assert_eq!(
            "innov_stats__temperature_rmsd_global__20160101T00Z_to_20160131T18Z.svg",
            filename
        );
    }

    #[test]
    fn save_creates_the_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("figures");
        let attrs = plot_attrs::lookup("uvwind", "bias").unwrap();
        let document = build_figure(attrs, "title", &example_series());
        let path = save_figure(&work_dir, "figure.svg", &document).unwrap();
        assert!(path.exists());
    }
}
