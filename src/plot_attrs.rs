//! Static plot attribute registry.
//!
//! Figure attributes are keyed by `{metric}_{stat}`: axis bounds and tick
//! intervals, axis labels, and the statistic's zero reference line. Region
//! display labels live here too.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::error::ExptDbError;

/// Axis bounds and tick intervals of a figure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxesAttrs {
    pub xmin: f64,
    pub xmax: f64,
    pub xint: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub yint: f64,
}

/// Figure attributes for one metric/statistic pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlotAttrs {
    pub metric: &'static str,
    pub stat: &'static str,
    pub axes: AxesAttrs,
    pub xlabel: &'static str,
    pub ylabel: &'static str,
}

impl PlotAttrs {
    /// Bias figures carry a dashed zero reference line.
    pub fn zero_line(&self) -> bool {
        self.stat == "bias"
    }
}

const ATMOS_PRESSURE_AXIS: &str = "Pressure (hPa)";

const fn atmos_axes(xmin: f64, xmax: f64, xint: f64) -> AxesAttrs {
    AxesAttrs {
        xmin,
        xmax,
        xint,
        ymin: 200.0,
        ymax: 900.0,
        yint: 100.0,
    }
}

lazy_static! {
    /// Figure attributes by `{metric}_{stat}` key.
    pub static ref PLOT_ATTRS: HashMap<&'static str, PlotAttrs> = HashMap::from([
        (
            "spechumid_bias",
            PlotAttrs {
                metric: "spechumid",
                stat: "bias",
                axes: atmos_axes(-1.0e-3, 1.0e-3, 0.0005),
                xlabel: "First-Guess Specific Humidity Bias (g/kg)",
                ylabel: ATMOS_PRESSURE_AXIS,
            },
        ),
        (
            "spechumid_rmsd",
            PlotAttrs {
                metric: "spechumid",
                stat: "rmsd",
                axes: atmos_axes(-1.0e-3, 1.0e-3, 0.0005),
                xlabel: "First-Guess Specific Humidity RMSD (g/kg)",
                ylabel: ATMOS_PRESSURE_AXIS,
            },
        ),
        (
            "temperature_bias",
            PlotAttrs {
                metric: "temperature",
                stat: "bias",
                axes: atmos_axes(-2.0, 2.0, 0.5),
                xlabel: "First-Guess Temperature Bias (K)",
                ylabel: ATMOS_PRESSURE_AXIS,
            },
        ),
        (
            "temperature_rmsd",
            PlotAttrs {
                metric: "temperature",
                stat: "rmsd",
                axes: atmos_axes(0.0, 2.0, 0.25),
                xlabel: "First-Guess Temperature RMSD (K)",
                ylabel: ATMOS_PRESSURE_AXIS,
            },
        ),
        (
            "uvwind_bias",
            PlotAttrs {
                metric: "uvwind",
                stat: "bias",
                axes: atmos_axes(-5.0, 5.0, 1.0),
                xlabel: "First-Guess Wind Bias (m/s)",
                ylabel: ATMOS_PRESSURE_AXIS,
            },
        ),
        (
            "uvwind_rmsd",
            PlotAttrs {
                metric: "uvwind",
                stat: "rmsd",
                axes: atmos_axes(0.0, 6.0, 1.0),
                xlabel: "First-Guess Wind RMSD (m/s)",
                ylabel: ATMOS_PRESSURE_AXIS,
            },
        ),
    ]);

    /// Figure title text per region name.
    pub static ref REGION_LABELS: HashMap<&'static str, &'static str> = HashMap::from([
        ("equatorial", "Equatorial Region Innovation Statistics"),
        ("global", "Global Region Innovation Statistics"),
        ("north_hemis", "North Hemisphere Region Innovation Statistics"),
        ("south_hemis", "South Hemisphere Region Innovation Statistics"),
        ("tropics", "Tropics Region Innovation Statistics"),
    ]);
}

/// Look up the figure attributes for a metric/statistic pair.
pub fn lookup(metric: &str, stat: &str) -> Result<&'static PlotAttrs, ExptDbError> {
    let key = format!("{metric}_{stat}");
    PLOT_ATTRS
        .get(key.as_str())
        .ok_or(ExptDbError::UnknownPlotAttrs { key })
}

/// Title text for a region, falling back to the raw name.
pub fn region_label(region: &str) -> &str {
    REGION_LABELS.get(region).copied().unwrap_or(region)
}
