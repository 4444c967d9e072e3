//! Relational schema, row types and column registries.
//!
//! The schema holds four tables: `experiments`, `metric_types`, `regions`
//! and the `expt_metrics` observations referencing all three. Each entity
//! enumerates its filterable and orderable columns in a static
//! [ColumnRegistry](crate::filters::ColumnRegistry); request keys resolve
//! through these registries only.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::filters::{ColumnDef, ColumnKind, ColumnRegistry};

/// DDL for the `regions` table. A region is immutable once stored; the
/// (name, bounds) pair is its identity.
pub const CREATE_REGIONS: &str = "\
CREATE TABLE IF NOT EXISTS regions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    bounds TEXT NOT NULL,
    created_at DATETIME NOT NULL,
    updated_at DATETIME,
    UNIQUE (name, bounds)
)";

/// DDL for the `metric_types` table.
pub const CREATE_METRIC_TYPES: &str = "\
CREATE TABLE IF NOT EXISTS metric_types (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    measurement_type TEXT NOT NULL,
    measurement_units TEXT,
    stat_type TEXT,
    description TEXT,
    created_at DATETIME NOT NULL,
    updated_at DATETIME,
    UNIQUE (name, measurement_type, measurement_units, stat_type)
)";

/// DDL for the `experiments` table. (name, wallclock_start) identifies an
/// experiment run.
pub const CREATE_EXPERIMENTS: &str = "\
CREATE TABLE IF NOT EXISTS experiments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    cycle_start DATETIME NOT NULL,
    cycle_stop DATETIME NOT NULL,
    owner_id TEXT NOT NULL,
    group_id TEXT,
    experiment_type TEXT,
    platform TEXT NOT NULL,
    wallclock_start DATETIME NOT NULL,
    wallclock_end DATETIME,
    description TEXT,
    created_at DATETIME,
    updated_at DATETIME,
    UNIQUE (name, wallclock_start)
)";

/// DDL for the `expt_metrics` table. No unique constraint on the natural
/// observation key; reconciliation of re-harvested rows happens at read
/// time, keeping the most recently created row.
pub const CREATE_EXPT_METRICS: &str = "\
CREATE TABLE IF NOT EXISTS expt_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_id INTEGER NOT NULL REFERENCES experiments (id),
    metric_type_id INTEGER NOT NULL REFERENCES metric_types (id),
    region_id INTEGER NOT NULL REFERENCES regions (id),
    elevation REAL NOT NULL,
    elevation_unit TEXT,
    value REAL,
    time_valid DATETIME NOT NULL,
    created_at DATETIME
)";

/// All DDL statements, in dependency order.
pub const SCHEMA: &[&str] = &[
    CREATE_REGIONS,
    CREATE_METRIC_TYPES,
    CREATE_EXPERIMENTS,
    CREATE_EXPT_METRICS,
];

/// A stored region.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct RegionRow {
    pub id: i64,
    pub name: String,
    pub bounds: String,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// A stored metric type. The description is stored as serialized JSON text.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct MetricTypeRow {
    pub id: i64,
    pub name: String,
    pub measurement_type: String,
    pub measurement_units: Option<String>,
    pub stat_type: Option<String>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// A stored experiment.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ExperimentRow {
    pub id: i64,
    pub name: String,
    pub cycle_start: NaiveDateTime,
    pub cycle_stop: NaiveDateTime,
    pub owner_id: String,
    pub group_id: Option<String>,
    pub experiment_type: Option<String>,
    pub platform: String,
    pub wallclock_start: NaiveDateTime,
    pub wallclock_end: Option<NaiveDateTime>,
    pub description: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

/// One metric observation joined to its experiment, metric type and region.
///
/// Column names follow the renamed-output convention: parent columns that
/// would collide (`name`, `created_at`) are exposed under entity-specific
/// names (`expt_name`, `metric_type`, `region`).
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct ExptMetricRecord {
    pub id: i64,
    /// Metric type name
    pub name: String,
    pub elevation: f64,
    pub elevation_unit: Option<String>,
    pub value: Option<f64>,
    pub time_valid: NaiveDateTime,
    pub expt_id: i64,
    pub expt_name: String,
    pub wallclock_start: NaiveDateTime,
    pub metric_id: i64,
    pub metric_type: String,
    pub metric_unit: Option<String>,
    pub metric_stat_type: Option<String>,
    pub region_id: i64,
    pub region: String,
    pub created_at: Option<NaiveDateTime>,
}

/// Filterable/orderable columns of `regions`.
pub static REGION_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "regions",
    columns: &[
        ColumnDef {
            key: "name",
            sql: "name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "bounds",
            sql: "bounds",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "created_at",
            sql: "created_at",
            kind: ColumnKind::Time,
        },
    ],
};

/// Filterable/orderable columns of `metric_types`.
pub static METRIC_TYPE_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "metric_types",
    columns: &[
        ColumnDef {
            key: "name",
            sql: "name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "measurement_type",
            sql: "measurement_type",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "measurement_units",
            sql: "measurement_units",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "stat_type",
            sql: "stat_type",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "created_at",
            sql: "created_at",
            kind: ColumnKind::Time,
        },
    ],
};

/// Filterable/orderable columns of `experiments`.
pub static EXPERIMENT_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "experiments",
    columns: &[
        ColumnDef {
            key: "name",
            sql: "name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "owner_id",
            sql: "owner_id",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "group_id",
            sql: "group_id",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "platform",
            sql: "platform",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "cycle_start",
            sql: "cycle_start",
            kind: ColumnKind::Time,
        },
        ColumnDef {
            key: "cycle_stop",
            sql: "cycle_stop",
            kind: ColumnKind::Time,
        },
        ColumnDef {
            key: "wallclock_start",
            sql: "wallclock_start",
            kind: ColumnKind::Time,
        },
        ColumnDef {
            key: "wallclock_end",
            sql: "wallclock_end",
            kind: ColumnKind::Time,
        },
    ],
};

/// Experiment sub-filter columns of the `expt_metrics` join, qualified
/// against the `e` alias.
pub static METRIC_EXPERIMENT_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "expt_metrics.experiment",
    columns: &[
        ColumnDef {
            key: "name",
            sql: "e.name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "cycle_start",
            sql: "e.cycle_start",
            kind: ColumnKind::Time,
        },
        ColumnDef {
            key: "cycle_stop",
            sql: "e.cycle_stop",
            kind: ColumnKind::Time,
        },
        ColumnDef {
            key: "wallclock_start",
            sql: "e.wallclock_start",
            kind: ColumnKind::Time,
        },
    ],
};

/// Metric-type sub-filter columns of the `expt_metrics` join, qualified
/// against the `mt` alias.
pub static METRIC_TYPE_SUB_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "expt_metrics.metric_types",
    columns: &[
        ColumnDef {
            key: "name",
            sql: "mt.name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "measurement_type",
            sql: "mt.measurement_type",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "measurement_units",
            sql: "mt.measurement_units",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "stat_type",
            sql: "mt.stat_type",
            kind: ColumnKind::Text,
        },
    ],
};

/// Region sub-filter columns of the `expt_metrics` join, qualified against
/// the `r` alias.
pub static METRIC_REGION_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "expt_metrics.regions",
    columns: &[ColumnDef {
        key: "name",
        sql: "r.name",
        kind: ColumnKind::Text,
    }],
};

/// Direct filter columns of `expt_metrics` itself.
pub static EXPT_METRIC_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "expt_metrics",
    columns: &[
        ColumnDef {
            key: "time_valid",
            sql: "m.time_valid",
            kind: ColumnKind::Time,
        },
        ColumnDef {
            key: "elevation_unit",
            sql: "m.elevation_unit",
            kind: ColumnKind::Text,
        },
    ],
};

/// Orderable columns of the `expt_metrics` join, keyed by output name.
pub static EXPT_METRIC_ORDER_COLUMNS: ColumnRegistry = ColumnRegistry {
    table: "expt_metrics",
    columns: &[
        ColumnDef {
            key: "name",
            sql: "mt.name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "expt_name",
            sql: "e.name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "region",
            sql: "r.name",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "elevation",
            sql: "m.elevation",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "value",
            sql: "m.value",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "elevation_unit",
            sql: "m.elevation_unit",
            kind: ColumnKind::Text,
        },
        ColumnDef {
            key: "time_valid",
            sql: "m.time_valid",
            kind: ColumnKind::Time,
        },
        ColumnDef {
            key: "created_at",
            sql: "m.created_at",
            kind: ColumnKind::Time,
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_covers_all_tables() {
        assert_eq!(4, SCHEMA.len());
        for (table, ddl) in ["regions", "metric_types", "experiments", "expt_metrics"]
            .iter()
            .zip(SCHEMA)
        {
            assert!(ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }

    #[test]
    fn registries_resolve_their_keys() {
        assert_eq!("e.name", METRIC_EXPERIMENT_COLUMNS.resolve("name").unwrap().sql);
        assert_eq!("mt.name", METRIC_TYPE_SUB_COLUMNS.resolve("name").unwrap().sql);
        assert_eq!("r.name", METRIC_REGION_COLUMNS.resolve("name").unwrap().sql);
        assert!(EXPERIMENT_COLUMNS.resolve("elevation").is_err());
    }
}
