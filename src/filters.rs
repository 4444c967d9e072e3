//! Filter and ordering construction.
//!
//! Request filters arrive as a nested per-column mapping
//! (`{"name": {"exact": ...}, "cycle_start": {"from": ..., "to": ...}}`).
//! Each entity declares an explicit [ColumnRegistry] mapping filter keys to
//! SQL column expressions and value kinds; filters are validated into tagged
//! [Filter] variants at construction time and only then rendered into a
//! parameterized WHERE clause. Unknown ordering columns are rejected; filter
//! keys that are not in the registry are a no-op.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};

use crate::datetime;
use crate::error::ExptDbError;
use crate::models::OrderSpec;

/// Value kind of a filterable column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnKind {
    Text,
    Time,
}

/// One filterable/orderable column of an entity.
#[derive(Clone, Copy, Debug)]
pub struct ColumnDef {
    /// Key the column is addressed by in request filters and ordering
    pub key: &'static str,
    /// SQL column expression, qualified where the query joins tables
    pub sql: &'static str,
    pub kind: ColumnKind,
}

/// The enumerated column set of one entity.
///
/// Registries are declared statically per entity; string keys resolve through
/// them rather than through any runtime attribute lookup.
#[derive(Clone, Copy, Debug)]
pub struct ColumnRegistry {
    pub table: &'static str,
    pub columns: &'static [ColumnDef],
}

/// Raw shape of one column's filter in a request.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    #[serde(default)]
    pub exact: Option<OneOrMany>,
    #[serde(default)]
    pub like: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// An exact filter value: a single string or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// A validated filter predicate kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Exact string equality
    Exact(String),
    /// SQL LIKE pattern match
    Like(String),
    /// Set membership over strings
    InSet(Vec<String>),
    /// Exact datetime equality
    TimeExact(NaiveDateTime),
    /// Inclusive datetime range; at least one bound is present
    TimeRange {
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    },
}

impl Filter {
    /// Validate a raw [FilterSpec] into a [Filter] for a column of the given
    /// kind. Returns `Ok(None)` when the spec carries nothing applicable.
    ///
    /// For text columns a `like` pattern wins over `exact` when both are
    /// present. For time columns `exact` wins over `from`/`to`, and a range
    /// with `to` earlier than `from` is rejected.
    pub fn from_spec(
        spec: &FilterSpec,
        kind: ColumnKind,
        datestr_format: Option<&str>,
    ) -> Result<Option<Self>, ExptDbError> {
        match kind {
            ColumnKind::Text => {
                if let Some(like) = &spec.like {
                    return Ok(Some(Filter::Like(like.clone())));
                }
                match &spec.exact {
                    Some(OneOrMany::One(value)) => Ok(Some(Filter::Exact(value.clone()))),
                    Some(OneOrMany::Many(values)) => Ok(Some(Filter::InSet(values.clone()))),
                    None => Ok(None),
                }
            }
            ColumnKind::Time => {
                match &spec.exact {
                    Some(OneOrMany::One(value)) => {
                        let exact = datetime::parse_datetime(value, datestr_format)?;
                        return Ok(Some(Filter::TimeExact(exact)));
                    }
                    Some(OneOrMany::Many(values)) => {
                        return Err(ExptDbError::InvalidDateTime {
                            value: format!("{values:?}"),
                            format: datestr_format
                                .unwrap_or(datetime::DEFAULT_DATETIME_FORMAT)
                                .to_string(),
                        });
                    }
                    None => (),
                }
                let from = spec
                    .from
                    .as_deref()
                    .map(|value| datetime::parse_datetime(value, datestr_format))
                    .transpose()?;
                let to = spec
                    .to
                    .as_deref()
                    .map(|value| datetime::parse_datetime(value, datestr_format))
                    .transpose()?;
                match (from, to) {
                    (None, None) => Ok(None),
                    (Some(from), Some(to)) if to < from => {
                        Err(ExptDbError::InvertedTimeRange { from, to })
                    }
                    (from, to) => Ok(Some(Filter::TimeRange { from, to })),
                }
            }
        }
    }
}

/// A validated predicate bound to a column expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    /// SQL column expression the predicate applies to
    pub sql: &'static str,
    pub filter: Filter,
}

/// Ordering direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    /// Validate a raw direction string.
    pub fn parse(value: &str) -> Result<Self, ExptDbError> {
        match value {
            "asc" => Ok(OrderDirection::Ascending),
            "desc" => Ok(OrderDirection::Descending),
            other => Err(ExptDbError::InvalidOrderDirection {
                value: other.to_string(),
            }),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASC",
            OrderDirection::Descending => "DESC",
        }
    }
}

/// One validated ORDER BY term.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderTerm {
    pub sql: &'static str,
    pub direction: OrderDirection,
}

impl ColumnRegistry {
    /// Resolve a filter/ordering key to its column, rejecting unknown keys.
    pub fn resolve(&self, key: &str) -> Result<&ColumnDef, ExptDbError> {
        self.columns
            .iter()
            .find(|column| column.key == key)
            .ok_or_else(|| ExptDbError::UnknownColumn {
                table: self.table,
                column: key.to_string(),
            })
    }

    /// Build the predicate conjunction for this entity from a raw filter
    /// mapping. Keys outside the registry are ignored; an absent mapping
    /// yields no predicates.
    pub fn build_filters(
        &self,
        filters: Option<&serde_json::Map<String, Value>>,
        datestr_format: Option<&str>,
    ) -> Result<Vec<Predicate>, ExptDbError> {
        let mut predicates = vec![];
        let Some(filters) = filters else {
            return Ok(predicates);
        };
        for column in self.columns {
            if let Some(raw) = filters.get(column.key) {
                let spec: FilterSpec = serde_json::from_value(raw.clone())?;
                if let Some(filter) = Filter::from_spec(&spec, column.kind, datestr_format)? {
                    predicates.push(Predicate {
                        sql: column.sql,
                        filter,
                    });
                }
            }
        }
        Ok(predicates)
    }

    /// Build the ORDER BY terms for this entity, rejecting unknown columns
    /// and invalid directions.
    pub fn build_ordering(
        &self,
        ordering: Option<&[OrderSpec]>,
    ) -> Result<Vec<OrderTerm>, ExptDbError> {
        let mut terms = vec![];
        let Some(ordering) = ordering else {
            return Ok(terms);
        };
        for spec in ordering {
            let column = self.resolve(&spec.name)?;
            let direction = OrderDirection::parse(&spec.order_by)?;
            terms.push(OrderTerm {
                sql: column.sql,
                direction,
            });
        }
        Ok(terms)
    }
}

/// Append the predicate conjunction to a query. The query must already carry
/// a WHERE clause for the predicates to extend.
pub fn apply_filters(builder: &mut QueryBuilder<'_, Sqlite>, predicates: &[Predicate]) {
    for predicate in predicates {
        match &predicate.filter {
            Filter::Exact(value) => {
                builder.push(" AND ");
                builder.push(predicate.sql);
                builder.push(" = ");
                builder.push_bind(value.clone());
            }
            Filter::Like(pattern) => {
                builder.push(" AND ");
                builder.push(predicate.sql);
                builder.push(" LIKE ");
                builder.push_bind(pattern.clone());
            }
            Filter::InSet(values) => {
                builder.push(" AND ");
                builder.push(predicate.sql);
                builder.push(" IN (");
                let mut separated = builder.separated(", ");
                for value in values {
                    separated.push_bind(value.clone());
                }
                builder.push(")");
            }
            Filter::TimeExact(value) => {
                builder.push(" AND ");
                builder.push(predicate.sql);
                builder.push(" = ");
                builder.push_bind(*value);
            }
            Filter::TimeRange { from, to } => {
                if let Some(from) = from {
                    builder.push(" AND ");
                    builder.push(predicate.sql);
                    builder.push(" >= ");
                    builder.push_bind(*from);
                }
                if let Some(to) = to {
                    builder.push(" AND ");
                    builder.push(predicate.sql);
                    builder.push(" <= ");
                    builder.push_bind(*to);
                }
            }
        }
    }
}

/// Append the ORDER BY clause to a query.
pub fn apply_ordering(builder: &mut QueryBuilder<'_, Sqlite>, terms: &[OrderTerm]) {
    if terms.is_empty() {
        return;
    }
    builder.push(" ORDER BY ");
    let mut separated = builder.separated(", ");
    for term in terms {
        separated.push(format!("{} {}", term.sql, term.direction.sql()));
    }
}

/// Append the LIMIT clause to a query.
pub fn apply_limit(builder: &mut QueryBuilder<'_, Sqlite>, limit: Option<i64>) {
    if let Some(limit) = limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }
}
