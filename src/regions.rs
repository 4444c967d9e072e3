//! Region registration and lookup.
//!
//! A region is a named latitude band over the full longitude range. Regions
//! are insert-only: a PUT stores only regions whose (name, bounds) identity
//! is not already present and reports the inserted and matched record sets.

use std::collections::HashSet;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, error};

use crate::error::ExptDbError;
use crate::filters::{self, OrderTerm};
use crate::models::{DbActionResponse, Method, Request, ResponseDetails};
use crate::tables::{RegionRow, REGION_COLUMNS};

const MIN_LONG: f64 = -180.0;
const MAX_LONG: f64 = 180.0;

const FILTER_NONE: &str = "none";
const FILTER_BY_NAME: &str = "by_name";
const FILTER_BY_DATA: &str = "by_data";

/// Raw region data in a request body.
#[derive(Clone, Debug, Deserialize)]
pub struct RegionData {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
}

#[derive(Debug, Deserialize)]
struct RegionDataBody {
    regions: Vec<RegionData>,
}

#[derive(Debug, Deserialize)]
struct RegionNameBody {
    regions: Vec<String>,
}

/// A validated region with its derived bounds polygon and identity hash.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
    /// Bounds polygon over the full longitude range
    pub bounds: String,
    /// Name and bounds concatenated, the stored identity of the region
    pub hash_val: String,
}

impl Region {
    /// Validate latitude bounds and derive the polygon and hash.
    pub fn new(name: &str, min_lat: f64, max_lat: f64) -> Result<Self, ExptDbError> {
        if min_lat.abs() > 90.0 || max_lat.abs() > 90.0 {
            return Err(ExptDbError::LatitudeOutOfRange { min_lat, max_lat });
        }
        if min_lat > max_lat {
            return Err(ExptDbError::InvertedLatitudeBounds { min_lat, max_lat });
        }
        let bounds = format!(
            "POLYGON(({MIN_LONG:?} {max_lat:?}),({MAX_LONG:?} {max_lat:?}),\
             ({MAX_LONG:?} {min_lat:?}),({MIN_LONG:?} {min_lat:?}),\
             ({MIN_LONG:?} {max_lat:?}))"
        );
        let hash_val = format!("{name}{bounds}");
        Ok(Self {
            name: name.to_string(),
            min_lat,
            max_lat,
            bounds,
            hash_val,
        })
    }
}

/// The stock latitude bands most reports are aggregated over.
pub fn default_regions() -> Result<Vec<Region>, ExptDbError> {
    [
        ("equatorial", -5.0, 5.0),
        ("global", -90.0, 90.0),
        ("north_hemis", 20.0, 60.0),
        ("tropics", -20.0, 20.0),
        ("south_hemis", -60.0, -20.0),
    ]
    .into_iter()
    .map(|(name, min_lat, max_lat)| Region::new(name, min_lat, max_lat))
    .collect()
}

/// GET filter mode, selected by the `filter_type` request parameter.
#[derive(Clone, Debug)]
enum RegionFilter {
    /// Return all regions
    All,
    /// Match on region names
    ByName(Vec<String>),
    /// Match on full region identity (name and bounds)
    ByData(Vec<Region>),
}

/// A validated region request.
#[derive(Clone, Debug)]
pub struct RegionRequest {
    request: Value,
    method: Method,
    filter: RegionFilter,
    put_regions: Vec<Region>,
    ordering: Vec<OrderTerm>,
    limit: Option<i64>,
}

impl RegionRequest {
    /// Validate a raw request value into a [RegionRequest].
    pub fn from_value(value: &Value) -> Result<Self, ExptDbError> {
        let request = Request::from_value(value)?;
        let method = request.method()?;
        let params = request.params();
        let ordering = REGION_COLUMNS.build_ordering(params.ordering.as_deref())?;
        let limit = params.effective_limit();
        let (filter, put_regions) = match method {
            Method::Get => {
                let filter = match params.filter_type.as_deref() {
                    None | Some(FILTER_NONE) => RegionFilter::All,
                    Some(FILTER_BY_NAME) => {
                        let body: RegionNameBody =
                            serde_json::from_value(request.required_body()?.clone())?;
                        RegionFilter::ByName(dedup(body.regions))
                    }
                    Some(FILTER_BY_DATA) => {
                        RegionFilter::ByData(parse_regions(request.required_body()?)?)
                    }
                    Some(other) => {
                        return Err(ExptDbError::InvalidFilterType {
                            value: other.to_string(),
                        })
                    }
                };
                (filter, vec![])
            }
            Method::Put => {
                let regions = parse_regions(request.required_body()?)?;
                (RegionFilter::All, regions)
            }
        };
        Ok(Self {
            request: value.clone(),
            method,
            filter,
            put_regions,
            ordering,
            limit,
        })
    }

    /// Execute the request, converting any failure into a failure response.
    pub async fn submit(&self, pool: &SqlitePool) -> DbActionResponse {
        let result = match self.method {
            Method::Get => self.get(pool).await,
            Method::Put => self.put(pool).await,
        };
        result.unwrap_or_else(|err| {
            error!("region request failed: {}", err);
            DbActionResponse::failed(
                self.request.clone(),
                "problems encountered handling region request",
                &err,
            )
        })
    }

    async fn get(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        let rows = match &self.filter {
            RegionFilter::All => self.select(pool, None, None).await?,
            RegionFilter::ByName(names) => self.select(pool, None, Some(names)).await?,
            RegionFilter::ByData(regions) => {
                let hash_vals: Vec<String> =
                    regions.iter().map(|region| region.hash_val.clone()).collect();
                // An empty identity set matches everything, not nothing.
                let hash_vals = (!hash_vals.is_empty()).then_some(hash_vals);
                self.select(pool, hash_vals.as_deref(), None).await?
            }
        };
        debug!("region request matched {} records", rows.len());
        let message = format!("Request returned {} record/s", rows.len());
        Ok(DbActionResponse::ok(
            self.request.clone(),
            &message,
            ResponseDetails::for_records(&rows)?,
        ))
    }

    async fn put(&self, pool: &SqlitePool) -> Result<DbActionResponse, ExptDbError> {
        let hash_vals: Vec<String> = self
            .put_regions
            .iter()
            .map(|region| region.hash_val.clone())
            .collect();
        let existing = self.select(pool, Some(&hash_vals), None).await?;
        let existing_hashes: HashSet<String> = existing
            .iter()
            .map(|row| format!("{}{}", row.name, row.bounds))
            .collect();

        let now = Utc::now().naive_utc();
        let mut inserted_hashes = vec![];
        let mut tx = pool.begin().await?;
        for region in &self.put_regions {
            if existing_hashes.contains(&region.hash_val) {
                continue;
            }
            sqlx::query("INSERT INTO regions (name, bounds, created_at) VALUES (?, ?, ?)")
                .bind(&region.name)
                .bind(&region.bounds)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            inserted_hashes.push(region.hash_val.clone());
        }
        tx.commit().await?;

        let inserted = self.select(pool, Some(&inserted_hashes), None).await?;
        let matched = self.select(pool, Some(&hash_vals), None).await?;
        debug!(
            "region put inserted {} of {} requested records",
            inserted.len(),
            self.put_regions.len()
        );
        let message = format!("Inserted {} new region/s", inserted.len());
        let details = ResponseDetails {
            record_count: Some(matched.len()),
            records: None,
            action: None,
            id: None,
            inserted_records: Some(serde_json::to_value(&inserted)?),
            matched_records: Some(serde_json::to_value(&matched)?),
        };
        Ok(DbActionResponse::ok(self.request.clone(), &message, details))
    }

    async fn select(
        &self,
        pool: &SqlitePool,
        hash_vals: Option<&[String]>,
        names: Option<&[String]>,
    ) -> Result<Vec<RegionRow>, ExptDbError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, bounds, created_at, updated_at FROM regions WHERE 1 = 1",
        );
        if let Some(names) = names {
            push_membership(&mut builder, "name", names);
        }
        if let Some(hash_vals) = hash_vals {
            push_membership(&mut builder, "name || bounds", hash_vals);
        }
        filters::apply_ordering(&mut builder, &self.ordering);
        filters::apply_limit(&mut builder, self.limit);
        let rows = builder
            .build_query_as::<RegionRow>()
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}

fn push_membership(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[String]) {
    if values.is_empty() {
        builder.push(" AND 0 = 1");
        return;
    }
    builder.push(" AND ");
    builder.push(column);
    builder.push(" IN (");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    builder.push(")");
}

fn parse_regions(body: &Value) -> Result<Vec<Region>, ExptDbError> {
    let body: RegionDataBody = serde_json::from_value(body.clone())?;
    let mut seen = HashSet::new();
    let mut regions = vec![];
    for data in body.regions {
        let region = Region::new(&data.name, data.min_lat, data.max_lat)?;
        if seen.insert(region.hash_val.clone()) {
            regions.push(region);
        }
    }
    Ok(regions)
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{region_put, test_pool};
    use serde_json::json;

    const GLOBAL_BOUNDS: &str = "POLYGON((-180.0 90.0),(180.0 90.0),\
                                 (180.0 -90.0),(-180.0 -90.0),(-180.0 90.0))";

    #[test]
    fn bounds_polygon_format() {
        let region = Region::new("global", -90.0, 90.0).unwrap();
        assert_eq!(GLOBAL_BOUNDS, region.bounds);
        assert_eq!(format!("global{GLOBAL_BOUNDS}"), region.hash_val);
    }

    #[test]
    fn latitude_out_of_range_is_rejected() {
        let result = Region::new("bad", -91.0, 45.0);
        assert!(matches!(
            result,
            Err(ExptDbError::LatitudeOutOfRange {
                min_lat: _,
                max_lat: _
            })
        ));
    }

    #[test]
    fn inverted_latitude_bounds_are_rejected() {
        let result = Region::new("bad", 45.0, -45.0);
        assert!(matches!(
            result,
            Err(ExptDbError::InvertedLatitudeBounds {
                min_lat: _,
                max_lat: _
            })
        ));
    }

    #[test]
    fn five_default_regions() {
        let names: Vec<String> = default_regions()
            .unwrap()
            .into_iter()
            .map(|region| region.name)
            .collect();
        assert_eq!(
            vec!["equatorial", "global", "north_hemis", "tropics", "south_hemis"],
            names
        );
    }

    #[test]
    fn unknown_filter_type_is_rejected() {
        let value = json!({
            "name": "region",
            "method": "GET",
            "params": {"filter_type": "by_shape"}
        });
        let result = RegionRequest::from_value(&value);
        assert!(matches!(
            result,
            Err(ExptDbError::InvalidFilterType { value: _ })
        ));
    }

    #[tokio::test]
    async fn put_is_idempotent_by_hash() {
        let pool = test_pool().await;
        let value = region_put(json!([
            {"name": "global", "min_lat": -90.0, "max_lat": 90.0},
            {"name": "tropics", "min_lat": -20.0, "max_lat": 20.0},
        ]));
        let request = RegionRequest::from_value(&value).unwrap();

        let first = request.submit(&pool).await;
        assert!(first.success);
        assert_eq!("Inserted 2 new region/s", first.message);

        let second = request.submit(&pool).await;
        assert!(second.success);
        assert_eq!("Inserted 0 new region/s", second.message);
        let details = second.details.unwrap();
        assert_eq!(Some(2), details.record_count);
        assert_eq!(
            0,
            details.inserted_records.unwrap().as_array().unwrap().len()
        );
        assert_eq!(
            2,
            details.matched_records.unwrap().as_array().unwrap().len()
        );
    }

    #[tokio::test]
    async fn duplicate_put_inputs_collapse() {
        let pool = test_pool().await;
        let value = region_put(json!([
            {"name": "global", "min_lat": -90.0, "max_lat": 90.0},
            {"name": "global", "min_lat": -90.0, "max_lat": 90.0},
        ]));
        let response = RegionRequest::from_value(&value).unwrap().submit(&pool).await;
        assert!(response.success);
        assert_eq!("Inserted 1 new region/s", response.message);
    }

    #[tokio::test]
    async fn get_by_name_returns_stored_bounds() {
        let pool = test_pool().await;
        let put = region_put(json!([
            {"name": "global", "min_lat": -90.0, "max_lat": 90.0},
            {"name": "tropics", "min_lat": -20.0, "max_lat": 20.0},
        ]));
        RegionRequest::from_value(&put).unwrap().submit(&pool).await;

        let get = json!({
            "name": "region",
            "method": "GET",
            "params": {"filter_type": "by_name"},
            "body": {"regions": ["global"]}
        });
        let response = RegionRequest::from_value(&get).unwrap().submit(&pool).await;
        assert!(response.success);
        let details = response.details.unwrap();
        assert_eq!(Some(1), details.record_count);
        let records = details.records.unwrap();
        assert_eq!("global", records[0]["name"]);
        assert_eq!(GLOBAL_BOUNDS, records[0]["bounds"]);
    }

    #[tokio::test]
    async fn get_by_data_matches_identity() {
        let pool = test_pool().await;
        let put = region_put(json!([
            {"name": "global", "min_lat": -90.0, "max_lat": 90.0},
            {"name": "tropics", "min_lat": -20.0, "max_lat": 20.0},
        ]));
        RegionRequest::from_value(&put).unwrap().submit(&pool).await;

        // Same name, different bounds: no match.
        let get = json!({
            "name": "region",
            "method": "GET",
            "params": {"filter_type": "by_data"},
            "body": {"regions": [{"name": "global", "min_lat": -45.0, "max_lat": 45.0}]}
        });
        let response = RegionRequest::from_value(&get).unwrap().submit(&pool).await;
        assert!(response.success);
        assert!(response.details.unwrap().records.is_none());
    }
}
