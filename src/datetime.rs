//! Datetime parsing with caller-supplied format strings, and the cycle clock
//! used by the harvest and plot controllers.

use chrono::format::{Item, Parsed, StrftimeItems};
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::error::ExptDbError;

/// Format accepted for datetime values when a request does not supply one.
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The epoch, used as the default for missing experiment date fields.
pub fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Check that a strftime format string is interpretable.
fn strftime_items(format: &str) -> Result<Vec<Item<'_>>, ExptDbError> {
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ExptDbError::InvalidDateTimeFormat {
            format: format.to_string(),
        });
    }
    Ok(items)
}

/// Parse a datetime string using a caller-supplied strftime format, falling
/// back to [DEFAULT_DATETIME_FORMAT].
///
/// Time fields the format omits default to zero, so cycle-style formats such
/// as `%Y%m%d%H` parse to the top of the hour. Date fields stay required.
pub fn parse_datetime(value: &str, format: Option<&str>) -> Result<NaiveDateTime, ExptDbError> {
    let format = format.unwrap_or(DEFAULT_DATETIME_FORMAT);
    let invalid = || ExptDbError::InvalidDateTime {
        value: value.to_string(),
        format: format.to_string(),
    };
    let items = strftime_items(format)?;
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, value, items.into_iter()).map_err(|_| invalid())?;
    if parsed.hour_div_12.is_none() && parsed.hour_mod_12.is_none() {
        parsed.set_hour(0).map_err(|_| invalid())?;
    }
    if parsed.minute.is_none() {
        parsed.set_minute(0).map_err(|_| invalid())?;
    }
    if parsed.second.is_none() {
        parsed.set_second(0).map_err(|_| invalid())?;
    }
    parsed.to_naive_datetime_with_offset(0).map_err(|_| invalid())
}

/// Parse an optional datetime string, treating absent and literal `"None"`
/// values as the epoch.
pub fn parse_datetime_or_epoch(
    value: Option<&str>,
    format: Option<&str>,
) -> Result<NaiveDateTime, ExptDbError> {
    match value {
        None | Some("None") => Ok(epoch()),
        Some(value) => parse_datetime(value, format),
    }
}

/// Format a datetime using a caller-supplied strftime format, rejecting
/// uninterpretable format strings instead of panicking.
pub fn format_datetime(value: &NaiveDateTime, format: &str) -> Result<String, ExptDbError> {
    let items = strftime_items(format)?;
    Ok(value.format_with_items(items.into_iter()).to_string())
}

/// A date range with a cycle cursor.
///
/// The harvest controller walks the cursor from `start` to `end` at a fixed
/// step; `cycle_seconds` exposes the cursor's offset from midnight, which is
/// what harvest file configs key their cycle lists on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    current: NaiveDateTime,
}

impl DateRange {
    /// Return a new DateRange with the cursor at `start`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        DateRange {
            start,
            end,
            current: start,
        }
    }

    /// The current cursor position.
    pub fn current(&self) -> NaiveDateTime {
        self.current
    }

    /// Seconds elapsed since midnight of the cursor's day.
    pub fn cycle_seconds(&self) -> i64 {
        i64::from(self.current.time().num_seconds_from_midnight())
    }

    /// Advance the cursor by the given number of days and hours.
    pub fn increment(&mut self, days: i64, hours: i64) {
        self.current += Duration::days(days) + Duration::hours(hours);
    }

    /// Whether the cursor has reached or passed the end bound.
    pub fn at_end(&self) -> bool {
        self.current >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default_format() {
        let parsed = parse_datetime("2016-01-01 06:00:00", None).unwrap();
        assert_eq!(
            NaiveDate::from_ymd_opt(2016, 1, 1)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
            parsed
        );
    }

    #[test]
    fn parse_custom_format() {
        let parsed = parse_datetime("2016-01-01_06:00:00", Some("%Y-%m-%d_%H:%M:%S")).unwrap();
        assert_eq!(6, parsed.time().hour());
    }

    #[test]
    fn omitted_time_fields_default_to_zero() {
        let parsed = parse_datetime("2016010106", Some("%Y%m%d%H")).unwrap();
        assert_eq!(
            NaiveDate::from_ymd_opt(2016, 1, 1)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
            parsed
        );
        let parsed = parse_datetime("2016-01-01", Some("%Y-%m-%d")).unwrap();
        assert_eq!(
            NaiveDate::from_ymd_opt(2016, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            parsed
        );
    }

    #[test]
    fn omitted_date_fields_stay_required() {
        let result = parse_datetime("06:00:00", Some("%H:%M:%S"));
        assert!(matches!(
            result,
            Err(ExptDbError::InvalidDateTime { value: _, format: _ })
        ));
    }

    #[test]
    fn parse_rejects_mismatched_value() {
        let result = parse_datetime("not a time", None);
        assert!(matches!(
            result,
            Err(ExptDbError::InvalidDateTime { value: _, format: _ })
        ));
    }

    #[test]
    fn parse_rejects_bad_format_string() {
        let result = parse_datetime("2016-01-01 06:00:00", Some("%Q"));
        assert!(matches!(
            result,
            Err(ExptDbError::InvalidDateTimeFormat { format: _ })
        ));
    }

    #[test]
    fn missing_value_defaults_to_epoch() {
        assert_eq!(epoch(), parse_datetime_or_epoch(None, None).unwrap());
        assert_eq!(epoch(), parse_datetime_or_epoch(Some("None"), None).unwrap());
    }

    #[test]
    fn format_round_trip() {
        let value = parse_datetime("2016-01-01 06:00:00", None).unwrap();
        let formatted = format_datetime(&value, "%Y%m%d%H").unwrap();
        assert_eq!("2016010106", formatted);
    }

    #[test]
    fn cycle_clock_walks_range() {
        let start = parse_datetime("2016-01-01 00:00:00", None).unwrap();
        let end = parse_datetime("2016-01-02 00:00:00", None).unwrap();
        let mut range = DateRange::new(start, end);

        let mut offsets = vec![];
        while !range.at_end() {
            offsets.push(range.cycle_seconds());
            range.increment(0, 6);
        }
        assert_eq!(vec![0, 21600, 43200, 64800], offsets);
        assert!(range.at_end());
    }
}
