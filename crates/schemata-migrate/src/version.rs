use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store key holding the persisted schema version.
pub const SCHEMA_DATE_KEY: &str = "schemaDate";

/// Oldest schema an upgrade can start from. Bumped with every major release.
pub const MIN_SCHEMA_DATE: SchemaDate = SchemaDate::ymd(2016, 9, 7);

/// Target of the last registered step. Must move together with the registry.
pub const LATEST_SCHEMA_DATE: SchemaDate = SchemaDate::ymd(2017, 4, 16);

/// A schema version: UTC milliseconds since the Unix epoch.
///
/// Steps are named after the day they were written, so versions are built
/// from calendar dates and compare chronologically.
///
/// ```
/// use schemata_migrate::SchemaDate;
///
/// let v = SchemaDate::ymd(2016, 9, 22);
/// assert_eq!(v.as_millis(), 1_474_502_400_000);
/// assert_eq!(v.to_string(), "2016/09/22");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDate(i64);

impl SchemaDate {
    /// Wrap a raw millisecond timestamp.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Midnight UTC of the given calendar day (`month` and `day` are 1-based).
    pub const fn ymd(year: i32, month: u32, day: u32) -> Self {
        Self(days_from_civil(year, month, day) * 86_400_000)
    }

    /// Raw millisecond timestamp.
    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

/// Days since 1970-01-01 in the proleptic Gregorian calendar.
///
/// Hand-written because chrono's date constructors are not `const fn` on our
/// MSRV, and the schema bounds are constants.
const fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year as i64 - 1 } else { year as i64 };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

impl fmt::Display for SchemaDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(at) => write!(f, "{}", at.format("%Y/%m/%d")),
            None => write!(f, "@{}", self.0),
        }
    }
}

/// Parses the persisted form: a decimal millisecond timestamp.
impl FromStr for SchemaDate {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}
