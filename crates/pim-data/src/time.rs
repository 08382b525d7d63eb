//! Time values as they appear in item payloads.
//!
//! A payload can carry four shapes of time: date-only values, UTC instants,
//! floating wall-clock times, and wall-clock times pinned to a named
//! timezone. [`CalTime::to_utc`] resolves every shape to a concrete instant
//! so the query engine can compare them.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A time value carried by an item payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalTime {
    /// A date without a time of day (all-day values).
    Date(NaiveDate),

    /// An exact UTC instant.
    Utc(DateTime<Utc>),

    /// A wall-clock time with no timezone attached.
    Floating(NaiveDateTime),

    /// A wall-clock time in a named timezone.
    Zoned {
        /// The local date and time.
        datetime: NaiveDateTime,
        /// The timezone identifier (e.g. "Europe/Berlin").
        tzid: String,
    },
}

impl CalTime {
    /// Resolves this value to a UTC instant.
    ///
    /// Date-only values resolve to midnight in `default_zone`, floating
    /// values are read as wall-clock time in `default_zone`, and zoned
    /// values use their own tzid, falling back to `default_zone` when the
    /// tzid is unknown. An ambiguous local time (DST fold) resolves to the
    /// earliest mapping; a skipped local time (DST gap) is read as UTC.
    pub fn to_utc(&self, default_zone: Tz) -> DateTime<Utc> {
        match self {
            CalTime::Date(date) => {
                local_to_utc(default_zone, date.and_time(NaiveTime::MIN))
            }
            CalTime::Utc(instant) => *instant,
            CalTime::Floating(datetime) => local_to_utc(default_zone, *datetime),
            CalTime::Zoned { datetime, tzid } => {
                let zone = tzid.parse::<Tz>().unwrap_or(default_zone);
                local_to_utc(zone, *datetime)
            }
        }
    }

    /// Returns the timezone identifier, if this value carries one.
    pub fn tzid(&self) -> Option<&str> {
        match self {
            CalTime::Zoned { tzid, .. } => Some(tzid),
            _ => None,
        }
    }

    /// Returns true for date-only values.
    pub fn is_date_only(&self) -> bool {
        matches!(self, CalTime::Date(_))
    }
}

/// Resolves a wall-clock time in `zone` to UTC.
fn local_to_utc(zone: Tz, datetime: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&datetime) {
        LocalResult::Single(instant) => instant.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&datetime),
    }
}

/// A timezone definition carried by a merged document.
///
/// Instances inside a [`Document`](crate::Document) reference zones by
/// tzid; the document carries one definition per referenced zone so a
/// consumer can interpret the instances without external lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeZoneDef {
    /// The identifier instances use to reference this zone.
    pub tzid: String,

    /// The canonical geographic location name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}
