//! Value types shared by several entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StaError;

// ---

/// Unit of a measured quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitOfMeasurement {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub definition: Option<String>,
}

/// Closed time interval, written `start/end` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, StaError> {
        // ---
        if end < start {
            return Err(StaError::illegal_argument(format!(
                "interval end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }
}

impl FromStr for TimeInterval {
    type Err = StaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let (start, end) = s
            .split_once('/')
            .ok_or_else(|| StaError::illegal_argument(format!("'{s}' is not an interval")))?;
        TimeInterval::new(parse_instant(start)?, parse_instant(end)?)
    }
}

impl TryFrom<String> for TimeInterval {
    type Error = StaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeInterval> for String {
    fn from(value: TimeInterval) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Either an instant or an interval; phenomenonTime may be both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeValue {
    Instant(DateTime<Utc>),
    Interval(TimeInterval),
}

impl TimeValue {
    /// Start and end columns for storage; an instant fills both.
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            TimeValue::Instant(t) => (*t, *t),
            TimeValue::Interval(i) => (i.start, i.end),
        }
    }
}

impl FromStr for TimeValue {
    type Err = StaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        if s.contains('/') {
            s.parse().map(TimeValue::Interval)
        } else {
            parse_instant(s).map(TimeValue::Instant)
        }
    }
}

impl TryFrom<String> for TimeValue {
    type Error = StaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeValue> for String {
    fn from(value: TimeValue) -> Self {
        match value {
            TimeValue::Instant(t) => t.to_rfc3339(),
            TimeValue::Interval(i) => i.to_string(),
        }
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, StaError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StaError::illegal_argument(format!("invalid time '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn instant_fills_both_bounds() {
        // ---
        let t: TimeValue = "2024-05-01T10:00:00Z".parse().unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(t.bounds(), (expected, expected));
    }

    #[test]
    fn interval_parses_and_rejects_reversed_bounds() {
        // ---
        let t: TimeValue = "2024-05-01T10:00:00Z/2024-05-01T11:00:00+01:00"
            .parse()
            .unwrap();
        let (start, end) = t.bounds();
        assert_eq!(start, end);

        let reversed = "2024-05-02T00:00:00Z/2024-05-01T00:00:00Z".parse::<TimeInterval>();
        assert!(matches!(reversed, Err(StaError::IllegalArgument(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("yesterday".parse::<TimeValue>().is_err());
    }
}
