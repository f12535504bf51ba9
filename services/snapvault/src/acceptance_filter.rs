use chrono::{DateTime, Local, NaiveDateTime, Utc};
use thiserror::Error;

/// Error parsing a time window bound
#[derive(Debug, Error)]
#[error("Invalid {field}: {value:?} is not an ISO-8601 date-time")]
pub struct InvalidTime {
    pub field: &'static str,
    pub value: String,
}

/// Decision on whether to persist a captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDecision {
    /// Persist the frame
    Accept,
    /// Keep the frame out of the archive with given reason
    Reject { reason: String },
}

impl CaptureDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, CaptureDecision::Accept)
    }
}

/// Optional capture window. Both bounds are inclusive and independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Build a window from optional request parameters.
    ///
    /// Returns `Ok(None)` when neither bound is given, so an absent window and
    /// an empty one behave the same.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, InvalidTime> {
        let start = parse_bound("start_time", start)?;
        let end = parse_bound("end_time", end)?;

        if start.is_none() && end.is_none() {
            return Ok(None);
        }

        Ok(Some(Self { start, end }))
    }

    /// Check `now` against every present bound
    pub fn evaluate(&self, now: DateTime<Utc>) -> CaptureDecision {
        if let Some(start) = self.start {
            if now < start {
                return CaptureDecision::Reject {
                    reason: format!("Capture at {} is before window start {}", now, start),
                };
            }
        }

        if let Some(end) = self.end {
            if now > end {
                return CaptureDecision::Reject {
                    reason: format!("Capture at {} is after window end {}", now, end),
                };
            }
        }

        CaptureDecision::Accept
    }
}

/// Whether a frame captured at `now` should be persisted.
pub fn accepts(now: DateTime<Utc>, window: Option<&TimeWindow>) -> bool {
    window.map_or(true, |w| w.evaluate(now).is_accept())
}

fn parse_bound(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, InvalidTime> {
    let value = match value.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(v) => v,
    };

    parse_instant(value).map(Some).ok_or_else(|| InvalidTime {
        field,
        value: value.to_string(),
    })
}

/// Parse an ISO-8601 instant.
///
/// Values without an offset are local wall-clock time, which is what an HTML
/// `datetime-local` input submits. On a DST fold the earlier instant wins; a
/// wall-clock time skipped by DST does not exist and fails to parse.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|local| local.with_timezone(&Utc))
}
