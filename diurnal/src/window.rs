// Window resolution: turns loosely specified search windows into exact
// timestamp pairs aligned to the signal's sampling grid.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signal::Signal;
use crate::DiurnalError;

const FIRST_MARKER: &str = "first";
const LAST_MARKER: &str = "last";
const MIN_WINDOW_SAMPLES: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub enum Bound {
    Time(NaiveDateTime),
    /// A calendar date, a date-time, or one of the markers `first`/`last`.
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum WindowSpec {
    Range(Bound, Bound),
    Day(NaiveDate),
    /// The first N days counted from the signal's first sample.
    Days(u32),
}

impl From<(NaiveDateTime, NaiveDateTime)> for WindowSpec {
    fn from((start, end): (NaiveDateTime, NaiveDateTime)) -> Self {
        WindowSpec::Range(Bound::Time(start), Bound::Time(end))
    }
}

impl From<(&str, &str)> for WindowSpec {
    fn from((start, end): (&str, &str)) -> Self {
        WindowSpec::Range(Bound::Text(start.to_string()), Bound::Text(end.to_string()))
    }
}

impl From<NaiveDate> for WindowSpec {
    fn from(day: NaiveDate) -> Self {
        WindowSpec::Day(day)
    }
}

impl From<u32> for WindowSpec {
    fn from(days: u32) -> Self {
        WindowSpec::Days(days)
    }
}

impl From<ExactWindow> for WindowSpec {
    fn from(window: ExactWindow) -> Self {
        WindowSpec::from((window.start, window.end))
    }
}

/// Closed interval `[start, end]` with `start < end`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExactWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ExactWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, DiurnalError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(DiurnalError::InvalidWindow(format!(
                "end of window ({end}) is not after its start ({start})"
            )))
        }
    }

    pub fn contains(&self, time: NaiveDateTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Resolve `spec` against `signal` into a grid-aligned window.
///
/// Returns `Ok(None)` when the window holds fewer than three samples.
pub fn resolve_window(
    spec: &WindowSpec,
    signal: &Signal,
) -> Result<Option<ExactWindow>, DiurnalError> {
    let Some(raw) = raw_window(spec, signal)? else {
        return Ok(None);
    };

    let range = signal.index_range(raw.start, raw.end);
    if range.len() < MIN_WINDOW_SAMPLES {
        return Ok(None);
    }
    let step = match signal.median_gap(range) {
        Some(gap) => resolution_seconds(gap),
        None => return Ok(None),
    };
    if step <= 0 {
        return Ok(Some(raw));
    }

    let (Some(start), Some(end)) = (ceil_to(raw.start, step), floor_to(raw.end, step)) else {
        return Err(DiurnalError::InvalidWindow(format!(
            "window {} to {} cannot be aligned to a {step}s grid",
            raw.start, raw.end
        )));
    };
    if start >= end {
        debug!(start = %raw.start, end = %raw.end, step, "window collapsed after grid alignment");
        return Ok(None);
    }
    Ok(Some(ExactWindow { start, end }))
}

/// Unaligned bounds of `spec`; `None` when they depend on an empty signal.
pub fn raw_window(
    spec: &WindowSpec,
    signal: &Signal,
) -> Result<Option<ExactWindow>, DiurnalError> {
    let (start, end) = match spec {
        WindowSpec::Range(Bound::Time(start), Bound::Time(end)) => (*start, *end),
        WindowSpec::Range(Bound::Text(start), Bound::Text(end)) => {
            let start = if start.trim() == FIRST_MARKER {
                match signal.first_time() {
                    Some(t) => t,
                    None => return Ok(None),
                }
            } else {
                parse_timestamp(start)?
            };
            let end = if end.trim() == LAST_MARKER {
                match signal.last_time() {
                    Some(t) => t,
                    None => return Ok(None),
                }
            } else {
                end_of_day(parse_timestamp(end)?.date())
            };
            (start, end)
        }
        WindowSpec::Range(start, end) => {
            return Err(DiurnalError::TypeMismatch(format!(
                "window bounds must both be timestamps or both be text, got {start:?} and {end:?}"
            )))
        }
        WindowSpec::Day(day) => (start_of_day(*day), end_of_day(*day)),
        WindowSpec::Days(days) => {
            let Some(start) = signal.first_time() else {
                return Ok(None);
            };
            let end = Duration::try_days(i64::from(*days))
                .and_then(|span| start.checked_add_signed(span))
                .ok_or_else(|| {
                    DiurnalError::InvalidWindow(format!("{days} days from {start} is out of range"))
                })?;
            (start, end_of_day(end.date()))
        }
    };
    ExactWindow::new(start, end).map(Some)
}

pub fn start_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::default())
}

pub fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default())
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, DiurnalError> {
    let text = text.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(t);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(start_of_day)
        .map_err(|e| DiurnalError::InvalidWindow(format!("cannot parse '{text}' as a date: {e}")))
}

/// Sampling grid step: whole minutes for gaps of a minute or more, else whole seconds.
fn resolution_seconds(gap: Duration) -> i64 {
    let secs = gap.num_seconds();
    if secs >= 60 {
        secs / 60 * 60
    } else {
        secs
    }
}

fn floor_to(time: NaiveDateTime, step: i64) -> Option<NaiveDateTime> {
    let utc = time.and_utc();
    let rem = utc.timestamp().rem_euclid(step);
    time.checked_sub_signed(Duration::try_seconds(rem)?)?
        .checked_sub_signed(Duration::nanoseconds(i64::from(utc.timestamp_subsec_nanos())))
}

fn ceil_to(time: NaiveDateTime, step: i64) -> Option<NaiveDateTime> {
    let floor = floor_to(time, step)?;
    if floor == time {
        Some(time)
    } else {
        floor.checked_add_signed(Duration::try_seconds(step)?)
    }
}
