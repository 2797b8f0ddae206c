// Occurrence timing: average hour-of-day of daily extrema over a calibration
// window, and the narrowed candidate windows built from it.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diurnal::search_calendar_day;
use crate::signal::Signal;
use crate::window::{resolve_window, start_of_day, ExactWindow, WindowSpec};
use crate::{DiurnalError, ExtremaParams};

const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalibrationStatistics {
    pub mean_min_hour: f64,
    pub mean_max_hour: f64,
}

impl CalibrationStatistics {
    /// Candidate windows of `radius_hours` either side of the mean minimum and
    /// maximum hours on `day`.
    pub fn occurrence_windows(
        &self,
        day: NaiveDate,
        radius_hours: f64,
    ) -> Result<(ExactWindow, ExactWindow), DiurnalError> {
        Ok((
            occurrence_window(day, self.mean_min_hour, radius_hours)?,
            occurrence_window(day, self.mean_max_hour, radius_hours)?,
        ))
    }
}

/// Mean occurrence hours of the extrema found over the first
/// `params.calibration_days` days of `signal`.
pub fn calibrate(
    signal: &Signal,
    params: &ExtremaParams,
) -> Result<CalibrationStatistics, DiurnalError> {
    let spec = WindowSpec::Days(params.calibration_days);
    let window = resolve_window(&spec, signal)?.ok_or_else(|| {
        DiurnalError::InvalidCalibration(format!(
            "calibration window of {} days holds no data",
            params.calibration_days
        ))
    })?;
    let calibration = signal.slice(window.start, window.end);

    let mut min_hours = Vec::new();
    let mut max_hours = Vec::new();
    for day in calibration.days() {
        let (min, max) = search_calendar_day(&calibration, day, params)?;
        match min {
            Some(extremum) => min_hours.push(rounded_hour(extremum.time)),
            None => warn!(%day, "no minimum found in calibration day"),
        }
        match max {
            Some(extremum) => max_hours.push(rounded_hour(extremum.time)),
            None => warn!(%day, "no maximum found in calibration day"),
        }
    }

    let mean_min_hour = mean_occurrence(&min_hours).ok_or_else(|| {
        DiurnalError::InvalidCalibration("no minima found in calibration window".into())
    })?;
    let mean_max_hour = mean_occurrence(&max_hours).ok_or_else(|| {
        DiurnalError::InvalidCalibration("no maxima found in calibration window".into())
    })?;
    debug!(
        mean_min_hour,
        mean_max_hour,
        days = calibration.days().len(),
        "calibrated extrema timing"
    );
    Ok(CalibrationStatistics {
        mean_min_hour,
        mean_max_hour,
    })
}

/// Hour of day after rounding `time` to the nearest hour (ties to even).
pub fn rounded_hour(time: NaiveDateTime) -> u32 {
    let secs = time.num_seconds_from_midnight();
    let hour = secs / 3600;
    let rem = secs % 3600;
    let past_half = rem > 1800 || (rem == 1800 && (time.nanosecond() > 0 || hour % 2 == 1));
    if past_half {
        (hour + 1) % 24
    } else {
        hour
    }
}

/// Arithmetic mean rounded to three decimals.
pub fn mean_occurrence(hours: &[u32]) -> Option<f64> {
    if hours.is_empty() {
        return None;
    }
    let mean = hours.iter().map(|&h| f64::from(h)).sum::<f64>() / hours.len() as f64;
    Some((mean * 1000.0).round() / 1000.0)
}

/// `[day + center - radius, day + center + radius]`, rounded to whole seconds.
pub fn occurrence_window(
    day: NaiveDate,
    center_hours: f64,
    radius_hours: f64,
) -> Result<ExactWindow, DiurnalError> {
    let midnight = start_of_day(day);
    let offset = |hours: f64| {
        hours_to_duration(hours)
            .and_then(|span| midnight.checked_add_signed(span))
            .ok_or_else(|| {
                DiurnalError::InvalidWindow(format!("{hours} hours from {midnight} is out of range"))
            })
    };
    ExactWindow::new(
        offset(center_hours - radius_hours)?,
        offset(center_hours + radius_hours)?,
    )
}

/// Whole-second duration of `hours`; `None` when it is not representable.
pub(crate) fn hours_to_duration(hours: f64) -> Option<Duration> {
    let secs = (hours * SECONDS_PER_HOUR as f64).round();
    if !secs.is_finite() || secs.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_seconds(secs as i64)
}

/// Wall-clock time (to the minute) of a fractional hour, wrapped into one day.
/// Non-finite input maps to midnight.
pub fn hour_as_time(hours: f64) -> NaiveTime {
    if !hours.is_finite() {
        return NaiveTime::default();
    }
    let secs = (hours.rem_euclid(24.0) * SECONDS_PER_HOUR as f64).round() as i64;
    let secs = secs.rem_euclid(SECONDS_PER_DAY);
    let secs = secs - secs % 60;
    NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0).unwrap_or_default()
}
