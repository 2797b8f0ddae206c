//! Daily minimum/maximum extraction for diurnally varying time series.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod diurnal;
pub mod extrema;
pub mod predict;
pub mod signal;
pub mod window;

pub use diurnal::{DailyRecord, DiurnalExtrema, ResultTable};
pub use extrema::{find_real_extremum, is_genuine_extremum, locate_extremum, Extremum};
pub use predict::{hour_as_time, CalibrationStatistics};
pub use signal::Signal;
pub use window::{resolve_window, Bound, ExactWindow, WindowSpec};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiurnalError {
    #[error("invalid window: {0}")]
    InvalidWindow(String),
    #[error("window bound types do not match: {0}")]
    TypeMismatch(String),
    #[error("invalid mode '{0}'")]
    InvalidMode(String),
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),
    #[error("date={0} not found in result table")]
    DayNotFound(NaiveDate),
    #[error("invalid threshold: {0}")]
    InvalidThreshold(f64),
}

/// Which extremum a search looks for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Extreme {
    Min,
    Max,
}

impl Extreme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extreme::Min => "min",
            Extreme::Max => "max",
        }
    }
}

impl fmt::Display for Extreme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Extreme {
    type Err = DiurnalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "min" => Ok(Extreme::Min),
            "max" => Ok(Extreme::Max),
            other => Err(DiurnalError::InvalidMode(other.to_string())),
        }
    }
}

/// Field selection for manual overrides.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Which {
    Min,
    Max,
    Both,
}

impl Which {
    pub fn extremes(&self) -> &'static [Extreme] {
        match self {
            Which::Min => &[Extreme::Min],
            Which::Max => &[Extreme::Max],
            Which::Both => &[Extreme::Min, Extreme::Max],
        }
    }
}

impl From<Extreme> for Which {
    fn from(value: Extreme) -> Self {
        match value {
            Extreme::Min => Which::Min,
            Extreme::Max => Which::Max,
        }
    }
}

impl fmt::Display for Which {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Which::Min => f.write_str("min"),
            Which::Max => f.write_str("max"),
            Which::Both => f.write_str("both"),
        }
    }
}

impl FromStr for Which {
    type Err = DiurnalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "min" => Ok(Which::Min),
            "max" => Ok(Which::Max),
            "both" => Ok(Which::Both),
            other => Err(DiurnalError::InvalidMode(other.to_string())),
        }
    }
}

/// Upper bound for `occurrence_radius_hours` and `max_search_hours` (one leap year).
pub const MAX_WINDOW_HOURS: f64 = 24.0 * 366.0;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExtremaParams {
    /// Search for the maximum only after the minimum has been found.
    pub min_first: bool,
    /// Let the maximum search run past midnight (with `min_first`).
    pub max_next_day: bool,
    /// Narrow each day's search around historically observed occurrence hours.
    pub predict_timing: bool,
    /// Calibration window for `predict_timing`, in days from the signal start.
    pub calibration_days: u32,
    /// Minimum daily amplitude, in signal units.
    pub threshold: Option<f64>,
    pub station: Option<String>,
    /// Half-width of the predicted candidate windows.
    pub occurrence_radius_hours: f64,
    /// Length of the maximum search window that starts at the minimum.
    pub max_search_hours: f64,
}

impl Default for ExtremaParams {
    fn default() -> Self {
        Self {
            min_first: true,
            max_next_day: true,
            predict_timing: false,
            calibration_days: 4,
            threshold: None,
            station: None,
            occurrence_radius_hours: 8.0,
            max_search_hours: 18.0,
        }
    }
}

impl ExtremaParams {
    pub fn validate(&self) -> Result<(), DiurnalError> {
        if let Some(threshold) = self.threshold {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(DiurnalError::InvalidThreshold(threshold));
            }
        }
        let in_range = |hours: f64| hours.is_finite() && hours > 0.0 && hours <= MAX_WINDOW_HOURS;
        if !in_range(self.occurrence_radius_hours) {
            return Err(DiurnalError::InvalidWindow(format!(
                "occurrence radius must be in (0, {MAX_WINDOW_HOURS}] hours, got {}",
                self.occurrence_radius_hours
            )));
        }
        if !in_range(self.max_search_hours) {
            return Err(DiurnalError::InvalidWindow(format!(
                "maximum search window must be in (0, {MAX_WINDOW_HOURS}] hours, got {}",
                self.max_search_hours
            )));
        }
        Ok(())
    }

    /// Whether the maximum is searched in a window anchored at the minimum.
    pub fn max_follows_min(&self) -> bool {
        self.min_first && self.max_next_day
    }

    /// Stable fingerprint of the configuration, for tagging exported tables.
    pub fn params_hash_sha256(&self) -> Result<String, DiurnalError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| DiurnalError::InvalidCalibration(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("min".parse::<Extreme>().unwrap(), Extreme::Min);
        assert_eq!(" max ".parse::<Extreme>().unwrap(), Extreme::Max);
        assert_eq!(
            "both".parse::<Extreme>(),
            Err(DiurnalError::InvalidMode("both".into()))
        );
        assert_eq!("both".parse::<Which>().unwrap(), Which::Both);
        assert!(matches!(
            "mean".parse::<Which>(),
            Err(DiurnalError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_which_extremes() {
        assert_eq!(Which::Both.extremes(), &[Extreme::Min, Extreme::Max]);
        assert_eq!(Which::from(Extreme::Max).extremes(), &[Extreme::Max]);
    }

    #[test]
    fn test_params_validation() {
        assert!(ExtremaParams::default().validate().is_ok());
        let params = ExtremaParams {
            threshold: Some(-1.0),
            ..ExtremaParams::default()
        };
        assert_eq!(params.validate(), Err(DiurnalError::InvalidThreshold(-1.0)));
        let params = ExtremaParams {
            occurrence_radius_hours: 0.0,
            ..ExtremaParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(DiurnalError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_params_window_lengths_are_capped() {
        let params = ExtremaParams {
            max_search_hours: MAX_WINDOW_HOURS,
            occurrence_radius_hours: MAX_WINDOW_HOURS,
            ..ExtremaParams::default()
        };
        assert!(params.validate().is_ok());
        for hours in [1e10, MAX_WINDOW_HOURS + 1.0, f64::INFINITY] {
            let params = ExtremaParams {
                max_search_hours: hours,
                ..ExtremaParams::default()
            };
            assert!(matches!(
                params.validate(),
                Err(DiurnalError::InvalidWindow(_))
            ));
            let params = ExtremaParams {
                occurrence_radius_hours: hours,
                ..ExtremaParams::default()
            };
            assert!(matches!(
                params.validate(),
                Err(DiurnalError::InvalidWindow(_))
            ));
        }
    }

    #[test]
    fn test_params_hash_is_stable() {
        let a = ExtremaParams::default().params_hash_sha256().unwrap();
        let b = ExtremaParams::default().params_hash_sha256().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let c = ExtremaParams {
            threshold: Some(2.0),
            ..ExtremaParams::default()
        }
        .params_hash_sha256()
        .unwrap();
        assert_ne!(a, c);
    }
}
