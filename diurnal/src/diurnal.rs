use std::cell::OnceCell;
use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::extrema::{find_real_extremum, locate_extremum, Extremum};
use crate::predict::{calibrate, hours_to_duration, CalibrationStatistics};
use crate::signal::Signal;
use crate::window::{ExactWindow, WindowSpec};
use crate::{DiurnalError, Extreme, ExtremaParams, Which};

/// Daily minimum and maximum picks; either may be absent.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DailyRecord {
    pub min: Option<Extremum>,
    pub max: Option<Extremum>,
}

impl DailyRecord {
    pub fn new(min: Option<Extremum>, max: Option<Extremum>) -> Self {
        Self { min, max }
    }

    pub fn get(&self, which: Extreme) -> Option<Extremum> {
        match which {
            Extreme::Min => self.min,
            Extreme::Max => self.max,
        }
    }

    pub fn set(&mut self, which: Extreme, extremum: Option<Extremum>) {
        match which {
            Extreme::Min => self.min = extremum,
            Extreme::Max => self.max = extremum,
        }
    }

    pub fn min_value(&self) -> Option<f64> {
        self.min.map(|e| e.value)
    }

    pub fn min_time(&self) -> Option<NaiveDateTime> {
        self.min.map(|e| e.time)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.max.map(|e| e.value)
    }

    pub fn max_time(&self) -> Option<NaiveDateTime> {
        self.max.map(|e| e.time)
    }

    pub fn amplitude(&self) -> Option<f64> {
        Some(self.max_value()? - self.min_value()?)
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// False when both picks exist and the minimum exceeds the maximum.
    pub fn is_consistent(&self) -> bool {
        match (self.min_value(), self.max_value()) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }
}

/// Day-ordered daily records.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultTable {
    records: BTreeMap<NaiveDate, DailyRecord>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, day: NaiveDate) -> Option<&DailyRecord> {
        self.records.get(&day)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.records.contains_key(&day)
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.records.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &DailyRecord)> {
        self.records.iter()
    }

    fn insert(&mut self, day: NaiveDate, record: DailyRecord) {
        self.records.insert(day, record);
    }

    /// Remove every day whose amplitude is below `threshold`. Days missing an
    /// extremum have no amplitude and are kept. Returns the number removed.
    pub fn apply_threshold(&mut self, threshold: f64) -> Result<usize, DiurnalError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(DiurnalError::InvalidThreshold(threshold));
        }
        let before = self.records.len();
        self.records
            .retain(|_, record| record.amplitude().map_or(true, |amp| amp >= threshold));
        Ok(before - self.records.len())
    }

    /// Drop incomplete days, then every day whose amplitude is at most
    /// `fraction` of the mean daily amplitude. Returns the number removed.
    pub fn apply_relative_threshold(&mut self, fraction: f64) -> Result<usize, DiurnalError> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(DiurnalError::InvalidThreshold(fraction));
        }
        let before = self.records.len();
        self.records.retain(|_, record| record.amplitude().is_some());
        let amplitudes: Vec<f64> = self.records.values().filter_map(|r| r.amplitude()).collect();
        if !amplitudes.is_empty() {
            let mean = amplitudes.iter().sum::<f64>() / amplitudes.len() as f64;
            let min_amplitude = mean * fraction;
            self.records
                .retain(|_, record| record.amplitude().map_or(false, |amp| amp > min_amplitude));
        }
        Ok(before - self.records.len())
    }

    pub fn amplitude(&self) -> Vec<(NaiveDate, Option<f64>)> {
        self.records
            .iter()
            .map(|(day, record)| (*day, record.amplitude()))
            .collect()
    }

    /// Time of each day's pick as fractional hours (0-24).
    pub fn decimal_hours(&self, which: Extreme) -> Vec<(NaiveDate, Option<f64>)> {
        self.records
            .iter()
            .map(|(day, record)| (*day, record.get(which).map(|e| decimal_hour(e.time))))
            .collect()
    }

    /// `(time, value)` of each day's pick, in day order. Two days may share a
    /// time when a next-day maximum lands on the following day's pick.
    pub fn extrema_index(&self, which: Extreme) -> Vec<(NaiveDateTime, f64)> {
        self.records
            .values()
            .filter_map(|record| record.get(which))
            .map(|e| (e.time, e.value))
            .collect()
    }
}

pub fn decimal_hour(time: NaiveDateTime) -> f64 {
    f64::from(time.hour()) + f64::from(time.minute() * 60 + time.second()) / 3600.0
}

/// Daily extrema of a diurnally varying signal.
///
/// The result table is built eagerly on construction and afterwards only
/// changes through the threshold filters or [`DiurnalExtrema::change_extrema_picks`].
#[derive(Clone, Debug)]
pub struct DiurnalExtrema {
    signal: Signal,
    params: ExtremaParams,
    table: ResultTable,
    original_picks: Option<ResultTable>,
    calibration: OnceCell<CalibrationStatistics>,
}

impl DiurnalExtrema {
    pub fn new(signal: Signal, params: ExtremaParams) -> Result<Self, DiurnalError> {
        params.validate()?;
        let mut extrema = Self {
            signal,
            params,
            table: ResultTable::default(),
            original_picks: None,
            calibration: OnceCell::new(),
        };
        extrema.table = extrema.find_diurnal_extrema()?;
        Ok(extrema)
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn params(&self) -> &ExtremaParams {
        &self.params
    }

    pub fn station(&self) -> Option<&str> {
        self.params.station.as_deref()
    }

    pub fn table(&self) -> &ResultTable {
        &self.table
    }

    /// The table as it stood before the first manual override, if any.
    pub fn original_picks(&self) -> Option<&ResultTable> {
        self.original_picks.as_ref()
    }

    /// Mean occurrence hours over the calibration window, computed once.
    pub fn predict_extrema(&self) -> Result<CalibrationStatistics, DiurnalError> {
        if let Some(stats) = self.calibration.get() {
            return Ok(*stats);
        }
        let stats = calibrate(&self.signal, &self.params)?;
        let _ = self.calibration.set(stats);
        Ok(stats)
    }

    /// Predicted minimum and maximum candidate windows for `day`.
    pub fn occurrence_windows(
        &self,
        day: NaiveDate,
    ) -> Result<(ExactWindow, ExactWindow), DiurnalError> {
        self.predict_extrema()?
            .occurrence_windows(day, self.params.occurrence_radius_hours)
    }

    /// Genuine extremum of the instance's signal within `spec`.
    pub fn get_real_extrema(
        &self,
        spec: &WindowSpec,
        mode: Extreme,
    ) -> Result<Option<Extremum>, DiurnalError> {
        find_real_extremum(&self.signal, spec, mode)
    }

    /// Run the per-day search over every calendar day of the signal and
    /// apply the configured amplitude threshold.
    pub fn find_diurnal_extrema(&self) -> Result<ResultTable, DiurnalError> {
        let stats = if self.params.predict_timing {
            Some(self.predict_extrema()?)
        } else {
            None
        };

        let mut table = ResultTable::default();
        let mut discarded = 0usize;
        for day in self.signal.days() {
            let (min, max) = match &stats {
                Some(stats) => self.search_predicted_day(day, stats)?,
                None => search_calendar_day(&self.signal, day, &self.params)?,
            };
            let record = DailyRecord::new(min, max);
            if record.is_empty() {
                debug!(%day, "no extrema found");
                continue;
            }
            if !record.is_consistent() {
                debug!(%day, min = ?record.min_value(), max = ?record.max_value(), "discarded day with minimum above maximum");
                discarded += 1;
                continue;
            }
            table.insert(day, record);
        }

        let removed = match self.params.threshold {
            Some(threshold) => table.apply_threshold(threshold)?,
            None => 0,
        };
        info!(
            station = self.station().unwrap_or("-"),
            days = table.len(),
            discarded,
            below_threshold = removed,
            "extracted diurnal extrema"
        );
        Ok(table)
    }

    fn search_predicted_day(
        &self,
        day: NaiveDate,
        stats: &CalibrationStatistics,
    ) -> Result<(Option<Extremum>, Option<Extremum>), DiurnalError> {
        let (min_window, mut max_window) =
            stats.occurrence_windows(day, self.params.occurrence_radius_hours)?;
        let min = find_real_extremum(&self.signal, &min_window.into(), Extreme::Min)?;
        if let Some(found) = min.filter(|_| self.params.min_first) {
            if max_window.start < found.time {
                if found.time >= max_window.end {
                    debug!(%day, "minimum falls after the predicted maximum window");
                    return Ok((min, None));
                }
                max_window.start = found.time;
            }
        }
        let max = find_real_extremum(&self.signal, &max_window.into(), Extreme::Max)?;
        Ok((min, max))
    }

    pub fn amplitude(&self) -> Vec<(NaiveDate, Option<f64>)> {
        self.table.amplitude()
    }

    pub fn decimal_hours(&self, which: Extreme) -> Vec<(NaiveDate, Option<f64>)> {
        self.table.decimal_hours(which)
    }

    pub fn extrema_index(&self, which: Extreme) -> Vec<(NaiveDateTime, f64)> {
        self.table.extrema_index(which)
    }

    pub fn apply_relative_threshold(&mut self, fraction: f64) -> Result<usize, DiurnalError> {
        self.table.apply_relative_threshold(fraction)
    }

    /// Replace the minimum, maximum or both picks of `day`.
    ///
    /// With `find_between`, the picks are re-located (without boundary checks)
    /// between the two times of day; otherwise they are set to `new_extrema`,
    /// where `None` clears them.
    pub fn change_extrema_picks(
        &mut self,
        day: NaiveDate,
        which: Which,
        new_extrema: Option<Extremum>,
        find_between: Option<(NaiveTime, NaiveTime)>,
        verbose: bool,
    ) -> Result<(), DiurnalError> {
        let Some(current) = self.table.get(day).copied() else {
            return Err(DiurnalError::DayNotFound(day));
        };

        let picks: Vec<(Extreme, Option<Extremum>)> = match find_between {
            Some((start, end)) => {
                let window = ExactWindow::new(day.and_time(start), day.and_time(end))?;
                which
                    .extremes()
                    .iter()
                    .map(|&mode| (mode, locate_extremum(&self.signal, &window, mode)))
                    .collect()
            }
            None => which.extremes().iter().map(|&mode| (mode, new_extrema)).collect(),
        };

        if verbose {
            for (mode, pick) in &picks {
                info!(
                    %day,
                    %mode,
                    old = ?current.get(*mode).map(|e| e.value),
                    new = ?pick.map(|e| e.value),
                    "replacing extrema pick"
                );
            }
        }

        if self.original_picks.is_none() {
            self.original_picks = Some(self.table.clone());
        }
        let record = self
            .table
            .records
            .get_mut(&day)
            .ok_or(DiurnalError::DayNotFound(day))?;
        for (mode, pick) in picks {
            record.set(mode, pick);
        }
        Ok(())
    }
}

/// Non-predictive search of one calendar day.
///
/// With `min_first` and `max_next_day` the maximum is searched in a window
/// of `max_search_hours` starting at the minimum; otherwise, or when no
/// minimum was found, within the calendar day.
pub(crate) fn search_calendar_day(
    signal: &Signal,
    day: NaiveDate,
    params: &ExtremaParams,
) -> Result<(Option<Extremum>, Option<Extremum>), DiurnalError> {
    let min = find_real_extremum(signal, &WindowSpec::Day(day), Extreme::Min)?;
    let max_spec = match min {
        Some(found) if params.max_follows_min() => {
            let end = hours_to_duration(params.max_search_hours)
                .and_then(|span| found.time.checked_add_signed(span))
                .ok_or_else(|| {
                    DiurnalError::InvalidWindow(format!(
                        "{} hours from {} is out of range",
                        params.max_search_hours, found.time
                    ))
                })?;
            WindowSpec::from((found.time, end))
        }
        _ => WindowSpec::Day(day),
    };
    let max = find_real_extremum(signal, &max_spec, Extreme::Max)?;
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 8, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 8, day).unwrap()
    }

    fn table(amplitudes: &[(u32, Option<f64>)]) -> ResultTable {
        let mut table = ResultTable::default();
        for &(day, amp) in amplitudes {
            let min = Some(Extremum::new(10.0, at(day, 5)));
            let max = amp.map(|a| Extremum::new(10.0 + a, at(day, 15)));
            table.insert(date(day), DailyRecord::new(min, max));
        }
        table
    }

    #[test]
    fn test_record_consistency() {
        let low = Some(Extremum::new(1.0, at(1, 4)));
        let high = Some(Extremum::new(5.0, at(1, 16)));
        assert!(DailyRecord::new(low, high).is_consistent());
        assert!(!DailyRecord::new(high, low).is_consistent());
        assert!(DailyRecord::new(None, low).is_consistent());
        assert_eq!(DailyRecord::new(low, high).amplitude(), Some(4.0));
        assert_eq!(DailyRecord::new(low, None).amplitude(), None);
    }

    #[test]
    fn test_threshold_keeps_incomplete_days() {
        let mut t = table(&[(1, Some(5.0)), (2, Some(1.0)), (3, None), (4, Some(2.0))]);
        assert_eq!(t.apply_threshold(2.0).unwrap(), 1);
        assert_eq!(t.days(), vec![date(1), date(3), date(4)]);
        assert_eq!(t.apply_threshold(2.0).unwrap(), 0);
        assert!(matches!(
            t.apply_threshold(f64::NAN),
            Err(DiurnalError::InvalidThreshold(_))
        ));
        assert_eq!(
            t.apply_threshold(-1.0),
            Err(DiurnalError::InvalidThreshold(-1.0))
        );
    }

    #[test]
    fn test_relative_threshold() {
        let mut t = table(&[(1, Some(6.0)), (2, Some(2.0)), (3, None), (4, Some(4.0))]);
        // mean amplitude 4.0, half of it is 2.0
        assert_eq!(t.apply_relative_threshold(0.5).unwrap(), 2);
        assert_eq!(t.days(), vec![date(1), date(4)]);
        assert_eq!(
            t.apply_relative_threshold(1.5),
            Err(DiurnalError::InvalidThreshold(1.5))
        );
    }

    #[test]
    fn test_queries() {
        let mut t = table(&[(1, Some(5.0)), (2, None)]);
        t.records.get_mut(&date(1)).unwrap().max =
            Some(Extremum::new(15.0, at(1, 16) + chrono::Duration::minutes(30)));
        assert_eq!(t.amplitude(), vec![(date(1), Some(5.0)), (date(2), None)]);
        assert_eq!(
            t.decimal_hours(Extreme::Max),
            vec![(date(1), Some(16.5)), (date(2), None)]
        );
        assert_eq!(
            t.extrema_index(Extreme::Min),
            vec![(at(1, 5), 10.0), (at(2, 5), 10.0)]
        );
        assert_eq!(
            t.extrema_index(Extreme::Max),
            vec![(at(1, 16) + chrono::Duration::minutes(30), 15.0)]
        );
    }

    #[test]
    fn test_extrema_index_keeps_shared_times() {
        let mut t = ResultTable::default();
        let shared = Extremum::new(25.0, at(2, 1));
        t.insert(date(1), DailyRecord::new(Some(Extremum::new(5.0, at(1, 4))), Some(shared)));
        t.insert(date(2), DailyRecord::new(Some(Extremum::new(6.0, at(2, 4))), Some(shared)));
        assert_eq!(
            t.extrema_index(Extreme::Max),
            vec![(at(2, 1), 25.0), (at(2, 1), 25.0)]
        );
    }

    #[test]
    fn test_search_past_calendar_limit_is_rejected() {
        let last_day = NaiveDate::MAX;
        let signal = Signal::new((0..24u32).map(|h| {
            let t = last_day.and_hms_opt(h, 0, 0).unwrap();
            (t, (f64::from(h) - 4.0).abs())
        }));
        let params = ExtremaParams {
            max_search_hours: crate::MAX_WINDOW_HOURS,
            ..ExtremaParams::default()
        };
        assert!(matches!(
            search_calendar_day(&signal, last_day, &params),
            Err(DiurnalError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_decimal_hour() {
        let t = NaiveDate::from_ymd_opt(2018, 8, 1)
            .unwrap()
            .and_hms_opt(7, 15, 36)
            .unwrap();
        assert!((decimal_hour(t) - 7.26).abs() < 1e-12);
    }
}
