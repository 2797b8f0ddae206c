use std::ops::Range;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use ndarray::{s, Array1, ArrayView1};
use tracing::debug;

/// Time-indexed samples with strictly increasing, zone-free timestamps.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    times: Vec<NaiveDateTime>,
    values: Array1<f64>,
}

impl Signal {
    /// Build a signal from raw samples. Non-finite values are dropped and
    /// repeated timestamps keep their first sample.
    pub fn new<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDateTime, f64)>,
    {
        Self::from_optional(samples.into_iter().map(|(t, v)| (t, Some(v))))
    }

    /// Build a signal from samples with missing values; missing samples are dropped.
    pub fn from_optional<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDateTime, Option<f64>)>,
    {
        let mut total = 0usize;
        let mut points: Vec<(NaiveDateTime, f64)> = samples
            .into_iter()
            .inspect(|_| total += 1)
            .filter_map(|(t, v)| v.filter(|v| v.is_finite()).map(|v| (t, v)))
            .collect();
        points.sort_by_key(|(t, _)| *t);
        points.dedup_by(|a, b| a.0 == b.0);
        if points.len() < total {
            debug!(
                dropped = total - points.len(),
                kept = points.len(),
                "dropped missing or duplicate samples"
            );
        }
        let (times, values): (Vec<_>, Vec<_>) = points.into_iter().unzip();
        Self {
            times,
            values: Array1::from_vec(values),
        }
    }

    /// Build a signal from zone-aware timestamps, keeping the local wall-clock time.
    pub fn from_zoned<Tz, I>(samples: I) -> Self
    where
        Tz: TimeZone,
        I: IntoIterator<Item = (DateTime<Tz>, Option<f64>)>,
    {
        Self::from_optional(samples.into_iter().map(|(t, v)| (t.naive_local(), v)))
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn time(&self, idx: usize) -> Option<NaiveDateTime> {
        self.times.get(idx).copied()
    }

    pub fn value(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).copied()
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.times.last().copied()
    }

    /// Index of the sample taken exactly at `time`.
    pub fn position(&self, time: NaiveDateTime) -> Option<usize> {
        self.times.binary_search(&time).ok()
    }

    /// Indices of samples within `[start, end]`, both ends inclusive.
    pub fn index_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Range<usize> {
        let lo = self.times.partition_point(|t| *t < start);
        let hi = self.times.partition_point(|t| *t <= end);
        lo..hi.max(lo)
    }

    /// Owned copy of the samples within `[start, end]`.
    pub fn slice(&self, start: NaiveDateTime, end: NaiveDateTime) -> Signal {
        let range = self.index_range(start, end);
        Signal {
            times: self.times[range.clone()].to_vec(),
            values: self.values.slice(s![range.start..range.end]).to_owned(),
        }
    }

    /// Calendar days with at least one sample, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days: Vec<NaiveDate> = self.times.iter().map(|t| t.date()).collect();
        days.dedup();
        days
    }

    /// Median spacing between adjacent samples in `range`.
    pub fn median_gap(&self, range: Range<usize>) -> Option<Duration> {
        let times = self.times.get(range)?;
        let mut gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        if gaps.is_empty() {
            return None;
        }
        gaps.sort();
        Some(gaps[gaps.len() / 2])
    }
}
