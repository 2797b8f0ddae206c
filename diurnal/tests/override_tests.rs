//! Manual edits of extracted picks.

use std::f64::consts::PI;

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use diurnal::{DiurnalError, DiurnalExtrema, Extremum, ExtremaParams, Signal, Which};
use tracing_subscriber::EnvFilter;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 7, day).unwrap()
}

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    date(day).and_hms_opt(hour, minute, 0).unwrap()
}

fn extrema(days: u32) -> DiurnalExtrema {
    let start = at(1, 0, 0);
    let signal = Signal::new((0..days * 24).map(|i| {
        let t = start + Duration::hours(i as i64);
        let hour = f64::from(t.hour());
        (t, 20.0 - 10.0 * (2.0 * PI * (hour - 4.0) / 24.0).cos())
    }));
    DiurnalExtrema::new(signal, ExtremaParams::default()).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

#[test]
fn test_explicit_maximum_override() {
    let mut extrema = extrema(3);
    let before = *extrema.table().get(date(2)).unwrap();
    let new_time = at(2, 15, 20);

    extrema
        .change_extrema_picks(
            date(2),
            Which::Max,
            Some(Extremum::new(33.2, new_time)),
            None,
            false,
        )
        .unwrap();

    let after = extrema.table().get(date(2)).unwrap();
    assert_eq!(after.max_value(), Some(33.2));
    assert_eq!(after.max_time(), Some(new_time));
    assert_eq!(after.min, before.min);
    assert_eq!(extrema.table().get(date(1)), extrema.original_picks().unwrap().get(date(1)));
    assert_eq!(
        extrema.original_picks().unwrap().get(date(2)),
        Some(&before)
    );
}

#[test]
fn test_clearing_both_picks() {
    let mut extrema = extrema(2);
    extrema
        .change_extrema_picks(date(1), Which::Both, None, None, false)
        .unwrap();
    let record = extrema.table().get(date(1)).unwrap();
    assert!(record.is_empty());
    assert_eq!(extrema.table().len(), 2);
}

#[test]
fn test_find_between_relocates_picks() {
    init_tracing();
    let mut extrema = extrema(2);
    let window = (
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
    );
    extrema
        .change_extrema_picks(date(1), Which::Both, None, Some(window), true)
        .unwrap();
    let record = extrema.table().get(date(1)).unwrap();
    assert_eq!(record.min_time(), Some(at(1, 10, 0)));
    assert_relative_eq!(record.min_value().unwrap(), 20.0, epsilon = 1e-9);
    assert_eq!(record.max_time(), Some(at(1, 16, 0)));
    assert_eq!(record.max_value(), Some(30.0));
}

#[test]
fn test_missing_day_is_reported() {
    let mut extrema = extrema(2);
    let err = extrema
        .change_extrema_picks(
            date(9),
            Which::Min,
            Some(Extremum::new(1.0, at(9, 4, 0))),
            None,
            false,
        )
        .unwrap_err();
    assert_eq!(err, DiurnalError::DayNotFound(date(9)));
    assert!(extrema.original_picks().is_none());
}

#[test]
fn test_inverted_find_between_is_rejected() {
    let mut extrema = extrema(2);
    let window = (
        NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
    );
    assert!(matches!(
        extrema.change_extrema_picks(date(1), Which::Max, None, Some(window), false),
        Err(DiurnalError::InvalidWindow(_))
    ));
}

#[test]
fn test_overrides_survive_filtering() {
    let mut extrema = extrema(3);
    extrema
        .change_extrema_picks(
            date(3),
            Which::Max,
            Some(Extremum::new(12.0, at(3, 16, 0))),
            None,
            false,
        )
        .unwrap();
    // amplitudes 20, 20, 2; mean 14, so half of it is 7
    assert_eq!(extrema.apply_relative_threshold(0.5).unwrap(), 1);
    assert_eq!(extrema.table().days(), vec![date(1), date(2)]);
    assert_eq!(extrema.original_picks().unwrap().len(), 3);
}
