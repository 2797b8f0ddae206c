use std::ops::Range;

use chrono::NaiveDateTime;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signal::Signal;
use crate::window::{resolve_window, ExactWindow, WindowSpec};
use crate::{DiurnalError, Extreme};

/// Samples examined on each side of a window edge when a pick lands on it.
const BOUNDARY_NEIGHBOURHOOD: usize = 5;
const MIN_NEIGHBOURHOOD_SAMPLES: usize = 3;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Extremum {
    pub value: f64,
    pub time: NaiveDateTime,
}

impl Extremum {
    pub fn new(value: f64, time: NaiveDateTime) -> Self {
        Self { value, time }
    }
}

/// Smallest (or largest) sample in `window`, first occurrence on ties.
pub fn locate_extremum(signal: &Signal, window: &ExactWindow, mode: Extreme) -> Option<Extremum> {
    let range = signal.index_range(window.start, window.end);
    locate_in_range(signal, range, mode).map(|(_, extremum)| extremum)
}

fn locate_in_range(signal: &Signal, range: Range<usize>, mode: Extreme) -> Option<(usize, Extremum)> {
    let values = signal.values();
    let best = range
        .filter(|&idx| idx < values.len())
        .reduce(|best, idx| {
            let candidate = OrderedFloat(values[idx]);
            let current = OrderedFloat(values[best]);
            let better = match mode {
                Extreme::Min => candidate < current,
                Extreme::Max => candidate > current,
            };
            if better {
                idx
            } else {
                best
            }
        })?;
    let time = signal.time(best)?;
    Some((best, Extremum::new(values[best], time)))
}

/// Whether `candidate` is a genuine extremum rather than an artifact of the
/// window truncating a monotonic run.
///
/// A pick on either edge (or on the nearest sample inside it) is re-located
/// among up to five samples either side of that edge in the full signal; it
/// survives only if it is still the local extremum there. The end edge is
/// only examined once the start edge has passed.
pub fn is_genuine_extremum(
    signal: &Signal,
    window: &ExactWindow,
    candidate: &Extremum,
    mode: Extreme,
) -> bool {
    let range = signal.index_range(window.start, window.end);
    let edges = [
        (window.start, signal.time(range.start)),
        (window.end, range.end.checked_sub(1).and_then(|i| signal.time(i))),
    ];
    for (edge, nearest_inside) in edges {
        let bound = if signal.position(edge).is_some() {
            Some(edge)
        } else {
            nearest_inside.filter(|t| window.contains(*t))
        };
        if bound == Some(candidate.time) && !check_around_bound(signal, candidate, mode) {
            return false;
        }
    }
    true
}

fn check_around_bound(signal: &Signal, candidate: &Extremum, mode: Extreme) -> bool {
    let Some(idx) = signal.position(candidate.time) else {
        return false;
    };
    let lo = idx.saturating_sub(BOUNDARY_NEIGHBOURHOOD);
    let hi = (idx + BOUNDARY_NEIGHBOURHOOD + 1).min(signal.len());
    if hi - lo < MIN_NEIGHBOURHOOD_SAMPLES {
        return false;
    }
    match locate_in_range(signal, lo..hi, mode) {
        Some((_, local)) => local.time == candidate.time || local.value == candidate.value,
        None => false,
    }
}

/// Resolve `spec`, locate the extremum in it and keep it only if it is genuine.
///
/// `Ok(None)` means the window had no data or the pick was a boundary artifact.
pub fn find_real_extremum(
    signal: &Signal,
    spec: &WindowSpec,
    mode: Extreme,
) -> Result<Option<Extremum>, DiurnalError> {
    let Some(window) = resolve_window(spec, signal)? else {
        return Ok(None);
    };
    let Some(candidate) = locate_extremum(signal, &window, mode) else {
        return Ok(None);
    };
    if is_genuine_extremum(signal, &window, &candidate, mode) {
        Ok(Some(candidate))
    } else {
        debug!(
            %mode,
            value = candidate.value,
            time = %candidate.time,
            "rejected extremum on window boundary"
        );
        Ok(None)
    }
}
