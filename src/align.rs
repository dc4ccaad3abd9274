use std::collections::HashMap;

use crate::command::{RawSeries, TimePoint};

/// One series laid out against the unified axis. `values[i]` is the exact
/// sample the series had at `axis[i]`, or `None` where it had no sample.
/// Gaps are never interpolated; bridging them is the renderer's business.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

/// The merged chart: a strictly ascending, duplicate-free axis of UTC-milli
/// instants plus one equal-length value vector per input series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedChart {
    pub axis: Vec<i64>,
    pub series: Vec<AlignedSeries>,
}

impl AlignedChart {
    pub fn is_empty(&self) -> bool {
        self.axis.is_empty()
    }
}

/// Merges independently-sampled series onto one shared time axis.
///
/// The axis is the union of every timestamp present in any series, ordered by
/// chronological value. Duplicate timestamps within one raw series keep the
/// first occurrence in source order. An empty input produces an empty chart;
/// the caller renders the explicit no-data state.
pub fn align_series(raw: &[RawSeries]) -> AlignedChart {
    let mut axis: Vec<i64> = Vec::new();
    let mut samples: Vec<(String, HashMap<i64, f64>)> = Vec::with_capacity(raw.len());
    for series in raw {
        let mut seen: HashMap<i64, f64> = HashMap::with_capacity(series.points.len());
        for point in &series.points {
            seen.entry(point.ts).or_insert(point.value);
            axis.push(point.ts);
        }
        samples.push((series.label.clone(), seen));
    }
    axis.sort_unstable();
    axis.dedup();

    let series = samples
        .into_iter()
        .map(|(label, seen)| AlignedSeries {
            values: axis.iter().map(|ts| seen.get(ts).copied()).collect(),
            label,
        })
        .collect();

    AlignedChart { axis, series }
}

/// Single-model chart: the fetched history plus one synthetic point at
/// `now_ms` carrying the latest snapshot value, so the visible series always
/// ends at "now" even when the newest historical sample is older. Goes
/// through the same alignment path as the multi-series case.
pub fn single_model_chart(
    label: impl Into<String>,
    history: &[TimePoint],
    current_value: f64,
    now_ms: i64,
) -> AlignedChart {
    let mut points = history.to_vec();
    points.push(TimePoint {
        ts: now_ms,
        value: current_value,
    });
    align_series(&[RawSeries {
        label: label.into(),
        points,
    }])
}
