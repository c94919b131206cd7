use crate::segment::Segment;
use crate::signal::SignalTable;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metric name → value. NaN is the missing-value marker for statistics the
/// engine could not define on a window (too few peaks, too little data).
pub type MetricMap = BTreeMap<String, f64>;

/// Seam for the external HRV computation: given one analysis window's
/// signal and peaks, produce a metric map.
pub trait MetricEngine {
    fn compute(&self, window: &SignalTable) -> Result<MetricMap>;
}

impl<F> MetricEngine for F
where
    F: Fn(&SignalTable) -> Result<MetricMap>,
{
    fn compute(&self, window: &SignalTable) -> Result<MetricMap> {
        self(window)
    }
}

/// One analysis window's metrics plus its position within the run.
#[derive(Debug, Clone, Serialize)]
pub struct WindowMetricRow {
    pub segment_name: String,
    /// Zero-based window counter within the segment
    pub analysis_window: usize,
    /// Timestamp of the first sample in the window (seconds)
    pub start_index: f64,
    /// Timestamp of the last sample in the window (seconds)
    pub stop_index: f64,
    pub metrics: MetricMap,
}

/// Partition a segment into consecutive non-overlapping windows of
/// `window_s` seconds and run the metric engine on each.
///
/// The last window may be shorter than `window_s` if the segment does not
/// divide evenly; it still produces a row. A window the engine fails on
/// produces a row with an empty metric map (the export layer renders absent
/// metrics as missing values) — rows are never dropped. An empty segment
/// yields no rows.
pub fn windowed_metrics(
    segment: &Segment,
    window_s: f64,
    engine: &dyn MetricEngine,
) -> Vec<WindowMetricRow> {
    let table = &segment.table;
    if table.is_empty() {
        return Vec::new();
    }
    let window_len = ((window_s * table.fs).round() as usize).max(1);
    let mut rows = Vec::new();
    let mut start = 0usize;
    let mut counter = 0usize;
    while start < table.len() {
        let end = (start + window_len).min(table.len());
        let window = table.slice(start, end);
        let metrics = match engine.compute(&window) {
            Ok(metrics) => metrics,
            Err(err) => {
                log::warn!(
                    "metrics failed for segment '{}' window {}: {err:#}",
                    segment.name,
                    counter
                );
                MetricMap::new()
            }
        };
        rows.push(WindowMetricRow {
            segment_name: segment.name.clone(),
            analysis_window: counter,
            start_index: window.seconds[0],
            stop_index: *window.seconds.last().expect("non-empty window"),
            metrics,
        });
        counter += 1;
        start = end;
    }
    rows
}

/// Run the aggregator over every segment and concatenate the rows,
/// preserving segment order then window order.
pub fn concat_segments(
    segments: &[Segment],
    window_s: f64,
    engine: &dyn MetricEngine,
) -> Vec<WindowMetricRow> {
    segments
        .iter()
        .flat_map(|segment| windowed_metrics(segment, window_s, engine))
        .collect()
}
