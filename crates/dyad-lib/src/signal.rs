use serde::{Deserialize, Serialize};

/// One annotated sample stream of a single subject: the raw and cleaned ECG,
/// per-sample peak flags and quality, and the event markers joined onto the
/// sample grid. Timestamps are relative seconds starting at 0 and
/// monotonically non-decreasing; the sampling interval is approximately
/// constant but not guaranteed exact, so `fs` is carried alongside the
/// timestamps rather than derived from them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalTable {
    /// Nominal sampling frequency in Hz
    pub fs: f64,
    pub seconds: Vec<f64>,
    pub raw: Vec<f64>,
    pub clean: Vec<f64>,
    /// Per-sample signal quality in [0, 1]; NaN where no index was computed
    pub quality: Vec<f64>,
    /// True at samples where an R-peak was detected
    pub peaks: Vec<bool>,
    pub event: Vec<Option<String>>,
    pub event_description: Vec<Option<String>>,
}

/// A device event marker before it is joined onto the sample grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMarker {
    pub label: String,
    pub description: String,
    pub seconds: f64,
}

impl SignalTable {
    pub fn len(&self) -> usize {
        self.seconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seconds.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.seconds.len() as f64 / self.fs
    }

    /// Owned copy of the rows in `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> SignalTable {
        let end = end.min(self.len());
        let start = start.min(end);
        SignalTable {
            fs: self.fs,
            seconds: self.seconds[start..end].to_vec(),
            raw: self.raw[start..end].to_vec(),
            clean: self.clean[start..end].to_vec(),
            quality: self.quality[start..end].to_vec(),
            peaks: self.peaks[start..end].to_vec(),
            event: self.event[start..end].to_vec(),
            event_description: self.event_description[start..end].to_vec(),
        }
    }

    /// Sample indices flagged as R-peaks.
    pub fn peak_indices(&self) -> Vec<usize> {
        self.peaks
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.then_some(i))
            .collect()
    }

    /// RR intervals in seconds, taken from the timestamps of consecutive
    /// peak samples so that irregular sampling is reflected in the series.
    pub fn rr_intervals(&self) -> Vec<f64> {
        let idx = self.peak_indices();
        idx.windows(2)
            .map(|w| self.seconds[w[1]] - self.seconds[w[0]])
            .collect()
    }

    /// Join event markers onto the sample grid: each marker lands on the
    /// first sample at or after its timestamp. Markers beyond the end of
    /// the recording are dropped.
    pub fn annotate_events(&mut self, markers: &[EventMarker]) {
        for marker in markers {
            let row = self.seconds.partition_point(|&t| t < marker.seconds);
            if row >= self.len() {
                continue;
            }
            self.event[row] = Some(marker.label.clone());
            self.event_description[row] = Some(marker.description.clone());
        }
    }
}

/// Estimate the sampling frequency from the median inter-sample interval.
/// Returns None for fewer than two samples or a degenerate timeline.
pub fn estimate_fs(seconds: &[f64]) -> Option<f64> {
    if seconds.len() < 2 {
        return None;
    }
    let mut dts: Vec<f64> = seconds.windows(2).map(|w| w[1] - w[0]).collect();
    dts.sort_by(f64::total_cmp);
    let dt = dts[dts.len() / 2];
    (dt > 0.0).then(|| 1.0 / dt)
}
