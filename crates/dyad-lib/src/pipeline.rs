use crate::config::PipelineConfig;
use crate::detectors::ecg::{clean_ecg, detect_r_peaks};
use crate::metrics::hrv::HrvEngine;
use crate::metrics::quality::signal_quality;
use crate::segment::{extract_segments, Segment, SegmentError};
use crate::signal::{EventMarker, SignalTable};
use crate::window::{concat_segments, WindowMetricRow};

/// One subject's fully processed output: the extracted segments (with
/// preprocessed signal) and the windowed metric rows across all of them.
#[derive(Debug, Clone)]
pub struct SubjectAnalysis {
    pub segments: Vec<Segment>,
    pub metrics: Vec<WindowMetricRow>,
}

/// Preprocess one raw channel — clean, detect R-peaks, score quality — and
/// join the event markers onto the sample grid.
pub fn preprocess_channel(
    seconds: &[f64],
    raw: &[f64],
    markers: &[EventMarker],
    cfg: &PipelineConfig,
) -> SignalTable {
    let fs = cfg.general.sampling_frequency;
    let clean = clean_ecg(raw, fs, &cfg.cleaning);
    let peak_indices = detect_r_peaks(&clean, fs, &cfg.peak_detection);
    let quality = signal_quality(&clean, &peak_indices, fs, &cfg.signal_quality);

    let n = raw.len();
    let mut peaks = vec![false; n];
    for idx in peak_indices {
        if idx < n {
            peaks[idx] = true;
        }
    }
    let mut table = SignalTable {
        fs,
        seconds: seconds.to_vec(),
        raw: raw.to_vec(),
        clean,
        quality,
        peaks,
        event: vec![None; n],
        event_description: vec![None; n],
    };
    table.annotate_events(markers);
    table
}

/// Segment a preprocessed channel and run the windowed HRV aggregation over
/// every segment, in segment order.
pub fn analyze_subject(
    table: &SignalTable,
    cfg: &PipelineConfig,
) -> Result<SubjectAnalysis, SegmentError> {
    let segments = extract_segments(table, &cfg.segmentation)?;
    let engine = HrvEngine::from_config(cfg);
    let metrics = concat_segments(&segments, cfg.general.analysis_window_s, &engine);
    Ok(SubjectAnalysis { segments, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detectors::ecg::tests::synthetic_ecg;
    use crate::segment::{Onset, SegmentSpec};

    fn study_config(fs: f64) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.general.sampling_frequency = fs;
        cfg.general.analysis_window_s = 10.0;
        cfg.segmentation = vec![SegmentSpec {
            name: "baseline".into(),
            onset: Onset::Label("baseline resting start".into()),
            duration_s: 20.0,
        }];
        cfg
    }

    #[test]
    fn full_channel_analysis_produces_windowed_rows() {
        let fs = 250.0;
        // ~40 s of regular rhythm
        let rr = vec![0.8; 48];
        let raw = synthetic_ecg(fs, &rr);
        let seconds: Vec<f64> = (0..raw.len()).map(|i| i as f64 / fs).collect();
        let markers = vec![EventMarker {
            label: "F1".into(),
            description: "baseline resting start".into(),
            seconds: 5.0,
        }];
        let cfg = study_config(fs);

        let table = preprocess_channel(&seconds, &raw, &markers, &cfg);
        assert_eq!(table.len(), raw.len());
        assert!(table.peak_indices().len() > 20, "beats should be detected");

        let analysis = analyze_subject(&table, &cfg).unwrap();
        assert_eq!(analysis.segments.len(), 1);
        let seg = &analysis.segments[0];
        assert!((seg.table.seconds[0] - 5.0).abs() < 1e-9);
        // 20 s segment with 10 s windows → two full windows
        assert_eq!(analysis.metrics.len(), 2);
        assert_eq!(analysis.metrics[0].analysis_window, 0);
        assert_eq!(analysis.metrics[1].analysis_window, 1);
        for row in &analysis.metrics {
            assert_eq!(row.segment_name, "baseline");
            let hr = row.metrics["heart_rate_bpm"];
            assert!(hr > 60.0 && hr < 90.0, "expected ~75 bpm, got {hr}");
            assert!(row.metrics["avnn"].is_finite());
        }
    }

    #[test]
    fn missing_onset_event_fails_the_subject() {
        let fs = 250.0;
        let raw = synthetic_ecg(fs, &[0.8; 10]);
        let seconds: Vec<f64> = (0..raw.len()).map(|i| i as f64 / fs).collect();
        let cfg = study_config(fs);
        let table = preprocess_channel(&seconds, &raw, &[], &cfg);
        assert!(analyze_subject(&table, &cfg).is_err());
    }
}
