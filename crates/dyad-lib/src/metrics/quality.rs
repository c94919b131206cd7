use crate::config::{QualityMethod, SignalQualityConfig};

/// Half-width of the QRS comparison window around each peak (seconds).
const QRS_HALF_WIDTH_S: f64 = 0.1;

/// Per-sample signal quality for a cleaned ECG trace.
///
/// `average-qrs` scores each beat by the distance of its QRS complex from
/// the mean QRS template, rescaled so the best beat maps to 1 and the worst
/// to 0, then carries the per-beat scores across the sample grid by linear
/// interpolation. The index is relative within a recording: a flawless
/// recording and a uniformly bad one both score near 1. Fewer than two
/// usable beats (no template to compare against) yields an all-NaN column,
/// as does `disabled`.
pub fn signal_quality(
    clean: &[f64],
    peaks: &[usize],
    fs: f64,
    cfg: &SignalQualityConfig,
) -> Vec<f64> {
    match cfg.method {
        QualityMethod::Disabled => vec![f64::NAN; clean.len()],
        QualityMethod::AverageQrs => average_qrs_quality(clean, peaks, fs),
    }
}

fn average_qrs_quality(clean: &[f64], peaks: &[usize], fs: f64) -> Vec<f64> {
    let n = clean.len();
    let half = ((QRS_HALF_WIDTH_S * fs).round() as usize).max(1);

    // Only beats whose comparison window lies fully inside the recording
    // can be matched against the template.
    let usable: Vec<usize> = peaks
        .iter()
        .copied()
        .filter(|&p| p >= half && p + half < n)
        .collect();
    if usable.len() < 2 {
        return vec![f64::NAN; n];
    }

    let width = 2 * half + 1;
    let mut template = vec![0.0; width];
    for &peak in &usable {
        for (offset, slot) in template.iter_mut().enumerate() {
            *slot += clean[peak - half + offset];
        }
    }
    for slot in template.iter_mut() {
        *slot /= usable.len() as f64;
    }

    let distances: Vec<f64> = usable
        .iter()
        .map(|&peak| {
            template
                .iter()
                .enumerate()
                .map(|(offset, &t)| (clean[peak - half + offset] - t).powi(2))
                .sum::<f64>()
                / width as f64
        })
        .collect();

    let min = distances.iter().copied().fold(f64::INFINITY, f64::min);
    let max = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scores: Vec<f64> = if max - min < f64::EPSILON {
        // All beats equidistant from the template: nothing to rank.
        vec![1.0; distances.len()]
    } else {
        distances.iter().map(|d| 1.0 - (d - min) / (max - min)).collect()
    };

    interpolate_beat_scores(n, &usable, &scores)
}

/// Spread per-beat scores over the full sample grid: constant before the
/// first and after the last beat, linear in between.
fn interpolate_beat_scores(n: usize, beats: &[usize], scores: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; n];
    let first = beats[0];
    let last = *beats.last().expect("at least two beats");
    for sample in out.iter_mut().take(first) {
        *sample = scores[0];
    }
    for sample in out.iter_mut().skip(last) {
        *sample = scores[scores.len() - 1];
    }
    for pair in 0..beats.len() - 1 {
        let (a, b) = (beats[pair], beats[pair + 1]);
        let (qa, qb) = (scores[pair], scores[pair + 1]);
        let span = (b - a) as f64;
        for idx in a..b {
            let frac = (idx - a) as f64 / span;
            out[idx] = qa + frac * (qb - qa);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalQualityConfig;

    fn bump_train(fs: f64, beat_samples: &[usize], n: usize, amplitudes: &[f64]) -> Vec<f64> {
        let mut data = vec![0.0; n];
        for (&beat, &amp) in beat_samples.iter().zip(amplitudes) {
            for i in 0..n {
                let d = i as f64 - beat as f64;
                data[i] += amp * (-0.5 * (d / (0.02 * fs)).powi(2)).exp();
            }
        }
        data
    }

    #[test]
    fn identical_beats_all_score_one() {
        let fs = 100.0;
        let beats = vec![100, 200, 300, 400];
        let data = bump_train(fs, &beats, 500, &[1.0, 1.0, 1.0, 1.0]);
        let q = signal_quality(&data, &beats, fs, &SignalQualityConfig::default());
        assert_eq!(q.len(), data.len());
        assert!(q.iter().all(|&v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn deviant_beat_scores_lowest() {
        let fs = 100.0;
        let beats = vec![100, 200, 300, 400];
        let data = bump_train(fs, &beats, 500, &[1.0, 1.0, 3.0, 1.0]);
        let q = signal_quality(&data, &beats, fs, &SignalQualityConfig::default());
        // the aberrant third beat is the worst of the recording
        assert!(q[300] < q[100]);
        assert!((q[300] - 0.0).abs() < 1e-9);
        for &v in &q {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn too_few_beats_yield_nan_column() {
        let fs = 100.0;
        let data = bump_train(fs, &[100], 300, &[1.0]);
        let q = signal_quality(&data, &[100], fs, &SignalQualityConfig::default());
        assert!(q.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn disabled_method_yields_nan_column() {
        let cfg = SignalQualityConfig {
            method: QualityMethod::Disabled,
        };
        let q = signal_quality(&[0.0; 10], &[2, 5], 100.0, &cfg);
        assert!(q.iter().all(|v| v.is_nan()));
    }
}
