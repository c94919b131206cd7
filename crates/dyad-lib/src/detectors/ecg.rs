use crate::config::{CleaningConfig, CleaningMethod, PeakDetectionConfig, PeakMethod};

/// Internal constants of the envelope detector. The study-facing knobs
/// (refractory period, artifact correction) live in `PeakDetectionConfig`;
/// these stages are fixed per Pan–Tompkins.
const DETECT_LOWCUT_HZ: f64 = 5.0;
const DETECT_HIGHCUT_HZ: f64 = 15.0;
const INTEGRATION_WINDOW_S: f64 = 0.150;
const SEARCH_BACK_S: f64 = 0.150;
const THRESHOLD_SCALE: f64 = 0.6;

/// Clean a raw ECG trace according to the configured method: high-pass
/// detrend, low-pass smoothing, and a moving-average comb at the mains
/// frequency when `powerline_hz` is non-zero.
pub fn clean_ecg(raw: &[f64], fs: f64, cfg: &CleaningConfig) -> Vec<f64> {
    match cfg.method {
        CleaningMethod::None => raw.to_vec(),
        CleaningMethod::Bandpass => {
            let mut out = bandpass(raw, fs, cfg.lowcut_hz, cfg.highcut_hz);
            if cfg.powerline_hz > 0.0 {
                let width = ((fs / cfg.powerline_hz).round() as usize).max(1);
                out = moving_average(&out, width);
            }
            out
        }
    }
}

/// Detect R-peaks on a cleaned trace and return their sample indices.
/// Artifact correction, when enabled, drops beats whose RR interval is
/// implausibly short against the local median (spurious double detections).
pub fn detect_r_peaks(clean: &[f64], fs: f64, cfg: &PeakDetectionConfig) -> Vec<usize> {
    if clean.is_empty() {
        return Vec::new();
    }
    let peaks = match cfg.method {
        PeakMethod::AdaptiveThreshold => {
            let (bandpassed, envelope) = detection_envelope(clean, fs);
            let picked = pick_peaks(&bandpassed, &envelope, fs, cfg.min_rr_s);
            if picked.len() < 2 {
                // Adaptive thresholding underperformed; fall back to the
                // naive local-maximum picker.
                fallback_peak_picker(clean, fs, cfg.min_rr_s)
            } else {
                picked
            }
        }
    };
    if cfg.correct_artifacts {
        correct_artifacts(&peaks, cfg.artifact_ratio)
    } else {
        peaks
    }
}

/// Remove beats whose preceding RR interval is shorter than
/// `(1 - ratio) ×` the local RR median. Long intervals (missed beats) are
/// left in place since no detected peak can be removed to fix them.
pub fn correct_artifacts(peaks: &[usize], ratio: f64) -> Vec<usize> {
    if peaks.len() < 3 {
        return peaks.to_vec();
    }
    let rr: Vec<f64> = peaks.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    let mut kept = vec![peaks[0]];
    for (i, &peak) in peaks.iter().enumerate().skip(1) {
        let interval = (peak - *kept.last().expect("kept is non-empty")) as f64;
        let med = local_median(&rr, i - 1, 5);
        if interval < (1.0 - ratio) * med {
            continue;
        }
        kept.push(peak);
    }
    kept
}

fn local_median(rr: &[f64], center: usize, half_width: usize) -> f64 {
    let start = center.saturating_sub(half_width);
    let end = (center + half_width + 1).min(rr.len());
    let mut window: Vec<f64> = rr[start..end].to_vec();
    window.sort_by(f64::total_cmp);
    window[window.len() / 2]
}

fn detection_envelope(data: &[f64], fs: f64) -> (Vec<f64>, Vec<f64>) {
    let fs = fs.max(1.0);
    let bandpassed = bandpass(data, fs, DETECT_LOWCUT_HZ, DETECT_HIGHCUT_HZ);
    let derivative = derivative(&bandpassed);
    let squared: Vec<f64> = derivative.iter().map(|x| x * x).collect();
    let win = ((INTEGRATION_WINDOW_S * fs).round() as usize).max(1);
    let integrated = moving_average(&squared, win);
    (bandpassed, integrated)
}

fn bandpass(data: &[f64], fs: f64, low: f64, high: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let hp = if low > 0.0 {
        single_pole_highpass(data, fs, low)
    } else {
        data.to_vec()
    };
    if high <= 0.0 || high >= fs * 0.5 {
        hp
    } else {
        single_pole_lowpass(&hp, fs, high)
    }
}

fn single_pole_highpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01));
    let alpha = rc / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev_y = data[0];
    let mut prev_x = data[0];
    for &x in data {
        let y = alpha * (prev_y + x - prev_x);
        out.push(y);
        prev_y = y;
        prev_x = x;
    }
    out
}

fn single_pole_lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01));
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = data[0];
    for &x in data {
        prev = prev + alpha * (x - prev);
        out.push(prev);
    }
    out
}

fn derivative(data: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    for i in 1..data.len() {
        out[i] = data[i] - data[i - 1];
    }
    out
}

fn moving_average(data: &[f64], win: usize) -> Vec<f64> {
    if data.is_empty() || win <= 1 {
        return data.to_vec();
    }
    let mut out = vec![0.0; data.len()];
    let mut acc = 0.0;
    for (i, &sample) in data.iter().enumerate() {
        acc += sample;
        if i >= win {
            acc -= data[i - win];
        }
        out[i] = acc / win.min(i + 1) as f64;
    }
    out
}

fn pick_peaks(bandpassed: &[f64], envelope: &[f64], fs: f64, min_rr_s: f64) -> Vec<usize> {
    if bandpassed.is_empty() || envelope.is_empty() {
        return Vec::new();
    }

    let refractory = ((min_rr_s * fs).round() as usize).max(1);
    let search = ((SEARCH_BACK_S * fs).round() as usize).max(1);

    // Seed the running signal/noise estimates from the first second.
    let init = envelope.len().min((fs as usize).max(1));
    let avg = envelope[..init].iter().sum::<f64>() / init as f64;
    let mut signal_level = avg;
    let mut noise_level = avg * 0.5;
    let mut threshold = noise_level + THRESHOLD_SCALE * (signal_level - noise_level).max(0.0);
    let mut last_trigger = 0usize;
    let mut peaks = Vec::new();

    for (i, &sample) in envelope.iter().enumerate() {
        let refractory_ok = peaks.is_empty() || i - last_trigger >= refractory;
        if sample >= threshold && refractory_ok {
            // Search back through the bandpassed trace for the sharpest point.
            let start = i.saturating_sub(search);
            let end = i.min(bandpassed.len() - 1);
            let mut idx = start;
            let mut max_val = f64::MIN;
            for (j, &v) in bandpassed.iter().enumerate().take(end + 1).skip(start) {
                if v > max_val {
                    max_val = v;
                    idx = j;
                }
            }
            peaks.push(idx);
            last_trigger = i;
            signal_level = 0.125 * sample + 0.875 * signal_level;
        } else {
            noise_level = 0.125 * sample + 0.875 * noise_level;
        }
        threshold = noise_level + THRESHOLD_SCALE * (signal_level - noise_level).max(0.0);
    }

    peaks.sort_unstable();
    peaks.dedup();
    peaks
}

fn fallback_peak_picker(data: &[f64], fs: f64, min_rr_s: f64) -> Vec<usize> {
    if data.len() < 3 {
        return Vec::new();
    }
    let min_gap = ((min_rr_s * fs).max(1.0)) as usize;
    let win = ((0.150 * fs) as usize).max(1);
    let baseline = moving_average(data, win);

    let mut peaks = Vec::new();
    let mut last_idx = 0usize;
    for i in 1..data.len() - 1 {
        let y = data[i] - baseline[i];
        if y > 0.0
            && y > (data[i - 1] - baseline[i - 1])
            && y > (data[i + 1] - baseline[i + 1])
            && (peaks.is_empty() || (i - last_idx) >= min_gap)
        {
            peaks.push(i);
            last_idx = i;
        }
    }
    peaks
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{CleaningConfig, PeakDetectionConfig};

    /// Synthesize an ECG-like trace with a gaussian bump at each beat time,
    /// first beat at 0.5 s.
    pub(crate) fn synthetic_ecg(fs: f64, rr: &[f64]) -> Vec<f64> {
        use std::f64::consts::PI;
        let mut beats = Vec::with_capacity(rr.len() + 1);
        let mut t = 0.5;
        beats.push(t);
        for &interval in rr {
            t += interval;
            beats.push(t);
        }
        let duration = beats.last().copied().unwrap_or(1.0) + 1.0;
        let samples = (duration * fs) as usize;
        let mut data = Vec::with_capacity(samples);
        for i in 0..samples {
            let time = i as f64 / fs;
            let mut v = 0.05 * (2.0 * PI * time).sin();
            for &bt in &beats {
                let width = 0.02;
                v += 1.2 * (-0.5 * ((time - bt) / width).powi(2)).exp();
            }
            data.push(v);
        }
        data
    }

    #[test]
    fn detects_every_synthetic_beat() {
        let fs = 250.0;
        let rr = [0.82, 0.78, 0.8, 0.79, 0.81, 0.77, 0.84, 0.88];
        let data = synthetic_ecg(fs, &rr);
        let cfg = PeakDetectionConfig::default();
        let peaks = detect_r_peaks(&data, fs, &cfg);
        assert_eq!(peaks.len(), rr.len() + 1);
    }

    #[test]
    fn cleaning_preserves_length() {
        let fs = 250.0;
        let data = synthetic_ecg(fs, &[0.8, 0.8]);
        let cfg = CleaningConfig::default();
        let clean = clean_ecg(&data, fs, &cfg);
        assert_eq!(clean.len(), data.len());
    }

    #[test]
    fn passthrough_cleaning_is_identity() {
        let cfg = CleaningConfig {
            method: CleaningMethod::None,
            ..CleaningConfig::default()
        };
        let data = vec![1.0, -2.0, 3.0];
        assert_eq!(clean_ecg(&data, 250.0, &cfg), data);
    }

    #[test]
    fn artifact_correction_drops_spurious_short_beats() {
        // Regular 200-sample RR grid with one double detection at 1405
        let peaks = vec![1000, 1200, 1400, 1405, 1600, 1800, 2000];
        let corrected = correct_artifacts(&peaks, 0.3);
        assert_eq!(corrected, vec![1000, 1200, 1400, 1600, 1800, 2000]);
    }

    #[test]
    fn artifact_correction_keeps_regular_rhythm_intact() {
        let peaks: Vec<usize> = (0..10).map(|i| 500 + i * 200).collect();
        assert_eq!(correct_artifacts(&peaks, 0.3), peaks);
    }
}
