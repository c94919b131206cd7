use crate::config::{FrequencyBandsConfig, PipelineConfig};
use crate::signal::SignalTable;
use crate::window::{MetricEngine, MetricMap};
use anyhow::Result;
use realfft::RealFftPlanner;
use std::f64::consts::PI;

/// Peak-based HRV computation plugged into the windowed aggregator.
///
/// Statistics that are undefined on a window — variability over fewer than
/// two RR intervals, spectra over a near-empty tachogram — come back as NaN
/// rather than an error, so every window still emits a row.
#[derive(Debug, Clone)]
pub struct HrvEngine {
    compute_frequency: bool,
    bands: FrequencyBandsConfig,
}

impl HrvEngine {
    pub fn new(compute_frequency: bool, bands: FrequencyBandsConfig) -> Self {
        Self {
            compute_frequency,
            bands,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(
            cfg.general.compute_frequency_metrics,
            cfg.frequency_bands.clone(),
        )
    }
}

impl MetricEngine for HrvEngine {
    fn compute(&self, window: &SignalTable) -> Result<MetricMap> {
        let rr = window.rr_intervals();
        let n_peaks = window.peak_indices().len();
        let mut map = MetricMap::new();
        map.insert("n_peaks".into(), n_peaks as f64);
        let duration = window.duration();
        let heart_rate = if duration > 0.0 {
            60.0 * n_peaks as f64 / duration
        } else {
            f64::NAN
        };
        map.insert("heart_rate_bpm".into(), heart_rate);
        insert_time_domain(&mut map, &rr);
        if self.compute_frequency {
            insert_frequency_domain(&mut map, &rr, &self.bands);
        }
        Ok(map)
    }
}

fn insert_time_domain(map: &mut MetricMap, rr: &[f64]) {
    let n = rr.len();
    let avnn = if n > 0 {
        rr.iter().sum::<f64>() / n as f64
    } else {
        f64::NAN
    };
    let sdnn = if n > 1 {
        (rr.iter().map(|x| (x - avnn).powi(2)).sum::<f64>() / (n as f64 - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    let rmssd = if n > 1 {
        let diffs = rr.windows(2).map(|w| (w[1] - w[0]).powi(2));
        (diffs.sum::<f64>() / (n as f64 - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    let pnn50 = if n > 1 {
        let count = rr.windows(2).filter(|w| (w[1] - w[0]).abs() > 0.050).count();
        count as f64 / (n as f64 - 1.0)
    } else {
        f64::NAN
    };
    map.insert("avnn".into(), avnn);
    map.insert("sdnn".into(), sdnn);
    map.insert("rmssd".into(), rmssd);
    map.insert("pnn50".into(), pnn50);
}

fn insert_frequency_domain(map: &mut MetricMap, rr: &[f64], bands: &FrequencyBandsConfig) {
    let (freqs, powers) = welch_psd(rr, bands.interp_fs);
    let defined = freqs.len() >= 4;
    let band_power = |range: [f64; 2]| {
        if defined {
            integrate_band(&freqs, &powers, range)
        } else {
            f64::NAN
        }
    };
    let ulf = band_power(bands.ulf);
    let vlf = band_power(bands.vlf);
    let lf = band_power(bands.lf);
    let hf = band_power(bands.hf);
    let vhf = band_power(bands.vhf);
    let total_power = if defined {
        powers.iter().sum()
    } else {
        f64::NAN
    };
    let lf_hf = if hf > 0.0 { lf / hf } else { f64::NAN };
    map.insert("ulf".into(), ulf);
    map.insert("vlf".into(), vlf);
    map.insert("lf".into(), lf);
    map.insert("hf".into(), hf);
    map.insert("vhf".into(), vhf);
    map.insert("lf_hf".into(), lf_hf);
    map.insert("total_power".into(), total_power);
    if bands.normalize {
        let denom = lf + hf;
        let (lf_nu, hf_nu) = if denom > 0.0 {
            (lf / denom, hf / denom)
        } else {
            (f64::NAN, f64::NAN)
        };
        map.insert("lf_nu".into(), lf_nu);
        map.insert("hf_nu".into(), hf_nu);
    }
}

fn integrate_band(freqs: &[f64], powers: &[f64], band: [f64; 2]) -> f64 {
    freqs
        .iter()
        .zip(powers)
        .filter(|(f, _)| **f >= band[0] && **f < band[1])
        .map(|(_, p)| *p)
        .sum()
}

/// Welch PSD of the instantaneous-heart-rate tachogram resampled at
/// `fs_interp`, Hann windows with 50% overlap.
fn welch_psd(rr: &[f64], fs_interp: f64) -> (Vec<f64>, Vec<f64>) {
    let signal = interpolate_rr(rr, fs_interp);
    let n = signal.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let window = ((fs_interp * 30.0).max(4.0).min(n as f64)) as usize;
    let step = (window / 2).max(1);
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(window);
    let window_func = hann(window);
    let mut freqs = Vec::new();
    let mut powers = Vec::new();
    let mut pos = 0;
    let mut segments = 0;
    while pos + window <= n {
        let mut frame: Vec<f64> = signal[pos..pos + window]
            .iter()
            .zip(window_func.iter())
            .map(|(x, w)| x * w)
            .collect();
        let mut spectrum = r2c.make_output_vec();
        if r2c.process(&mut frame, &mut spectrum).is_err() {
            break;
        }
        let scale = 1.0 / window as f64;
        for (k, val) in spectrum.iter().enumerate() {
            if segments == 0 {
                freqs.push(k as f64 * fs_interp / window as f64);
                powers.push(0.0);
            }
            let power = if k == 0 || (window % 2 == 0 && k == window / 2) {
                val.norm_sqr()
            } else {
                2.0 * val.norm_sqr()
            } * scale;
            powers[k] += power;
        }
        segments += 1;
        pos += step;
    }
    if segments > 0 {
        for p in powers.iter_mut() {
            *p /= segments as f64;
        }
    }
    (freqs, powers)
}

/// Resample the RR series to an evenly spaced instantaneous-HR signal by
/// zero-order hold between beats.
fn interpolate_rr(rr: &[f64], fs: f64) -> Vec<f64> {
    let mut times = Vec::with_capacity(rr.len());
    let mut acc = 0.0;
    for &interval in rr {
        acc += interval;
        times.push(acc);
    }
    if times.is_empty() {
        return Vec::new();
    }
    let duration = *times.last().expect("non-empty times");
    let n = (duration * fs).ceil() as usize;
    let mut signal = Vec::with_capacity(n);
    let mut idx = 0;
    for i in 0..n {
        let t = i as f64 / fs;
        while idx + 1 < times.len() && times[idx] < t {
            idx += 1;
        }
        let delta = if idx == 0 { rr[0] } else { rr[idx] };
        let value = if delta == 0.0 { 60.0 } else { 60.0 / delta };
        signal.push(value);
    }
    signal
}

fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrequencyBandsConfig;

    fn window_with_peaks(fs: f64, peak_seconds: &[f64], duration_s: f64) -> SignalTable {
        let n = (duration_s * fs) as usize;
        let mut t = SignalTable {
            fs,
            seconds: (0..n).map(|i| i as f64 / fs).collect(),
            raw: vec![0.0; n],
            clean: vec![0.0; n],
            quality: vec![f64::NAN; n],
            peaks: vec![false; n],
            event: vec![None; n],
            event_description: vec![None; n],
        };
        for &ps in peak_seconds {
            let idx = (ps * fs).round() as usize;
            t.peaks[idx] = true;
        }
        t
    }

    fn time_domain(rr: &[f64]) -> MetricMap {
        let mut map = MetricMap::new();
        insert_time_domain(&mut map, rr);
        map
    }

    #[test]
    fn constant_rhythm_has_zero_variability() {
        let m = time_domain(&[0.8, 0.8, 0.8, 0.8]);
        assert!((m["avnn"] - 0.8).abs() < 1e-12);
        assert!(m["sdnn"].abs() < 1e-12);
        assert!(m["rmssd"].abs() < 1e-12);
        assert!(m["pnn50"].abs() < 1e-12);
    }

    #[test]
    fn two_interval_series_matches_hand_computation() {
        let m = time_domain(&[0.8, 0.9]);
        assert!((m["avnn"] - 0.85).abs() < 1e-12);
        assert!((m["sdnn"] - (0.005f64).sqrt()).abs() < 1e-12);
        assert!((m["rmssd"] - 0.1).abs() < 1e-9);
        assert!((m["pnn50"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn variability_is_nan_below_two_intervals() {
        let m = time_domain(&[0.8]);
        assert!((m["avnn"] - 0.8).abs() < 1e-12);
        assert!(m["sdnn"].is_nan());
        assert!(m["rmssd"].is_nan());
        assert!(m["pnn50"].is_nan());
        let m = time_domain(&[]);
        assert!(m["avnn"].is_nan());
    }

    #[test]
    fn single_peak_window_emits_nan_statistics_not_errors() {
        let window = window_with_peaks(100.0, &[5.0], 30.0);
        let engine = HrvEngine::new(false, FrequencyBandsConfig::default());
        let m = engine.compute(&window).unwrap();
        assert_eq!(m["n_peaks"], 1.0);
        assert!((m["heart_rate_bpm"] - 2.0).abs() < 1e-9);
        assert!(m["rmssd"].is_nan());
        assert!(m["sdnn"].is_nan());
    }

    #[test]
    fn frequency_bands_are_finite_for_a_modulated_rhythm() {
        // 0.25 Hz respiratory-style modulation over ~80 s of beats
        let mut peak_seconds = Vec::new();
        let mut t = 0.5;
        while t < 80.0 {
            peak_seconds.push(t);
            t += 0.8 + 0.05 * (2.0 * PI * 0.25 * t).sin();
        }
        let window = window_with_peaks(100.0, &peak_seconds, 81.0);
        let engine = HrvEngine::new(true, FrequencyBandsConfig::default());
        let m = engine.compute(&window).unwrap();
        for key in ["vlf", "lf", "hf", "total_power"] {
            assert!(m[key].is_finite(), "{key} should be finite");
            assert!(m[key] >= 0.0);
        }
        assert!(m["total_power"] > 0.0);
        let nu_sum = m["lf_nu"] + m["hf_nu"];
        assert!((nu_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn frequency_bands_are_nan_on_a_degenerate_tachogram() {
        let window = window_with_peaks(100.0, &[1.0, 1.8], 10.0);
        let engine = HrvEngine::new(true, FrequencyBandsConfig::default());
        let m = engine.compute(&window).unwrap();
        assert!(m["lf"].is_nan());
        assert!(m["total_power"].is_nan());
    }
}
