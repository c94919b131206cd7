use crate::segment::{Onset, SegmentSpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Which member of the dyad a configuration applies to. Segmentation
/// parameters are shared across the dyad; ECG preprocessing parameters are
/// resolved per member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Child,
    Mother,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Child => "child",
            Role::Mother => "mother",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub general: GeneralConfig,
    pub cleaning: CleaningConfig,
    pub peak_detection: PeakDetectionConfig,
    pub signal_quality: SignalQualityConfig,
    pub frequency_bands: FrequencyBandsConfig,
    pub segmentation: Vec<SegmentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Nominal sampling frequency of the recording device (Hz)
    pub sampling_frequency: f64,
    /// Analysis window length for the windowed HRV metrics (seconds)
    pub analysis_window_s: f64,
    pub compute_frequency_metrics: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            sampling_frequency: 500.0,
            analysis_window_s: 30.0,
            compute_frequency_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleaningMethod {
    /// High-pass detrend + low-pass + optional powerline comb
    Bandpass,
    /// Pass the raw signal through unchanged
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub method: CleaningMethod,
    pub lowcut_hz: f64,
    pub highcut_hz: f64,
    /// Mains frequency to suppress; 0 disables the comb stage
    pub powerline_hz: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            method: CleaningMethod::Bandpass,
            lowcut_hz: 0.5,
            highcut_hz: 40.0,
            powerline_hz: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeakMethod {
    /// Envelope + adaptive threshold beat picker
    AdaptiveThreshold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetectionConfig {
    pub method: PeakMethod,
    pub correct_artifacts: bool,
    /// Refractory period between beats (seconds)
    pub min_rr_s: f64,
    /// Allowed RR deviation from the local median before a beat is
    /// considered spurious (artifact correction only)
    pub artifact_ratio: f64,
}

impl Default for PeakDetectionConfig {
    fn default() -> Self {
        Self {
            method: PeakMethod::AdaptiveThreshold,
            correct_artifacts: true,
            min_rr_s: 0.3,
            artifact_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityMethod {
    /// Distance of each beat's QRS complex from the mean template
    AverageQrs,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalQualityConfig {
    pub method: QualityMethod,
}

impl Default for SignalQualityConfig {
    fn default() -> Self {
        Self {
            method: QualityMethod::AverageQrs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyBandsConfig {
    pub ulf: [f64; 2],
    pub vlf: [f64; 2],
    pub lf: [f64; 2],
    pub hf: [f64; 2],
    pub vhf: [f64; 2],
    /// Tachogram interpolation rate for the Welch estimator (Hz)
    pub interp_fs: f64,
    pub normalize: bool,
}

impl Default for FrequencyBandsConfig {
    fn default() -> Self {
        Self {
            ulf: [0.0, 0.0033],
            vlf: [0.0033, 0.04],
            lf: [0.04, 0.15],
            hf: [0.15, 0.4],
            vhf: [0.4, 0.5],
            interp_fs: 4.0,
            normalize: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cleaning: CleaningConfig::default(),
            peak_detection: PeakDetectionConfig::default(),
            signal_quality: SignalQualityConfig::default(),
            frequency_bands: FrequencyBandsConfig::default(),
            segmentation: vec![
                SegmentSpec {
                    name: "baseline".into(),
                    onset: Onset::Label("baseline resting start".into()),
                    duration_s: 300.0,
                },
                SegmentSpec {
                    name: "book_reading".into(),
                    onset: Onset::Label("Book start".into()),
                    duration_s: 300.0,
                },
            ],
        }
    }
}

/// Per-dyad override table, keyed by the dyad id as it appears in the
/// filename. Unknown dyads resolve to the base configuration; the base is
/// never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideTable {
    pub dyad: BTreeMap<String, DyadOverride>,
}

impl OverrideTable {
    fn get(&self, dyad_id: u32) -> Option<&DyadOverride> {
        self.dyad.get(&dyad_id.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DyadOverride {
    pub segmentation: Option<SegmentationOverride>,
    pub child: Option<EcgOverride>,
    pub mother: Option<EcgOverride>,
}

impl DyadOverride {
    fn for_role(&self, role: Role) -> Option<&EcgOverride> {
        match role {
            Role::Child => self.child.as_ref(),
            Role::Mother => self.mother.as_ref(),
        }
    }
}

/// Dyad-level segmentation override: window length and per-segment patches
/// keyed by segment name. Patches against names absent from the base list
/// are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationOverride {
    pub analysis_window_s: Option<f64>,
    pub segments: BTreeMap<String, SegmentPatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentPatch {
    pub onset: Option<Onset>,
    pub duration_s: Option<f64>,
}

/// Member-level ECG preprocessing override; every field optional, merged
/// field-wise onto the base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EcgOverride {
    pub compute_frequency_metrics: Option<bool>,
    pub cleaning: Option<CleaningOverride>,
    pub peak_detection: Option<PeakOverride>,
    pub signal_quality: Option<QualityOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningOverride {
    pub method: Option<CleaningMethod>,
    pub lowcut_hz: Option<f64>,
    pub highcut_hz: Option<f64>,
    pub powerline_hz: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakOverride {
    pub method: Option<PeakMethod>,
    pub correct_artifacts: Option<bool>,
    pub min_rr_s: Option<f64>,
    pub artifact_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityOverride {
    pub method: Option<QualityMethod>,
}

/// Resolve the dyad-level segmentation parameters: the base config with the
/// dyad's segmentation override merged in. No override means the base is
/// returned unchanged.
pub fn resolve_segmentation(
    dyad_id: u32,
    base: &PipelineConfig,
    overrides: &OverrideTable,
) -> PipelineConfig {
    let mut cfg = base.clone();
    let Some(seg) = overrides.get(dyad_id).and_then(|d| d.segmentation.as_ref()) else {
        return cfg;
    };
    if let Some(window) = seg.analysis_window_s {
        cfg.general.analysis_window_s = window;
    }
    for spec in &mut cfg.segmentation {
        if let Some(patch) = seg.segments.get(&spec.name) {
            if let Some(onset) = &patch.onset {
                spec.onset = onset.clone();
            }
            if let Some(duration) = patch.duration_s {
                spec.duration_s = duration;
            }
        }
    }
    cfg
}

/// Resolve the member-level ECG preprocessing parameters on top of an
/// already dyad-resolved configuration.
pub fn resolve_ecg(
    dyad_id: u32,
    role: Role,
    base: &PipelineConfig,
    overrides: &OverrideTable,
) -> PipelineConfig {
    let mut cfg = base.clone();
    let Some(ecg) = overrides.get(dyad_id).and_then(|d| d.for_role(role)) else {
        return cfg;
    };
    if let Some(freq) = ecg.compute_frequency_metrics {
        cfg.general.compute_frequency_metrics = freq;
    }
    if let Some(cleaning) = &ecg.cleaning {
        if let Some(method) = cleaning.method {
            cfg.cleaning.method = method;
        }
        if let Some(lowcut) = cleaning.lowcut_hz {
            cfg.cleaning.lowcut_hz = lowcut;
        }
        if let Some(highcut) = cleaning.highcut_hz {
            cfg.cleaning.highcut_hz = highcut;
        }
        if let Some(powerline) = cleaning.powerline_hz {
            cfg.cleaning.powerline_hz = powerline;
        }
    }
    if let Some(peaks) = &ecg.peak_detection {
        if let Some(method) = peaks.method {
            cfg.peak_detection.method = method;
        }
        if let Some(correct) = peaks.correct_artifacts {
            cfg.peak_detection.correct_artifacts = correct;
        }
        if let Some(min_rr) = peaks.min_rr_s {
            cfg.peak_detection.min_rr_s = min_rr;
        }
        if let Some(ratio) = peaks.artifact_ratio {
            cfg.peak_detection.artifact_ratio = ratio;
        }
    }
    if let Some(quality) = &ecg.signal_quality {
        if let Some(method) = quality.method {
            cfg.signal_quality.method = method;
        }
    }
    cfg
}

pub fn read_config(path: &Path) -> Result<PipelineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}

pub fn read_overrides(path: &Path) -> Result<OverrideTable> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read overrides {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing overrides {}", path.display()))
}

pub fn config_to_toml(config: &PipelineConfig) -> Result<String> {
    toml::to_string_pretty(config).context("serializing config")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides_for_seven() -> OverrideTable {
        let toml_src = r#"
            [dyad.7.segmentation]
            analysis_window_s = 20.0

            [dyad.7.segmentation.segments.baseline]
            onset = 12.5

            [dyad.7.child.cleaning]
            powerline_hz = 60.0

            [dyad.7.mother.peak_detection]
            correct_artifacts = false
        "#;
        toml::from_str(toml_src).expect("parse override table")
    }

    #[test]
    fn unknown_dyad_falls_back_to_base() {
        let base = PipelineConfig::default();
        let overrides = overrides_for_seven();
        let resolved = resolve_segmentation(99, &base, &overrides);
        assert_eq!(
            resolved.general.analysis_window_s,
            base.general.analysis_window_s
        );
        let resolved = resolve_ecg(99, Role::Child, &base, &overrides);
        assert_eq!(resolved.cleaning.powerline_hz, base.cleaning.powerline_hz);
    }

    #[test]
    fn segmentation_override_is_dyad_wide() {
        let base = PipelineConfig::default();
        let overrides = overrides_for_seven();
        let resolved = resolve_segmentation(7, &base, &overrides);
        assert_eq!(resolved.general.analysis_window_s, 20.0);
        let baseline = &resolved.segmentation[0];
        match &baseline.onset {
            Onset::Seconds(t) => assert_eq!(*t, 12.5),
            other => panic!("expected numeric onset, got {:?}", other),
        }
        // untouched fields fall back to base
        assert_eq!(baseline.duration_s, 300.0);
        assert_eq!(resolved.segmentation[1].name, "book_reading");
    }

    #[test]
    fn ecg_override_resolves_per_member() {
        let base = PipelineConfig::default();
        let overrides = overrides_for_seven();
        let child = resolve_ecg(7, Role::Child, &base, &overrides);
        let mother = resolve_ecg(7, Role::Mother, &base, &overrides);
        assert_eq!(child.cleaning.powerline_hz, 60.0);
        assert!(child.peak_detection.correct_artifacts);
        assert_eq!(mother.cleaning.powerline_hz, 50.0);
        assert!(!mother.peak_detection.correct_artifacts);
    }

    #[test]
    fn resolution_is_idempotent() {
        let base = PipelineConfig::default();
        let overrides = overrides_for_seven();
        let once = resolve_ecg(7, Role::Child, &base, &overrides);
        let twice = resolve_ecg(7, Role::Child, &base, &overrides);
        assert_eq!(
            toml::to_string(&once).unwrap(),
            toml::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn config_round_trips_through_toml() {
        let base = PipelineConfig::default();
        let rendered = config_to_toml(&base).unwrap();
        let parsed: PipelineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.segmentation.len(), base.segmentation.len());
        assert_eq!(parsed.general.sampling_frequency, 500.0);
    }
}
