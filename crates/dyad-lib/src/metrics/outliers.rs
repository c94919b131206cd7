use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How flagged values are replaced in the imputed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImputeMethod {
    Mean,
    Median,
}

impl FromStr for ImputeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(ImputeMethod::Mean),
            "median" => Ok(ImputeMethod::Median),
            other => Err(format!("invalid impute method '{other}', use mean or median")),
        }
    }
}

/// Copy of `values` with entries outside `[lo, hi]` replaced by NaN.
pub fn plausible_to_nan(values: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    values
        .iter()
        .map(|&v| if v < lo || v > hi { f64::NAN } else { v })
        .collect()
}

/// Z-score outlier flags against the population mean/std of the finite
/// values. NaN entries are always flagged. A spread of zero flags nothing
/// but the NaNs.
pub fn zscore_outliers(values: &[f64], threshold: f64) -> Vec<bool> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return vec![true; values.len()];
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let std =
        (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64).sqrt();
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                true
            } else if std == 0.0 {
                false
            } else {
                ((v - mean) / std).abs() > threshold
            }
        })
        .collect()
}

/// Replace flagged values with the mean or median of the unflagged ones.
/// With nothing left unflagged the originals are returned untouched.
pub fn impute(values: &[f64], flags: &[bool], method: ImputeMethod) -> Vec<f64> {
    let keep: Vec<f64> = values
        .iter()
        .zip(flags)
        .filter_map(|(&v, &flagged)| (!flagged).then_some(v))
        .collect();
    if keep.is_empty() {
        return values.to_vec();
    }
    let replacement = match method {
        ImputeMethod::Mean => keep.iter().sum::<f64>() / keep.len() as f64,
        ImputeMethod::Median => median(&keep),
    };
    values
        .iter()
        .zip(flags)
        .map(|(&v, &flagged)| if flagged { replacement } else { v })
        .collect()
}

/// Z-score flags computed within each segment group rather than over the
/// whole table. `segment_names` and `values` run in parallel.
pub fn zscore_outliers_by_segment(
    segment_names: &[String],
    values: &[f64],
    threshold: f64,
) -> Vec<bool> {
    let mut flags = vec![false; values.len()];
    for_each_group(segment_names, |rows| {
        let group: Vec<f64> = rows.iter().map(|&r| values[r]).collect();
        for (&row, flag) in rows.iter().zip(zscore_outliers(&group, threshold)) {
            flags[row] = flag;
        }
    });
    flags
}

/// Impute within each segment group.
pub fn impute_by_segment(
    segment_names: &[String],
    values: &[f64],
    flags: &[bool],
    method: ImputeMethod,
) -> Vec<f64> {
    let mut out = values.to_vec();
    for_each_group(segment_names, |rows| {
        let group: Vec<f64> = rows.iter().map(|&r| values[r]).collect();
        let group_flags: Vec<bool> = rows.iter().map(|&r| flags[r]).collect();
        for (&row, value) in rows.iter().zip(impute(&group, &group_flags, method)) {
            out[row] = value;
        }
    });
    out
}

/// Segment-level stability flags: a whole segment is marked when its metric
/// has fewer than `min_windows` finite values, a near-zero spread, or a
/// coefficient of variation above `cv_threshold`.
pub fn unstable_segments(
    segment_names: &[String],
    values: &[f64],
    cv_threshold: f64,
    min_windows: usize,
) -> Vec<bool> {
    let mut flags = vec![false; values.len()];
    for_each_group(segment_names, |rows| {
        let finite: Vec<f64> = rows
            .iter()
            .map(|&r| values[r])
            .filter(|v| v.is_finite())
            .collect();
        let unstable = if finite.len() < min_windows {
            true
        } else {
            let mean = finite.iter().sum::<f64>() / finite.len() as f64;
            let std = (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (finite.len() as f64 - 1.0))
                .sqrt();
            let cv = if mean != 0.0 { std / mean } else { f64::INFINITY };
            cv > cv_threshold || std < 1e-5
        };
        for &row in rows {
            flags[row] = unstable;
        }
    });
    flags
}

/// Invoke `f` once per contiguous-by-name segment group with the row
/// indices belonging to it. Groups are taken in first-appearance order and
/// collect non-contiguous rows of the same name together.
fn for_each_group<F: FnMut(&[usize])>(segment_names: &[String], mut f: F) {
    let mut seen: Vec<&String> = Vec::new();
    for name in segment_names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    for name in seen {
        let rows: Vec<usize> = segment_names
            .iter()
            .enumerate()
            .filter_map(|(i, n)| (n == name).then_some(i))
            .collect();
        f(&rows);
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
