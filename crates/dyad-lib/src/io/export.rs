use crate::config::{PipelineConfig, Role};
use crate::io::naming::RecordingId;
use crate::segment::Segment;
use crate::window::WindowMetricRow;
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Identity columns attached to every exported row so metric tables from
/// different subjects can be concatenated downstream.
#[derive(Debug, Clone, Copy)]
pub struct SubjectMeta<'a> {
    pub role: Role,
    pub id: &'a RecordingId,
}

impl SubjectMeta<'_> {
    fn columns(&self) -> [String; 4] {
        [
            self.role.as_str().to_string(),
            self.id.condition.to_string(),
            self.id.wave.clone(),
            self.id.dyad.to_string(),
        ]
    }
}

/// NaN renders as an empty cell, the table-level missing-value marker.
fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

/// Write one subject's windowed metric table. Metric columns are the union
/// of metric names over all rows, in name order; a row without a metric
/// (engine failure) gets empty cells there.
pub fn write_metrics_csv(path: &Path, rows: &[WindowMetricRow], meta: SubjectMeta) -> Result<()> {
    let metric_names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.metrics.keys().map(String::as_str))
        .collect();
    let file = fs::File::create(path)
        .with_context(|| format!("creating metrics table {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);

    let mut header = vec![
        "segment_name".to_string(),
        "analysis_window".to_string(),
        "start_index".to_string(),
        "stop_index".to_string(),
    ];
    header.extend(metric_names.iter().map(|n| n.to_string()));
    header.extend([
        "subject_type".to_string(),
        "condition".to_string(),
        "wave".to_string(),
        "dyad_id".to_string(),
    ]);
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.segment_name.clone(),
            row.analysis_window.to_string(),
            row.start_index.to_string(),
            row.stop_index.to_string(),
        ];
        for name in &metric_names {
            record.push(
                row.metrics
                    .get(*name)
                    .map(|&v| fmt_value(v))
                    .unwrap_or_default(),
            );
        }
        record.extend(meta.columns());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the preprocessed signal+peaks rows of every segment, concatenated
/// in segment order.
pub fn write_segment_signals_csv(
    path: &Path,
    segments: &[Segment],
    meta: SubjectMeta,
) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("creating signals table {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    writer.write_record([
        "segment_name",
        "seconds",
        "raw",
        "clean",
        "quality",
        "peak",
        "event",
        "event_description",
        "subject_type",
        "condition",
        "wave",
        "dyad_id",
    ])?;
    for segment in segments {
        let t = &segment.table;
        for i in 0..t.len() {
            let mut record = vec![
                segment.name.clone(),
                t.seconds[i].to_string(),
                fmt_value(t.raw[i]),
                fmt_value(t.clean[i]),
                fmt_value(t.quality[i]),
                if t.peaks[i] { "1" } else { "0" }.to_string(),
                t.event[i].clone().unwrap_or_default(),
                t.event_description[i].clone().unwrap_or_default(),
            ];
            record.extend(meta.columns());
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Export the effective configuration next to the results it produced.
pub fn write_config_toml(path: &Path, config: &PipelineConfig) -> Result<()> {
    let rendered = crate::config::config_to_toml(config)?;
    fs::write(path, rendered).with_context(|| format!("writing config {}", path.display()))
}

/// A metric table read back for the separate outlier-cleaning stage:
/// headers plus string cells, with numeric views on demand. Cells are kept
/// as strings so untouched columns round-trip unchanged.
#[derive(Debug, Clone)]
pub struct MetricsTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MetricsTable {
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .from_path(path)
            .with_context(|| format!("opening metrics table {}", path.display()))?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("reading metrics row {}", i + 1))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)
            .with_context(|| format!("creating metrics table {}", path.display()))?;
        let mut writer = WriterBuilder::new().from_writer(file);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("metrics table has no column '{name}'"))
    }

    /// Column as strings; short rows yield empty cells.
    pub fn string_column(&self, idx: usize) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.get(idx).cloned().unwrap_or_default())
            .collect()
    }

    /// Column as numbers; empty or non-numeric cells become NaN.
    pub fn numeric_column(&self, idx: usize) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| {
                r.get(idx)
                    .and_then(|cell| cell.parse().ok())
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }

    pub fn push_flag_column(&mut self, name: &str, flags: &[bool]) {
        self.headers.push(name.to_string());
        for (row, &flag) in self.rows.iter_mut().zip(flags) {
            row.push(if flag { "true" } else { "false" }.to_string());
        }
    }

    pub fn push_numeric_column(&mut self, name: &str, values: &[f64]) {
        self.headers.push(name.to_string());
        for (row, &value) in self.rows.iter_mut().zip(values) {
            row.push(fmt_value(value));
        }
    }
}
