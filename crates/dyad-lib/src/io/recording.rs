use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use std::path::Path;

/// Both channels of a dyad recording as exported by the acquisition
/// software: one device header line, then a tab-separated table with a
/// relative timestamp column (seconds, starting at 0) and one biosignal
/// column per dyad member.
#[derive(Debug, Clone)]
pub struct DyadRecording {
    pub seconds: Vec<f64>,
    pub child: Vec<f64>,
    pub mother: Vec<f64>,
}

impl DyadRecording {
    pub fn len(&self) -> usize {
        self.seconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seconds.is_empty()
    }
}

pub fn read_dyad_recording(path: &Path) -> Result<DyadRecording> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_dyad_recording(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_dyad_recording(text: &str) -> Result<DyadRecording> {
    // The export always opens with one free-form device line before the
    // column header row.
    let table = text
        .split_once('\n')
        .map(|(_, rest)| rest)
        .ok_or_else(|| anyhow!("file has no table after the device header line"))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(table.as_bytes());
    let headers = reader.headers()?.clone();
    let time_idx = find_column(&headers, "time")
        .ok_or_else(|| anyhow!("missing timestamp column in {:?}", headers))?;
    let child_idx = find_column(&headers, "child")
        .ok_or_else(|| anyhow!("missing child channel column in {:?}", headers))?;
    let mother_idx = find_column(&headers, "mother")
        .ok_or_else(|| anyhow!("missing mother channel column in {:?}", headers))?;

    let mut seconds = Vec::new();
    let mut child = Vec::new();
    let mut mother = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading sample row {}", row + 1))?;
        seconds.push(parse_field(&record, time_idx, row, "timestamp")?);
        child.push(parse_field(&record, child_idx, row, "child channel")?);
        mother.push(parse_field(&record, mother_idx, row, "mother channel")?);
    }
    if seconds.is_empty() {
        bail!("recording holds no samples");
    }
    Ok(DyadRecording {
        seconds,
        child,
        mother,
    })
}

fn find_column(headers: &csv::StringRecord, needle: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.to_ascii_lowercase().contains(needle))
}

fn parse_field(record: &csv::StringRecord, idx: usize, row: usize, what: &str) -> Result<f64> {
    record
        .get(idx)
        .ok_or_else(|| anyhow!("row {}: missing {what}", row + 1))?
        .parse()
        .with_context(|| format!("row {}: {what} is not a number", row + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ExportedByAcquisitionSuite v2.1\n\
Time (s)\tMWCHILD_Bio\tMOTHER_Bio\n\
0.000\t0.12\t0.30\n\
0.002\t0.15\t0.31\n\
0.004\t0.11\t0.29\n";

    #[test]
    fn parses_device_export() {
        let rec = parse_dyad_recording(SAMPLE).unwrap();
        assert_eq!(rec.len(), 3);
        assert!((rec.seconds[1] - 0.002).abs() < 1e-12);
        assert!((rec.child[0] - 0.12).abs() < 1e-12);
        assert!((rec.mother[2] - 0.29).abs() < 1e-12);
    }

    #[test]
    fn parses_sample_export_from_disk() {
        let path = sample_path("test_data/B07_W1_mc.txt");
        let rec = read_dyad_recording(&path).expect("read sample recording");
        assert_eq!(rec.len(), 300);
        assert_eq!(rec.child.len(), rec.mother.len());
        assert!((rec.seconds[0]).abs() < 1e-12);
        assert!(rec.seconds.windows(2).all(|w| w[1] > w[0]));
    }

    fn sample_path(relative: &str) -> std::path::PathBuf {
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(|p| p.parent())
            .expect("workspace root")
            .join(relative)
    }

    #[test]
    fn missing_channel_column_is_an_error() {
        let text = "device\nTime (s)\tMWCHILD_Bio\n0.0\t0.1\n";
        let err = parse_dyad_recording(text).unwrap_err();
        assert!(err.to_string().contains("mother"));
    }

    #[test]
    fn empty_table_is_an_error() {
        let text = "device\nTime (s)\tMWCHILD_Bio\tMOTHER_Bio\n";
        assert!(parse_dyad_recording(text).is_err());
    }
}
