use crate::signal::EventMarker;
use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use std::path::Path;

/// Read an event marker file: one device header line, then a tab-separated
/// three-column table of (label, description, relative timestamp in
/// seconds). Column names vary between acquisition versions, so fields are
/// taken positionally.
pub fn read_event_markers(path: &Path) -> Result<Vec<EventMarker>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_event_markers(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_event_markers(text: &str) -> Result<Vec<EventMarker>> {
    let table = text
        .split_once('\n')
        .map(|(_, rest)| rest)
        .ok_or_else(|| anyhow!("file has no table after the device header line"))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(Trim::All)
        .has_headers(true)
        .flexible(true)
        .from_reader(table.as_bytes());
    let headers = reader.headers()?;
    if headers.len() != 3 {
        bail!("event table should have 3 columns, found {}", headers.len());
    }
    let mut markers = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading event row {}", row + 1))?;
        if record.len() != 3 {
            bail!("event row {} has {} fields, expected 3", row + 1, record.len());
        }
        let seconds: f64 = record
            .get(2)
            .expect("record length checked")
            .parse()
            .with_context(|| format!("event row {}: timestamp is not a number", row + 1))?;
        markers.push(EventMarker {
            label: record.get(0).expect("record length checked").to_string(),
            description: record.get(1).expect("record length checked").to_string(),
            seconds,
        });
    }
    Ok(markers)
}
