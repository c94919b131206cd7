use crate::signal::SignalTable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named experiment window: the segment starts at `onset` and spans
/// `duration_s` seconds of the recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub name: String,
    pub onset: Onset,
    pub duration_s: f64,
}

/// Segment onset: either a literal time or an event marker to look up in
/// the signal table. A label that parses as a number is treated as a time,
/// so onsets can be pinned per dyad without touching the event file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Onset {
    Seconds(f64),
    Label(String),
}

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment '{segment}': onset event '{label}' not found in the event column")]
    OnsetNotFound { segment: String, label: String },
    #[error("segment '{segment}': duration must be positive, got {duration_s}")]
    BadDuration { segment: String, duration_s: f64 },
}

/// A contiguous slice of the recording, owned by the pipeline run that
/// produced it.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub onset_s: f64,
    pub table: SignalTable,
}

/// Slice the signal table into one segment per spec, in spec order.
///
/// Row selection is half-open: a segment covers timestamps in
/// `[onset, onset + duration_s)`, so back-to-back segments never share a
/// sample. An onset label with several matches resolves to the first
/// occurrence in time order; a label with no match is an error. A located
/// onset whose window holds no samples (it overruns the end of the
/// recording) is skipped with a warning rather than failing the dyad.
///
/// Segment windows are not checked for overlap or ordering against each
/// other; keeping the spec list consistent is the caller's responsibility.
pub fn extract_segments(
    table: &SignalTable,
    specs: &[SegmentSpec],
) -> Result<Vec<Segment>, SegmentError> {
    let mut segments = Vec::with_capacity(specs.len());
    for spec in specs {
        if spec.duration_s <= 0.0 {
            return Err(SegmentError::BadDuration {
                segment: spec.name.clone(),
                duration_s: spec.duration_s,
            });
        }
        let onset_s = resolve_onset(table, spec)?;
        let start = table.seconds.partition_point(|&t| t < onset_s);
        let end = table
            .seconds
            .partition_point(|&t| t < onset_s + spec.duration_s);
        if start == end {
            log::warn!(
                "segment '{}' is empty between {:.3}s and {:.3}s, skipping",
                spec.name,
                onset_s,
                onset_s + spec.duration_s
            );
            continue;
        }
        segments.push(Segment {
            name: spec.name.clone(),
            onset_s,
            table: table.slice(start, end),
        });
    }
    Ok(segments)
}

fn resolve_onset(table: &SignalTable, spec: &SegmentSpec) -> Result<f64, SegmentError> {
    let label = match &spec.onset {
        Onset::Seconds(t) => return Ok(*t),
        Onset::Label(label) => label,
    };
    if let Ok(t) = label.trim().parse::<f64>() {
        return Ok(t);
    }
    for (row, (event, description)) in table
        .event
        .iter()
        .zip(table.event_description.iter())
        .enumerate()
    {
        let hit = event.as_deref() == Some(label.as_str())
            || description.as_deref() == Some(label.as_str());
        if hit {
            return Ok(table.seconds[row]);
        }
    }
    Err(SegmentError::OnsetNotFound {
        segment: spec.name.clone(),
        label: label.clone(),
    })
}
