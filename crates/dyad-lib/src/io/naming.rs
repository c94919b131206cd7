use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity parsed from the recording device's filename contract:
/// `<condition-letter><id>_W<wave>_mc.txt` for signal files and
/// `<condition-letter><id>_W<wave>_event.txt` for event files,
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordingId {
    pub condition: char,
    pub dyad: u32,
    pub wave: String,
}

impl RecordingId {
    /// Directory/file prefix used for everything exported for this dyad.
    pub fn folder_name(&self) -> String {
        format!("{}_{}_{}", self.condition, self.dyad, self.wave)
    }

    pub fn file_prefix(&self) -> String {
        format!("{}{}_{}", self.condition, self.dyad, self.wave)
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} {}", self.condition, self.dyad, self.wave)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingKind {
    /// Dual-channel ECG signal file (`*_mc.txt`)
    Signal,
    /// Event marker file (`*_event.txt`)
    Event,
}

/// One dyad's matched input pair.
#[derive(Debug, Clone)]
pub struct DyadFiles {
    pub id: RecordingId,
    pub signal_path: PathBuf,
    pub event_path: PathBuf,
}

/// Parse a filename stem like `B01_W1_mc` into its identity and kind.
pub fn parse_stem(stem: &str) -> Result<(RecordingId, RecordingKind)> {
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() != 3 {
        bail!("'{stem}' does not match <condition><id>_W<wave>_<mc|event>");
    }
    let mut chars = tokens[0].chars();
    let condition = chars
        .next()
        .ok_or_else(|| anyhow!("'{stem}' has an empty condition token"))?
        .to_ascii_uppercase();
    if !condition.is_ascii_alphabetic() {
        bail!("'{stem}': condition '{condition}' is not a letter");
    }
    let digits = chars.as_str();
    let dyad: u32 = digits
        .parse()
        .with_context(|| format!("'{stem}': dyad id '{digits}' is not numeric"))?;
    let wave = tokens[1].to_ascii_uppercase();
    if !wave.starts_with('W') || wave.len() < 2 {
        bail!("'{stem}': wave token '{}' should look like W1", tokens[1]);
    }
    let kind = match tokens[2].to_ascii_lowercase().as_str() {
        "mc" => RecordingKind::Signal,
        "event" => RecordingKind::Event,
        other => bail!("'{stem}': unknown file type '{other}'"),
    };
    Ok((
        RecordingId {
            condition,
            dyad,
            wave,
        },
        kind,
    ))
}

/// Scan a raw-data directory and pair signal and event files by parsed
/// identity. Files that do not follow the naming contract and identities
/// missing one half of the pair are logged and left out; pairing never
/// depends on directory iteration order.
pub fn discover_pairs(dir: &Path) -> Result<Vec<DyadFiles>> {
    let mut signals: BTreeMap<RecordingId, PathBuf> = BTreeMap::new();
    let mut events: BTreeMap<RecordingId, PathBuf> = BTreeMap::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading raw data directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file()
            || !path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
        {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match parse_stem(stem) {
            Ok((id, RecordingKind::Signal)) => {
                signals.insert(id, path);
            }
            Ok((id, RecordingKind::Event)) => {
                events.insert(id, path);
            }
            Err(err) => {
                log::warn!("skipping {}: {err}", path.display());
            }
        }
    }

    let mut pairs = Vec::new();
    for (id, signal_path) in signals {
        match events.remove(&id) {
            Some(event_path) => pairs.push(DyadFiles {
                id,
                signal_path,
                event_path,
            }),
            None => log::warn!("no event file for recording {id}, skipping"),
        }
    }
    for id in events.keys() {
        log::warn!("no signal file for events {id}, skipping");
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_signal_and_event_stems() {
        let (id, kind) = parse_stem("B01_W1_mc").unwrap();
        assert_eq!(id.condition, 'B');
        assert_eq!(id.dyad, 1);
        assert_eq!(id.wave, "W1");
        assert_eq!(kind, RecordingKind::Signal);

        let (id, kind) = parse_stem("c123_w2_EVENT").unwrap();
        assert_eq!(id.condition, 'C');
        assert_eq!(id.dyad, 123);
        assert_eq!(id.wave, "W2");
        assert_eq!(kind, RecordingKind::Event);
    }

    #[test]
    fn rejects_malformed_stems() {
        assert!(parse_stem("B01_mc").is_err());
        assert!(parse_stem("01_W1_mc").is_err());
        assert!(parse_stem("Bxx_W1_mc").is_err());
        assert!(parse_stem("B01_X1_mc").is_err());
        assert!(parse_stem("B01_W1_signals").is_err());
    }

    #[test]
    fn pairs_by_identity_not_listing_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "B02_W1_event.txt",
            "B01_W1_mc.txt",
            "B02_W1_mc.txt",
            "B01_W1_event.txt",
            "B03_W1_mc.txt", // unpaired
            "notes.txt",     // not part of the contract
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let pairs = discover_pairs(dir.path()).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].id.dyad, 1);
        assert_eq!(pairs[1].id.dyad, 2);
        assert!(pairs[0]
            .signal_path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("mc"));
    }
}
