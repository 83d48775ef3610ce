use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// One extracted event as persisted in per-calendar artifacts and in the
/// merged schedule. `title`/`location` are the raw calendar strings; the
/// remaining text fields are derived from them by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub source: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub title: String,
    #[serde(default)]
    pub display_title: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub professor: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub building: String,
    #[serde(default)]
    pub group_display: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub calendar_name: String,
}

/// Filesystem layout of the artifact directory. All derived state lives in
/// one flat directory so a single fingerprint pass covers it.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events_file(&self, source_hash: &str) -> PathBuf {
        self.root.join(format!("events_{source_hash}.json"))
    }

    pub fn schedule_file(&self) -> PathBuf {
        self.root.join("schedule_by_room.json")
    }

    pub fn calendar_map_file(&self) -> PathBuf {
        self.root.join("calendar_map.json")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.root.join("import_progress.json")
    }

    pub fn complete_marker_file(&self) -> PathBuf {
        self.root.join("import_complete.txt")
    }

    pub fn fingerprint_file(&self) -> PathBuf {
        self.root.join("schedule.fp")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".schedule.lock")
    }

    pub fn subject_map_file(&self) -> PathBuf {
        self.root.join("subject_map.json")
    }

    /// Write one source's events. An empty slice writes a valid `[]`
    /// artifact: the record that the source was checked and had no bookings.
    pub fn write_events(&self, source_hash: &str, events: &[StoredEvent]) -> anyhow::Result<()> {
        write_json_atomic(&self.events_file(source_hash), events)
    }

    /// Read one source's artifact. Absent file means "never extracted".
    pub fn read_events(&self, source_hash: &str) -> anyhow::Result<Option<Vec<StoredEvent>>> {
        read_json_opt(&self.events_file(source_hash))
    }

    /// Number of per-calendar artifacts currently on disk.
    pub fn artifact_count(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with("events_") && name.ends_with(".json")
            })
            .count()
    }

    /// All per-calendar artifacts, keyed by source hash.
    pub fn read_all_events(&self) -> anyhow::Result<Vec<(String, Vec<StoredEvent>)>> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            let Some(hash) = name
                .strip_prefix("events_")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            let data = fs::read(entry.path())
                .with_context(|| format!("reading artifact {name}"))?;
            let events: Vec<StoredEvent> = serde_json::from_slice(&data)
                .with_context(|| format!("decoding artifact {name}"))?;
            out.push((hash.to_string(), events));
        }
        // Deterministic merge input order regardless of directory iteration.
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

/// Serialize `value` to a temp file in the target's directory, then rename
/// over the destination. Readers never observe a partial file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("artifact path has no parent: {}", path.display()))?;
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file(), value)
        .with_context(|| format!("serializing {}", path.display()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Write plain text with the same temp-then-rename discipline.
pub fn write_text_atomic(path: &Path, text: &str) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("artifact path has no parent: {}", path.display()))?;
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp.as_file(), text.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Read and decode a JSON file, mapping a missing file to `None`.
pub fn read_json_opt<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok(Some(value))
}
