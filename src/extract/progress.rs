//! Import progress document.
//!
//! The orchestrator is the only writer; the admin UI and the debug
//! endpoint read the persisted copy. Every mutation is flushed to disk so
//! progress survives an interrupted run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{write_json_atomic, ArtifactDir};

/// Pipeline phase currently executing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Ics,
    Render,
    Merge,
}

/// Counter document for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportProgress {
    pub total: usize,
    pub queued: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files_written: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub finished: bool,
    pub current_phase: Phase,
    pub last: Option<String>,
    pub error: Option<String>,
}

/// Single-writer handle over the progress document. Readers get a copy via
/// the persisted file, never a reference into the writer.
pub struct ProgressWriter {
    artifacts: ArtifactDir,
    doc: ImportProgress,
}

impl ProgressWriter {
    pub fn start(artifacts: ArtifactDir, total: usize) -> Self {
        let mut writer = Self {
            artifacts,
            doc: ImportProgress {
                total,
                queued: total,
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        };
        writer.persist();
        writer
    }

    pub fn snapshot(&self) -> ImportProgress {
        self.doc.clone()
    }

    pub fn enter_phase(&mut self, phase: Phase) {
        self.doc.current_phase = phase;
        self.persist();
    }

    pub fn record_success(&mut self, name: &str) {
        self.doc.succeeded += 1;
        self.doc.queued = self.doc.queued.saturating_sub(1);
        self.doc.last = Some(name.to_string());
        self.persist();
    }

    pub fn record_failure(&mut self, name: &str) {
        self.doc.failed += 1;
        self.doc.queued = self.doc.queued.saturating_sub(1);
        self.doc.last = Some(name.to_string());
        self.persist();
    }

    pub fn set_files_written(&mut self, count: usize) {
        self.doc.files_written = count;
        self.persist();
    }

    /// Final write of a run: always sets the finished flag and timestamp,
    /// regardless of how the run ended.
    pub fn finish(&mut self, error: Option<String>) {
        self.doc.error = error;
        self.doc.finished = true;
        self.doc.finished_at = Some(Utc::now());
        self.doc.current_phase = Phase::Idle;
        self.persist();
    }

    /// A progress write failure must not abort the run it reports on.
    fn persist(&mut self) {
        if let Err(e) = write_json_atomic(&self.artifacts.progress_file(), &self.doc) {
            tracing::warn!(error = %e, "failed to persist import progress");
        }
    }
}

/// Read the last persisted progress document, if any run has ever started.
pub fn read_progress(artifacts: &ArtifactDir) -> Option<ImportProgress> {
    crate::artifact::read_json_opt(&artifacts.progress_file()).ok()?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());

        let mut writer = ProgressWriter::start(artifacts.clone(), 3);
        writer.enter_phase(Phase::Ics);
        writer.record_success("Room A");
        writer.record_failure("Room B");
        writer.record_success("Room C");
        writer.enter_phase(Phase::Merge);
        writer.set_files_written(2);
        writer.finish(None);

        let doc = read_progress(&artifacts).unwrap();
        assert_eq!(doc.total, 3);
        assert_eq!(doc.succeeded, 2);
        assert_eq!(doc.failed, 1);
        assert_eq!(doc.queued, 0);
        assert_eq!(doc.files_written, 2);
        assert!(doc.finished);
        assert!(doc.finished_at.is_some());
        assert_eq!(doc.current_phase, Phase::Idle);
        assert_eq!(doc.last.as_deref(), Some("Room C"));
    }

    #[test]
    fn test_finish_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());

        let mut writer = ProgressWriter::start(artifacts.clone(), 1);
        writer.finish(Some("merge failed".into()));

        let doc = read_progress(&artifacts).unwrap();
        assert!(doc.finished);
        assert_eq!(doc.error.as_deref(), Some("merge failed"));
    }

    #[test]
    fn test_no_progress_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());
        assert!(read_progress(&artifacts).is_none());
    }
}
