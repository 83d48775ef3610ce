use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha1::{Digest, Sha1};

/// Stable 8-hex digest of a source URL. Forms the per-calendar artifact
/// filename (`events_<hash>.json`), so it must never change across releases.
pub fn source_hash(url: &str) -> String {
    let digest = Sha1::digest(url.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..8].to_string()
}

/// Content fingerprint of the artifact directory: the latest modification
/// time (unix millis) across `events_*.json` files and the count of
/// non-empty ones. Stat-only; no artifact is read.
///
/// Readers compare this pair against the fingerprint recorded next to the
/// merged schedule to decide whether a rebuild is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint {
    pub max_mtime_ms: i64,
    pub non_empty: usize,
}

pub fn fingerprint(dir: &Path) -> std::io::Result<Fingerprint> {
    let mut max_mtime_ms: i64 = 0;
    let mut non_empty = 0usize;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        // Missing directory means no artifacts yet: an empty fingerprint.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Fingerprint {
                max_mtime_ms: 0,
                non_empty: 0,
            })
        }
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("events_") || !name.ends_with(".json") {
            continue;
        }
        let meta = entry.metadata()?;
        if let Ok(mtime) = meta.modified() {
            if let Ok(elapsed) = mtime.duration_since(UNIX_EPOCH) {
                max_mtime_ms = max_mtime_ms.max(elapsed.as_millis() as i64);
            }
        }
        // A `[]` artifact is a legal success state but carries no events.
        if meta.len() > 2 {
            non_empty += 1;
        }
    }

    Ok(Fingerprint {
        max_mtime_ms,
        non_empty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_source_hash_stable() {
        let h = source_hash("https://calendar.example.edu/rooms/101/calendar.html");
        assert_eq!(h.len(), 8);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        // Known digest: hash must never change across runs or releases.
        assert_eq!(source_hash("hello"), "aaf4c61d");
    }

    #[test]
    fn test_source_hash_distinct_urls() {
        assert_ne!(
            source_hash("https://a.example/cal.html"),
            source_hash("https://b.example/cal.html")
        );
    }

    #[test]
    fn test_fingerprint_missing_dir_is_empty() {
        let fp = fingerprint(Path::new("/nonexistent/roomboard-test")).unwrap();
        assert_eq!(fp.max_mtime_ms, 0);
        assert_eq!(fp.non_empty, 0);
    }

    #[test]
    fn test_fingerprint_counts_non_empty_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("events_aaaaaaaa.json"))
            .unwrap()
            .write_all(b"[]")
            .unwrap();
        File::create(dir.path().join("events_bbbbbbbb.json"))
            .unwrap()
            .write_all(b"[{\"title\":\"x\"}]")
            .unwrap();
        // Non-artifact files are ignored.
        File::create(dir.path().join("schedule_by_room.json"))
            .unwrap()
            .write_all(b"{}")
            .unwrap();

        let fp = fingerprint(dir.path()).unwrap();
        assert_eq!(fp.non_empty, 1);
        assert!(fp.max_mtime_ms > 0);
    }

    #[test]
    fn test_fingerprint_advances_on_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events_cccccccc.json");
        File::create(&path).unwrap().write_all(b"[]").unwrap();
        let before = fingerprint(dir.path()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        File::create(&path)
            .unwrap()
            .write_all(b"[{\"title\":\"y\"}]")
            .unwrap();
        let after = fingerprint(dir.path()).unwrap();

        assert!(
            (after.max_mtime_ms, after.non_empty) > (before.max_mtime_ms, before.non_empty),
            "rewriting an artifact must advance the fingerprint"
        );
    }
}
