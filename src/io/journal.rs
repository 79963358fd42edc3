//! Reading journal - durable append-only log of raw readings
//!
//! Raw readings are written in JSONL format (one JSON object per line) to the
//! file specified in config, and replayed into the in-memory store at startup.
//! Only raw readings are persisted; the smoothed view and the statistics
//! tables are derived state and rebuilt from this log.

use crate::domain::RawReading;
use crate::services::store::ReadingStore;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Counts from one journal replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayStats {
    pub stored: usize,
    pub skipped: usize,
}

/// Append-only journal of raw readings
pub struct Journal {
    file_path: String,
}

impl Journal {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "journal_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a reading to the journal file
    /// Returns true if successful, false otherwise
    pub fn append(&self, reading: &RawReading) -> bool {
        let json = match serde_json::to_string(reading) {
            Ok(json) => json,
            Err(e) => {
                error!(location = %reading.location, error = %e, "journal_encode_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(
                    location = %reading.location,
                    count = %reading.count,
                    "reading_journaled"
                );
                true
            }
            Err(e) => {
                error!(
                    location = %reading.location,
                    error = %e,
                    "journal_append_failed"
                );
                false
            }
        }
    }

    /// Append a line to the journal file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;

        Ok(())
    }

    /// Replay the journal into the store. A missing file is an empty journal;
    /// malformed or out-of-order lines are skipped with a warning so one bad
    /// write cannot wedge startup.
    pub fn replay(&self, store: &ReadingStore) -> anyhow::Result<ReplayStats> {
        let path = Path::new(&self.file_path);
        if !path.exists() {
            info!(file_path = %self.file_path, "journal_empty");
            return Ok(ReplayStats::default());
        }

        let file = File::open(path)
            .with_context(|| format!("Failed to open journal {}", self.file_path))?;
        let reader = BufReader::new(file);

        let mut stats = ReplayStats::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read journal {}", self.file_path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawReading>(&line) {
                Ok(reading) if store.append(&reading) => stats.stored += 1,
                Ok(_) => stats.skipped += 1,
                Err(e) => {
                    warn!(line = %(line_no + 1), error = %e, "journal_line_malformed");
                    stats.skipped += 1;
                }
            }
        }

        info!(
            stored = %stats.stored,
            skipped = %stats.skipped,
            file_path = %self.file_path,
            "journal_replayed"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::smoothing::Smoothing;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::tempdir;

    fn reading(location: &str, count: u32, minute: u32) -> RawReading {
        RawReading {
            location: location.to_string(),
            count,
            timestamp: Utc.with_ymd_and_hms(2025, 11, 20, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_append_writes_one_json_line() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("readings.jsonl");
        let journal = Journal::new(file_path.to_str().unwrap());

        assert!(journal.append(&reading("Hall A", 42, 0)));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: RawReading = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed, reading("Hall A", 42, 0));
    }

    #[test]
    fn test_replay_restores_store() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("readings.jsonl");
        let journal = Journal::new(file_path.to_str().unwrap());

        journal.append(&reading("Hall A", 10, 0));
        journal.append(&reading("Hall A", 20, 1));
        journal.append(&reading("Hall B", 5, 0));

        let store = ReadingStore::new(Smoothing::Window { size: 1 });
        let stats = journal.replay(&store).unwrap();

        assert_eq!(stats, ReplayStats { stored: 3, skipped: 0 });
        assert_eq!(store.location_count(), 2);
        assert_eq!(store.reading_count(), 3);
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path().join("absent.jsonl").to_str().unwrap());
        let store = ReadingStore::new(Smoothing::Window { size: 1 });
        assert_eq!(journal.replay(&store).unwrap(), ReplayStats::default());
    }

    #[test]
    fn test_replay_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("readings.jsonl");
        let journal = Journal::new(file_path.to_str().unwrap());

        journal.append(&reading("Hall A", 10, 0));
        fs::write(
            &file_path,
            format!("{}not json\n", fs::read_to_string(&file_path).unwrap()),
        )
        .unwrap();
        journal.append(&reading("Hall A", 20, 1));

        let store = ReadingStore::new(Smoothing::Window { size: 1 });
        let stats = journal.replay(&store).unwrap();
        assert_eq!(stats, ReplayStats { stored: 2, skipped: 1 });
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("readings.jsonl");
        let journal = Journal::new(nested.to_str().unwrap());

        assert!(journal.append(&reading("Hall A", 1, 0)));
        assert!(nested.exists());
    }
}
