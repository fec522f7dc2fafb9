//! Durable storage for generated test cases: one file per pass.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use suitegen_error::{GenError, Result};
use tracing::{info, warn};

use crate::assembler::TestCase;

/// File name prefix for stored transcripts (`test.log.<N>`).
pub const TRANSCRIPT_PREFIX: &str = "test.log.";

/// Session summary file written after the last pass.
pub const SUMMARY_FILE: &str = "summary.json";

/// Where test cases go.
pub trait TranscriptStore {
    /// Write `case` in full, replacing any previous artifact with the same
    /// sequence number. Returns the artifact location.
    fn persist(&mut self, case: &TestCase) -> Result<PathBuf>;

    /// Write a session summary next to the transcripts.
    fn persist_summary<T: Serialize>(&mut self, summary: &T) -> Result<PathBuf>;
}

/// Stores transcripts as files in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    write_attempts: u32,
}

impl DirectoryStore {
    /// Open `root`, creating it if needed. With `reset`, an existing
    /// directory is removed first.
    pub fn open(root: impl Into<PathBuf>, reset: bool, write_attempts: u32) -> Result<Self> {
        let root = root.into();
        if reset && root.exists() {
            info!(root = %root.display(), "resetting transcript directory");
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_attempts: write_attempts.max(1),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn transcript_path(&self, sequence: u32) -> PathBuf {
        self.root.join(format!("{TRANSCRIPT_PREFIX}{sequence}"))
    }

    /// Sequence numbers of transcripts currently on disk, ascending.
    pub fn stored_sequences(&self) -> Result<Vec<u32>> {
        let mut sequences = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            if let Some(sequence) = name
                .to_str()
                .and_then(|name| name.strip_prefix(TRANSCRIPT_PREFIX))
                .and_then(|suffix| suffix.parse::<u32>().ok())
            {
                sequences.push(sequence);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    fn write_with_attempts(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut last_error: Option<io::Error> = None;
        for attempt in 1..=self.write_attempts {
            match fs::write(path, contents) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts = self.write_attempts,
                        error = %err,
                        "transcript write failed"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(GenError::StorageWrite {
            path: path.to_path_buf(),
            attempts: self.write_attempts,
            source: last_error.unwrap_or_else(|| io::Error::other("no write attempted")),
        })
    }
}

impl TranscriptStore for DirectoryStore {
    fn persist(&mut self, case: &TestCase) -> Result<PathBuf> {
        let path = self.transcript_path(case.sequence());
        self.write_with_attempts(&path, case.render().as_bytes())?;
        info!(
            path = %path.display(),
            lines = case.lines().len(),
            "test case stored"
        );
        Ok(path)
    }

    fn persist_summary<T: Serialize>(&mut self, summary: &T) -> Result<PathBuf> {
        let path = self.root.join(SUMMARY_FILE);
        let bytes = serde_json::to_vec_pretty(summary)
            .map_err(|err| GenError::internal(format!("failed to serialize summary: {err}")))?;
        self.write_with_attempts(&path, &bytes)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn case(sequence: u32, lines: &[&str]) -> TestCase {
        TestCase::new(sequence, lines.iter().map(|line| (*line).to_owned()).collect())
    }

    #[test]
    fn persist_writes_numbered_file() {
        let temp = tempdir().expect("tempdir should be created");
        let mut store = DirectoryStore::open(temp.path().join("tests"), false, 1)
            .expect("store should open");
        let path = store
            .persist(&case(3, &["step: connect\n", "[MQTT-1] x\n"]))
            .expect("persist should succeed");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("test.log.3"));
        assert_eq!(
            fs::read_to_string(path).expect("file should exist"),
            "step: connect\n[MQTT-1] x\n"
        );
    }

    #[test]
    fn persist_overwrites_instead_of_appending() {
        let temp = tempdir().expect("tempdir should be created");
        let mut store = DirectoryStore::open(temp.path(), false, 1).expect("store should open");
        store.persist(&case(1, &["old\n", "old\n"])).expect("first write");
        let path = store.persist(&case(1, &["new\n"])).expect("second write");
        assert_eq!(fs::read_to_string(path).expect("read"), "new\n");
    }

    #[test]
    fn reset_clears_previous_session() {
        let temp = tempdir().expect("tempdir should be created");
        let root = temp.path().join("tests");
        let mut store = DirectoryStore::open(&root, false, 1).expect("store should open");
        store.persist(&case(1, &["a\n"])).expect("write");
        store.persist(&case(2, &["b\n"])).expect("write");
        assert_eq!(store.stored_sequences().expect("list"), [1, 2]);

        let store = DirectoryStore::open(&root, true, 1).expect("store should reopen");
        assert!(store.stored_sequences().expect("list").is_empty());
    }

    #[test]
    fn unwritable_target_fails_after_all_attempts() {
        let temp = tempdir().expect("tempdir should be created");
        let mut store = DirectoryStore::open(temp.path(), false, 3).expect("store should open");
        // A directory squatting on the transcript path makes every write fail.
        fs::create_dir_all(store.transcript_path(1)).expect("blocker dir");
        let err = store.persist(&case(1, &["x\n"])).expect_err("write must fail");
        assert!(matches!(err, GenError::StorageWrite { attempts: 3, .. }));
    }

    #[test]
    fn summary_is_pretty_json() {
        let temp = tempdir().expect("tempdir should be created");
        let mut store = DirectoryStore::open(temp.path(), false, 1).expect("store should open");
        let path = store
            .persist_summary(&serde_json::json!({"passes": 2}))
            .expect("summary write");
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(path).expect("read")).expect("valid json");
        assert_eq!(value["passes"], 2);
    }
}
