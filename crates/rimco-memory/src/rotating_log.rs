//! Append-only JSON-lines writer with size-based rotation.
//!
//! A [`RotatingLogWriter`] appends one serialized [`LogRecord`] per line to
//! its active file and counts the bytes written to it.  Once the count
//! exceeds the configured threshold, the *next* append closes that file and
//! opens a fresh one with the following index.  The check runs after the
//! write, so a single record may push a file past the threshold; records
//! are never split across files.
//!
//! # File naming
//!
//! | [`SessionStamp`] | File name |
//! |---|---|
//! | `Fixed("2025-06-01_13")`, key `gnss` | `track-2025-06-01_13-gnss-0.jsonl`, `…-1.jsonl`, … |
//! | `HourBucket` | `monitoring-2025-06-01-13-0.jsonl`, `…-1.jsonl`, … |
//!
//! Files are opened lazily on the first append, in append mode.  An existing
//! file that is already over the threshold is skipped.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rimco_types::now_ms;
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::StoreError;

pub const BYTES_PER_MB: u64 = 1_048_576;

/// One persisted line: the payload's fields plus a receipt stamp.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord<T> {
    pub stamp: i64,
    #[serde(flatten)]
    pub payload: T,
}

impl<T: Serialize> LogRecord<T> {
    pub fn now(payload: T) -> Self {
        Self {
            stamp: now_ms(),
            payload,
        }
    }
}

/// How the session part of a file name is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStamp {
    /// Shared process-start identifier, identical for every file of a run.
    Fixed(String),
    /// UTC hour of the moment the file is opened (`YYYY-MM-DD-HH`).
    HourBucket,
}

impl SessionStamp {
    fn resolve(&self) -> String {
        match self {
            SessionStamp::Fixed(id) => id.clone(),
            SessionStamp::HourBucket => Utc::now().format("%Y-%m-%d-%H").to_string(),
        }
    }
}

pub struct RotatingLogWriter {
    dir: PathBuf,
    prefix: String,
    key: Option<String>,
    session: SessionStamp,
    max_bytes: u64,
    file: Option<File>,
    current_path: Option<PathBuf>,
    bytes_written: u64,
    index: u32,
}

impl RotatingLogWriter {
    /// Create a writer for the stream `prefix[-key]` under `dir`.
    ///
    /// Nothing touches the disk until the first [`append`][Self::append].
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        key: Option<String>,
        session: SessionStamp,
        max_bytes: u64,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            key,
            session,
            max_bytes,
            file: None,
            current_path: None,
            bytes_written: 0,
            index: 0,
        }
    }

    /// Serialize `record` as one line and append it.
    ///
    /// Returns the number of bytes written.  A failed write is cut back off
    /// the file so the next record starts on a clean line; when the file
    /// cannot be truncated the writer moves on to the next index.
    pub async fn append<T: Serialize>(&mut self, record: &LogRecord<T>) -> Result<u64, StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if self.file.is_some() && self.bytes_written > self.max_bytes {
            self.rotate().await?;
        }
        if self.file.is_none() {
            self.open().await?;
        }

        let Some(file) = self.file.as_mut() else {
            return Err(StoreError::NotFound("active log file".into()));
        };
        let result = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            self.discard_torn_write().await;
            return Err(e.into());
        }

        self.bytes_written += line.len() as u64;
        Ok(line.len() as u64)
    }

    /// Flush the active file, if any.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }

    /// Path of the file the last append went to.
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Bytes written to the current file so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Rotation index of the current file.
    pub fn index(&self) -> u32 {
        self.index
    }

    async fn discard_torn_write(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(e) = file.set_len(self.bytes_written).await {
            warn!(
                stream = %self.prefix,
                index = self.index,
                error = %e,
                "could not truncate torn record; moving to next file"
            );
            self.index += 1;
            self.bytes_written = 0;
        }
    }

    async fn rotate(&mut self) -> Result<(), StoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        info!(
            stream = %self.prefix,
            key = self.key.as_deref().unwrap_or(""),
            index = self.index,
            bytes = self.bytes_written,
            "rotating log file"
        );
        self.index += 1;
        self.bytes_written = 0;
        Ok(())
    }

    async fn open(&mut self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        loop {
            let path = self.dir.join(self.file_name());
            let existing = match fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };
            if existing > self.max_bytes {
                self.index += 1;
                continue;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            debug!(path = %path.display(), existing, "log file opened");
            self.file = Some(file);
            self.current_path = Some(path);
            self.bytes_written = existing;
            return Ok(());
        }
    }

    fn file_name(&self) -> String {
        let session = self.session.resolve();
        match &self.key {
            Some(key) => format!("{}-{}-{}-{}.jsonl", self.prefix, session, key, self.index),
            None => format!("{}-{}-{}.jsonl", self.prefix, session, self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track_writer(dir: &Path, max_bytes: u64) -> RotatingLogWriter {
        RotatingLogWriter::new(
            dir,
            "track",
            Some("gnss".into()),
            SessionStamp::Fixed("2025-06-01_13".into()),
            max_bytes,
        )
    }

    fn sorted_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn nothing_is_created_before_first_append() {
        let dir = tempfile::tempdir().unwrap();
        let writer = track_writer(dir.path(), 100);
        assert!(writer.current_path().is_none());
        assert!(sorted_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn file_name_encodes_stream_session_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = track_writer(dir.path(), 1_000);
        writer.append(&LogRecord::now(json!({"yaw": 1.0}))).await.unwrap();

        let name = writer.current_path().unwrap().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, "track-2025-06-01_13-gnss-0.jsonl");
    }

    #[tokio::test]
    async fn each_record_is_one_json_line_with_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = track_writer(dir.path(), 1_000);
        writer.append(&LogRecord { stamp: 5, payload: json!({"point": [50.0, 13.0]}) }).await.unwrap();
        writer.append(&LogRecord { stamp: 6, payload: json!({"yaw": 0.5}) }).await.unwrap();

        let content = std::fs::read_to_string(writer.current_path().unwrap()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stamp"], 5);
        assert_eq!(lines[0]["point"], json!([50.0, 13.0]));
        assert_eq!(lines[1]["yaw"], 0.5);
    }

    #[tokio::test]
    async fn rotates_after_threshold_is_exceeded_never_before() {
        let dir = tempfile::tempdir().unwrap();
        let threshold = 100;
        let mut writer = track_writer(dir.path(), threshold);

        for i in 0..40 {
            let before = writer.bytes_written();
            let index = writer.index();
            writer.append(&LogRecord { stamp: i, payload: json!({"seq": i}) }).await.unwrap();
            if before > threshold {
                assert_eq!(writer.index(), index + 1, "append after overflow must open a new file");
            } else {
                assert_eq!(writer.index(), index);
            }
        }

        let files = sorted_files(dir.path());
        assert!(files.len() > 1);
        let last = writer.current_path().unwrap().to_path_buf();
        for file in files.iter().filter(|f| **f != last) {
            let size = std::fs::metadata(file).unwrap().len();
            assert!(size >= threshold, "{} rotated early at {size} bytes", file.display());
        }
    }

    #[tokio::test]
    async fn oversized_single_record_is_written_whole() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = track_writer(dir.path(), 10);
        let big = "x".repeat(200);
        writer.append(&LogRecord::now(json!({"blob": big}))).await.unwrap();
        assert!(writer.bytes_written() > 200);
        assert_eq!(writer.index(), 0);

        writer.append(&LogRecord::now(json!({"seq": 1}))).await.unwrap();
        assert_eq!(writer.index(), 1);
    }

    #[tokio::test]
    async fn independent_writers_rotate_independently() {
        let dir = tempfile::tempdir().unwrap();
        let mut busy = track_writer(dir.path(), 50);
        let mut quiet = RotatingLogWriter::new(
            dir.path(),
            "track",
            Some("odom".into()),
            SessionStamp::Fixed("2025-06-01_13".into()),
            50,
        );

        for i in 0..20 {
            busy.append(&LogRecord { stamp: i, payload: json!({"seq": i}) }).await.unwrap();
        }
        quiet.append(&LogRecord::now(json!({"seq": 0}))).await.unwrap();

        assert!(busy.index() > 0);
        assert_eq!(quiet.index(), 0);
    }

    #[tokio::test]
    async fn existing_oversized_file_is_skipped_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("track-2025-06-01_13-gnss-0.jsonl"),
            "y".repeat(120),
        )
        .unwrap();

        let mut writer = track_writer(dir.path(), 100);
        writer.append(&LogRecord::now(json!({"seq": 0}))).await.unwrap();
        assert_eq!(writer.index(), 1);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_write_never_corrupts_the_next_record() {
        let dir = tempfile::tempdir().unwrap();
        // Every write to /dev/full fails with ENOSPC and it cannot be truncated.
        std::os::unix::fs::symlink("/dev/full", dir.path().join("track-2025-06-01_13-gnss-0.jsonl"))
            .unwrap();
        let mut writer = track_writer(dir.path(), 1_000);

        assert!(writer.append(&LogRecord::now(json!({"seq": 0}))).await.is_err());
        writer.append(&LogRecord { stamp: 1, payload: json!({"seq": 1}) }).await.unwrap();

        assert_eq!(writer.index(), 1);
        let content = std::fs::read_to_string(writer.current_path().unwrap()).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines, vec![json!({"stamp": 1, "seq": 1})]);
    }

    #[tokio::test]
    async fn truncation_restores_the_line_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = track_writer(dir.path(), 1_000);
        writer.append(&LogRecord { stamp: 1, payload: json!({"seq": 1}) }).await.unwrap();
        let clean = writer.bytes_written();

        // Simulate a record torn halfway through.
        if let Some(file) = writer.file.as_mut() {
            file.write_all(b"{\"stamp\":2,\"se").await.unwrap();
            file.flush().await.unwrap();
        }
        writer.discard_torn_write().await;
        writer.append(&LogRecord { stamp: 3, payload: json!({"seq": 3}) }).await.unwrap();

        assert_eq!(writer.index(), 0);
        let content = std::fs::read_to_string(writer.current_path().unwrap()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
        assert!(writer.bytes_written() > clean);
    }

    #[tokio::test]
    async fn hour_bucket_names_have_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            RotatingLogWriter::new(dir.path(), "monitoring", None, SessionStamp::HourBucket, 1_000);
        writer.append(&LogRecord::now(json!({"name": "GNSS", "level": 0}))).await.unwrap();

        let name = writer.current_path().unwrap().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("monitoring-"));
        assert!(name.ends_with("-0.jsonl"));
        // monitoring-YYYY-MM-DD-HH-0.jsonl
        assert_eq!(name.len(), "monitoring-2025-06-01-13-0.jsonl".len());
    }
}
