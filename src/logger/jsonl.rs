//! Append-only JSONL activity log.
//!
//! Every line is one self-contained JSON object, assembled in memory and
//! written with a single `write_all` so a tailing reader never sees half a line.
//!
//! Writes degrade through four levels instead of failing:
//! primary file, fallback file (RAM-backed by default), stderr with a
//! `[LSR-JSONL]` prefix, and finally silent discard. The reclaimer must keep
//! freeing space even when the log volume is the one that is full.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::config::PathsConfig;
use crate::core::errors::{LsrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    ReclaimNeeded,
    ScanComplete,
    EntryDelete,
    Exhausted,
    Notice,
    Error,
}

/// One JSONL record. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp, millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Classification label of the affected entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Eviction tier of the affected entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            kind: None,
            tier: None,
            free_pct: None,
            free_bytes: None,
            entries: None,
            deleted: None,
            failed: None,
            duration_ms: None,
            dry_run: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where the writer is currently sending lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl WriterState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this many bytes.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval: Duration,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self::from_paths(&PathsConfig::default())
    }
}

impl JsonlConfig {
    #[must_use]
    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self {
            path: paths.activity_log.clone(),
            fallback_path: paths.activity_log_fallback.clone(),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval: Duration::from_secs(10),
        }
    }
}

pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: Instant,
}

impl JsonlWriter {
    /// Open the log, falling down the degradation chain as needed. Never fails.
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: Instant::now(),
        };
        if !writer.attach(WriterState::Primary) {
            writer.degrade_from(WriterState::Primary);
        }
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(err) => {
                let _ = writeln!(io::stderr(), "[LSR-JSONL] serialize error: {err}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    #[must_use]
    pub fn state(&self) -> WriterState {
        self.state
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Return to the primary file if it has become writable again.
    pub fn try_recover(&mut self) {
        if self.state == WriterState::Primary {
            return;
        }
        if self.attach(WriterState::Primary) {
            let _ = writeln!(
                io::stderr(),
                "[LSR-JSONL] recovered to primary path: {}",
                self.config.path.display()
            );
        }
    }

    // ──────────────────── internals ────────────────────

    fn target(&self, state: WriterState) -> Option<&Path> {
        match state {
            WriterState::Primary => Some(&self.config.path),
            WriterState::Fallback => self.config.fallback_path.as_deref(),
            WriterState::Stderr | WriterState::Discard => None,
        }
    }

    /// Open the file behind `state` and switch to it. False if that is impossible.
    fn attach(&mut self, state: WriterState) -> bool {
        let Some(path) = self.target(state) else {
            return false;
        };
        match open_append(path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.state = state;
                self.bytes_written = size;
                true
            }
            Err(_) => false,
        }
    }

    fn degrade_from(&mut self, failed: WriterState) {
        self.writer = None;
        let next = match failed {
            WriterState::Primary => {
                if self.attach(WriterState::Fallback) {
                    let _ = writeln!(
                        io::stderr(),
                        "[LSR-JSONL] primary path failed, using fallback: {}",
                        self.target(WriterState::Fallback)
                            .map_or_else(String::new, |p| p.display().to_string())
                    );
                    return;
                }
                WriterState::Stderr
            }
            WriterState::Fallback => WriterState::Stderr,
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
        if next == WriterState::Stderr {
            let _ = writeln!(
                io::stderr(),
                "[LSR-JSONL] {} path failed, logging to stderr",
                failed.as_str()
            );
        }
        self.state = next;
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if matches!(self.state, WriterState::Primary | WriterState::Fallback)
            && self.bytes_written.saturating_add(len) > self.config.max_size_bytes
        {
            self.rotate();
        }

        match self.state {
            WriterState::Primary | WriterState::Fallback => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += len;
                    if self.last_fsync.elapsed() >= self.config.fsync_interval {
                        self.fsync();
                    }
                } else {
                    self.degrade_from(self.state);
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[LSR-JSONL] {line}").is_err() {
                    self.state = WriterState::Discard;
                }
            }
            WriterState::Discard => {}
        }
    }

    fn rotate(&mut self) {
        self.flush();
        self.writer = None;
        let current = self.state;
        let Some(base) = self.target(current).map(Path::to_path_buf) else {
            return;
        };

        // foo.jsonl.(n-1) -> foo.jsonl.n, ..., foo.jsonl -> foo.jsonl.1
        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for index in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, index), rotated_name(&base, index + 1));
        }
        if keep > 0 {
            let _ = fs::rename(&base, rotated_name(&base, 1));
        } else {
            let _ = fs::remove_file(&base);
        }

        if !self.attach(current) {
            self.degrade_from(current);
        }
    }
}

// ──────────────────── helpers ────────────────────

/// Open or create a file for appending, returning it with its current size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| LsrError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LsrError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `activity.jsonl` -> `activity.jsonl.2`
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

pub(crate) fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes,
            max_rotated_files: 3,
            fsync_interval: Duration::from_secs(60),
        }
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn entries_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));

        let mut deleted = LogEntry::new(EventType::EntryDelete, Severity::Info);
        deleted.path = Some("/logs/dead-link".to_string());
        deleted.tier = Some("stray".to_string());
        writer.write_entry(&LogEntry::new(EventType::DaemonStart, Severity::Info));
        writer.write_entry(&deleted);
        writer.flush();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "daemon_start");
        assert_eq!(lines[0]["severity"], "info");
        assert_eq!(lines[1]["event"], "entry_delete");
        assert_eq!(lines[1]["path"], "/logs/dead-link");
    }

    #[test]
    fn unset_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 1024 * 1024));
        writer.write_entry(&LogEntry::new(EventType::ScanComplete, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"path\""));
        assert!(!line.contains("\"tier\""));
        assert!(!line.contains("\"free_pct\""));
    }

    #[test]
    fn rotation_keeps_bounded_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config(path.clone(), 120));
        for _ in 0..20 {
            writer.write_entry(&LogEntry::new(EventType::Notice, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
    }

    #[test]
    fn falls_back_when_primary_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut cfg = config(blocker.join("primary.jsonl"), 1024 * 1024);
        cfg.fallback_path = Some(fallback.clone());

        let mut writer = JsonlWriter::open(cfg);
        assert_eq!(writer.state(), WriterState::Fallback);
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();
        assert_eq!(read_lines(&fallback).len(), 1);
    }

    #[test]
    fn stderr_when_nothing_writable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();
        let mut writer = JsonlWriter::open(config(blocker.join("primary.jsonl"), 1024));
        assert_eq!(writer.state(), WriterState::Stderr);
        // Must not panic.
        writer.write_entry(&LogEntry::new(EventType::Notice, Severity::Info));
    }

    #[test]
    fn recovers_to_primary() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("later");
        fs::write(&blocker, b"").unwrap();
        let mut writer = JsonlWriter::open(config(blocker.join("activity.jsonl"), 1024));
        assert_eq!(writer.state(), WriterState::Stderr);

        fs::remove_file(&blocker).unwrap();
        writer.try_recover();
        assert_eq!(writer.state(), WriterState::Primary);
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.jsonl");
        fs::write(&path, "{\"ts\":\"x\"}\n").unwrap();
        let writer = JsonlWriter::open(config(path, 1024 * 1024));
        assert_eq!(writer.bytes_written(), 11);
    }
}
