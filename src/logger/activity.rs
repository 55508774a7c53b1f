//! Activity logger: a dedicated thread owns the [`JsonlWriter`]; everyone else
//! sends [`ActivityEvent`]s through a bounded crossbeam channel.
//!
//! `send()` uses `try_send()`, so the reclaim loop is never blocked by a slow
//! or failing log volume. Events that do not fit are counted and reported on
//! the next successful write.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::core::errors::{LsrError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// How often an idle logger thread tries to get back to the primary log file.
const RECOVER_INTERVAL: Duration = Duration::from_secs(60);

// ──────────────────── events ────────────────────

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        log_root: String,
        dry_run: bool,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
        deleted: u64,
        /// Dry-run selections, kept apart from real deletions.
        selected: u64,
        failed: u64,
    },
    ReclaimNeeded {
        free_pct: f64,
        free_bytes: u64,
    },
    ScanCompleted {
        entries: usize,
        eligible: usize,
        duration_ms: u64,
    },
    EntryDeleted {
        path: String,
        kind: String,
        tier: String,
        duration_ms: u64,
        dry_run: bool,
    },
    DeletionFailed {
        path: String,
        tier: String,
        error_code: String,
        error_message: String,
    },
    /// Space is still low but everything left is locked (or already attempted).
    NothingEligible {
        free_pct: f64,
        remaining: usize,
    },
    /// Free-text operational message.
    Notice {
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Stops the logger thread after flushing.
    Shutdown,
}

// ──────────────────── handle ────────────────────

/// Cheaply cloneable sender side of the activity log.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event. Never blocks; a full channel drops the event and counts it.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Log a free-text message.
    pub fn notice(&self, message: impl Into<String>) {
        self.send(ActivityEvent::Notice {
            message: message.into(),
        });
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── spawn ────────────────────

pub struct ActivityLogConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            jsonl: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl ActivityLogConfig {
    #[must_use]
    pub fn new(jsonl: JsonlConfig) -> Self {
        Self {
            jsonl,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread. It runs until `shutdown()` or until every handle is dropped.
pub fn spawn_logger(
    config: ActivityLogConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let jsonl = config.jsonl;
    let join = thread::Builder::new()
        .name("lsr-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl, &dropped))
        .map_err(|e| LsrError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    loop {
        let event = match rx.recv_timeout(RECOVER_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                jsonl.try_recover();
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
        // Low volume; flushing every line keeps tails current.
        jsonl.flush();
    }

    jsonl.fsync();
}

// ──────────────────── conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            log_root,
            dry_run,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.path = Some(log_root.clone());
            e.dry_run = Some(*dry_run);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
            deleted,
            selected,
            failed,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.deleted = Some(*deleted);
            e.failed = Some(*failed);
            e.details = Some(if *selected > 0 {
                format!("reason={reason} uptime={uptime_secs}s dry_run_selected={selected}")
            } else {
                format!("reason={reason} uptime={uptime_secs}s")
            });
            e
        }
        ActivityEvent::ReclaimNeeded {
            free_pct,
            free_bytes,
        } => {
            let mut e = LogEntry::new(EventType::ReclaimNeeded, Severity::Warning);
            e.free_pct = Some(*free_pct);
            e.free_bytes = Some(*free_bytes);
            e
        }
        ActivityEvent::ScanCompleted {
            entries,
            eligible,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info);
            e.entries = Some(*entries);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("eligible={eligible}"));
            e
        }
        ActivityEvent::EntryDeleted {
            path,
            kind,
            tier,
            duration_ms,
            dry_run,
        } => {
            let mut e = LogEntry::new(EventType::EntryDelete, Severity::Info);
            e.path = Some(path.clone());
            e.kind = Some(kind.clone());
            e.tier = Some(tier.clone());
            e.duration_ms = Some(*duration_ms);
            e.dry_run = Some(*dry_run);
            e.ok = Some(true);
            e
        }
        ActivityEvent::DeletionFailed {
            path,
            tier,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::EntryDelete, Severity::Warning);
            e.path = Some(path.clone());
            e.tier = Some(tier.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::NothingEligible {
            free_pct,
            remaining,
        } => {
            let mut e = LogEntry::new(EventType::Exhausted, Severity::Critical);
            e.free_pct = Some(*free_pct);
            e.entries = Some(*remaining);
            e
        }
        ActivityEvent::Notice { message } => {
            let mut e = LogEntry::new(EventType::Notice, Severity::Info);
            e.details = Some(message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}
