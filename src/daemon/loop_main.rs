//! Reclaim loop: poll free space, and while it is below the floor delete one
//! entry at a time in eviction order, re-checking space after every deletion.
//!
//! One thread runs the loop and is the only deleter. The activity logger runs
//! on its own thread behind a bounded channel. Stop and scan-now requests
//! arrive through [`SignalHandler`] flags and are honored at the top of every
//! iteration, before each deletion, and at every sleep slice.
//!
//! States: `Idle -> Scanning -> (Idle | Reclaiming)`, `Reclaiming -> Idle`,
//! and any state `-> Stopped` on a stop request.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{
    ActivityEvent, ActivityLogConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::monitor::space::{SpaceMonitor, SpaceReading, SpaceThresholds};
use crate::platform::pal::{Platform, detect_platform};
use crate::scanner::classifier::{ClassifierConfig, EntryClassifier};
use crate::scanner::deletion::{DeletionConfig, DeletionExecutor, DeletionOutcome};
use crate::scanner::selector::VictimSelector;

/// Longest uninterrupted sleep; bounds stop latency.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

// ──────────────────── state & reports ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Idle,
    Scanning,
    Reclaiming,
    Stopped,
}

/// How one poll tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Free space was above the floor; nothing was touched.
    SpaceOk,
    /// Space went back above the floor after one or more deletions.
    Reclaimed,
    /// Space is still low but nothing eligible remains.
    Exhausted,
    /// Volume stats could not be read; the tick was skipped.
    StatsUnavailable,
    /// The log root could not be listed.
    ScanFailed,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Entries removed, found already gone, or (in dry-run mode) selected, in order.
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Most recent free fraction observed during the tick.
    pub free_fraction: Option<f64>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            outcome: CycleOutcome::SpaceOk,
            deleted: Vec::new(),
            failed: Vec::new(),
            free_fraction: None,
        }
    }
}

/// Counters across the daemon's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DaemonTotals {
    pub cycles: u64,
    /// Entries this daemon actually removed.
    pub deleted: u64,
    /// Entries that were already gone when their turn came.
    pub vanished: u64,
    /// Dry-run selections; nothing was touched.
    pub selected: u64,
    pub failed: u64,
}

// ──────────────────── daemon ────────────────────

pub struct ReclaimDaemon {
    config: Config,
    monitor: SpaceMonitor,
    classifier: EntryClassifier,
    selector: VictimSelector,
    executor: DeletionExecutor,
    signals: SignalHandler,
    logger: Option<ActivityLoggerHandle>,
    logger_join: Option<thread::JoinHandle<()>>,
    state: DaemonState,
    totals: DaemonTotals,
    start_time: Instant,
    closed: bool,
}

impl ReclaimDaemon {
    /// Build the production daemon: statvfs platform, OS signal hooks, JSONL logger thread.
    pub fn init(config: Config) -> Result<Self> {
        let platform = detect_platform()?;
        let (logger, logger_join) = spawn_logger(ActivityLogConfig::new(JsonlConfig::from_paths(
            &config.paths,
        )))?;
        let signals = SignalHandler::new();
        let mut daemon = Self::with_components(config, platform, signals, Some(logger))?;
        daemon.logger_join = Some(logger_join);
        Ok(daemon)
    }

    /// Build from explicit parts. Rejects an invalid configuration.
    pub fn with_components(
        config: Config,
        platform: Arc<dyn Platform>,
        signals: SignalHandler,
        logger: Option<ActivityLoggerHandle>,
    ) -> Result<Self> {
        config.validate()?;

        let monitor = SpaceMonitor::new(
            platform,
            &config.layout.log_root,
            SpaceThresholds::from_config(&config.reclaim),
        );
        let classifier = EntryClassifier::new(ClassifierConfig::from_layout(&config.layout));
        let executor = DeletionExecutor::new(
            DeletionConfig {
                log_root: config.layout.log_root.clone(),
                dry_run: config.reclaim.dry_run,
            },
            logger.clone(),
        );

        Ok(Self {
            config,
            monitor,
            classifier,
            selector: VictimSelector::new(),
            executor,
            signals,
            logger,
            logger_join: None,
            state: DaemonState::Idle,
            totals: DaemonTotals::default(),
            start_time: Instant::now(),
            closed: false,
        })
    }

    #[must_use]
    pub fn state(&self) -> DaemonState {
        self.state
    }

    #[must_use]
    pub fn totals(&self) -> DaemonTotals {
        self.totals
    }

    /// Handle for requesting stop or scan-now from another thread.
    #[must_use]
    pub fn signals(&self) -> SignalHandler {
        self.signals.clone()
    }

    /// Run until a stop is requested, then flush the activity log.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.log(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            log_root: self.config.layout.log_root.display().to_string(),
            dry_run: self.config.reclaim.dry_run,
        });
        eprintln!(
            "[LSR-DAEMON] watching {} (min free {:.1}%, poll {}ms{})",
            self.config.layout.log_root.display(),
            self.config.reclaim.min_free_fraction * 100.0,
            self.config.reclaim.poll_interval_ms,
            if self.config.reclaim.dry_run { ", dry run" } else { "" }
        );

        let poll = Duration::from_millis(self.config.reclaim.poll_interval_ms);
        loop {
            if self.signals.should_shutdown() {
                break;
            }
            // This tick serves any pending scan-now request.
            self.signals.clear_scan();

            let report = self.run_cycle();
            if report.outcome == CycleOutcome::Stopped {
                break;
            }
            if !self.sleep_interruptible(poll, true) {
                break;
            }
        }

        self.shutdown("stop requested");
        Ok(())
    }

    /// One poll tick: check space and, if low, reclaim until it is not.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::new();
        self.totals.cycles += 1;

        if self.signals.should_shutdown() {
            return self.finish(report, CycleOutcome::Stopped);
        }

        self.state = DaemonState::Scanning;
        let Some(reading) = self.sample_space(&mut report) else {
            return self.finish(report, CycleOutcome::StatsUnavailable);
        };
        if !reading.needs_reclaim {
            return self.finish(report, CycleOutcome::SpaceOk);
        }

        self.log(ActivityEvent::ReclaimNeeded {
            free_pct: reading.free_fraction * 100.0,
            free_bytes: reading.stats.free_bytes(),
        });

        let mut attempted: HashSet<PathBuf> = HashSet::new();
        let mut scanned_once = false;
        loop {
            if self.signals.should_shutdown() {
                return self.finish(report, CycleOutcome::Stopped);
            }

            let scan_start = Instant::now();
            let classified = match self.classifier.scan() {
                Ok(classified) => classified,
                Err(err) => {
                    eprintln!("[LSR-DAEMON] scan failed: {err}");
                    self.log(ActivityEvent::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                    return self.finish(report, CycleOutcome::ScanFailed);
                }
            };
            if !scanned_once {
                scanned_once = true;
                self.log(ActivityEvent::ScanCompleted {
                    entries: classified.len(),
                    eligible: self.selector.candidates(&classified).len(),
                    duration_ms: u64::try_from(scan_start.elapsed().as_millis())
                        .unwrap_or(u64::MAX),
                });
            }

            let Some(victim) = self
                .selector
                .next_victim_excluding(&classified, &attempted)
                .cloned()
            else {
                let free_pct = report.free_fraction.unwrap_or(0.0) * 100.0;
                eprintln!(
                    "[LSR-DAEMON] space still low ({free_pct:.1}% free) but nothing eligible remains"
                );
                self.log(ActivityEvent::NothingEligible {
                    free_pct,
                    remaining: classified.len(),
                });
                return self.finish(report, CycleOutcome::Exhausted);
            };

            if self.signals.should_shutdown() {
                return self.finish(report, CycleOutcome::Stopped);
            }

            self.state = DaemonState::Reclaiming;
            attempted.insert(victim.path.clone());
            let outcome = self.executor.remove(&victim);
            let freed = outcome.freed_space();
            match outcome {
                DeletionOutcome::Failed { error } => {
                    eprintln!("[LSR-DAEMON] failed to remove {}: {error}", victim.path.display());
                    self.totals.failed += 1;
                    report.failed.push(victim.path);
                }
                DeletionOutcome::Removed { .. } => {
                    self.totals.deleted += 1;
                    report.deleted.push(victim.path);
                }
                DeletionOutcome::AlreadyGone => {
                    self.totals.vanished += 1;
                    report.deleted.push(victim.path);
                }
                DeletionOutcome::DryRun => {
                    self.totals.selected += 1;
                    report.deleted.push(victim.path);
                }
            }

            let Some(reading) = self.sample_space(&mut report) else {
                return self.finish(report, CycleOutcome::StatsUnavailable);
            };
            if !reading.needs_reclaim {
                return self.finish(report, CycleOutcome::Reclaimed);
            }

            if freed {
                let pause = Duration::from_millis(self.config.reclaim.reclaim_pause_ms);
                if !self.sleep_interruptible(pause, false) {
                    return self.finish(report, CycleOutcome::Stopped);
                }
            }
        }
    }

    // ──────────────────── internals ────────────────────

    /// Read space into the report; `None` (logged) if stats are unavailable.
    fn sample_space(&self, report: &mut CycleReport) -> Option<SpaceReading> {
        match self.monitor.sample() {
            Ok(reading) => {
                report.free_fraction = Some(reading.free_fraction);
                Some(reading)
            }
            Err(err) => {
                eprintln!("[LSR-DAEMON] {err}");
                self.log(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                None
            }
        }
    }

    fn finish(&mut self, mut report: CycleReport, outcome: CycleOutcome) -> CycleReport {
        report.outcome = outcome;
        self.state = if outcome == CycleOutcome::Stopped {
            DaemonState::Stopped
        } else {
            DaemonState::Idle
        };
        report
    }

    /// Sleep in short slices. False if a stop arrived; a scan-now request ends
    /// the sleep early when `wake_on_scan` is set.
    fn sleep_interruptible(&self, total: Duration, wake_on_scan: bool) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.signals.should_shutdown() {
                return false;
            }
            if wake_on_scan && self.signals.scan_pending() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }

    /// Log the stop, flush and join the activity logger. Idempotent.
    pub fn shutdown(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state = DaemonState::Stopped;
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.log(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
            deleted: self.totals.deleted,
            selected: self.totals.selected,
            failed: self.totals.failed,
        });

        if let Some(logger) = self.logger.take() {
            let dropped = logger.dropped_events();
            if dropped > 0 {
                eprintln!("[LSR-DAEMON] {dropped} activity events dropped");
            }
            logger.shutdown();
        }
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }

        eprintln!(
            "[LSR-DAEMON] stopped (uptime={uptime_secs}s, deleted={}, dry_run_selected={}, failed={})",
            self.totals.deleted, self.totals.selected, self.totals.failed
        );
    }
}
