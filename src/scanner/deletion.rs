//! Deletion executor: removes exactly one root entry, never following symlinks.
//!
//! The file type is re-read with `symlink_metadata` at deletion time since the
//! entry may have changed since the scan. Real directories are removed
//! recursively; everything else (files, symlinks, FIFOs, sockets) is unlinked.
//!
//! Failures are reported in the outcome and the activity log, never propagated.
//! An entry that is already gone counts as success.

#![allow(missing_docs)]

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::errors::LsrError;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::classifier::RootEntry;
use crate::scanner::selector::EvictionTier;

#[derive(Debug, Clone)]
pub struct DeletionConfig {
    /// Only direct children of this directory may be removed.
    pub log_root: PathBuf,
    /// Report what would be removed without touching the filesystem.
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum DeletionOutcome {
    Removed { duration: Duration },
    /// Someone else removed it first.
    AlreadyGone,
    DryRun,
    Failed { error: LsrError },
}

impl DeletionOutcome {
    /// Removed, already gone, or a dry run: the entry no longer needs attention.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Whether space may actually have been freed.
    #[must_use]
    pub fn freed_space(&self) -> bool {
        matches!(self, Self::Removed { .. } | Self::AlreadyGone)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Removed { .. } => "removed",
            Self::AlreadyGone => "already_gone",
            Self::DryRun => "dry_run",
            Self::Failed { .. } => "failed",
        }
    }
}

pub struct DeletionExecutor {
    config: DeletionConfig,
    logger: Option<ActivityLoggerHandle>,
}

impl DeletionExecutor {
    #[must_use]
    pub fn new(config: DeletionConfig, logger: Option<ActivityLoggerHandle>) -> Self {
        Self { config, logger }
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Remove one classified entry.
    pub fn remove(&self, entry: &RootEntry) -> DeletionOutcome {
        let tier = EvictionTier::of(entry).map_or_else(|| "locked".to_string(), |t| t.to_string());

        if entry.path.parent() != Some(self.config.log_root.as_path()) {
            let outcome = DeletionOutcome::Failed {
                error: LsrError::Runtime {
                    details: format!(
                        "refusing to remove {}: not a direct child of {}",
                        entry.path.display(),
                        self.config.log_root.display()
                    ),
                },
            };
            self.log_outcome(entry, &tier, &outcome);
            return outcome;
        }

        let outcome = if self.config.dry_run {
            DeletionOutcome::DryRun
        } else {
            let start = Instant::now();
            match remove_entry(&entry.path) {
                Ok(()) => DeletionOutcome::Removed {
                    duration: start.elapsed(),
                },
                Err(err) if err.kind() == ErrorKind::NotFound => DeletionOutcome::AlreadyGone,
                // A concurrent removal can surface as some other error halfway through.
                Err(_) if is_gone(&entry.path) => DeletionOutcome::AlreadyGone,
                Err(source) => DeletionOutcome::Failed {
                    error: LsrError::io(&entry.path, source),
                },
            }
        };

        self.log_outcome(entry, &tier, &outcome);
        outcome
    }

    fn log_outcome(&self, entry: &RootEntry, tier: &str, outcome: &DeletionOutcome) {
        let Some(logger) = &self.logger else {
            return;
        };
        let path = entry.path.to_string_lossy().into_owned();
        match outcome {
            DeletionOutcome::Removed { duration } => logger.send(ActivityEvent::EntryDeleted {
                path,
                kind: entry.label().to_string(),
                tier: tier.to_string(),
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                dry_run: false,
            }),
            DeletionOutcome::DryRun => logger.send(ActivityEvent::EntryDeleted {
                path,
                kind: entry.label().to_string(),
                tier: tier.to_string(),
                duration_ms: 0,
                dry_run: true,
            }),
            DeletionOutcome::AlreadyGone => {
                logger.notice(format!("{path} vanished before deletion"));
            }
            DeletionOutcome::Failed { error } => logger.send(ActivityEvent::DeletionFailed {
                path,
                tier: tier.to_string(),
                error_code: error.code().to_string(),
                error_message: error.to_string(),
            }),
        }
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn is_gone(path: &Path) -> bool {
    matches!(fs::symlink_metadata(path), Err(err) if err.kind() == ErrorKind::NotFound)
}
