//! Space monitor: decides whether the log volume has dropped below its free-space floor.
//!
//! Stats are read fresh on every call. Free space changes underneath us as the
//! recorder writes and as we delete, so nothing here is cached.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::ReclaimConfig;
use crate::core::errors::{LsrError, Result};
use crate::platform::pal::{Platform, VolumeStats};

/// One observation of the log volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceReading {
    pub stats: VolumeStats,
    pub free_fraction: f64,
    pub needs_reclaim: bool,
}

/// Free-space thresholds for the log volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceThresholds {
    pub min_free_fraction: f64,
    pub min_free_bytes: Option<u64>,
}

impl SpaceThresholds {
    #[must_use]
    pub fn from_config(config: &ReclaimConfig) -> Self {
        Self {
            min_free_fraction: config.min_free_fraction,
            min_free_bytes: config.min_free_bytes,
        }
    }

    /// True iff the volume sits strictly below either floor.
    #[must_use]
    pub fn is_breached(&self, stats: &VolumeStats) -> bool {
        let below_fraction = stats.free_fraction() < self.min_free_fraction;
        let below_bytes = self
            .min_free_bytes
            .is_some_and(|floor| stats.free_bytes() < floor);
        below_fraction || below_bytes
    }
}

pub struct SpaceMonitor {
    platform: Arc<dyn Platform>,
    log_root: PathBuf,
    thresholds: SpaceThresholds,
}

impl SpaceMonitor {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>, log_root: &Path, thresholds: SpaceThresholds) -> Self {
        Self {
            platform,
            log_root: log_root.to_path_buf(),
            thresholds,
        }
    }

    /// Query the volume and evaluate the thresholds.
    ///
    /// A reading with zero capacity or more free than total units is rejected
    /// as a stats failure.
    pub fn sample(&self) -> Result<SpaceReading> {
        let stats = self.platform.volume_stats(&self.log_root)?;
        if !stats.is_plausible() {
            return Err(LsrError::FsStats {
                path: self.log_root.clone(),
                details: format!(
                    "implausible volume stats: {} free of {} units",
                    stats.free_units, stats.total_units
                ),
            });
        }
        Ok(SpaceReading {
            free_fraction: stats.free_fraction(),
            needs_reclaim: self.thresholds.is_breached(&stats),
            stats,
        })
    }

    /// Whether cleanup should run right now.
    ///
    /// A failed stats read is returned as an error rather than guessed at; the
    /// caller skips the iteration.
    pub fn needs_reclaim(&self) -> Result<bool> {
        self.sample().map(|reading| reading.needs_reclaim)
    }

    #[must_use]
    pub fn thresholds(&self) -> SpaceThresholds {
        self.thresholds
    }
}
