//! PAL trait and platform-specific implementations (statvfs on Unix, mock for tests).

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{LsrError, Result};

/// Raw capacity statistics of the volume holding the log root.
///
/// Counts are in units of `unit_size` bytes, exactly as statvfs reports them
/// (`f_bavail`, `f_blocks`, `f_frsize`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeStats {
    pub free_units: u64,
    pub total_units: u64,
    pub unit_size: u64,
}

impl VolumeStats {
    #[must_use]
    pub const fn new(free_units: u64, total_units: u64, unit_size: u64) -> Self {
        Self {
            free_units,
            total_units,
            unit_size,
        }
    }

    /// `free_units / total_units`, or 0.0 when no capacity is reported.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn free_fraction(&self) -> f64 {
        if self.total_units == 0 {
            return 0.0;
        }
        self.free_units as f64 / self.total_units as f64
    }

    /// Whether the counts describe a real volume: some capacity, and no more
    /// free units than total units.
    #[must_use]
    pub const fn is_plausible(&self) -> bool {
        self.total_units > 0 && self.free_units <= self.total_units
    }

    #[must_use]
    pub const fn free_bytes(&self) -> u64 {
        self.free_units.saturating_mul(self.unit_size)
    }

    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_units.saturating_mul(self.unit_size)
    }
}

/// OS abstraction used by the space monitor.
pub trait Platform: Send + Sync {
    fn volume_stats(&self, path: &Path) -> Result<VolumeStats>;
}

/// Unix platform implementation backed by `statvfs(3)`.
#[derive(Debug, Default)]
pub struct StatvfsPlatform;

impl StatvfsPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl Platform for StatvfsPlatform {
    #[allow(clippy::useless_conversion)]
    fn volume_stats(&self, path: &Path) -> Result<VolumeStats> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| LsrError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        Ok(VolumeStats {
            free_units: u64::from(stat.blocks_available()),
            total_units: u64::from(stat.blocks()),
            unit_size: u64::from(stat.fragment_size()),
        })
    }
}

#[cfg(not(unix))]
impl Platform for StatvfsPlatform {
    fn volume_stats(&self, path: &Path) -> Result<VolumeStats> {
        Err(LsrError::UnsupportedPlatform {
            details: format!("statvfs unavailable for {}", path.display()),
        })
    }
}

/// In-memory mock with swappable stats for deterministic tests.
///
/// Clones share the same underlying state, so a test can keep one handle and
/// adjust free space while the daemon owns another.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    stats: Arc<RwLock<Option<VolumeStats>>>,
    queried: Arc<RwLock<Vec<PathBuf>>>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(stats: VolumeStats) -> Self {
        Self {
            stats: Arc::new(RwLock::new(Some(stats))),
            queried: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// A platform whose stats call always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            stats: Arc::new(RwLock::new(None)),
            queried: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Replace the reported stats; `None` makes every query fail.
    pub fn set_stats(&self, stats: Option<VolumeStats>) {
        *self.stats.write() = stats;
    }

    /// Paths passed to `volume_stats`, in call order.
    #[must_use]
    pub fn queried_paths(&self) -> Vec<PathBuf> {
        self.queried.read().clone()
    }
}

impl Platform for MockPlatform {
    fn volume_stats(&self, path: &Path) -> Result<VolumeStats> {
        self.queried.write().push(path.to_path_buf());
        (*self.stats.read()).ok_or_else(|| LsrError::FsStats {
            path: path.to_path_buf(),
            details: "mock stats unavailable".to_string(),
        })
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(unix)]
    {
        Ok(Arc::new(StatvfsPlatform::new()))
    }
    #[cfg(not(unix))]
    {
        Err(LsrError::UnsupportedPlatform {
            details: "only Unix volumes are currently supported".to_string(),
        })
    }
}
