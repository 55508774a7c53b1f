//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use log_space_reclaimer::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{LsrError, Result};

// Platform
pub use crate::platform::pal::{Platform, VolumeStats, detect_platform};

// Monitor
pub use crate::monitor::space::{SpaceMonitor, SpaceReading, SpaceThresholds};

// Scanner
pub use crate::scanner::classifier::{
    ClassifiedRoot, EntryClassifier, EntryKind, RootEntry, StrayKind,
};
pub use crate::scanner::deletion::{DeletionConfig, DeletionExecutor, DeletionOutcome};
pub use crate::scanner::naming::{SegmentKey, parse_segment_name};
pub use crate::scanner::selector::{EvictionTier, VictimSelector};

// Logger
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{CycleOutcome, CycleReport, DaemonState, ReclaimDaemon};
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;
