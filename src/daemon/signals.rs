//! Signal handling: SIGTERM/SIGINT stop the daemon, SIGUSR1 requests an
//! immediate space check.
//!
//! `signal-hook` only flips atomic flags; the reclaim loop polls them at every
//! iteration, before every deletion and at every sleep slice.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Cooperative stop/scan flags shared by the signal hooks, the loop and any
/// embedding code. Clones share the same flags.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    scan_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register the OS hooks.
    ///
    /// Registration is best-effort: a failure is reported on stderr and the
    /// daemon keeps running with the flags still usable programmatically.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// A handler that is not wired to any OS signal.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            scan_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check and clear a pending scan-now request.
    #[must_use]
    pub fn should_scan(&self) -> bool {
        self.scan_flag.swap(false, Ordering::Relaxed)
    }

    /// Whether a scan-now request is pending, without clearing it.
    #[must_use]
    pub fn scan_pending(&self) -> bool {
        self.scan_flag.load(Ordering::Relaxed)
    }

    /// Drop any pending scan-now request.
    pub fn clear_scan(&self) {
        self.scan_flag.store(false, Ordering::Relaxed);
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_scan(&self) {
        self.scan_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[LSR-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.scan_flag)) {
                eprintln!("[LSR-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
