#![forbid(unsafe_code)]

//! Log Space Reclaimer (lsr): keeps a driving recorder's log volume above a
//! free-space floor by deleting log root entries in a fixed eviction order.
//!
//! Eviction order, first to last:
//! 1. **Strays**: anything at the log root that is not a recognized directory
//! 2. **Unprotected segments**: oldest first
//! 3. **Preserved segments**: oldest first
//! 4. **Special directories** (`boot`, `crash`)
//!
//! Segments holding a lock marker are never deleted.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use log_space_reclaimer::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use log_space_reclaimer::core::config::Config;
//! use log_space_reclaimer::scanner::classifier::EntryClassifier;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod platform;
pub mod scanner;
