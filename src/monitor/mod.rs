//! Free-space monitoring for the log volume.

pub mod space;
