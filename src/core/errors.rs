//! LSR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LsrError>;

/// Top-level error type for the log space reclaimer.
#[derive(Debug, Error)]
pub enum LsrError {
    #[error("[LSR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LSR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[LSR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LSR-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[LSR-2001] volume stats failure for {path}: {details}")]
    FsStats { path: PathBuf, details: String },

    #[error("[LSR-2002] log root scan failure at {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LSR-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[LSR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LSR-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[LSR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LsrError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LSR-1001",
            Self::MissingConfig { .. } => "LSR-1002",
            Self::ConfigParse { .. } => "LSR-1003",
            Self::UnsupportedPlatform { .. } => "LSR-1101",
            Self::FsStats { .. } => "LSR-2001",
            Self::Scan { .. } => "LSR-2002",
            Self::Serialization { .. } => "LSR-2101",
            Self::Io { .. } => "LSR-3002",
            Self::ChannelClosed { .. } => "LSR-3003",
            Self::Runtime { .. } => "LSR-3900",
        }
    }

    /// Whether the next poll cycle might succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Scan { .. }
                | Self::ChannelClosed { .. }
                | Self::FsStats { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for LsrError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LsrError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for LsrError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
