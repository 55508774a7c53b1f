//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{LsrError, Result};
use crate::scanner::naming::parse_segment_name;

/// Full reclaimer configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub reclaim: ReclaimConfig,
    pub layout: LayoutConfig,
    pub paths: PathsConfig,
}

/// Free-space floor and loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Reclaim while `free / total` is strictly below this fraction.
    pub min_free_fraction: f64,
    /// Also reclaim while free bytes are strictly below this floor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_free_bytes: Option<u64>,
    /// Sleep between poll ticks when nothing needs reclaiming.
    pub poll_interval_ms: u64,
    /// Pause between two deletions of the same reclaim pass.
    pub reclaim_pause_ms: u64,
    /// Report victims without deleting them.
    pub dry_run: bool,
}

/// On-disk layout of the log root and its marker conventions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutConfig {
    pub log_root: PathBuf,
    /// Any immediate child whose name ends with this suffix locks its directory.
    pub lock_suffix: String,
    pub preserve_xattr_name: String,
    pub preserve_xattr_value: String,
    /// Reserved directory names deleted only after every segment is gone.
    pub special_dirs: Vec<String>,
    /// Keep preserve status only for the N most recent marked segments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_preserved: Option<usize>,
    /// Extend preserve status to this many preceding segments of the same route.
    pub preserve_prior_segments: u32,
}

/// Filesystem paths used by lsr itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_log_fallback: Option<PathBuf>,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            min_free_fraction: 0.10,
            min_free_bytes: None,
            poll_interval_ms: 30_000,
            reclaim_pause_ms: 100,
            dry_run: false,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("/data/media/0/realdata"),
            lock_suffix: ".lock".to_string(),
            preserve_xattr_name: "user.preserve".to_string(),
            preserve_xattr_value: "1".to_string(),
            special_dirs: vec!["boot".to_string(), "crash".to_string()],
            max_preserved: None,
            preserve_prior_segments: 0,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[LSR-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("lsr").join("config.toml"),
            activity_log: home_dir
                .join(".local")
                .join("share")
                .join("lsr")
                .join("activity.jsonl"),
            activity_log_fallback: Some(PathBuf::from("/dev/shm/lsr.jsonl")),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LsrError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(LsrError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over canonical JSON, stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|name| env::var(name).ok())
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = get("LSR_MIN_FREE_FRACTION") {
            self.reclaim.min_free_fraction = parse_env("LSR_MIN_FREE_FRACTION", &raw)?;
        }
        if let Some(raw) = get("LSR_MIN_FREE_BYTES") {
            self.reclaim.min_free_bytes = Some(parse_env("LSR_MIN_FREE_BYTES", &raw)?);
        }
        if let Some(raw) = get("LSR_POLL_INTERVAL_MS") {
            self.reclaim.poll_interval_ms = parse_env("LSR_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("LSR_RECLAIM_PAUSE_MS") {
            self.reclaim.reclaim_pause_ms = parse_env("LSR_RECLAIM_PAUSE_MS", &raw)?;
        }
        if let Some(raw) = get("LSR_DRY_RUN") {
            self.reclaim.dry_run = parse_env("LSR_DRY_RUN", &raw)?;
        }
        if let Some(raw) = get("LSR_LOG_ROOT") {
            self.layout.log_root = PathBuf::from(raw);
        }
        if let Some(raw) = get("LSR_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Strip trailing slashes so the log root compares cleanly in reports.
    fn normalize_paths(&mut self) {
        let raw = self.layout.log_root.to_string_lossy().into_owned();
        if raw.len() > 1
            && let Some(stripped) = raw.strip_suffix('/')
        {
            self.layout.log_root = PathBuf::from(stripped);
        }
    }

    /// Reject settings the reclaim loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fraction = self.reclaim.min_free_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(LsrError::InvalidConfig {
                details: format!("reclaim.min_free_fraction must be in (0, 1), got {fraction}"),
            });
        }

        if self.reclaim.poll_interval_ms == 0 {
            return Err(LsrError::InvalidConfig {
                details: "reclaim.poll_interval_ms must be > 0".to_string(),
            });
        }

        if self.layout.log_root.as_os_str().is_empty() {
            return Err(LsrError::InvalidConfig {
                details: "layout.log_root must not be empty".to_string(),
            });
        }

        if self.layout.lock_suffix.is_empty() {
            return Err(LsrError::InvalidConfig {
                details: "layout.lock_suffix must not be empty".to_string(),
            });
        }

        if self.layout.preserve_xattr_name.is_empty() {
            return Err(LsrError::InvalidConfig {
                details: "layout.preserve_xattr_name must not be empty".to_string(),
            });
        }

        for name in &self.layout.special_dirs {
            if name.is_empty() || name.contains('/') {
                return Err(LsrError::InvalidConfig {
                    details: format!("layout.special_dirs entry {name:?} is not a plain name"),
                });
            }
            if parse_segment_name(name).is_some() {
                return Err(LsrError::InvalidConfig {
                    details: format!(
                        "layout.special_dirs entry {name:?} collides with the segment naming convention"
                    ),
                });
            }
        }

        if self.layout.max_preserved == Some(0) {
            return Err(LsrError::InvalidConfig {
                details: "layout.max_preserved must be > 0 when set".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| LsrError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, LsrError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.reclaim.min_free_fraction - 0.10).abs() < f64::EPSILON);
        assert_eq!(cfg.layout.special_dirs, vec!["boot", "crash"]);
    }

    #[test]
    fn free_fraction_must_be_open_unit_interval() {
        for bad in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            let mut cfg = Config::default();
            cfg.reclaim.min_free_fraction = bad;
            let err = cfg.validate().expect_err("fraction should be rejected");
            assert!(matches!(err, LsrError::InvalidConfig { .. }), "{err}");
        }
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut cfg = Config::default();
        cfg.reclaim.poll_interval_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_lock_suffix_rejected() {
        let mut cfg = Config::default();
        cfg.layout.lock_suffix.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn special_dir_that_looks_like_segment_rejected() {
        let mut cfg = Config::default();
        cfg.layout
            .special_dirs
            .push("2019-04-18--12-52-54--0".to_string());
        let err = cfg.validate().expect_err("collision should be rejected");
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn max_preserved_zero_rejected() {
        let mut cfg = Config::default();
        cfg.layout.max_preserved = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("LSR_MIN_FREE_FRACTION", "0.25"),
            ("LSR_MIN_FREE_BYTES", "5368709120"),
            ("LSR_POLL_INTERVAL_MS", "500"),
            ("LSR_DRY_RUN", "true"),
            ("LSR_LOG_ROOT", "/tmp/realdata"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("overrides should parse");

        assert!((cfg.reclaim.min_free_fraction - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.reclaim.min_free_bytes, Some(5_368_709_120));
        assert_eq!(cfg.reclaim.poll_interval_ms, 500);
        assert!(cfg.reclaim.dry_run);
        assert_eq!(cfg.layout.log_root, PathBuf::from("/tmp/realdata"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let env = vars(&[("LSR_POLL_INTERVAL_MS", "   ")]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("blank value should be ignored");
        assert_eq!(cfg.reclaim.poll_interval_ms, 30_000);
    }

    #[test]
    fn invalid_env_value_rejected() {
        let env = vars(&[("LSR_DRY_RUN", "maybe")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("non-boolean should fail");
        assert_eq!(err.code(), "LSR-1003");
        assert!(err.to_string().contains("LSR_DRY_RUN"));
    }

    #[test]
    fn normalize_paths_trims_trailing_slash_and_keeps_root() {
        let mut cfg = Config::default();
        cfg.layout.log_root = PathBuf::from("/data/media/0/realdata/");
        cfg.normalize_paths();
        assert_eq!(cfg.layout.log_root, PathBuf::from("/data/media/0/realdata"));

        cfg.layout.log_root = PathBuf::from("/");
        cfg.normalize_paths();
        assert_eq!(cfg.layout.log_root, PathBuf::from("/"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/lsr/config.toml")))
            .expect_err("explicit missing path should fail");
        assert_eq!(err.code(), "LSR-1002");
    }

    #[test]
    fn load_parses_partial_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[reclaim]\nmin_free_fraction = 0.2\n\n[layout]\nspecial_dirs = [\"boot\"]\nmax_preserved = 5\n",
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).expect("partial config should load");
        assert!((cfg.reclaim.min_free_fraction - 0.2).abs() < f64::EPSILON);
        assert_eq!(cfg.reclaim.poll_interval_ms, 30_000);
        assert_eq!(cfg.layout.special_dirs, vec!["boot"]);
        assert_eq!(cfg.layout.max_preserved, Some(5));
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn toml_render_round_trips() {
        let cfg = Config::default();
        let rendered = cfg.to_toml().expect("render");
        let parsed: Config = toml::from_str(&rendered).expect("reparse");
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn stable_hash_deterministic_and_sensitive() {
        let cfg = Config::default();
        let first = cfg.stable_hash().unwrap();
        assert_eq!(first, cfg.stable_hash().unwrap());
        assert_eq!(first.len(), 16);

        let mut changed = cfg;
        changed.reclaim.min_free_fraction = 0.2;
        assert_ne!(first, changed.stable_hash().unwrap());
    }
}
