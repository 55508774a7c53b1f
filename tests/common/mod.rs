#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log_space_reclaimer::core::config::Config;
use log_space_reclaimer::core::errors::Result;
use log_space_reclaimer::daemon::loop_main::ReclaimDaemon;
use log_space_reclaimer::daemon::signals::SignalHandler;
use log_space_reclaimer::platform::pal::{MockPlatform, Platform, VolumeStats};

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_lsr") {
        return PathBuf::from(path);
    }

    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join("lsr"));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve lsr binary path for integration test"),
    }
}

/// Run the `lsr` binary with an isolated HOME and extra environment, keeping a transcript.
pub fn run_cli_case(case_name: &str, home: &Path, env: &[(&str, &str)], args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("lsr-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("HOME", home)
        .env("RUST_BACKTRACE", "1")
        .env_remove("LSR_OUTPUT_FORMAT");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute lsr command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_content = format!(
        "case={case_name}\nbin={}\nargs={args:?}\nenv={env:?}\nstatus={}\n----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}\n",
        bin_path.display(),
        output.status,
    );
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── log root fixtures ────────────────────

pub const ROUTE: &str = "0000002a--3f9c0e1b7d";

/// A second route that sorts after [`ROUTE`].
pub const LATER_ROUTE: &str = "0000002b--8e41d0a2c5";

pub fn segment_name(n: u64) -> String {
    route_segment_name(ROUTE, n)
}

pub fn route_segment_name(route: &str, n: u64) -> String {
    format!("{route}--{n}")
}

/// A temporary log root populated with recorder-shaped entries.
pub struct LogRoot {
    dir: tempfile::TempDir,
}

impl LogRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create log root"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        fs::symlink_metadata(self.join(name)).is_ok()
    }

    pub fn segment(&self, n: u64) -> PathBuf {
        self.route_segment(ROUTE, n)
    }

    pub fn route_segment(&self, route: &str, n: u64) -> PathBuf {
        let dir = self.join(&route_segment_name(route, n));
        fs::create_dir_all(&dir).expect("create segment");
        fs::write(dir.join("rlog"), b"log data").expect("write rlog");
        fs::write(dir.join("fcamera.hevc"), vec![0_u8; 256]).expect("write video");
        dir
    }

    pub fn locked_segment(&self, n: u64) -> PathBuf {
        let dir = self.segment(n);
        fs::write(dir.join("rlog.lock"), b"").expect("write lock marker");
        dir
    }

    /// A preserved segment, or `None` when the filesystem rejects user xattrs.
    pub fn preserved_segment(&self, n: u64) -> Option<PathBuf> {
        self.preserved_route_segment(ROUTE, n)
    }

    pub fn preserved_route_segment(&self, route: &str, n: u64) -> Option<PathBuf> {
        let dir = self.route_segment(route, n);
        xattr::set(&dir, "user.preserve", b"1").ok()?;
        Some(dir)
    }

    pub fn special(&self, name: &str) -> PathBuf {
        let dir = self.join(name);
        fs::create_dir_all(&dir).expect("create special dir");
        fs::write(dir.join("dump"), b"x").expect("write special content");
        dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        let path = self.join(name);
        fs::write(&path, b"stray").expect("write stray file");
        path
    }

    pub fn symlink(&self, name: &str, target: &Path) -> PathBuf {
        let path = self.join(name);
        std::os::unix::fs::symlink(target, &path).expect("create symlink");
        path
    }

    pub fn fifo(&self, name: &str) -> PathBuf {
        let path = self.join(name);
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRWXU).expect("create fifo");
        path
    }
}

// ──────────────────── platforms & daemons ────────────────────

/// Reports the volume as full until at most `recovered_at` entries remain.
pub struct EntryCountPlatform {
    pub root: PathBuf,
    pub recovered_at: usize,
}

impl Platform for EntryCountPlatform {
    fn volume_stats(&self, _path: &Path) -> Result<VolumeStats> {
        let remaining = fs::read_dir(&self.root).map_or(0, Iterator::count);
        let free = if remaining <= self.recovered_at { 50 } else { 1 };
        Ok(VolumeStats::new(free, 100, 4096))
    }
}

pub fn always_full() -> MockPlatform {
    MockPlatform::new(VolumeStats::new(1, 100, 4096))
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.layout.log_root = root.to_path_buf();
    config.reclaim.poll_interval_ms = 20;
    config.reclaim.reclaim_pause_ms = 0;
    config
}

pub fn daemon_with(root: &Path, platform: Arc<dyn Platform>) -> ReclaimDaemon {
    ReclaimDaemon::with_components(test_config(root), platform, SignalHandler::detached(), None)
        .expect("valid test config")
}

/// Names of the deleted entries, in deletion order.
pub fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}
