//! Entry classifier: enumerates the log root and sorts every child into exactly one
//! category (stray, segment, special), discovering lock and preserve markers on the way.
//!
//! Nothing is persisted between scans. The recorder and uploader mutate the
//! log root concurrently, so every scan re-derives classification and marker
//! state from the filesystem.
//!
//! Unexpected entries never fail a scan: anything that is not a recognized
//! directory is a stray, and marker state that cannot be read defaults to
//! "not locked, not preserved".

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs::{self, FileType};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::config::LayoutConfig;
use crate::core::errors::{LsrError, Result};
use crate::scanner::naming::{SegmentKey, parse_segment_name};

// ──────────────────── entry model ────────────────────

/// What kind of non-directory (or unrecognized directory) a stray is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrayKind {
    File,
    /// Valid or dangling; never followed.
    Symlink,
    Fifo,
    UnrecognizedDir,
    /// Sockets, device nodes, and anything else we cannot name.
    Other,
}

/// Marker-derived attributes of a segment directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub key: SegmentKey,
    pub locked: bool,
    pub preserved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Stray { kind: StrayKind },
    Segment(SegmentInfo),
    Special { locked: bool },
}

/// One direct child of the log root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Coarse priority groups in eviction order. Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryGroup {
    Stray,
    UnprotectedSegment,
    PreservedSegment,
    Special,
}

impl RootEntry {
    #[must_use]
    pub fn group(&self) -> EntryGroup {
        match &self.kind {
            EntryKind::Stray { .. } => EntryGroup::Stray,
            EntryKind::Segment(info) if info.preserved => EntryGroup::PreservedSegment,
            EntryKind::Segment(_) => EntryGroup::UnprotectedSegment,
            EntryKind::Special { .. } => EntryGroup::Special,
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        match &self.kind {
            EntryKind::Segment(info) => info.locked,
            EntryKind::Special { locked } => *locked,
            EntryKind::Stray { .. } => false,
        }
    }

    #[must_use]
    pub fn segment_key(&self) -> Option<&SegmentKey> {
        match &self.kind {
            EntryKind::Segment(info) => Some(&info.key),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match &self.kind {
            EntryKind::Stray { kind } => match kind {
                StrayKind::File => "stray file",
                StrayKind::Symlink => "stray symlink",
                StrayKind::Fifo => "stray fifo",
                StrayKind::UnrecognizedDir => "unrecognized directory",
                StrayKind::Other => "stray entry",
            },
            EntryKind::Segment(_) => "segment",
            EntryKind::Special { .. } => "special directory",
        }
    }
}

// ──────────────────── markers ────────────────────

/// How lock and preserve markers are spelled on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerConvention {
    pub lock_suffix: String,
    pub preserve_attr: String,
    pub preserve_value: Vec<u8>,
}

impl Default for MarkerConvention {
    fn default() -> Self {
        Self::from_layout(&LayoutConfig::default())
    }
}

impl MarkerConvention {
    #[must_use]
    pub fn from_layout(layout: &LayoutConfig) -> Self {
        Self {
            lock_suffix: layout.lock_suffix.clone(),
            preserve_attr: layout.preserve_xattr_name.clone(),
            preserve_value: layout.preserve_xattr_value.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerState {
    pub locked: bool,
    pub preserved: bool,
}

/// Inspect a directory and its immediate children for lock and preserve markers.
///
/// Locked: any child name ends with the lock suffix.
/// Preserved: the directory or any immediate child carries the preserve
/// attribute with exactly the expected value.
#[must_use]
pub fn inspect_markers(dir: &Path, markers: &MarkerConvention) -> MarkerState {
    let mut state = MarkerState {
        locked: false,
        preserved: has_preserve_attr(dir, markers),
    };
    let Ok(children) = fs::read_dir(dir) else {
        return state;
    };
    for child in children.flatten() {
        if !state.locked
            && child
                .file_name()
                .to_string_lossy()
                .ends_with(markers.lock_suffix.as_str())
        {
            state.locked = true;
        }
        if !state.preserved && has_preserve_attr(&child.path(), markers) {
            state.preserved = true;
        }
        if state.locked && state.preserved {
            break;
        }
    }
    state
}

#[cfg(unix)]
fn has_preserve_attr(path: &Path, markers: &MarkerConvention) -> bool {
    // xattr::get does not follow symlinks.
    matches!(
        xattr::get(path, &markers.preserve_attr),
        Ok(Some(value)) if value == markers.preserve_value
    )
}

#[cfg(not(unix))]
fn has_preserve_attr(_path: &Path, _markers: &MarkerConvention) -> bool {
    false
}

// ──────────────────── preserve window ────────────────────

/// Optional narrowing/widening of marker-based preservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreserveWindow {
    /// Only the N most recent marked segments stay preserved.
    pub max_preserved: Option<usize>,
    /// Each retained marked segment also covers this many prior segments of its route.
    pub prior_segments: u32,
}

impl PreserveWindow {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.max_preserved.is_none() && self.prior_segments == 0
    }

    fn apply(&self, entries: &mut [RootEntry]) {
        if self.is_noop() {
            return;
        }

        let mut marked: Vec<SegmentKey> = entries
            .iter()
            .filter_map(|entry| match &entry.kind {
                EntryKind::Segment(info) if info.preserved => Some(info.key.clone()),
                _ => None,
            })
            .collect();
        marked.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(max) = self.max_preserved {
            marked.truncate(max);
        }

        let mut keep: HashSet<SegmentKey> = HashSet::with_capacity(marked.len());
        for key in marked {
            for back in 1..=u64::from(self.prior_segments) {
                if let Some(prior) = key.preceding(back) {
                    keep.insert(prior);
                }
            }
            keep.insert(key);
        }

        for entry in entries {
            if let EntryKind::Segment(info) = &mut entry.kind {
                info.preserved = keep.contains(&info.key);
            }
        }
    }
}

// ──────────────────── classifier ────────────────────

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub log_root: PathBuf,
    pub markers: MarkerConvention,
    pub special_dirs: Vec<String>,
    pub window: PreserveWindow,
}

impl ClassifierConfig {
    #[must_use]
    pub fn from_layout(layout: &LayoutConfig) -> Self {
        Self {
            log_root: layout.log_root.clone(),
            markers: MarkerConvention::from_layout(layout),
            special_dirs: layout.special_dirs.clone(),
            window: PreserveWindow {
                max_preserved: layout.max_preserved,
                prior_segments: layout.preserve_prior_segments,
            },
        }
    }
}

/// Counts per category, for logs and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub total: usize,
    pub strays: usize,
    pub segments: usize,
    pub preserved: usize,
    pub locked: usize,
    pub special: usize,
}

/// Result of one scan, in eviction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifiedRoot {
    pub root: PathBuf,
    pub entries: Vec<RootEntry>,
}

impl ClassifiedRoot {
    /// Build from arbitrary entries, establishing eviction order.
    #[must_use]
    pub fn from_entries(root: PathBuf, mut entries: Vec<RootEntry>) -> Self {
        entries.sort_by(|a, b| {
            (a.group(), a.segment_key(), a.name.as_str()).cmp(&(
                b.group(),
                b.segment_key(),
                b.name.as_str(),
            ))
        });
        Self { root, entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&RootEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    #[must_use]
    pub fn summary(&self) -> ScanSummary {
        let mut summary = ScanSummary {
            total: self.entries.len(),
            ..ScanSummary::default()
        };
        for entry in &self.entries {
            match &entry.kind {
                EntryKind::Stray { .. } => summary.strays += 1,
                EntryKind::Segment(info) => {
                    summary.segments += 1;
                    summary.preserved += usize::from(info.preserved);
                    summary.locked += usize::from(info.locked);
                }
                EntryKind::Special { locked } => {
                    summary.special += 1;
                    summary.locked += usize::from(*locked);
                }
            }
        }
        summary
    }
}

pub struct EntryClassifier {
    config: ClassifierConfig,
}

impl EntryClassifier {
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn log_root(&self) -> &Path {
        &self.config.log_root
    }

    /// Enumerate and classify the direct children of the log root.
    ///
    /// A missing root scans as empty. Per-entry failures never fail the scan.
    pub fn scan(&self) -> Result<ClassifiedRoot> {
        let root = &self.config.log_root;
        let listing = match fs::read_dir(root) {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ClassifiedRoot {
                    root: root.clone(),
                    entries: Vec::new(),
                });
            }
            Err(source) => {
                return Err(LsrError::Scan {
                    path: root.clone(),
                    source,
                });
            }
        };

        let mut entries = Vec::new();
        for dir_entry in listing {
            // An entry that errors mid-listing is picked up by the next scan.
            let Ok(dir_entry) = dir_entry else {
                continue;
            };
            let path = dir_entry.path();
            let file_type = match dir_entry.file_type() {
                Ok(ft) => Some(ft),
                Err(_) => match fs::symlink_metadata(&path) {
                    Ok(meta) => Some(meta.file_type()),
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(_) => None,
                },
            };
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            entries.push(self.classify(name, path, file_type));
        }

        self.config.window.apply(&mut entries);
        Ok(ClassifiedRoot::from_entries(root.clone(), entries))
    }

    /// Classify one root child from its (non-followed) file type.
    #[must_use]
    pub fn classify(&self, name: String, path: PathBuf, file_type: Option<FileType>) -> RootEntry {
        let kind = match file_type {
            Some(ft) if ft.is_dir() => self.classify_dir(&name, &path),
            Some(ft) => EntryKind::Stray {
                kind: stray_kind(ft),
            },
            None => EntryKind::Stray {
                kind: StrayKind::Other,
            },
        };
        RootEntry { name, path, kind }
    }

    fn classify_dir(&self, name: &str, path: &Path) -> EntryKind {
        if let Some(key) = parse_segment_name(name) {
            let markers = inspect_markers(path, &self.config.markers);
            return EntryKind::Segment(SegmentInfo {
                key,
                locked: markers.locked,
                preserved: markers.preserved,
            });
        }
        if self.config.special_dirs.iter().any(|special| special == name) {
            let markers = inspect_markers(path, &self.config.markers);
            return EntryKind::Special {
                locked: markers.locked,
            };
        }
        EntryKind::Stray {
            kind: StrayKind::UnrecognizedDir,
        }
    }
}

fn stray_kind(ft: FileType) -> StrayKind {
    if ft.is_symlink() {
        return StrayKind::Symlink;
    }
    if ft.is_file() {
        return StrayKind::File;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if ft.is_fifo() {
            return StrayKind::Fifo;
        }
    }
    StrayKind::Other
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::naming::NamingConvention;

    const SEG_A: &str = "0000002a--3f9c0e1b7d";
    const SEG_B: &str = "0000002b--a07c1d4e92";

    fn classifier(root: &Path) -> EntryClassifier {
        let layout = LayoutConfig {
            log_root: root.to_path_buf(),
            ..LayoutConfig::default()
        };
        EntryClassifier::new(ClassifierConfig::from_layout(&layout))
    }

    fn make_segment(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("fcamera.hevc"), b"video").unwrap();
        dir
    }

    /// Tag a directory with the preserve attribute; false when the filesystem refuses user xattrs.
    #[cfg(unix)]
    fn try_preserve(path: &Path, value: &[u8]) -> bool {
        xattr::set(path, "user.preserve", value).is_ok()
    }

    fn names(classified: &ClassifiedRoot) -> Vec<&str> {
        classified.entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn segment(name: &str, locked: bool, preserved: bool) -> RootEntry {
        RootEntry {
            name: name.to_string(),
            path: PathBuf::from("/logs").join(name),
            kind: EntryKind::Segment(SegmentInfo {
                key: parse_segment_name(name).unwrap(),
                locked,
                preserved,
            }),
        }
    }

    #[test]
    fn missing_root_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        let classified = classifier(&dir.path().join("absent")).scan().unwrap();
        assert!(classified.is_empty());
    }

    #[test]
    fn root_that_is_a_file_fails_scan() {
        let dir = tempfile::tempdir().unwrap();
        let not_dir = dir.path().join("realdata");
        fs::write(&not_dir, b"oops").unwrap();
        let err = classifier(&not_dir).scan().unwrap_err();
        assert_eq!(err.code(), "LSR-2002");
    }

    #[test]
    fn segments_sort_chronologically() {
        let dir = tempfile::tempdir().unwrap();
        make_segment(dir.path(), &format!("{SEG_B}--0"));
        make_segment(dir.path(), &format!("{SEG_A}--10"));
        make_segment(dir.path(), &format!("{SEG_A}--2"));
        make_segment(dir.path(), "2019-04-18--12-52-54--0");

        let classified = classifier(dir.path()).scan().unwrap();
        assert_eq!(
            names(&classified),
            vec![
                "2019-04-18--12-52-54--0".to_string(),
                format!("{SEG_A}--2"),
                format!("{SEG_A}--10"),
                format!("{SEG_B}--0"),
            ]
        );
        assert_eq!(
            classified.entries[0].segment_key().unwrap().convention,
            NamingConvention::Legacy
        );
    }

    #[test]
    #[cfg(unix)]
    fn odd_entries_are_strays() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("2023-09-23.tar.gz"), b"archive").unwrap();
        fs::write(root.join("empty_file"), b"").unwrap();
        fs::write(root.join(".hidden_temp"), b"hidden").unwrap();
        symlink("/does/not/exist", root.join("broken-link")).unwrap();
        symlink(root.join("empty_file"), root.join("link-to-file")).unwrap();
        symlink(root, root.join("link-to-dir")).unwrap();
        nix::unistd::mkfifo(&root.join("test.fifo"), nix::sys::stat::Mode::S_IRWXU).unwrap();
        fs::create_dir(root.join("tmp_work")).unwrap();
        make_segment(root, &format!("{SEG_A}--0"));
        fs::create_dir(root.join("boot")).unwrap();

        let classified = classifier(root).scan().unwrap();
        let summary = classified.summary();
        assert_eq!(summary.total, 10);
        assert_eq!(summary.strays, 8);
        assert_eq!(summary.segments, 1);
        assert_eq!(summary.special, 1);

        let kind_of = |name: &str| classified.find(name).unwrap().kind.clone();
        assert_eq!(
            kind_of("broken-link"),
            EntryKind::Stray {
                kind: StrayKind::Symlink
            }
        );
        assert_eq!(
            kind_of("link-to-dir"),
            EntryKind::Stray {
                kind: StrayKind::Symlink
            }
        );
        assert_eq!(
            kind_of("test.fifo"),
            EntryKind::Stray {
                kind: StrayKind::Fifo
            }
        );
        assert_eq!(
            kind_of("tmp_work"),
            EntryKind::Stray {
                kind: StrayKind::UnrecognizedDir
            }
        );
        assert_eq!(
            kind_of(".hidden_temp"),
            EntryKind::Stray {
                kind: StrayKind::File
            }
        );

        // Strays first, segment next, special last.
        let groups: Vec<EntryGroup> = classified.entries.iter().map(RootEntry::group).collect();
        assert!(groups[..8].iter().all(|g| *g == EntryGroup::Stray));
        assert_eq!(groups[8], EntryGroup::UnprotectedSegment);
        assert_eq!(groups[9], EntryGroup::Special);
    }

    #[test]
    fn strays_order_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["notes.txt", "backup.tar.gz", ".DS_Store"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let classified = classifier(dir.path()).scan().unwrap();
        assert_eq!(names(&classified), vec![".DS_Store", "backup.tar.gz", "notes.txt"]);
    }

    #[test]
    fn lock_suffix_marks_segment_locked() {
        let dir = tempfile::tempdir().unwrap();
        let seg = make_segment(dir.path(), &format!("{SEG_A}--0"));
        fs::write(seg.join("rlog.lock"), b"").unwrap();
        make_segment(dir.path(), &format!("{SEG_A}--1"));

        let classified = classifier(dir.path()).scan().unwrap();
        assert!(classified.entries[0].is_locked());
        assert!(!classified.entries[1].is_locked());
        assert_eq!(classified.summary().locked, 1);
    }

    #[test]
    fn lock_marker_applies_to_special_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let crash = dir.path().join("crash");
        fs::create_dir(&crash).unwrap();
        fs::write(crash.join("upload.lock"), b"").unwrap();

        let classified = classifier(dir.path()).scan().unwrap();
        assert_eq!(
            classified.find("crash").unwrap().kind,
            EntryKind::Special { locked: true }
        );
    }

    #[test]
    fn lock_suffix_requires_suffix_match() {
        let dir = tempfile::tempdir().unwrap();
        let seg = make_segment(dir.path(), &format!("{SEG_A}--0"));
        fs::write(seg.join("lock.txt"), b"").unwrap();
        fs::write(seg.join("unlocked"), b"").unwrap();
        assert!(!inspect_markers(&seg, &MarkerConvention::default()).locked);
    }

    #[test]
    fn unreadable_directory_counts_as_unprotected() {
        let state = inspect_markers(
            Path::new("/nonexistent/lsr/segment"),
            &MarkerConvention::default(),
        );
        assert_eq!(state, MarkerState::default());
    }

    #[test]
    #[cfg(unix)]
    fn preserve_attr_on_directory_or_child() {
        let dir = tempfile::tempdir().unwrap();
        let on_dir = make_segment(dir.path(), &format!("{SEG_A}--0"));
        let on_child = make_segment(dir.path(), &format!("{SEG_A}--1"));
        let wrong_value = make_segment(dir.path(), &format!("{SEG_A}--2"));
        if !try_preserve(&on_dir, b"1") {
            eprintln!("skipping: filesystem does not support user xattrs");
            return;
        }
        assert!(try_preserve(&on_child.join("fcamera.hevc"), b"1"));
        assert!(try_preserve(&wrong_value, b"0"));

        let markers = MarkerConvention::default();
        assert!(inspect_markers(&on_dir, &markers).preserved);
        assert!(inspect_markers(&on_child, &markers).preserved);
        assert!(!inspect_markers(&wrong_value, &markers).preserved);

        // Preserved segments sort after every unprotected one.
        let classified = classifier(dir.path()).scan().unwrap();
        assert_eq!(
            names(&classified),
            vec![
                format!("{SEG_A}--2"),
                format!("{SEG_A}--0"),
                format!("{SEG_A}--1"),
            ]
        );
    }

    #[test]
    fn from_entries_orders_groups_then_keys() {
        let stray = RootEntry {
            name: "zz.tar.gz".to_string(),
            path: PathBuf::from("/logs/zz.tar.gz"),
            kind: EntryKind::Stray {
                kind: StrayKind::File,
            },
        };
        let special = RootEntry {
            name: "boot".to_string(),
            path: PathBuf::from("/logs/boot"),
            kind: EntryKind::Special { locked: false },
        };
        let classified = ClassifiedRoot::from_entries(
            PathBuf::from("/logs"),
            vec![
                special,
                segment(&format!("{SEG_A}--3"), false, true),
                segment(&format!("{SEG_A}--5"), false, false),
                stray,
                segment(&format!("{SEG_A}--1"), true, false),
            ],
        );
        assert_eq!(
            names(&classified),
            vec![
                "zz.tar.gz".to_string(),
                format!("{SEG_A}--1"),
                format!("{SEG_A}--5"),
                format!("{SEG_A}--3"),
                "boot".to_string(),
            ]
        );
    }

    #[test]
    fn preserve_window_caps_marked_segments() {
        let mut entries: Vec<RootEntry> = (0..4)
            .map(|i| segment(&format!("{SEG_A}--{i}"), false, true))
            .collect();
        PreserveWindow {
            max_preserved: Some(2),
            prior_segments: 0,
        }
        .apply(&mut entries);

        let preserved: Vec<bool> = entries
            .iter()
            .map(|e| e.group() == EntryGroup::PreservedSegment)
            .collect();
        assert_eq!(preserved, vec![false, false, true, true]);
    }

    #[test]
    fn preserve_window_covers_prior_segments_of_same_route() {
        let mut entries = vec![
            segment(&format!("{SEG_A}--0"), false, false),
            segment(&format!("{SEG_A}--1"), false, false),
            segment(&format!("{SEG_A}--2"), false, false),
            segment(&format!("{SEG_A}--3"), false, true),
            segment(&format!("{SEG_B}--2"), false, false),
        ];
        PreserveWindow {
            max_preserved: None,
            prior_segments: 2,
        }
        .apply(&mut entries);

        let preserved: Vec<bool> = entries
            .iter()
            .map(|e| e.group() == EntryGroup::PreservedSegment)
            .collect();
        assert_eq!(preserved, vec![false, true, true, true, false]);
    }

    #[test]
    fn default_window_leaves_markers_alone() {
        let mut entries = vec![
            segment(&format!("{SEG_A}--0"), false, true),
            segment(&format!("{SEG_A}--1"), false, false),
        ];
        let before = entries.clone();
        PreserveWindow::default().apply(&mut entries);
        assert_eq!(entries, before);
    }
}
