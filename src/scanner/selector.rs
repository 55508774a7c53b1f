//! Victim selection: which entry goes next.
//!
//! Eviction priority is a derived total order on [`EvictionTier`]: every stray
//! before any unprotected segment, unprotected before preserved, preserved
//! before special directories. Locked entries have no tier at all.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::scanner::classifier::{ClassifiedRoot, EntryKind, RootEntry};
use crate::scanner::naming::SegmentKey;

/// Eviction priority. Smaller goes first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "tier", content = "id", rename_all = "snake_case")]
pub enum EvictionTier {
    Stray(String),
    Unprotected(SegmentKey),
    Preserved(SegmentKey),
    Special(String),
}

impl EvictionTier {
    /// Tier of an entry, or `None` if it must never be deleted.
    #[must_use]
    pub fn of(entry: &RootEntry) -> Option<Self> {
        match &entry.kind {
            EntryKind::Stray { .. } => Some(Self::Stray(entry.name.clone())),
            EntryKind::Segment(info) if info.locked => None,
            EntryKind::Segment(info) if info.preserved => Some(Self::Preserved(info.key.clone())),
            EntryKind::Segment(info) => Some(Self::Unprotected(info.key.clone())),
            EntryKind::Special { locked: true } => None,
            EntryKind::Special { locked: false } => Some(Self::Special(entry.name.clone())),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stray(_) => "stray",
            Self::Unprotected(_) => "unprotected",
            Self::Preserved(_) => "preserved",
            Self::Special(_) => "special",
        }
    }
}

impl fmt::Display for EvictionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stray(name) | Self::Special(name) => write!(f, "{}:{name}", self.label()),
            Self::Unprotected(key) | Self::Preserved(key) => write!(f, "{}:{key}", self.label()),
        }
    }
}

/// An eligible entry paired with its tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate<'a> {
    pub tier: EvictionTier,
    pub entry: &'a RootEntry,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VictimSelector;

impl VictimSelector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn tier(&self, entry: &RootEntry) -> Option<EvictionTier> {
        EvictionTier::of(entry)
    }

    /// Every eligible entry, highest eviction priority first.
    #[must_use]
    pub fn candidates<'a>(&self, classified: &'a ClassifiedRoot) -> Vec<Candidate<'a>> {
        let mut candidates: Vec<Candidate<'a>> = classified
            .entries
            .iter()
            .filter_map(|entry| EvictionTier::of(entry).map(|tier| Candidate { tier, entry }))
            .collect();
        candidates.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.entry.name.cmp(&b.entry.name)));
        candidates
    }

    /// The entry to delete next; `None` when nothing is eligible.
    #[must_use]
    pub fn next_victim<'a>(&self, classified: &'a ClassifiedRoot) -> Option<&'a RootEntry> {
        self.next_victim_excluding(classified, &HashSet::new())
    }

    /// Like [`Self::next_victim`], ignoring paths already attempted this pass.
    #[must_use]
    pub fn next_victim_excluding<'a>(
        &self,
        classified: &'a ClassifiedRoot,
        skip: &HashSet<PathBuf>,
    ) -> Option<&'a RootEntry> {
        classified
            .entries
            .iter()
            .filter(|entry| !skip.contains(&entry.path))
            .filter_map(|entry| EvictionTier::of(entry).map(|tier| (tier, entry)))
            .min_by(|(ta, ea), (tb, eb)| ta.cmp(tb).then_with(|| ea.name.cmp(&eb.name)))
            .map(|(_, entry)| entry)
    }
}
