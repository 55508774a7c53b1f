//! Segment directory naming conventions and the chronological sort key they encode.
//!
//! Two conventions are recognized:
//! - primary: `<route counter, 8 hex>--<route id, 10 hex>--<segment>`, e.g. `0000002a--3f9c0e1b7d--12`
//! - legacy: `<YYYY-MM-DD--HH-MM-SS>--<segment>`, e.g. `2019-04-18--12-52-54--3`
//!
//! Legacy names predate the primary scheme, so every legacy segment sorts
//! before every primary segment.

#![allow(missing_docs)]

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static PRIMARY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<route>[0-9a-f]{8}--[0-9a-f]{10})--(?P<segment>[0-9]+)$")
        .expect("primary segment pattern is valid")
});

static LEGACY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<route>[0-9]{4}-[0-9]{2}-[0-9]{2}--[0-9]{2}-[0-9]{2}-[0-9]{2})--(?P<segment>[0-9]+)$")
        .expect("legacy segment pattern is valid")
});

/// Which naming scheme produced a key. Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    Legacy,
    Primary,
}

/// Chronological position of a segment: convention, then route, then segment number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SegmentKey {
    pub convention: NamingConvention,
    pub route: String,
    pub segment: u64,
}

impl SegmentKey {
    /// Key of an earlier segment in the same route, if there is one `back` steps behind.
    #[must_use]
    pub fn preceding(&self, back: u64) -> Option<Self> {
        let segment = self.segment.checked_sub(back)?;
        Some(Self {
            convention: self.convention,
            route: self.route.clone(),
            segment,
        })
    }

    #[must_use]
    pub fn same_route(&self, other: &Self) -> bool {
        self.convention == other.convention && self.route == other.route
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.route, self.segment)
    }
}

/// Parse a directory name under either convention.
#[must_use]
pub fn parse_segment_name(name: &str) -> Option<SegmentKey> {
    [
        (&*PRIMARY_PATTERN, NamingConvention::Primary),
        (&*LEGACY_PATTERN, NamingConvention::Legacy),
    ]
    .into_iter()
    .find_map(|(pattern, convention)| {
        let caps = pattern.captures(name)?;
        let segment = caps.name("segment")?.as_str().parse::<u64>().ok()?;
        Some(SegmentKey {
            convention,
            route: caps.name("route")?.as_str().to_string(),
            segment,
        })
    })
}
