// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replay Events as Primary Truth
//!
//! This module defines the canonical event representation for a captured
//! stream. Everything a capture records and everything a replay emits is
//! expressed as a `ReplayEvent`.
//!
//! # Determinism Guarantees
//! - Timestamps are explicit integer microseconds, never wall-clock reads
//! - Element payloads are opaque, pre-encoded bytes
//! - Processing time only ever moves through recorded deltas
//!
//! # Invariants
//! - Within one tag's log, `AddElements` / `AdvanceWatermark` records appear
//!   in non-decreasing processing-time order
//! - `AdvanceProcessingTime` entries in one log are that tag's locally
//!   observed clock deltas; the merged stream carries coalesced deltas of a
//!   single shared clock

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one capturable source's event stream within a pipeline.
///
/// Tags double as log file names, so the storage layer rejects tags that
/// contain path separators or `..`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// One already-encoded element plus the event time it logically occurred at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedElement {
    /// Opaque payload bytes. Encoding happened before the cache saw them.
    pub encoded: Vec<u8>,
    /// Event time in microseconds, independent of capture time.
    pub event_time_micros: i64,
}

impl TimestampedElement {
    pub fn new(encoded: Vec<u8>, event_time_micros: i64) -> Self {
        Self {
            encoded,
            event_time_micros,
        }
    }
}

/// The canonical event language of the replay cache.
///
/// Each variant is atomic: a batch of elements for one tag, a per-tag
/// watermark advance, or an advance of the shared processing clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayEvent {
    /// One or more elements for a single tag, each with its own event time.
    AddElements {
        tag: Tag,
        elements: Vec<TimestampedElement>,
    },

    /// Monotonic per-tag watermark advance.
    AdvanceWatermark { tag: Tag, new_watermark_micros: i64 },

    /// Advance of the simulated processing clock by a delta. Carries no tag;
    /// a merged stream's clock applies to every tag at once.
    AdvanceProcessingTime { advance_micros: u64 },
}

impl ReplayEvent {
    /// Returns a human-readable name of the event variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            ReplayEvent::AddElements { .. } => "AddElements",
            ReplayEvent::AdvanceWatermark { .. } => "AdvanceWatermark",
            ReplayEvent::AdvanceProcessingTime { .. } => "AdvanceProcessingTime",
        }
    }

    /// The tag this event belongs to, if any. Clock advances are global.
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            ReplayEvent::AddElements { tag, .. } => Some(tag),
            ReplayEvent::AdvanceWatermark { tag, .. } => Some(tag),
            ReplayEvent::AdvanceProcessingTime { .. } => None,
        }
    }
}
