// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Clock-Merging Replay Reader
//!
//! Merges any number of per-tag event logs into one globally ordered event
//! stream driven by a single simulated processing clock.
//!
//! # Merge contract
//! - Each source's processing position starts at 0 and accumulates its own
//!   recorded clock deltas; those per-source deltas are consumed, never
//!   emitted
//! - At every step the not-yet-emitted event with the smallest position wins;
//!   ties go to the earlier cursor in the order the caller listed them
//! - Whenever the winner sits ahead of the shared clock, exactly one
//!   coalesced `AdvanceProcessingTime` is emitted first
//! - `AddElements` / `AdvanceWatermark` pass through untouched
//!
//! The merge is a streaming k-way merge holding one buffered candidate per
//! cursor: memory stays proportional to the number of cursors, not the
//! number of events. Ordering is guaranteed with respect to processing time
//! only; recorded event times are never corrected.

use crate::event::ReplayEvent;
use crate::logs::LogCursor;

/// One log being merged: its cursor, its reconstructed processing position,
/// and the next tag-bearing event waiting to be emitted.
struct MergeSource {
    cursor: LogCursor,
    position_micros: u64,
    pending: Option<ReplayEvent>,
    exhausted: bool,
}

impl MergeSource {
    fn new(cursor: LogCursor) -> Self {
        Self {
            cursor,
            position_micros: 0,
            pending: None,
            exhausted: false,
        }
    }

    /// Pulls forward until a tag-bearing event is buffered, folding clock
    /// deltas into this source's position. Read errors are skipped so that a
    /// partially damaged log still replays the rest of its events.
    fn fill(&mut self) {
        while self.pending.is_none() && !self.exhausted {
            match self.cursor.next() {
                None => self.exhausted = true,
                Some(Ok(ReplayEvent::AdvanceProcessingTime { advance_micros })) => {
                    self.position_micros += advance_micros;
                }
                Some(Ok(event)) => self.pending = Some(event),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Skipping unreadable record during replay");
                    metrics::counter!("rewind_records_skipped_total", 1);
                }
            }
        }
    }
}

/// Globally ordered, lazily evaluated view over a set of per-tag logs.
///
/// Cursor order encodes the tie-break: list groups first, tags within a
/// group second, and equal-position events come out in that order.
pub struct ReplayReader {
    sources: Vec<MergeSource>,
    clock_micros: u64,
    /// Index of a winner whose clock advance was just emitted; its event is
    /// emitted on the next call.
    staged: Option<usize>,
}

impl ReplayReader {
    pub fn new(cursors: Vec<LogCursor>) -> Self {
        Self {
            sources: cursors.into_iter().map(MergeSource::new).collect(),
            clock_micros: 0,
            staged: None,
        }
    }

    /// A reader over nothing; replays no events.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Index of the source holding the smallest-position candidate.
    fn pick_winner(&mut self) -> Option<usize> {
        for source in &mut self.sources {
            source.fill();
        }
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.pending.is_some())
            .min_by_key(|(index, s)| (s.position_micros, *index))
            .map(|(index, _)| index)
    }
}

impl Iterator for ReplayReader {
    type Item = ReplayEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(index) = self.staged.take() {
            metrics::counter!("rewind_replay_events_emitted_total", 1);
            return self.sources[index].pending.take();
        }

        let index = self.pick_winner()?;
        let position = self.sources[index].position_micros;

        metrics::counter!("rewind_replay_events_emitted_total", 1);
        if position > self.clock_micros {
            let advance_micros = position - self.clock_micros;
            self.clock_micros = position;
            self.staged = Some(index);
            return Some(ReplayEvent::AdvanceProcessingTime { advance_micros });
        }
        self.sources[index].pending.take()
    }
}
