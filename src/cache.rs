// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Streaming Cache — the consumer facade
//!
//! Holds the read and write halves of one pipeline's replay cache together:
//! `sink` feeds live captures into per-tag logs, `read`/`read_multiple`
//! replay them as one clock-simulated event stream.
//!
//! A cache is either *plain* (reads stop at end-of-durable-data) or
//! *streaming-aware* (multi-tag reads tail a capture that is still running,
//! using a completion probe to decide when to stop waiting). The capability
//! is decided once, at construction.

use crate::event::Tag;
use crate::logs::{CacheDir, CompletionProbe, ReadMode, StorageError};
use crate::replay::ReplayReader;
use crate::sink::StreamingSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version reported for a missing tag, mirroring `read`'s contract that a
/// nonexistent log is an empty sequence rather than an error.
pub const MISSING_VERSION: i64 = -1;

pub struct StreamingCache {
    storage: Arc<CacheDir>,
    completion: Option<CompletionProbe>,
}

impl StreamingCache {
    /// Plain cache: reads never wait for more data.
    pub fn new(dir: Option<PathBuf>) -> Result<Self, StorageError> {
        Ok(Self {
            storage: Arc::new(CacheDir::new(dir)?),
            completion: None,
        })
    }

    /// Streaming-aware cache: `read_multiple` tails until `completion`
    /// reports the backing capture finished.
    pub fn streaming(
        dir: Option<PathBuf>,
        completion: CompletionProbe,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            storage: Arc::new(CacheDir::new(dir)?),
            completion: Some(completion),
        })
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn exists(&self, tag: &Tag) -> bool {
        self.storage.exists(tag)
    }

    /// Write half for the given tags.
    pub fn sink(&self, tags: impl IntoIterator<Item = Tag>) -> StreamingSink {
        StreamingSink::new(Arc::clone(&self.storage), tags)
    }

    /// Replays one tag's log. A missing tag yields an empty reader and
    /// [`MISSING_VERSION`]; reads never tail a single-tag log.
    pub fn read(&self, tag: &Tag) -> Result<(ReplayReader, i64), StorageError> {
        if !self.storage.exists(tag) {
            return Ok((ReplayReader::empty(), MISSING_VERSION));
        }
        let cursor = self.storage.open_cursor(tag, ReadMode::Bounded)?;
        Ok((ReplayReader::new(vec![cursor]), 1))
    }

    /// Replays several groups of tags merged into one clock-ordered stream.
    /// Group order (then tag order within a group) is the tie-break at equal
    /// processing-time positions. On a streaming-aware cache this tails logs
    /// that are still being captured.
    pub fn read_multiple(&self, groups: &[Vec<Tag>]) -> Result<ReplayReader, StorageError> {
        let probe: CompletionProbe = match &self.completion {
            Some(probe) => Arc::clone(probe),
            None => Arc::new(|| true),
        };

        let mut cursors = Vec::new();
        for group in groups {
            for tag in group {
                cursors.push(
                    self.storage
                        .open_cursor(tag, ReadMode::Tail(Arc::clone(&probe)))?,
                );
            }
        }
        Ok(ReplayReader::new(cursors))
    }

    /// Total bytes captured so far; feeds the size-limit checker.
    pub fn capture_size(&self) -> u64 {
        self.storage.capture_size()
    }

    /// Discards every tag's log. Replay determinism requires all tags to
    /// restart from the same origin instant, so invalidation is all-or-nothing.
    pub fn cleanup(&self) -> Result<(), StorageError> {
        self.storage.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ReplayEvent, TimestampedElement};
    use crate::sink::TaggedBatch;

    fn elem(value: &[u8], event_time: i64) -> TimestampedElement {
        TimestampedElement::new(value.to_vec(), event_time)
    }

    fn add(tag: &str, elements: Vec<TimestampedElement>) -> ReplayEvent {
        ReplayEvent::AddElements {
            tag: Tag::from(tag),
            elements,
        }
    }

    fn advance(micros: u64) -> ReplayEvent {
        ReplayEvent::AdvanceProcessingTime {
            advance_micros: micros,
        }
    }

    fn watermark(tag: &str, micros: i64) -> ReplayEvent {
        ReplayEvent::AdvanceWatermark {
            tag: Tag::from(tag),
            new_watermark_micros: micros,
        }
    }

    #[test]
    fn test_read_missing_tag() {
        let cache = StreamingCache::new(None).unwrap();
        let (reader, version) = cache.read(&Tag::from("records")).unwrap();

        assert_eq!(version, MISSING_VERSION);
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn test_sink_then_read_records_scenario() {
        let cache = StreamingCache::new(None).unwrap();
        let tag = Tag::from("records");
        let mut sink = cache.sink([tag.clone()]);

        // 5s advance, watermark 0, [a,b,c]@0; then 1s advance, watermark 10s,
        // [1,2,3]@15s.
        sink.push(TaggedBatch {
            tag: tag.clone(),
            elements: vec![elem(b"a", 0), elem(b"b", 0), elem(b"c", 0)],
            watermark_micros: 0,
            processing_time_micros: 5_000_000,
        })
        .unwrap();
        sink.push(TaggedBatch {
            tag: tag.clone(),
            elements: vec![
                elem(b"1", 15_000_000),
                elem(b"2", 15_000_000),
                elem(b"3", 15_000_000),
            ],
            watermark_micros: 10_000_000,
            processing_time_micros: 6_000_000,
        })
        .unwrap();

        let (reader, version) = cache.read(&tag).unwrap();
        assert_eq!(version, 1);

        let events: Vec<_> = reader.collect();
        assert_eq!(
            events,
            vec![
                advance(5_000_000),
                watermark("records", 0),
                add("records", vec![elem(b"a", 0), elem(b"b", 0), elem(b"c", 0)]),
                advance(1_000_000),
                watermark("records", 10_000_000),
                add(
                    "records",
                    vec![
                        elem(b"1", 15_000_000),
                        elem(b"2", 15_000_000),
                        elem(b"3", 15_000_000),
                    ]
                ),
            ]
        );
    }

    #[test]
    fn test_read_multiple_merges_tags() {
        let cache = StreamingCache::new(None).unwrap();
        let letters = Tag::from("letters");
        let numbers = Tag::from("numbers");

        let mut letters_sink = cache.sink([letters.clone()]);
        letters_sink
            .push(TaggedBatch {
                tag: letters.clone(),
                elements: vec![elem(b"a", 0), elem(b"b", 0), elem(b"c", 0)],
                watermark_micros: 0,
                processing_time_micros: 5_000_000,
            })
            .unwrap();

        let mut numbers_sink = cache.sink([numbers.clone()]);
        numbers_sink
            .push(TaggedBatch {
                tag: numbers.clone(),
                elements: vec![
                    elem(b"1", 15_000_000),
                    elem(b"2", 15_000_000),
                    elem(b"3", 15_000_000),
                ],
                watermark_micros: 10_000_000,
                processing_time_micros: 6_000_000,
            })
            .unwrap();

        let events: Vec<_> = cache
            .read_multiple(&[vec![letters.clone()], vec![numbers.clone()]])
            .unwrap()
            .collect();

        assert_eq!(
            events,
            vec![
                advance(5_000_000),
                watermark("letters", 0),
                add("letters", vec![elem(b"a", 0), elem(b"b", 0), elem(b"c", 0)]),
                advance(1_000_000),
                watermark("numbers", 10_000_000),
                add(
                    "numbers",
                    vec![
                        elem(b"1", 15_000_000),
                        elem(b"2", 15_000_000),
                        elem(b"3", 15_000_000),
                    ]
                ),
            ]
        );
    }

    #[test]
    fn test_exists_tracks_sink_writes() {
        let cache = StreamingCache::new(None).unwrap();
        let tag = Tag::from("my_label");
        assert!(!cache.exists(&tag));

        let mut sink = cache.sink([tag.clone()]);
        sink.push(TaggedBatch {
            tag: tag.clone(),
            elements: vec![elem(b"x", 0)],
            watermark_micros: 0,
            processing_time_micros: 1,
        })
        .unwrap();

        assert!(cache.exists(&tag));
        cache.cleanup().unwrap();
        assert!(!cache.exists(&tag));
    }
}
