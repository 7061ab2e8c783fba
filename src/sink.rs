// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Streaming Sink — live capture → per-tag logs
//!
//! Routes batches from a live tagged event stream into the per-tag event
//! logs, recording watermark and processing-time transitions as events of
//! their own so a later replay can reconstruct the capture's clock.
//!
//! Per batch, in order:
//! 1. a clock delta, when the tag's observed processing time advanced
//! 2. a watermark advance, when the tag's observed watermark changed
//! 3. one `AddElements` per distinct event time among the batch's elements
//!
//! Payloads arrive pre-encoded; the sink stores bytes and timestamps only.

use crate::event::{ReplayEvent, Tag, TimestampedElement};
use crate::logs::{CacheDir, StorageError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tag {0:?} was not registered with this sink")]
    UnknownTag(String),
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// One observation from the live stream: the elements that arrived for a tag
/// together with the watermark and processing-time values in effect when
/// they did. An empty `elements` batch records the transitions alone.
#[derive(Clone, Debug)]
pub struct TaggedBatch {
    pub tag: Tag,
    pub elements: Vec<TimestampedElement>,
    pub watermark_micros: i64,
    pub processing_time_micros: u64,
}

#[derive(Default)]
struct TagState {
    watermark_micros: Option<i64>,
    processing_time_micros: u64,
}

/// Write half of the cache: accepts live batches for a fixed set of tags.
pub struct StreamingSink {
    storage: Arc<CacheDir>,
    states: HashMap<Tag, TagState>,
}

impl StreamingSink {
    pub(crate) fn new(storage: Arc<CacheDir>, tags: impl IntoIterator<Item = Tag>) -> Self {
        let states = tags
            .into_iter()
            .map(|tag| (tag, TagState::default()))
            .collect();
        Self { storage, states }
    }

    /// Records one batch into its tag's log.
    pub fn push(&mut self, batch: TaggedBatch) -> Result<()> {
        let state = self
            .states
            .get_mut(&batch.tag)
            .ok_or_else(|| SinkError::UnknownTag(batch.tag.as_str().to_owned()))?;

        let mut events = Vec::new();

        if batch.processing_time_micros > state.processing_time_micros {
            events.push(ReplayEvent::AdvanceProcessingTime {
                advance_micros: batch.processing_time_micros - state.processing_time_micros,
            });
            state.processing_time_micros = batch.processing_time_micros;
        } else if batch.processing_time_micros < state.processing_time_micros {
            tracing::debug!(
                tag = %batch.tag,
                observed = batch.processing_time_micros,
                recorded = state.processing_time_micros,
                "Processing time regressed; not recorded"
            );
        }

        if state.watermark_micros != Some(batch.watermark_micros) {
            events.push(ReplayEvent::AdvanceWatermark {
                tag: batch.tag.clone(),
                new_watermark_micros: batch.watermark_micros,
            });
            state.watermark_micros = Some(batch.watermark_micros);
        }

        let element_count = batch.elements.len();
        for (_, elements) in group_by_event_time(batch.elements) {
            events.push(ReplayEvent::AddElements {
                tag: batch.tag.clone(),
                elements,
            });
        }

        self.storage.append(&batch.tag, &events)?;

        metrics::counter!("rewind_events_appended_total", events.len() as u64);
        metrics::counter!("rewind_elements_captured_total", element_count as u64);
        Ok(())
    }

    /// Tags this sink accepts.
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.states.keys()
    }
}

/// Splits a batch into per-event-time groups, preserving the order in which
/// event times first appear and the recorded order within each group.
fn group_by_event_time(
    elements: Vec<TimestampedElement>,
) -> Vec<(i64, Vec<TimestampedElement>)> {
    let mut groups: Vec<(i64, Vec<TimestampedElement>)> = Vec::new();
    for element in elements {
        match groups
            .iter_mut()
            .find(|(time, _)| *time == element.event_time_micros)
        {
            Some((_, group)) => group.push(element),
            None => groups.push((element.event_time_micros, vec![element])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::ReadMode;

    fn elem(value: &[u8], event_time: i64) -> TimestampedElement {
        TimestampedElement::new(value.to_vec(), event_time)
    }

    fn log_events(storage: &CacheDir, tag: &Tag) -> Vec<ReplayEvent> {
        storage
            .open_cursor(tag, ReadMode::Bounded)
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_transitions_recorded_before_elements() {
        let storage = Arc::new(CacheDir::new(None).unwrap());
        let tag = Tag::from("records");
        let mut sink = StreamingSink::new(Arc::clone(&storage), [tag.clone()]);

        sink.push(TaggedBatch {
            tag: tag.clone(),
            elements: vec![elem(b"a", 0), elem(b"b", 0), elem(b"c", 0)],
            watermark_micros: 0,
            processing_time_micros: 5_000_000,
        })
        .unwrap();
        sink.push(TaggedBatch {
            tag: tag.clone(),
            elements: vec![elem(b"1", 15_000_000), elem(b"2", 15_000_000), elem(b"3", 15_000_000)],
            watermark_micros: 10_000_000,
            processing_time_micros: 6_000_000,
        })
        .unwrap();

        let events = log_events(&storage, &tag);
        assert_eq!(
            events,
            vec![
                ReplayEvent::AdvanceProcessingTime {
                    advance_micros: 5_000_000
                },
                ReplayEvent::AdvanceWatermark {
                    tag: tag.clone(),
                    new_watermark_micros: 0
                },
                ReplayEvent::AddElements {
                    tag: tag.clone(),
                    elements: vec![elem(b"a", 0), elem(b"b", 0), elem(b"c", 0)],
                },
                ReplayEvent::AdvanceProcessingTime {
                    advance_micros: 1_000_000
                },
                ReplayEvent::AdvanceWatermark {
                    tag: tag.clone(),
                    new_watermark_micros: 10_000_000
                },
                ReplayEvent::AddElements {
                    tag: tag.clone(),
                    elements: vec![
                        elem(b"1", 15_000_000),
                        elem(b"2", 15_000_000),
                        elem(b"3", 15_000_000)
                    ],
                },
            ]
        );
    }

    #[test]
    fn test_unchanged_watermark_and_clock_not_rerecorded() {
        let storage = Arc::new(CacheDir::new(None).unwrap());
        let tag = Tag::from("records");
        let mut sink = StreamingSink::new(Arc::clone(&storage), [tag.clone()]);

        for value in [b"a", b"b"] {
            sink.push(TaggedBatch {
                tag: tag.clone(),
                elements: vec![elem(value, 0)],
                watermark_micros: 0,
                processing_time_micros: 1_000_000,
            })
            .unwrap();
        }

        let events = log_events(&storage, &tag);
        let advances = events
            .iter()
            .filter(|e| matches!(e, ReplayEvent::AdvanceProcessingTime { .. }))
            .count();
        let watermarks = events
            .iter()
            .filter(|e| matches!(e, ReplayEvent::AdvanceWatermark { .. }))
            .count();
        assert_eq!(advances, 1);
        assert_eq!(watermarks, 1);
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_mixed_event_times_split_into_batches() {
        let storage = Arc::new(CacheDir::new(None).unwrap());
        let tag = Tag::from("records");
        let mut sink = StreamingSink::new(Arc::clone(&storage), [tag.clone()]);

        sink.push(TaggedBatch {
            tag: tag.clone(),
            elements: vec![elem(b"a", 0), elem(b"b", 1), elem(b"c", 0)],
            watermark_micros: 0,
            processing_time_micros: 1,
        })
        .unwrap();

        let events = log_events(&storage, &tag);
        let batches: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ReplayEvent::AddElements { elements, .. } => Some(elements.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![elem(b"a", 0), elem(b"c", 0)]);
        assert_eq!(batches[1], vec![elem(b"b", 1)]);
    }

    #[test]
    fn test_watermark_only_batch() {
        let storage = Arc::new(CacheDir::new(None).unwrap());
        let tag = Tag::from("records");
        let mut sink = StreamingSink::new(Arc::clone(&storage), [tag.clone()]);

        sink.push(TaggedBatch {
            tag: tag.clone(),
            elements: vec![],
            watermark_micros: 7,
            processing_time_micros: 0,
        })
        .unwrap();

        assert_eq!(
            log_events(&storage, &tag),
            vec![ReplayEvent::AdvanceWatermark {
                tag: tag.clone(),
                new_watermark_micros: 7
            }]
        );
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let storage = Arc::new(CacheDir::new(None).unwrap());
        let mut sink = StreamingSink::new(storage, [Tag::from("known")]);

        let result = sink.push(TaggedBatch {
            tag: Tag::from("unknown"),
            elements: vec![],
            watermark_micros: 0,
            processing_time_micros: 0,
        });
        assert!(matches!(result, Err(SinkError::UnknownTag(_))));
    }
}
