// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Forward-Only Event Log Cursor
//!
//! Lazily decodes one log file front to back. A cursor may be opened against
//! a log that is still being appended to: in tailing mode it suspends at
//! end-of-durable-data and re-polls until the capture's completion probe
//! reports the log finished.
//!
//! # Error behaviour
//! - Missing log file: empty sequence, never an error
//! - Torn frame at the tail: end-of-durable-data (retried while tailing,
//!   ignored with a warning otherwise)
//! - Checksum mismatch on a complete frame: surfaced as an error item, the
//!   cursor then continues with the next frame

use crate::logs::writer::{frame_checksum, RecordHeader};
use crate::event::ReplayEvent;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reports whether the capture feeding this log has finished. A tailing
/// cursor stops waiting for more data once the probe returns true.
pub type CompletionProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// How long a tailing cursor sleeps at end-of-durable-data before re-polling.
const TAIL_POLL: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum CursorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checksum mismatch at offset {offset}: expected {expected}, found {found}")]
    ChecksumMismatch {
        offset: u64,
        expected: u64,
        found: u64,
    },
}

/// Termination behaviour of a [`LogCursor`].
#[derive(Clone)]
pub enum ReadMode {
    /// Stop at end-of-durable-data.
    Bounded,
    /// Suspend at end-of-durable-data and re-poll until the probe says the
    /// capture finished.
    Tail(CompletionProbe),
}

/// Lazy, restartable-from-start, forward-only reader of one tag's log.
pub struct LogCursor {
    path: PathBuf,
    mode: ReadMode,
    file: Option<File>,
    offset: u64,
}

impl LogCursor {
    pub fn new(path: PathBuf, mode: ReadMode) -> Self {
        Self {
            path,
            mode,
            file: None,
            offset: 0,
        }
    }

    /// Durable bytes currently visible, or 0 for a missing log.
    fn durable_len(file: &File) -> io::Result<u64> {
        Ok(file.metadata()?.len())
    }

    /// Whether to keep waiting at end-of-durable-data.
    fn wait_for_more(&self) -> bool {
        match &self.mode {
            ReadMode::Bounded => false,
            ReadMode::Tail(probe) => !probe(),
        }
    }
}

impl Iterator for LogCursor {
    type Item = Result<ReplayEvent, CursorError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.file.is_none() {
                match File::open(&self.path) {
                    Ok(f) => self.file = Some(f),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        // A missing log is an empty sequence; while tailing it
                        // may simply not have been created yet.
                        if self.wait_for_more() {
                            std::thread::sleep(TAIL_POLL);
                            continue;
                        }
                        return None;
                    }
                    Err(e) => return Some(Err(e.into())),
                }
            }
            let Some(file) = self.file.as_mut() else {
                continue;
            };

            let durable = match Self::durable_len(file) {
                Ok(len) => len,
                Err(e) => return Some(Err(e.into())),
            };
            let frame_start = self.offset;

            // Clean end-of-durable-data.
            if durable <= frame_start {
                if self.wait_for_more() {
                    std::thread::sleep(TAIL_POLL);
                    continue;
                }
                return None;
            }

            // A frame header is visible but incomplete: a writer is mid-append.
            if durable < frame_start + RecordHeader::SIZE as u64 {
                if self.wait_for_more() {
                    std::thread::sleep(TAIL_POLL);
                    continue;
                }
                tracing::warn!(
                    path = %self.path.display(),
                    offset = frame_start,
                    "Ignoring torn record header at end of log"
                );
                return None;
            }

            if let Err(e) = file.seek(SeekFrom::Start(frame_start)) {
                return Some(Err(e.into()));
            }
            let header = match RecordHeader::read_from(&mut *file) {
                Ok(h) => h,
                Err(e) => return Some(Err(e.into())),
            };

            let frame_end = frame_start + RecordHeader::SIZE as u64 + header.payload_len as u64;
            if durable < frame_end {
                if self.wait_for_more() {
                    std::thread::sleep(TAIL_POLL);
                    continue;
                }
                tracing::warn!(
                    path = %self.path.display(),
                    offset = frame_start,
                    "Ignoring torn record payload at end of log"
                );
                return None;
            }

            let mut payload = vec![0u8; header.payload_len as usize];
            if let Err(e) = io::Read::read_exact(file, &mut payload) {
                return Some(Err(e.into()));
            }
            self.offset = frame_end;

            let found = frame_checksum(&payload);
            if found != header.checksum {
                return Some(Err(CursorError::ChecksumMismatch {
                    offset: frame_start,
                    expected: header.checksum,
                    found,
                }));
            }

            match bincode::serde::decode_from_slice::<ReplayEvent, _>(
                &payload,
                bincode::config::standard(),
            ) {
                Ok((event, _)) => return Some(Ok(event)),
                Err(e) => {
                    // Skip the record and keep reading: a partial replay beats
                    // aborting the whole read.
                    tracing::warn!(
                        path = %self.path.display(),
                        offset = frame_start,
                        error = %e,
                        "Skipping undecodable record"
                    );
                    metrics::counter!("rewind_records_skipped_total", 1);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::writer::{append_events, LogWriter};
    use crate::event::{Tag, TimestampedElement};
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn element_event(tag: &str, value: &[u8], event_time: i64) -> ReplayEvent {
        ReplayEvent::AddElements {
            tag: Tag::from(tag),
            elements: vec![TimestampedElement::new(value.to_vec(), event_time)],
        }
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records");

        let events = vec![
            ReplayEvent::AdvanceProcessingTime {
                advance_micros: 5_000_000,
            },
            ReplayEvent::AdvanceWatermark {
                tag: Tag::from("records"),
                new_watermark_micros: 0,
            },
            element_event("records", b"a", 0),
        ];
        append_events(&path, &events).unwrap();

        let read: Vec<_> = LogCursor::new(path, ReadMode::Bounded)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(read, events);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never_written");

        let mut cursor = LogCursor::new(path, ReadMode::Bounded);
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_restartable_from_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records");
        append_events(&path, &[element_event("records", b"a", 0)]).unwrap();

        for _ in 0..2 {
            let read: Vec<_> = LogCursor::new(path.clone(), ReadMode::Bounded)
                .collect::<Result<_, _>>()
                .unwrap();
            assert_eq!(read.len(), 1);
        }
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records");
        append_events(&path, &[element_event("records", b"a", 0)]).unwrap();

        // A crash mid-append leaves a partial frame behind the valid record.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(&[0xAB; 7]).unwrap();

        let events: Vec<_> = LogCursor::new(path, ReadMode::Bounded)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_checksum_mismatch_is_surfaced_then_read_continues() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records");

        let first = element_event("records", b"aaaa", 0);
        let second = element_event("records", b"bbbb", 1);
        append_events(&path, &[first, second.clone()]).unwrap();

        // Corrupt one payload byte inside the first record.
        let mut bytes = std::fs::read(&path).unwrap();
        let flip_at = RecordHeader::SIZE + 4;
        bytes[flip_at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let items: Vec<_> = LogCursor::new(path, ReadMode::Bounded).collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[0],
            Err(CursorError::ChecksumMismatch { .. })
        ));
        assert_eq!(items[1].as_ref().unwrap(), &second);
    }

    #[test]
    fn test_undecodable_record_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records");

        let first = element_event("records", b"a", 0);
        append_events(&path, &[first.clone()]).unwrap();

        // A frame that checksums correctly but whose payload is not a valid
        // event. 0xFF is not an event variant, so decoding must fail.
        let garbage = [0xFF_u8; 16];
        let header = RecordHeader {
            payload_len: garbage.len() as u32,
            checksum: frame_checksum(&garbage),
        };
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(&header.to_bytes()).unwrap();
        file.write_all(&garbage).unwrap();

        let second = element_event("records", b"b", 1);
        append_events(&path, &[second.clone()]).unwrap();

        let events: Vec<_> = LogCursor::new(path, ReadMode::Bounded)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[test]
    fn test_tailing_observes_concurrent_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records");
        append_events(&path, &[element_event("records", b"a", 0)]).unwrap();

        let complete = Arc::new(AtomicBool::new(false));
        let probe: CompletionProbe = {
            let complete = Arc::clone(&complete);
            Arc::new(move || complete.load(Ordering::SeqCst))
        };

        let writer_path = path.clone();
        let writer_done = Arc::clone(&complete);
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut w = LogWriter::open(&writer_path).unwrap();
            w.append(&element_event("records", b"b", 1)).unwrap();
            w.sync().unwrap();
            writer_done.store(true, Ordering::SeqCst);
        });

        let events: Vec<_> = LogCursor::new(path, ReadMode::Tail(probe))
            .collect::<Result<_, _>>()
            .unwrap();
        writer.join().unwrap();

        assert_eq!(events.len(), 2);
    }
}
