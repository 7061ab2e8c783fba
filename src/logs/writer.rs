// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-Only Event Log Writer
//!
//! One log file per tag, written as CRC64-framed, length-prefixed bincode
//! records:
//!
//! ```text
//! [payload_len: u32 LE][checksum: u64 LE][payload bytes] ...
//! ```
//!
//! # Safety Guarantees
//! - Every append batch is flushed and `sync_data`'d before returning
//! - No truncation or rewriting; the file only ever grows
//! - A reader may tail the file while it is being appended to

use crate::event::ReplayEvent;
use crc64fast::Digest;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, WriteError>;

/// Frame header preceding every record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub payload_len: u32,
    pub checksum: u64,
}

impl RecordHeader {
    pub const SIZE: usize = 4 + 8;

    pub fn read_from<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let payload_len = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let checksum = u64::from_le_bytes(buf[4..12].try_into().unwrap());

        Ok(Self {
            payload_len,
            checksum,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[4..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }
}

/// Computes the frame checksum over the length prefix and the payload.
pub fn frame_checksum(payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&(payload.len() as u32).to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

/// Appends a batch of events to the log at `path`, creating it if absent.
///
/// The batch is durable when this returns: records are written in order,
/// then the file is flushed and `sync_data`'d once for the whole batch.
pub fn append_events(path: impl AsRef<Path>, events: &[ReplayEvent]) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }

    let mut writer = LogWriter::open(path)?;
    for event in events {
        writer.append(event)?;
    }
    writer.sync()
}

/// Open log handle for appending multiple events before one sync.
pub struct LogWriter {
    file: File,
}

impl LogWriter {
    /// Opens the log for appending, creating it (and its parent directory)
    /// when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Writes one framed record. Not durable until [`LogWriter::sync`].
    pub fn append(&mut self, event: &ReplayEvent) -> Result<()> {
        let payload = bincode::serde::encode_to_vec(event, bincode::config::standard())
            .map_err(|e| WriteError::Serialization(e.to_string()))?;

        let header = RecordHeader {
            payload_len: payload.len() as u32,
            checksum: frame_checksum(&payload),
        };

        self.file.write_all(&header.to_bytes())?;
        self.file.write_all(&payload)?;
        Ok(())
    }

    /// Forces previously appended records to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}
