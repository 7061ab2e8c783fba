// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! rewind: a deterministic replay cache for unbounded streaming pipelines.
//!
//! Captures a bounded window of a live stream — elements, watermarks, and
//! processing-time transitions — into per-tag append-only logs, then replays
//! it as the same event sequence every time against a simulated clock.

pub mod cache;
pub mod capture;
pub mod config;
pub mod event;
pub mod logs;
pub mod registry;
pub mod replay;
pub mod signature;
pub mod sink;
pub mod telemetry;

pub use cache::StreamingCache;
pub use capture::{CaptureJob, JobHandle, JobState};
pub use config::CaptureConfig;
pub use event::{ReplayEvent, Tag, TimestampedElement};
pub use registry::{CaptureRegistry, PipelineId};
pub use replay::ReplayReader;
pub use signature::{SourceDescriptor, SourceSignature};
pub use sink::{StreamingSink, TaggedBatch};
