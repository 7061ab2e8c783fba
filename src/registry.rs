// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Capture Registry
//!
//! Per-pipeline bookkeeping: which capture job is running, what source
//! signature it was started against, and where its cache lives. The registry
//! answers the two scheduling questions every evaluation asks:
//!
//! - `is_capture_needed`: should a new background capture start?
//! - `is_cache_complete`: can this evaluation replay from the cache alone?
//!
//! Both answers depend on job state and signature together, so all per-
//! pipeline state sits behind one lock and each query reads a single
//! consistent snapshot. A job finishing between the completeness check and
//! the replay that follows it can only turn an incomplete answer complete,
//! never the reverse.

use crate::cache::StreamingCache;
use crate::capture::{CaptureJob, JobHandle};
use crate::config::CaptureConfig;
use crate::logs::{CompletionProbe, StorageError};
use crate::signature::{SignatureError, SourceDescriptor, SourceSignature};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid pipeline id {0:?}: ids are used as cache directory names")]
    InvalidPipelineId(String),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Identifies one pipeline across captures and replays. Doubles as the
/// pipeline's cache directory name under the configured root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId(String);

impl PipelineId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !crate::logs::validate_path_component(&id) {
            return Err(RegistryError::InvalidPipelineId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct PipelineEntry {
    job: Option<CaptureJob>,
    signature: SourceSignature,
    cache: Option<Arc<StreamingCache>>,
}

struct RegistryInner {
    config: CaptureConfig,
    entries: Mutex<HashMap<PipelineId, PipelineEntry>>,
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<PipelineId, PipelineEntry>> {
        // A poisoned map is still structurally sound; keep serving it.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Tracks every pipeline's capture job, source signature, and cache.
#[derive(Clone)]
pub struct CaptureRegistry {
    inner: Arc<RegistryInner>,
}

impl CaptureRegistry {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Whether a fresh background capture should start for this pipeline.
    ///
    /// True when the pipeline has capturable sources and either no capture
    /// job exists, the existing job neither finished nor is still running,
    /// or the source set changed since the recorded signature was taken.
    /// Updates the recorded signature as a side effect, discarding stale
    /// captured data on a change.
    pub fn is_capture_needed(
        &self,
        id: &PipelineId,
        sources: &[SourceDescriptor],
    ) -> Result<bool> {
        if sources.is_empty() {
            return Ok(false);
        }
        let current = SourceSignature::extract(sources)?;

        let mut entries = self.inner.entries();
        let entry = entries.entry(id.clone()).or_default();

        let changed = Self::apply_signature(id, entry, current)?;
        let job_covers = entry
            .job
            .as_ref()
            .map(|job| job.is_done() || job.is_running())
            .unwrap_or(false);

        Ok(!job_covers || changed)
    }

    /// Whether the current source set differs from the recorded signature.
    /// With `update`, a detected change replaces the recorded signature and
    /// discards the stale capture.
    pub fn source_signature_changed(
        &self,
        id: &PipelineId,
        sources: &[SourceDescriptor],
        update: bool,
    ) -> Result<bool> {
        let current = SourceSignature::extract(sources)?;
        let mut entries = self.inner.entries();
        let entry = entries.entry(id.clone()).or_default();

        if !update {
            return Ok(!current.is_subset_of(&entry.signature));
        }
        Self::apply_signature(id, entry, current)
    }

    /// Whether this pipeline's cache can serve a replay on its own: the
    /// capture job ran to completion (or was ended by one of its own bounds)
    /// and the sources it captured still cover the current source set.
    ///
    /// Job state and signature are read under one lock so the answer is a
    /// consistent snapshot; the recorded signature is not updated here.
    pub fn is_cache_complete(
        &self,
        id: &PipelineId,
        sources: &[SourceDescriptor],
    ) -> Result<bool> {
        let current = SourceSignature::extract(sources)?;
        let entries = self.inner.entries();
        let Some(entry) = entries.get(id) else {
            return Ok(false);
        };
        let job_done = entry.job.as_ref().map(CaptureJob::is_done).unwrap_or(false);
        Ok(job_done && current.is_subset_of(&entry.signature))
    }

    /// Starts a bounded background capture for this pipeline and records it,
    /// replacing any previous job. The size bound polls the pipeline's own
    /// cache. Must run inside a tokio runtime.
    pub fn start_capture(&self, id: &PipelineId, handle: Arc<dyn JobHandle>) -> Result<CaptureJob> {
        let cache = self.streaming_cache(id, true)?;
        let limit = self.inner.config.capture_size_limit_bytes;
        let size_probe = Arc::new(move || cache.capture_size() >= limit);

        let job = CaptureJob::start(
            handle,
            self.inner.config.capture_duration,
            self.inner.config.size_poll_interval,
            size_probe,
        );
        self.set_capture_job(id, job.clone());
        Ok(job)
    }

    pub fn set_capture_job(&self, id: &PipelineId, job: CaptureJob) {
        let mut entries = self.inner.entries();
        entries.entry(id.clone()).or_default().job = Some(job);
    }

    pub fn capture_job(&self, id: &PipelineId) -> Option<CaptureJob> {
        let entries = self.inner.entries();
        entries.get(id).and_then(|entry| entry.job.clone())
    }

    /// Externally cancels the pipeline's capture job, if any. The job will
    /// not count as done afterwards.
    pub fn attempt_to_cancel_capture_job(&self, id: &PipelineId) {
        let job = self.capture_job(id);
        if let Some(job) = job {
            tracing::info!(pipeline = %id, "Cancelling capture job");
            job.cancel();
        }
    }

    /// The pipeline's cache, created on first request.
    ///
    /// With `has_capturable` the cache is streaming-aware: multi-tag reads
    /// tail logs until this registry reports the pipeline's capture job
    /// done. Without capturable sources reads stop at end-of-durable-data.
    /// The capability is fixed at first creation.
    pub fn streaming_cache(
        &self,
        id: &PipelineId,
        has_capturable: bool,
    ) -> Result<Arc<StreamingCache>> {
        let mut entries = self.inner.entries();
        let entry = entries.entry(id.clone()).or_default();
        if let Some(cache) = &entry.cache {
            return Ok(Arc::clone(cache));
        }

        let dir = self
            .inner
            .config
            .cache_dir
            .as_ref()
            .map(|root| root.join(id.as_str()));
        let cache = if has_capturable {
            let probe = self.completion_probe(id);
            Arc::new(StreamingCache::streaming(dir, probe)?)
        } else {
            Arc::new(StreamingCache::new(dir)?)
        };
        entry.cache = Some(Arc::clone(&cache));
        Ok(cache)
    }

    /// Discards everything known about the pipeline's capture: cancels the
    /// job, removes captured data, and clears the recorded signature. The
    /// cache handle itself stays usable for a subsequent capture.
    pub fn invalidate(&self, id: &PipelineId) -> Result<()> {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.get_mut(id) else {
            return Ok(());
        };

        if let Some(job) = &entry.job {
            job.cancel();
        }
        entry.job = None;
        if let Some(cache) = &entry.cache {
            cache.cleanup()?;
        }
        entry.signature = SourceSignature::default();

        tracing::info!(pipeline = %id, "Invalidated captured data");
        metrics::counter!("rewind_cache_invalidations_total", 1);
        Ok(())
    }

    /// Records `current` as the pipeline's signature, reporting whether it
    /// changed. Any change — including the very first detection of capturable
    /// sources — discards whatever was captured so far; on first detection the
    /// discard is a no-op but a job that predates the check is superseded.
    fn apply_signature(
        id: &PipelineId,
        entry: &mut PipelineEntry,
        current: SourceSignature,
    ) -> Result<bool> {
        if current.is_subset_of(&entry.signature) {
            return Ok(false);
        }

        if entry.signature.is_empty() {
            tracing::info!(
                pipeline = %id,
                sources = current.len(),
                "First capturable sources detected"
            );
        } else {
            let reason = if entry.signature.is_subset_of(&current) {
                "new capturable sources added"
            } else {
                "existing capturable sources mutated"
            };
            tracing::info!(pipeline = %id, reason, "Source set changed; discarding captured data");
            metrics::counter!("rewind_cache_invalidations_total", 1);
        }

        if let Some(job) = &entry.job {
            job.cancel();
        }
        entry.job = None;
        if let Some(cache) = &entry.cache {
            cache.cleanup()?;
        }
        entry.signature = current;
        Ok(true)
    }

    /// Probe handed to a streaming-aware cache: readers tailing a log keep
    /// waiting while this returns false. Holds no strong reference so a
    /// dropped registry unblocks its readers.
    fn completion_probe(&self, id: &PipelineId) -> CompletionProbe {
        let inner = Arc::downgrade(&self.inner);
        let id = id.clone();
        Arc::new(move || {
            let Some(inner) = inner.upgrade() else {
                return true;
            };
            let entries = inner.entries();
            match entries.get(&id).and_then(|entry| entry.job.as_ref()) {
                Some(job) => job.is_done() || job.state().is_terminal(),
                None => true,
            }
        })
    }
}
