// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::path::PathBuf;
use std::time::Duration;

/// Knobs bounding a background capture and locating its cache.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Wall-clock bound on a capture job.
    pub capture_duration: Duration,
    /// Total on-disk size bound across a pipeline's logs.
    pub capture_size_limit_bytes: u64,
    /// How often the size-limit checker polls.
    pub size_poll_interval: Duration,
    /// Root directory for per-pipeline caches; a temp dir per pipeline when
    /// unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_duration: Duration::from_secs(60),
            capture_size_limit_bytes: 1_000_000_000,
            size_poll_interval: Duration::from_secs(5),
            cache_dir: None,
        }
    }
}
