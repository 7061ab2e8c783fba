// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Capture Job Controller
//!
//! A background capture of an unbounded source never finishes on its own, so
//! the controller bounds it two ways: a wall-clock timer fires once after the
//! configured capture duration, and a polling checker watches the accumulated
//! capture size against its limit. Either watcher cancels the job exactly
//! once, and the cancellation is *attributed*: a capture ended by its own
//! watchers counts as done and its cache stays usable, while a capture
//! cancelled externally (invalidation) does not.
//!
//! The watchers are two tokio tasks sharing a [`CancellationToken`]; the
//! token both stops a pending timer and tells the checker the timer is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Execution-engine job states, as reported by the engine's handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Updating,
    Done,
    Cancelling,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Cancelled | JobState::Failed)
    }
}

#[derive(Error, Debug)]
pub enum CancelError {
    #[error("Cancellation is not supported by this execution engine")]
    Unsupported,

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Handle onto a job owned by the pipeline-execution engine.
pub trait JobHandle: Send + Sync + 'static {
    fn state(&self) -> JobState;

    /// May fail with [`CancelError::Unsupported`]; the controller tolerates
    /// that and relies on the remaining watcher.
    fn cancel(&self) -> Result<(), CancelError>;
}

/// Reports whether the accumulated capture size exceeded its limit.
pub type SizeProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// State machine over one background capture job.
#[derive(Clone)]
pub struct CaptureJob {
    handle: Arc<dyn JobHandle>,
    timer_triggered: Arc<AtomicBool>,
    checker_triggered: Arc<AtomicBool>,
    timer_token: CancellationToken,
}

impl CaptureJob {
    /// Wraps `handle` and starts both watchers. Must run inside a tokio
    /// runtime.
    pub fn start(
        handle: Arc<dyn JobHandle>,
        capture_duration: Duration,
        size_poll_interval: Duration,
        size_probe: SizeProbe,
    ) -> Self {
        let job = Self {
            handle,
            timer_triggered: Arc::new(AtomicBool::new(false)),
            checker_triggered: Arc::new(AtomicBool::new(false)),
            timer_token: CancellationToken::new(),
        };

        job.spawn_timer(capture_duration);
        job.spawn_size_checker(size_poll_interval, size_probe);
        job
    }

    /// Wraps `handle` without watchers; the job is only ever ended by
    /// natural completion or an external `cancel`.
    pub fn unbounded(handle: Arc<dyn JobHandle>) -> Self {
        Self {
            handle,
            timer_triggered: Arc::new(AtomicBool::new(false)),
            checker_triggered: Arc::new(AtomicBool::new(false)),
            timer_token: CancellationToken::new(),
        }
    }

    fn spawn_timer(&self, capture_duration: Duration) {
        let handle = Arc::clone(&self.handle);
        let timer_triggered = Arc::clone(&self.timer_triggered);
        let token = self.timer_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(capture_duration) => {
                    tracing::info!("Capture duration elapsed; cancelling capture job");
                    timer_triggered.store(true, Ordering::SeqCst);
                    request_cancel(&*handle);
                    // Tells the size checker the timer is gone.
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
    }

    fn spawn_size_checker(&self, poll_interval: Duration, size_probe: SizeProbe) {
        let handle = Arc::clone(&self.handle);
        let timer_triggered = Arc::clone(&self.timer_triggered);
        let checker_triggered = Arc::clone(&self.checker_triggered);
        let token = self.timer_token.clone();
        tokio::spawn(async move {
            loop {
                if size_probe() {
                    tracing::info!("Capture size limit reached; cancelling capture job");
                    checker_triggered.store(true, Ordering::SeqCst);
                    request_cancel(&*handle);
                    // Size-limit cancellation is not the timer's doing.
                    timer_triggered.store(false, Ordering::SeqCst);
                    token.cancel();
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    /// Explicit invalidation path. Cancels the job, stops a pending timer,
    /// and clears the timer attribution so this cancellation is not mistaken
    /// for a successful bounded capture. Idempotent.
    pub fn cancel(&self) {
        request_cancel(&*self.handle);
        self.timer_triggered.store(false, Ordering::SeqCst);
        self.timer_token.cancel();
    }

    /// True when the job completed naturally, or when it is being (or has
    /// been) cancelled and one of the two watchers triggered that
    /// cancellation.
    pub fn is_done(&self) -> bool {
        let state = self.handle.state();
        if state == JobState::Done {
            return true;
        }
        let watcher_triggered = self.timer_triggered.load(Ordering::SeqCst)
            || self.checker_triggered.load(Ordering::SeqCst);
        watcher_triggered && matches!(state, JobState::Cancelling | JobState::Cancelled)
    }

    pub fn is_running(&self) -> bool {
        self.handle.state() == JobState::Running
    }

    pub fn state(&self) -> JobState {
        self.handle.state()
    }
}

/// Requests engine cancellation of a non-terminal job. An engine that does
/// not support mid-flight cancellation is tolerated: the job then ends via
/// whichever bound fires on the engine side.
fn request_cancel(handle: &dyn JobHandle) {
    if handle.state().is_terminal() {
        return;
    }
    match handle.cancel() {
        Ok(()) => {}
        Err(CancelError::Unsupported) => {
            tracing::warn!("Execution engine does not support cancellation; ignoring");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Capture job cancellation failed");
        }
    }
}
