//! Background thread with cooperative cancellation.
//!
//! A worker loop receives a [`CancelToken`] and must check it on every
//! iteration. [`WorkerHandle::stop`] raises the flag, wakes the queues the
//! worker may be parked on, and joins the thread. There is no timeout on the
//! join: a worker blocked inside a single file operation is waited for.

use crate::error::{RecorderError, RecorderResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Cancellation flag shared between a worker and its handle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owner of one running worker thread.
pub struct WorkerHandle {
    name: &'static str,
    cancel: CancelToken,
    wake: Option<Box<dyn Fn() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl WorkerHandle {
    /// Spawn `body` on a named thread.
    ///
    /// `wake` is called after the cancel flag is raised so a worker waiting on
    /// a condition variable notices promptly.
    pub fn spawn<F, W>(name: &'static str, wake: W, body: F) -> RecorderResult<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
        W: Fn() + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(token))
            .map_err(|e| RecorderError::Allocation(format!("failed to spawn {name}: {e}")))?;
        debug!(worker = name, "Worker started");
        Ok(Self {
            name,
            cancel,
            wake: Some(Box::new(wake)),
            thread: Some(thread),
        })
    }

    /// Worker name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True if the thread has returned (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and join. Safe to call more than once.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        if let Some(wake) = self.wake.take() {
            wake();
        }
        if thread.join().is_err() {
            error!(worker = self.name, "Worker thread panicked");
        } else {
            debug!(worker = self.name, "Worker stopped");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
