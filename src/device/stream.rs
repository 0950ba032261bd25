//! Ordered command stream.
//!
//! All transfers and compute for one runtime are enqueued here in
//! submission order. Queuing never blocks; `synchronize` drains the queue
//! FIFO and is the single blocking point of a `run()` call. Any failure of
//! a queued operation surfaces at synchronization, after which the
//! remaining queue is discarded.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{ForgeResult, GraphForgeError};

type StreamOp = Box<dyn FnOnce() -> ForgeResult<()> + Send>;

/// FIFO ordering handle for asynchronous operations.
///
/// One stream per runtime instance; streams of different runtimes are
/// fully independent.
pub struct Stream {
    queue: Mutex<VecDeque<StreamOp>>,
}

impl Stream {
    pub fn new() -> Self {
        tracing::debug!("Stream::new: creating command stream");
        Stream {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue an operation. Never blocks the caller.
    pub fn enqueue(&self, op: StreamOp) -> ForgeResult<()> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|e| GraphForgeError::Internal(format!("stream queue poisoned: {}", e)))?;
        queue.push_back(op);
        Ok(())
    }

    /// Number of operations currently queued
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Execute all queued operations in submission order and block until
    /// they complete. On failure the rest of the queue is dropped and the
    /// error is reported to the caller.
    pub fn synchronize(&self) -> ForgeResult<()> {
        loop {
            let op = {
                let mut queue = self.queue.lock().map_err(|e| {
                    GraphForgeError::Internal(format!("stream queue poisoned: {}", e))
                })?;
                match queue.pop_front() {
                    Some(op) => op,
                    None => return Ok(()),
                }
            };
            if let Err(e) = op() {
                tracing::error!("Stream::synchronize: queued operation failed: {}", e);
                if let Ok(mut queue) = self.queue.lock() {
                    queue.clear();
                }
                return Err(e);
            }
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("pending", &self.pending())
            .finish()
    }
}
