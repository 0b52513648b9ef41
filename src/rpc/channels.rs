//! Worker → session response channel.
//!
//! Uses an `embassy-sync` bounded channel to bridge the program worker
//! with the synchronous session loop. The worker pushes `OUTPUT` and
//! terminal events; the session loop drains them and is the only writer
//! to its transport, so frames never interleave mid-transmission.
//!
//! ```text
//! ┌──────────────┐  Response   ┌──────────────┐  bytes  ┌───────────┐
//! │ Program      │────────────▶│ Session loop │────────▶│ Transport │
//! │ worker       │             │  (sync)      │         │           │
//! └──────────────┘             └──────────────┘         └───────────┘
//! ```

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::app::events::Response;

/// Channel depth for worker responses.
pub const RESP_DEPTH: usize = 16;

type ResponseChannel = Channel<CriticalSectionRawMutex, Response, RESP_DEPTH>;

/// Cloneable handle to one session's outbound queue.
#[derive(Clone)]
pub struct ResponseQueue {
    inner: Arc<ResponseChannel>,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Channel::new()),
        }
    }

    /// Enqueue from the worker, waiting for room if the session loop is
    /// behind. Program output is never dropped while the loop runs.
    pub fn push_blocking(&self, response: Response) {
        futures_lite::future::block_on(self.inner.send(response));
    }

    /// Enqueue without waiting. Returns `false` if the queue is full.
    pub fn try_push(&self, response: Response) -> bool {
        self.inner.try_send(response).is_ok()
    }

    /// Next pending response, if any.
    pub fn try_pop(&self) -> Option<Response> {
        self.inner.try_receive().ok()
    }

    /// Discard everything pending. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.inner.try_receive().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for ResponseQueue {
    fn default() -> Self {
        Self::new()
    }
}
