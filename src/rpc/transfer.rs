//! Chunked transfer state machine.
//!
//! ```text
//!            start_upload / start_run
//!   ┌──────┐ ─────────────────────────▶ ┌────────────────────────┐
//!   │ Idle │                            │ AwaitingChunks(kind)   │──┐ chunk
//!   └──────┘ ◀───────────────────────── └────────────────────────┘◀─┘ (PROGRESS)
//!        complete (size reached / END), abort, disconnect
//! ```
//!
//! `expected_size` is advisory: it drives the progress figure and the
//! completion threshold, never allocation. The only allocation bound is
//! `max_bytes`, past which the transfer is aborted.

use crate::error::ProtocolError;

/// What happens to the bytes once the transfer completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    /// Persist verbatim under `target`.
    UploadToStorage { target: String },
    /// Hand to the execution supervisor as program text.
    UploadToExecute,
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// More bytes expected.
    Progress(Progress),
    /// The transfer finished; the state machine is already Idle.
    Complete(CompletedTransfer),
}

/// Progress figures reported after a non-terminal chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub received: usize,
    pub total: usize,
    /// 0 when `total` is 0.
    pub percent: f64,
}

/// A finished transfer, detached from the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub kind: TransferKind,
    pub data: Vec<u8>,
}

/// At most one in-flight transfer per session.
#[derive(Debug)]
pub struct TransferState {
    kind: Option<TransferKind>,
    buffer: Vec<u8>,
    expected_size: usize,
    max_bytes: usize,
}

impl TransferState {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            kind: None,
            buffer: Vec::new(),
            expected_size: 0,
            max_bytes,
        }
    }

    pub fn is_active(&self) -> bool {
        self.kind.is_some()
    }

    pub fn kind(&self) -> Option<&TransferKind> {
        self.kind.as_ref()
    }

    /// Bytes accumulated so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    /// Open a transfer, discarding any previous one.
    pub fn begin(&mut self, kind: TransferKind, expected_size: usize) {
        self.buffer.clear();
        self.kind = Some(kind);
        self.expected_size = expected_size;
    }

    /// Append one chunk.
    ///
    /// Completes once the buffer reaches `expected_size`; an overshooting
    /// chunk is kept whole. Exceeding `max_bytes` aborts the transfer.
    pub fn append(&mut self, chunk: &[u8]) -> Result<ChunkOutcome, ProtocolError> {
        if self.kind.is_none() {
            return Err(ProtocolError::NotReceiving);
        }
        if self.buffer.len() + chunk.len() > self.max_bytes {
            self.reset();
            return Err(ProtocolError::TransferTooLarge {
                limit: self.max_bytes,
            });
        }

        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() >= self.expected_size {
            return self.finish().map(ChunkOutcome::Complete);
        }

        Ok(ChunkOutcome::Progress(Progress {
            received: self.buffer.len(),
            total: self.expected_size,
            percent: progress_percent(self.buffer.len(), self.expected_size),
        }))
    }

    /// Close the transfer now (explicit end marker) and hand back its bytes.
    pub fn finish(&mut self) -> Result<CompletedTransfer, ProtocolError> {
        let kind = self.kind.take().ok_or(ProtocolError::NotReceiving)?;
        let data = core::mem::take(&mut self.buffer);
        self.expected_size = 0;
        Ok(CompletedTransfer { kind, data })
    }

    /// Abandon any transfer. Idempotent.
    pub fn reset(&mut self) {
        self.kind = None;
        self.buffer = Vec::new();
        self.expected_size = 0;
    }
}

/// `received / total * 100`, unrounded; 0 when `total` is 0.
pub fn progress_percent(received: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    received as f64 * 100.0 / total as f64
}
