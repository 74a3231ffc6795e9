//! Outbound sequence numbers and the table of requests awaiting a response.
use std::collections::HashMap;

use dapline_proto::Response;
use tokio::sync::oneshot;

use crate::error::SessionError;

/// Sender-local sequence counter: 1, 2, 3, ... never reused.
#[derive(Debug)]
pub struct SeqCounter {
    next: i64,
}

impl SeqCounter {
    /// Create a counter whose first value is 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Create a counter whose first value is `first`.
    pub fn starting_at(first: i64) -> Self {
        Self { next: first }
    }

    /// Allocate the next sequence number.
    pub fn next_seq(&mut self) -> Result<i64, SessionError> {
        let seq = self.next;
        self.next = seq.checked_add(1).ok_or(SessionError::SeqExhausted)?;
        Ok(seq)
    }

    /// The value the next call will return.
    pub fn peek(&self) -> i64 {
        self.next
    }
}

impl Default for SeqCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// An outstanding request.
#[derive(Debug)]
pub struct PendingRequestEntry {
    seq: i64,
    command: String,
    cancel_requested: bool,
    slot: oneshot::Sender<Response>,
}

impl PendingRequestEntry {
    /// Sequence number of the request.
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// Command of the request.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether a `cancel` was issued for this request.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Deliver the response to the waiter.
    ///
    /// Returns `false` when nobody is waiting any more; the response is
    /// dropped.
    pub fn complete(self, response: Response) -> bool {
        if self.slot.send(response).is_err() {
            tracing::warn!(
                "dropping late response for `{}` (seq {})",
                self.command,
                self.seq
            );
            return false;
        }
        true
    }
}

/// Requests sent by this endpoint that still await a response.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<i64, PendingRequestEntry>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outstanding request and return its completion receiver.
    pub fn register(
        &mut self,
        seq: i64,
        command: impl Into<String>,
    ) -> Result<oneshot::Receiver<Response>, SessionError> {
        if self.pending.contains_key(&seq) {
            return Err(SessionError::DuplicateSeq(seq));
        }
        let (slot, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingRequestEntry {
                seq,
                command: command.into(),
                cancel_requested: false,
                slot,
            },
        );
        Ok(rx)
    }

    /// Remove and return the entry a response refers to.
    pub fn resolve(&mut self, request_seq: i64) -> Result<PendingRequestEntry, SessionError> {
        self.pending
            .remove(&request_seq)
            .ok_or(SessionError::UnknownRequestSeq(request_seq))
    }

    /// Mark an entry cancellation-requested. The entry stays until its
    /// own response arrives.
    pub fn cancel_pending(&mut self, request_id: i64) -> Result<(), SessionError> {
        let entry = self
            .pending
            .get_mut(&request_id)
            .ok_or(SessionError::UnknownRequestSeq(request_id))?;
        entry.cancel_requested = true;
        Ok(())
    }

    /// Remove an entry whose request never made it onto the wire.
    pub fn forget(&mut self, seq: i64) -> Option<PendingRequestEntry> {
        self.pending.remove(&seq)
    }

    /// Whether `seq` is still awaiting a response.
    pub fn is_pending(&self, seq: i64) -> bool {
        self.pending.contains_key(&seq)
    }

    /// Whether a cancel was requested for `seq`.
    pub fn is_cancel_requested(&self, seq: i64) -> bool {
        self.pending
            .get(&seq)
            .is_some_and(PendingRequestEntry::cancel_requested)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove every entry. Dropping them wakes each waiter with a closed
    /// channel.
    pub fn drain(&mut self) -> Vec<PendingRequestEntry> {
        self.pending.drain().map(|(_, entry)| entry).collect()
    }
}
