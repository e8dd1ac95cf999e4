//! # Per-attempt call context.
//!
//! [`RpcController`] carries the mutable state of one attempt of a retryable
//! command: the attempt deadline and the recorded outcome. The retrier arms it
//! through [`Retrier::prepare_controller`](crate::Retrier::prepare_controller)
//! before an attempt and clears it with [`RpcController::reset`] before the
//! next one; the transport layer records the attempt outcome into it.

use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{RemoteErrorCode, Status};

/// Mutable context of a single RPC attempt.
pub struct RpcController {
    inner: Mutex<ControllerState>,
}

struct ControllerState {
    deadline: Option<Instant>,
    outcome: Status,
}

impl RpcController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControllerState {
                deadline: None,
                outcome: Ok(()),
            }),
        }
    }

    /// Outcome of the most recent attempt; OK until an outcome is recorded.
    pub fn status(&self) -> Status {
        self.inner.lock().outcome.clone()
    }

    /// Structured code of the remote error response, if the recorded outcome
    /// is a remote error.
    pub fn error_response(&self) -> Option<RemoteErrorCode> {
        self.inner.lock().outcome.as_ref().err().and_then(|e| e.remote_code())
    }

    /// Records the outcome of the attempt in flight.
    pub fn record(&self, outcome: Status) {
        self.inner.lock().outcome = outcome;
    }

    /// Sets the absolute deadline for the attempt in flight.
    pub fn set_deadline(&self, deadline: Instant) {
        self.inner.lock().deadline = Some(deadline);
    }

    /// Absolute deadline of the attempt in flight, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.lock().deadline
    }

    /// Clears the recorded outcome and deadline before the next attempt.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.outcome = Ok(());
        inner.deadline = None;
    }
}

impl Default for RpcController {
    fn default() -> Self {
        Self::new()
    }
}
