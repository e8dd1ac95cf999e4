//! # Status taxonomy for retryable RPC commands.
//!
//! This module defines the outcome types flowing through the retry core:
//!
//! - [`RpcError`] the non-OK half of the taxonomy (remote errors, timeouts,
//!   aborts, illegal retry requests).
//! - [`Status`] an alias for `Result<(), RpcError>`; `Ok(())` is the OK status.
//! - [`RemoteErrorCode`] the structured code carried by a remote error
//!   response.
//!
//! [`RpcError`] provides a helper method `as_label` for metrics and
//! `is_timed_out()` / `is_service_unavailable()` / `is_aborted()` predicates
//! used by the retrier when classifying outcomes.

use thiserror::Error;

/// Outcome of an RPC attempt or of a retry-core operation.
///
/// `Ok(())` means the attempt (or operation) succeeded.
pub type Status = Result<(), RpcError>;

/// Structured error code reported by the remote side of a call.
///
/// Only [`RemoteErrorCode::ServerTooBusy`] participates in transparent
/// busy-retry; the remaining codes are surfaced to the caller verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteErrorCode {
    /// The server rejected the call because it is overloaded.
    ServerTooBusy,
    /// The remote application layer reported a failure.
    ApplicationError,
    /// The server is going away and will not serve this call.
    ServerShuttingDown,
}

/// # Errors produced by RPC attempts and the retry core.
///
/// Remote errors carry a [`RemoteErrorCode`]; the other variants are produced
/// locally while driving a command through its attempts.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The remote side answered with a structured error response.
    #[error("remote error ({code:?}): {message}")]
    Remote {
        /// Structured code from the error response.
        code: RemoteErrorCode,
        /// Human-readable detail from the error response.
        message: String,
    },

    /// The attempt (or the whole command) ran past its deadline.
    #[error("timed out: {reason}")]
    TimedOut { reason: String },

    /// The scheduling service is gone (reactor shut down).
    #[error("service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    /// The command was aborted before it could complete.
    ///
    /// This is **not an error** in the traditional sense, it signals
    /// intentional termination.
    #[error("aborted: {reason}")]
    Aborted { reason: String },

    /// A retry was requested from a state that cannot accept one.
    #[error("illegal state: {reason}")]
    IllegalState { reason: String },
}

impl RpcError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RpcError::Remote { .. } => "rpc_remote_error",
            RpcError::TimedOut { .. } => "rpc_timed_out",
            RpcError::ServiceUnavailable { .. } => "rpc_service_unavailable",
            RpcError::Aborted { .. } => "rpc_aborted",
            RpcError::IllegalState { .. } => "rpc_illegal_state",
        }
    }

    /// Indicates whether this error is a timeout.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, RpcError::TimedOut { .. })
    }

    /// Indicates whether this error means the scheduling service is gone.
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, RpcError::ServiceUnavailable { .. })
    }

    /// Indicates whether the command was intentionally aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RpcError::Aborted { .. })
    }

    /// Returns the structured code if this is a remote error.
    pub fn remote_code(&self) -> Option<RemoteErrorCode> {
        match self {
            RpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}
