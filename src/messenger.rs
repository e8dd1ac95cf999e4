//! # Deferred-execution seam between the retry core and the event loop.
//!
//! The retrier never sleeps between attempts itself; it hands a closure and a
//! delay to a [`Messenger`] and reacts when the closure fires. The crate ships
//! a tokio-backed implementation ([`Reactor`](crate::Reactor)); embedders with
//! their own event loop implement the trait instead.
//!
//! ## Contract
//!
//! - [`Messenger::schedule_on_reactor`] either accepts the task and returns a
//!   non-sentinel [`TaskId`], or refuses (e.g. while shutting down) and
//!   returns [`INVALID_TASK_ID`].
//! - An accepted task is invoked **exactly once**: with `Ok(())` when the
//!   delay elapses, or earlier with a non-OK status when it is aborted or the
//!   messenger shuts down.
//! - [`Messenger::abort_on_reactor`] requests cancellation; if the task has
//!   not fired yet it must eventually fire with a non-OK status.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Status;

/// Identifier of a scheduled delayed task.
pub type TaskId = u64;

/// Sentinel meaning "no task outstanding" / "scheduling refused".
pub const INVALID_TASK_ID: TaskId = 0;

/// Deferred closure handed to the messenger; receives the scheduling status.
pub type RetryTask = Box<dyn FnOnce(Status) -> BoxFuture<'static, ()> + Send>;

/// Scheduling service that runs closures after a delay on its own workers.
pub trait Messenger: Send + Sync + 'static {
    /// Schedules `task` to run after `delay`.
    ///
    /// Returns [`INVALID_TASK_ID`] when the messenger refuses the task.
    fn schedule_on_reactor(&self, task: RetryTask, delay: Duration) -> TaskId;

    /// Requests cancellation of a previously scheduled task.
    ///
    /// Unknown or already-fired ids are ignored.
    fn abort_on_reactor(&self, task_id: TaskId);
}
