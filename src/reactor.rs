//! # Tokio-backed [`Messenger`] implementation.
//!
//! [`Reactor`] runs each accepted task on the tokio runtime it was scheduled
//! from: a timer task per closure, cancellable individually (via
//! [`Messenger::abort_on_reactor`]) or collectively (via
//! [`Reactor::shutdown`]).
//!
//! ```text
//!  schedule_on_reactor(task, delay)
//!          │  insert(id → token)
//!          ▼
//!   ┌────────────────┐   delay elapsed   → task(Ok(()))
//!   │  spawned timer │   token cancelled → task(Err(Aborted))
//!   └────────────────┘   reactor down    → task(Err(ServiceUnavailable))
//! ```
//!
//! Scheduling requires a current tokio runtime; a `Reactor` is expected to be
//! created and driven from within one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::messenger::{INVALID_TASK_ID, Messenger, RetryTask, TaskId};

/// Timer service executing delayed retry closures on the tokio runtime.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: DashMap<TaskId, CancellationToken>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                next_id: AtomicU64::new(INVALID_TASK_ID + 1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Stops accepting tasks and fires every pending one with
    /// `ServiceUnavailable`.
    ///
    /// Pending closures run on their own spawned tasks; this method does not
    /// wait for them.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of tasks scheduled and not yet fired.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.len()
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Messenger for Reactor {
    fn schedule_on_reactor(&self, task: RetryTask, delay: Duration) -> TaskId {
        if self.inner.shutdown.is_cancelled() {
            return INVALID_TASK_ID;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.inner.tasks.insert(id, token.clone());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let status = tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => Err(RpcError::ServiceUnavailable {
                    reason: "reactor is shutting down".into(),
                }),
                _ = token.cancelled() => Err(RpcError::Aborted {
                    reason: "delayed task aborted".into(),
                }),
                _ = time::sleep(delay) => Ok(()),
            };
            inner.tasks.remove(&id);
            task(status).await;
        });
        id
    }

    fn abort_on_reactor(&self, task_id: TaskId) {
        if let Some(entry) = self.inner.tasks.get(&task_id) {
            entry.value().cancel();
        }
    }
}
