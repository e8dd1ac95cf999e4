//! # Registry of outstanding RPC commands.
//!
//! [`Rpcs`] tracks every live command so the process can shut down in order:
//! abort everything, then wait for the calls to drain within a bounded grace
//! period.
//!
//! ## Architecture
//! ```text
//! caller ──register/register_and_start──► Rpcs ──holds──► [RpcCommandPtr]
//!            ▲                             │
//!            │ unregister (on finished)    │ abort / shutdown
//!            └─────────────────────────────┘
//! ```
//!
//! ## Rules
//! - The calls list is mutated only under the registry mutex; the mutex may
//!   be shared with a larger subsystem (see [`Rpcs::with_mutex`]).
//! - Every unregister signals the drain condition.
//! - After [`Rpcs::shutdown`] no new command is accepted; late registrations
//!   are aborted and handed back [`Handle::INVALID`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tracing::info;

use crate::bus::Bus;
use crate::command::{RpcCommand, RpcCommandPtr};
use crate::config::Config;
use crate::event::{Event, EventKind};

/// Opaque cursor identifying a command's slot in the registry.
///
/// A handle stays valid across unrelated registrations and removals until its
/// own [`Rpcs::unregister`] returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handle(u64);

impl Handle {
    /// The "not registered" sentinel.
    pub const INVALID: Handle = Handle(0);

    pub fn is_valid(self) -> bool {
        self != Handle::INVALID
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::INVALID
    }
}

/// The mutex-protected state of a registry: the ordered calls list plus the
/// shutdown flag.
///
/// Exposed so embedders can share the registry mutex with their own
/// transitions via [`Rpcs::with_mutex`].
#[derive(Default)]
pub struct Calls {
    entries: BTreeMap<u64, Option<RpcCommandPtr>>,
    next_id: u64,
    shutdown: bool,
}

impl Calls {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    fn insert(&mut self, call: Option<RpcCommandPtr>) -> Handle {
        self.next_id += 1;
        self.entries.insert(self.next_id, call);
        Handle(self.next_id)
    }

    fn remove(&mut self, handle: Handle) -> Option<RpcCommandPtr> {
        self.entries.remove(&handle.0).flatten()
    }

    fn get(&self, handle: Handle) -> Option<RpcCommandPtr> {
        self.entries.get(&handle.0).cloned().flatten()
    }

    fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle.0)
    }

    fn fill(&mut self, handle: Handle, call: RpcCommandPtr) {
        if let Some(slot) = self.entries.get_mut(&handle.0) {
            *slot = Some(call);
        }
    }

    /// Snapshot of the registered commands, in registration order.
    fn live(&self) -> Vec<RpcCommandPtr> {
        self.entries.values().filter_map(|slot| slot.clone()).collect()
    }

    fn names(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|slot| match slot {
                Some(call) => call.to_string(),
                None => "<placeholder>".to_string(),
            })
            .collect()
    }
}

/// Registry of live RPC commands with orderly-shutdown support.
#[derive(Clone)]
pub struct Rpcs {
    calls: Arc<Mutex<Calls>>,
    cond: Arc<Notify>,
    cfg: Config,
    bus: Bus,
}

impl Rpcs {
    /// Creates a registry owning its mutex.
    pub fn new(cfg: Config) -> Self {
        Self::with_mutex(cfg, Arc::new(Mutex::new(Calls::default())))
    }

    /// Creates a registry over a caller-supplied mutex.
    ///
    /// Embedders keeping a clone of the `Arc` can lock it around their own
    /// compound transitions, serializing them with every registry operation.
    pub fn with_mutex(cfg: Config, calls: Arc<Mutex<Calls>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        Self {
            calls,
            cond: Arc::new(Notify::new()),
            cfg,
            bus,
        }
    }

    /// The lifecycle event bus of this registry.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Registers a command and returns its handle.
    ///
    /// After shutdown the command is aborted instead and
    /// [`Handle::INVALID`] is returned.
    pub async fn register(&self, call: RpcCommandPtr) -> Handle {
        let handle = {
            let mut calls = self.calls.lock().await;
            if calls.shutdown {
                Handle::INVALID
            } else {
                calls.insert(Some(call.clone()))
            }
        };
        if handle.is_valid() {
            self.bus.publish(Event::now(EventKind::CallRegistered {
                call: call.to_string(),
            }));
        } else {
            self.bus.publish(Event::now(EventKind::CallAborted {
                call: call.to_string(),
            }));
            call.abort().await;
        }
        handle
    }

    /// Registers `call` into `handle` unless the handle is already valid.
    pub async fn register_into(&self, call: RpcCommandPtr, handle: &mut Handle) {
        if !handle.is_valid() {
            *handle = self.register(call).await;
        }
    }

    /// Registers a command and starts it outside the mutex.
    ///
    /// No command is started after shutdown: a rejected registration leaves
    /// the handle invalid and the command aborted.
    pub async fn register_and_start(&self, call: RpcCommandPtr, handle: &mut Handle) {
        assert!(
            !handle.is_valid(),
            "register_and_start requires an unregistered handle"
        );
        self.register_into(call.clone(), handle).await;
        if handle.is_valid() {
            call.send().await;
        }
    }

    /// Appends a placeholder slot, to be filled with [`Rpcs::assign`] before
    /// the command starts.
    ///
    /// Returns [`Handle::INVALID`] after shutdown.
    pub async fn prepare(&self) -> Handle {
        let mut calls = self.calls.lock().await;
        if calls.shutdown {
            Handle::INVALID
        } else {
            calls.insert(None)
        }
    }

    /// Fills a slot obtained from [`Rpcs::prepare`].
    pub async fn assign(&self, handle: Handle, call: RpcCommandPtr) {
        let mut calls = self.calls.lock().await;
        calls.fill(handle, call);
    }

    /// Looks up the command a handle refers to.
    pub async fn get(&self, handle: Handle) -> Option<RpcCommandPtr> {
        let calls = self.calls.lock().await;
        calls.get(handle)
    }

    /// Removes a command, signals the drain condition, and invalidates the
    /// handle.
    ///
    /// Returns `None` (with no state change) for an invalid handle.
    pub async fn unregister(&self, handle: &mut Handle) -> Option<RpcCommandPtr> {
        if !handle.is_valid() {
            return None;
        }
        let removed = {
            let mut calls = self.calls.lock().await;
            calls.remove(*handle)
        };
        self.cond.notify_waiters();
        *handle = Handle::INVALID;
        if let Some(call) = &removed {
            self.bus.publish(Event::now(EventKind::CallUnregistered {
                call: call.to_string(),
            }));
        }
        removed
    }

    /// Aborts the listed commands and waits until every listed handle has
    /// been unregistered by its completion path.
    pub async fn abort(&self, handles: &[Handle]) {
        let to_abort: Vec<RpcCommandPtr> = {
            let calls = self.calls.lock().await;
            handles.iter().filter_map(|h| calls.get(*h)).collect()
        };
        if to_abort.is_empty() {
            return;
        }
        for call in &to_abort {
            self.bus.publish(Event::now(EventKind::CallAborted {
                call: call.to_string(),
            }));
            call.abort().await;
        }
        loop {
            let notified = self.cond.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let calls = self.calls.lock().await;
                if handles.iter().all(|h| !calls.contains(*h)) {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Aborts every registered command without entering shutdown.
    pub async fn request_abort_all(&self) {
        self.do_request_abort_all(false).await;
    }

    /// Stops accepting commands, aborts the outstanding ones, and waits for
    /// the registry to drain.
    ///
    /// The drain deadline is the shutdown grace extended past the deadline of
    /// the slowest outstanding call. A second call is a no-op beyond waiting.
    ///
    /// # Panics
    ///
    /// Panics when calls are still registered once the drain deadline
    /// elapses; a command that never unregisters is a programming error.
    pub async fn shutdown(&self) {
        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        let deadline = self.do_request_abort_all(true).await;
        if self.wait_drained(deadline).await {
            self.bus.publish(Event::now(EventKind::DrainCompleted));
            return;
        }
        let remaining = {
            let calls = self.calls.lock().await;
            calls.names()
        };
        self.bus.publish(Event::now(EventKind::DrainTimedOut {
            outstanding: remaining.len(),
        }));
        assert!(
            remaining.is_empty(),
            "rpc registry failed to drain before its deadline: {remaining:?}"
        );
    }

    /// Aborts every registered command; returns the drain deadline.
    async fn do_request_abort_all(&self, request_shutdown: bool) -> Instant {
        let snapshot: Vec<RpcCommandPtr> = {
            let mut calls = self.calls.lock().await;
            if calls.shutdown {
                Vec::new()
            } else {
                calls.shutdown = request_shutdown;
                calls.live()
            }
        };
        let mut deadline = Instant::now() + self.cfg.shutdown_timeout;
        for call in snapshot {
            self.bus.publish(Event::now(EventKind::CallAborted {
                call: call.to_string(),
            }));
            call.abort().await;
            // Completing a command takes a while past its own deadline; allow
            // for that.
            deadline = deadline.max(call.deadline() + self.cfg.shutdown_extra_delay);
        }
        deadline
    }

    async fn wait_drained(&self, deadline: Instant) -> bool {
        let deadline = tokio::time::Instant::from_std(deadline);
        loop {
            let notified = self.cond.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let calls = self.calls.lock().await;
                if calls.is_empty() {
                    return true;
                }
                info!(outstanding = calls.len(), "waiting for rpc calls to drain");
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.calls.lock().await.is_empty();
            }
        }
    }
}
