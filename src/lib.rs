//! # rpcvisor
//!
//! **Rpcvisor** is the client-side retry and in-flight tracking core of an
//! RPC subsystem.
//!
//! It drives a logical RPC command through its attempts (arming a
//! per-attempt deadline, classifying the outcome, backing off with jitter,
//! rescheduling on a reactor timer) and keeps a registry of every live
//! command so shutdown can abort and drain them in bounded time.
//!
//! ## Features
//!
//! | Area            | Description                                                       | Key types / traits                  |
//! |-----------------|-------------------------------------------------------------------|-------------------------------------|
//! | **Retrying**    | Per-command state machine with exponential/linear jittered backoff. | [`Retrier`], [`BackoffStrategy`]   |
//! | **Commands**    | The polymorphic operation being driven; shared ownership.         | [`RpcCommand`], [`RetryableRpc`]    |
//! | **Tracking**    | Registry of live commands: abort-one, abort-all, drain at shutdown. | [`Rpcs`], [`Handle`]              |
//! | **Scheduling**  | Deferred execution seam plus a tokio-backed implementation.       | [`Messenger`], [`Reactor`]          |
//! | **Observability** | Lifecycle events broadcast to observers.                        | [`Bus`], [`Event`], [`Observer`]    |
//! | **Errors**      | Status taxonomy for attempts and core operations.                 | [`RpcError`], [`Status`]            |
//! | **Configuration** | Centralized knobs with environment overrides.                   | [`Config`]                          |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`TracingObserver`] _(demo/reference only)_.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rpcvisor::{Config, Reactor, Rpcs};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let cfg = Config::from_env();
//!     let reactor = Arc::new(Reactor::new());
//!     let rpcs = Rpcs::new(cfg.clone());
//!
//!     // Commands implement RpcCommand/RetryableRpc and embed a Retrier
//!     // built from `cfg`, `reactor`, and `rpcs.bus()`; they are started
//!     // through `rpcs.register_and_start(..)` and unregister themselves
//!     // when finished.
//!
//!     rpcs.shutdown().await;
//!     reactor.shutdown();
//! }
//! ```
//!
//! ---

mod bus;
mod command;
mod config;
mod controller;
mod error;
mod event;
mod messenger;
mod observer;
mod reactor;
mod registry;
mod retrier;

// ---- Public re-exports ----

pub use bus::Bus;
pub use command::{RetryableRpc, RpcCommand, RpcCommandPtr};
pub use config::Config;
pub use controller::RpcController;
pub use error::{RemoteErrorCode, RpcError, Status};
pub use event::{Event, EventKind};
pub use messenger::{INVALID_TASK_ID, Messenger, RetryTask, TaskId};
pub use observer::{Observer, spawn_observer};
pub use reactor::Reactor;
pub use registry::{Calls, Handle, Rpcs};
pub use retrier::{BackoffStrategy, Retrier, RetrierState};

// Optional: expose a simple built-in tracing observer (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use observer::TracingObserver;
