//! # Example: retry_with_backoff
//!
//! Demonstrates how a retryable command rides out a busy server: the first
//! two attempts come back `ServerTooBusy`, the retrier backs off with jitter
//! and reschedules on the reactor, and the third attempt succeeds.
//!
//! ## Flow
//! ```text
//! prepare() → assign(call) → send()
//!   ├─► attempt 1 → busy
//!   ├─► handle_response → RetryScheduled{delay≈16ms}
//!   ├─► timer fires → send() → attempt 2 → busy
//!   ├─► handle_response → RetryScheduled{delay≈32ms}
//!   ├─► timer fires → send() → attempt 3 → Ok
//!   ├─► finished(Ok) → unregister
//!   └─► shutdown() drains instantly
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example retry_with_backoff --features logging
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use rpcvisor::{
    Config, Handle, Reactor, RemoteErrorCode, Retrier, RetryableRpc, RpcCommand, RpcError, Rpcs,
    Status, TracingObserver, spawn_observer,
};

/// A call that is rejected as busy twice before going through.
struct FlakyCall {
    retrier: Retrier,
    deadline: Instant,
    rpcs: Rpcs,
    handle: tokio::sync::Mutex<Handle>,
    attempts: AtomicU64,
    done: watch::Sender<bool>,
}

impl fmt::Display for FlakyCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flaky-call")
    }
}

#[async_trait]
impl RpcCommand for FlakyCall {
    async fn send(self: Arc<Self>) {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[flaky-call] attempt {attempt}");
        self.retrier.prepare_controller(None);

        let this = Arc::clone(&self);
        tokio::spawn(async move {
            // The "server" answers busy twice, then accepts the call.
            let outcome = if attempt <= 2 {
                Err(RpcError::Remote {
                    code: RemoteErrorCode::ServerTooBusy,
                    message: format!("busy #{attempt}"),
                })
            } else {
                Ok(())
            };
            this.retrier.controller().record(outcome);

            let rpc: Arc<dyn RetryableRpc> = this.clone();
            if let Some(status) = this.retrier.handle_response(&rpc, true) {
                this.finished(status).await;
            }
        });
    }

    async fn finished(&self, status: Status) {
        println!("[flaky-call] finished: {status:?}");
        let mut handle = self.handle.lock().await;
        self.rpcs.unregister(&mut handle).await;
        self.done.send_replace(true);
    }

    async fn abort(&self) {
        self.retrier.abort().await;
    }

    fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl RetryableRpc for FlakyCall {
    fn retrier(&self) -> &Retrier {
        &self.retrier
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 1. Shrink the busy backoff so the demo finishes quickly (16ms, 32ms, ...).
    let mut cfg = Config::default();
    cfg.min_backoff_exponent = 4;

    // 2. Reactor for the timers, registry for the in-flight call.
    let reactor = Arc::new(Reactor::new());
    let rpcs = Rpcs::new(cfg.clone());

    // 3. Mirror lifecycle events into tracing.
    spawn_observer(rpcs.bus(), Arc::new(TracingObserver));

    // 4. Build the command around a retrier with a 5 second overall deadline.
    let deadline = Instant::now() + Duration::from_secs(5);
    let (done, mut done_rx) = watch::channel(false);
    let call = Arc::new(FlakyCall {
        retrier: Retrier::new(
            Some(deadline),
            reactor.clone(),
            cfg.clone(),
            rpcs.bus().clone(),
        ),
        deadline,
        rpcs: rpcs.clone(),
        handle: tokio::sync::Mutex::new(Handle::INVALID),
        attempts: AtomicU64::new(0),
        done,
    });

    // 5. Reserve a slot first so finished() always knows its handle, then
    //    fill it and start the call.
    let handle = rpcs.prepare().await;
    *call.handle.lock().await = handle;
    rpcs.assign(handle, call.clone()).await;
    call.clone().send().await;

    // 6. Wait for the call to complete, then drain.
    while !*done_rx.borrow_and_update() {
        done_rx.changed().await.expect("call went away");
    }
    rpcs.shutdown().await;
    reactor.shutdown();

    println!("[main] done.");
}
