//! Shared fixtures: a scripted command driven through the real retry core.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use rpcvisor::{
    Bus, Config, Handle, INVALID_TASK_ID, Messenger, RemoteErrorCode, Retrier, RetrierState,
    RetryTask, RetryableRpc, RpcCommand, RpcError, Rpcs, Status, TaskId,
};

pub fn busy() -> RpcError {
    RpcError::Remote {
        code: RemoteErrorCode::ServerTooBusy,
        message: "soft memory limit exceeded".into(),
    }
}

pub fn app_error() -> RpcError {
    RpcError::Remote {
        code: RemoteErrorCode::ApplicationError,
        message: "tablet not found".into(),
    }
}

/// Messenger that refuses every task, as a reactor does while shutting down.
pub struct NullMessenger;

impl Messenger for NullMessenger {
    fn schedule_on_reactor(&self, _task: RetryTask, _delay: Duration) -> TaskId {
        INVALID_TASK_ID
    }

    fn abort_on_reactor(&self, _task_id: TaskId) {}
}

/// Blueprint for a [`TestCall`].
pub struct TestCallSpec {
    pub name: &'static str,
    pub deadline: Option<Instant>,
    /// Outcome recorded for each attempt, in order.
    pub outcomes: Vec<Status>,
    /// Outcome recorded once the scripted ones run out.
    pub default_outcome: Status,
    pub retry_when_busy: bool,
    /// Schedule a linear retry on transient (remote/timeout) failures.
    pub retry_on_error: bool,
}

impl Default for TestCallSpec {
    fn default() -> Self {
        Self {
            name: "test-call",
            deadline: None,
            outcomes: Vec::new(),
            default_outcome: Ok(()),
            retry_when_busy: false,
            retry_on_error: false,
        }
    }
}

impl TestCallSpec {
    pub fn build(self, messenger: Arc<dyn Messenger>, cfg: Config, bus: Bus) -> Arc<TestCall> {
        let (done, _) = watch::channel(false);
        Arc::new(TestCall {
            name: self.name,
            deadline: self.deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60)),
            retry_when_busy: self.retry_when_busy,
            retry_on_error: self.retry_on_error,
            retrier: Retrier::new(self.deadline, messenger, cfg, bus),
            outcomes: Mutex::new(self.outcomes.into()),
            default_outcome: self.default_outcome,
            sends: AtomicU32::new(0),
            aborts: AtomicU32::new(0),
            finishes: AtomicU32::new(0),
            result: Mutex::new(None),
            registry: Mutex::new(None),
            done,
        })
    }
}

/// A command whose attempts resolve to scripted outcomes.
///
/// The outcome of an attempt is delivered off the `send` call stack, the way
/// a transport delivers a response on its own thread.
pub struct TestCall {
    name: &'static str,
    deadline: Instant,
    retry_when_busy: bool,
    retry_on_error: bool,
    retrier: Retrier,
    outcomes: Mutex<VecDeque<Status>>,
    default_outcome: Status,
    sends: AtomicU32,
    aborts: AtomicU32,
    finishes: AtomicU32,
    result: Mutex<Option<Status>>,
    registry: Mutex<Option<(Rpcs, Handle)>>,
    done: watch::Sender<bool>,
}

impl TestCall {
    /// Makes `finished` unregister this call from `rpcs`.
    pub fn attach(&self, rpcs: &Rpcs, handle: Handle) {
        *self.registry.lock() = Some((rpcs.clone(), handle));
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> u32 {
        self.finishes.load(Ordering::SeqCst)
    }

    pub fn result(&self) -> Option<Status> {
        self.result.lock().clone()
    }

    pub async fn wait_finished(&self) {
        let mut rx = self.done.subscribe();
        while !*rx.borrow_and_update() {
            rx.changed().await.expect("test call went away");
        }
    }

    /// Polls until the retrier settles in `want`.
    pub async fn wait_state(&self, want: RetrierState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.retrier.state() != want {
            assert!(
                Instant::now() < deadline,
                "retrier stuck in {:?} while waiting for {want:?}",
                self.retrier.state()
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl fmt::Display for TestCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[async_trait]
impl RpcCommand for TestCall {
    async fn send(self: Arc<Self>) {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.retrier.prepare_controller(None);
        let this = Arc::clone(&self);
        tokio::spawn(async move {
            let outcome = this
                .outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| this.default_outcome.clone());
            this.retrier.controller().record(outcome);

            let rpc: Arc<dyn RetryableRpc> = this.clone();
            match this.retrier.handle_response(&rpc, this.retry_when_busy) {
                None => {}
                Some(Ok(())) => this.finished(Ok(())).await,
                Some(Err(err)) => {
                    let transient =
                        matches!(err, RpcError::Remote { .. } | RpcError::TimedOut { .. });
                    if this.retry_on_error && transient {
                        this.clone().schedule_retry(Err(err)).await;
                    } else {
                        this.finished(Err(err)).await;
                    }
                }
            }
        });
    }

    async fn finished(&self, status: Status) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        *self.result.lock() = Some(status);
        let registered = self.registry.lock().take();
        if let Some((rpcs, mut handle)) = registered {
            rpcs.unregister(&mut handle).await;
        }
        self.done.send_replace(true);
    }

    async fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.retrier.abort().await;
    }

    fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl RetryableRpc for TestCall {
    fn retrier(&self) -> &Retrier {
        &self.retrier
    }
}
