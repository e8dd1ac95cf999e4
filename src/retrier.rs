//! # Retry state machine for a single RPC command.
//!
//! A [`Retrier`] drives one logical command through its attempts: it arms the
//! per-attempt [`RpcController`], classifies the outcome, computes a jittered
//! backoff, schedules the next attempt on the [`Messenger`], and honors the
//! overall deadline.
//!
//! # High-level architecture
//!
//! ```text
//! Idle ──(delayed_retry)──► Scheduling ──(task accepted)──► Waiting
//!                                   └──(task rejected)──► Finished
//! Waiting ──(timer fires)──► Running ──(attempt complete)──► Idle
//! Waiting ──(abort)──► Finished
//! Idle ──(abort)──► Finished
//! ```
//!
//! `Idle` is the initial state and `Finished` is terminal. `Scheduling` is
//! exited only by the thread that entered it; the timer callback and
//! [`Retrier::abort`] wait for that exit before proceeding.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::time;
use tracing::warn;

use crate::bus::Bus;
use crate::command::{RetryableRpc, RpcCommand};
use crate::config::Config;
use crate::controller::RpcController;
use crate::error::{RemoteErrorCode, RpcError, Status};
use crate::event::{Event, EventKind};
use crate::messenger::{INVALID_TASK_ID, Messenger, TaskId};

/// How the delay between attempts grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Base delay in milliseconds equals the attempt counter.
    #[default]
    Linear,
    /// Base delay in milliseconds is `1 << min(min_exp + attempts, max_exp)`.
    Exponential,
}

/// Lifecycle state of a [`Retrier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RetrierState {
    Idle = 0,
    Scheduling = 1,
    Waiting = 2,
    Running = 3,
    Finished = 4,
}

const IDLE: u8 = RetrierState::Idle as u8;
const SCHEDULING: u8 = RetrierState::Scheduling as u8;
const WAITING: u8 = RetrierState::Waiting as u8;
const RUNNING: u8 = RetrierState::Running as u8;
const FINISHED: u8 = RetrierState::Finished as u8;

impl RetrierState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            IDLE => RetrierState::Idle,
            SCHEDULING => RetrierState::Scheduling,
            WAITING => RetrierState::Waiting,
            RUNNING => RetrierState::Running,
            FINISHED => RetrierState::Finished,
            _ => unreachable!("retrier state is only ever written from RetrierState"),
        }
    }
}

/// Poll interval while waiting for the scheduling thread to finish arming.
const SCHEDULING_RACE_POLL: Duration = Duration::from_millis(1);
/// Poll interval while waiting for the retrier to quiesce during abort.
const ABORT_POLL: Duration = Duration::from_millis(10);

/// Drives one retryable command through its attempts.
///
/// The retrier holds no reference to its command; every operation that can
/// outlive the synchronous call receives a strong handle as a parameter, so a
/// scheduled timer keeps the command alive until it fires.
pub struct Retrier {
    deadline: Option<Instant>,
    messenger: Arc<dyn Messenger>,
    cfg: Config,
    bus: Bus,
    controller: RpcController,
    attempt_num: AtomicU32,
    last_error: Mutex<Option<RpcError>>,
    state: AtomicU8,
    task_id: AtomicU64,
}

impl Retrier {
    /// Creates a retrier for a command whose attempts must all complete by
    /// `deadline` (`None` means no overall deadline).
    pub fn new(
        deadline: Option<Instant>,
        messenger: Arc<dyn Messenger>,
        cfg: Config,
        bus: Bus,
    ) -> Self {
        Self {
            deadline,
            messenger,
            cfg,
            bus,
            controller: RpcController::new(),
            attempt_num: AtomicU32::new(0),
            last_error: Mutex::new(None),
            state: AtomicU8::new(IDLE),
            task_id: AtomicU64::new(INVALID_TASK_ID),
        }
    }

    /// Overall deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of retries scheduled through this retrier so far.
    pub fn attempt_num(&self) -> u32 {
        self.attempt_num.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RetrierState {
        RetrierState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Identifier of the outstanding delayed task, or [`INVALID_TASK_ID`].
    pub fn task_id(&self) -> TaskId {
        self.task_id.load(Ordering::Acquire)
    }

    /// The per-attempt call context.
    pub fn controller(&self) -> &RpcController {
        &self.controller
    }

    /// Most informative error observed across prior attempts.
    pub fn last_error(&self) -> Option<RpcError> {
        self.last_error.lock().clone()
    }

    /// Arms the controller for the next attempt.
    ///
    /// The attempt deadline is `min(overall_deadline, now + timeout)` where
    /// `timeout` falls back to the configured single-call timeout.
    pub fn prepare_controller(&self, single_call_timeout: Option<Duration>) -> &RpcController {
        let timeout = single_call_timeout.unwrap_or(self.cfg.single_call_timeout);
        let mut attempt_deadline = Instant::now() + timeout;
        if let Some(overall) = self.deadline {
            attempt_deadline = attempt_deadline.min(overall);
        }
        self.controller.set_deadline(attempt_deadline);
        &self.controller
    }

    /// Classifies the outcome of the attempt recorded in the controller.
    ///
    /// Returns `None` when the outcome was a busy server, `retry_when_busy`
    /// is set, and a retry was scheduled. Otherwise returns the terminal
    /// status for the caller to propagate through
    /// [`RpcCommand::finished`](crate::RpcCommand::finished).
    pub fn handle_response(
        &self,
        rpc: &Arc<dyn RetryableRpc>,
        retry_when_busy: bool,
    ) -> Option<Status> {
        let controller_status = self.controller.status();
        if retry_when_busy
            && self.controller.error_response() == Some(RemoteErrorCode::ServerTooBusy)
        {
            return match self.delayed_retry(
                rpc,
                controller_status.clone(),
                BackoffStrategy::Exponential,
            ) {
                Ok(()) => None,
                Err(err) => Some(Err(err)),
            };
        }
        Some(controller_status)
    }

    /// Schedules the next attempt of `rpc` after a jittered backoff.
    ///
    /// `why_status` records why the retry is needed; the most diagnostic one
    /// is kept and folded into a later deadline error. Fails with
    /// `IllegalState` when the retrier is already waiting or finished, and
    /// with `Aborted` when the messenger refuses the task.
    pub fn delayed_retry(
        &self,
        rpc: &Arc<dyn RetryableRpc>,
        why_status: Status,
        strategy: BackoffStrategy,
    ) -> Result<(), RpcError> {
        if let Err(why) = &why_status {
            // Keep the most informative early failure; only a timeout may be
            // superseded.
            let mut last_error = self.last_error.lock();
            if last_error.as_ref().is_none_or(|prev| prev.is_timed_out()) {
                *last_error = Some(why.clone());
            }
        }

        let attempts = self.attempt_num.load(Ordering::Relaxed);
        let delay_ms = base_backoff_ms(strategy, attempts, &self.cfg) + jitter_ms();
        self.attempt_num.store(attempts + 1, Ordering::Relaxed);

        loop {
            match self
                .state
                .compare_exchange(IDLE, SCHEDULING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(FINISHED) => {
                    let err = RpcError::IllegalState {
                        reason: format!("retry of finished command: {rpc}"),
                    };
                    warn!(error = %err, "rejecting retry request");
                    return Err(err);
                }
                Err(WAITING) => {
                    let err = RpcError::IllegalState {
                        reason: format!("retry of already waiting command: {rpc}"),
                    };
                    warn!(error = %err, "rejecting retry request");
                    return Err(err);
                }
                Err(_) => std::hint::spin_loop(),
            }
        }

        let retain = Arc::clone(rpc);
        let task_id = self.messenger.schedule_on_reactor(
            Box::new(move |status| {
                Box::pin(async move {
                    retain.retrier().do_retry(&retain, status).await;
                })
            }),
            Duration::from_millis(delay_ms),
        );
        self.task_id.store(task_id, Ordering::Release);

        // Scheduling can be exited only by this thread, so both exchanges
        // below must succeed.
        if task_id == INVALID_TASK_ID {
            let err = RpcError::Aborted {
                reason: format!("failed to schedule: {rpc}"),
            };
            warn!(error = %err, "messenger refused delayed task");
            let parked = self
                .state
                .compare_exchange(SCHEDULING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            assert!(parked, "scheduling state left by a foreign thread");
            self.bus.publish(Event::now(EventKind::ScheduleFailed {
                call: rpc.to_string(),
                error: err.to_string(),
            }));
            return Err(err);
        }
        let armed = self
            .state
            .compare_exchange(SCHEDULING, WAITING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        assert!(armed, "scheduling state left by a foreign thread");

        self.bus.publish(Event::now(EventKind::RetryScheduled {
            call: rpc.to_string(),
            delay: Duration::from_millis(delay_ms),
            attempt: attempts + 1,
            cause: why_status.err().map(|why| why.to_string()),
        }));
        Ok(())
    }

    /// Timer callback: runs the next attempt or surfaces a terminal status.
    async fn do_retry(&self, rpc: &Arc<dyn RetryableRpc>, scheduled_status: Status) {
        let mut acquired = self
            .state
            .compare_exchange(WAITING, RUNNING, Ordering::AcqRel, Ordering::Acquire);
        // The timer can fire before the scheduling thread has flipped
        // Scheduling -> Waiting (shutdown right after a schedule). Wait the
        // window out instead of paying for synchronization in the common case.
        while let Err(observed) = acquired {
            if observed != SCHEDULING {
                break;
            }
            time::sleep(SCHEDULING_RACE_POLL).await;
            acquired = self
                .state
                .compare_exchange(WAITING, RUNNING, Ordering::AcqRel, Ordering::Acquire);
        }
        self.task_id.store(INVALID_TASK_ID, Ordering::Release);

        if let Err(observed) = acquired {
            rpc.finished(Err(RpcError::Aborted {
                reason: format!("{rpc} aborted: {:?}", RetrierState::from_u8(observed)),
            }))
            .await;
            return;
        }

        let mut status = scheduled_status;
        if status.is_ok() {
            if let Some(deadline) = self.deadline {
                let now = Instant::now();
                if deadline < now {
                    let mut reason =
                        format!("{rpc} passed its deadline {deadline:?} (now: {now:?})");
                    if let Some(last_error) = self.last_error.lock().clone() {
                        reason = format!("{reason}: {last_error}");
                    }
                    status = Err(RpcError::TimedOut { reason });
                }
            }
        }

        match status {
            Ok(()) => {
                self.controller.reset();
                self.bus.publish(Event::now(EventKind::AttemptStarting {
                    call: rpc.to_string(),
                    attempt: self.attempt_num.load(Ordering::Relaxed),
                }));
                Arc::clone(rpc).send().await;
            }
            Err(err) if err.is_service_unavailable() => {
                // The messenger reports ServiceUnavailable when it was shut
                // down before the timer fired.
                rpc.finished(Err(RpcError::Aborted {
                    reason: format!("aborted because of {err}"),
                }))
                .await;
            }
            Err(err) => {
                rpc.finished(Err(err)).await;
            }
        }

        // An abort may have parked the state in Finished meanwhile; leave it.
        let _ = self
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Parks the retrier in `Finished` and cancels any outstanding timer.
    ///
    /// Cooperative: waits for an in-flight `Scheduling`/`Running` section to
    /// end, then keeps asking the messenger to abort the delayed task until
    /// the task acknowledges by clearing the task id.
    pub async fn abort(&self) {
        let mut expected = IDLE;
        loop {
            match self.state.compare_exchange_weak(
                expected,
                FINISHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(FINISHED) => break,
                Err(observed) => {
                    expected = if observed == WAITING { WAITING } else { IDLE };
                    time::sleep(ABORT_POLL).await;
                }
            }
        }
        loop {
            let task_id = self.task_id.load(Ordering::Acquire);
            if task_id == INVALID_TASK_ID {
                break;
            }
            self.messenger.abort_on_reactor(task_id);
            time::sleep(ABORT_POLL).await;
        }
    }
}

impl fmt::Display for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ task_id: {} state: {:?} deadline: {:?} }}",
            self.task_id(),
            self.state(),
            self.deadline
        )
    }
}

impl Drop for Retrier {
    fn drop(&mut self) {
        let task_id = self.task_id.load(Ordering::Acquire);
        let state = RetrierState::from_u8(self.state.load(Ordering::Acquire));
        if task_id != INVALID_TASK_ID
            || !matches!(state, RetrierState::Idle | RetrierState::Finished)
        {
            tracing::error!(retrier = %self, "destroying retrier in invalid state");
            debug_assert!(false, "destroying retrier in invalid state: {self}");
        }
    }
}

fn base_backoff_ms(strategy: BackoffStrategy, attempts: u32, cfg: &Config) -> u64 {
    match strategy {
        BackoffStrategy::Exponential => {
            let exponent = (cfg.min_backoff_exponent + attempts).min(cfg.max_backoff_exponent);
            1u64 << exponent.min(63)
        }
        BackoffStrategy::Linear => u64::from(attempts),
    }
}

/// Uniform jitter in `[0, 4]` ms, spreading simultaneous retries apart.
fn jitter_ms() -> u64 {
    rand::rng().random_range(0..=4)
}
