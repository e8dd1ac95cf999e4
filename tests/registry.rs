//! Registry lifecycle: register/unregister, abort, shutdown drain.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rpcvisor::{BackoffStrategy, Config, EventKind, Handle, Reactor, RetryableRpc, Rpcs};
use tokio::sync::Mutex;

use support::{TestCallSpec, busy};

fn fixture(cfg: Config) -> (Arc<Reactor>, Rpcs) {
    (Arc::new(Reactor::new()), Rpcs::new(cfg))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn register_and_unregister_round_trip() {
    let (reactor, rpcs) = fixture(Config::default());
    let call = TestCallSpec {
        name: "tracked-call",
        ..Default::default()
    }
    .build(reactor, Config::default(), rpcs.bus().clone());

    let mut handle = rpcs.register(call.clone()).await;
    assert!(handle.is_valid());
    assert!(rpcs.get(handle).await.is_some());

    let probe = handle;
    let removed = rpcs.unregister(&mut handle).await.expect("call was registered");
    assert_eq!(removed.to_string(), "tracked-call");
    assert!(!handle.is_valid());
    assert!(rpcs.get(probe).await.is_none());

    // Unregistering an invalid handle is a no-op.
    assert!(rpcs.unregister(&mut handle).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn register_and_start_runs_the_command() {
    let (reactor, rpcs) = fixture(Config::default());
    let call = TestCallSpec {
        name: "started-call",
        outcomes: vec![Ok(())],
        ..Default::default()
    }
    .build(reactor, Config::default(), rpcs.bus().clone());

    let mut handle = Handle::INVALID;
    rpcs.register_and_start(call.clone(), &mut handle).await;
    assert!(handle.is_valid());
    call.wait_finished().await;

    assert_eq!(call.sends(), 1);
    assert!(call.result().expect("terminal status").is_ok());

    let removed = rpcs.unregister(&mut handle).await;
    assert!(removed.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prepare_assign_then_abort_waits_for_unregistration() {
    let (reactor, rpcs) = fixture(Config::default());
    let call = TestCallSpec {
        name: "prepared-call",
        ..Default::default()
    }
    .build(reactor.clone(), Config::default(), rpcs.bus().clone());

    let handle = rpcs.prepare().await;
    assert!(handle.is_valid());
    rpcs.assign(handle, call.clone()).await;
    assert!(rpcs.get(handle).await.is_some());
    call.attach(&rpcs, handle);

    // Park the call on a timer so abort has something to cancel.
    let rpc: Arc<dyn RetryableRpc> = call.clone();
    call.retrier()
        .delayed_retry(&rpc, Err(busy()), BackoffStrategy::Exponential)
        .expect("retry accepted");

    rpcs.abort(&[handle]).await;
    assert!(rpcs.get(handle).await.is_none());
    assert_eq!(call.finishes(), 1);
    assert_eq!(call.aborts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registration_after_shutdown_aborts_the_command() {
    let (reactor, rpcs) = fixture(Config::default());
    rpcs.shutdown().await;

    let call = TestCallSpec {
        name: "late-call",
        ..Default::default()
    }
    .build(reactor, Config::default(), rpcs.bus().clone());

    let handle = rpcs.register(call.clone()).await;
    assert!(!handle.is_valid());
    assert_eq!(call.aborts(), 1);

    // register_and_start must not start a command once shut down.
    let mut handle = Handle::INVALID;
    rpcs.register_and_start(call.clone(), &mut handle).await;
    assert!(!handle.is_valid());
    assert_eq!(call.sends(), 0);
    assert_eq!(call.aborts(), 2);

    assert!(!rpcs.prepare().await.is_valid());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_waiting_commands() {
    let cfg = Config {
        shutdown_timeout: Duration::from_millis(50),
        shutdown_extra_delay: Duration::from_millis(10),
        ..Config::default()
    };
    let (reactor, rpcs) = fixture(cfg.clone());

    let mut calls = Vec::new();
    for (name, deadline_ms) in [("fast-call", 100), ("slow-call", 300)] {
        let call = TestCallSpec {
            name,
            deadline: Some(Instant::now() + Duration::from_millis(deadline_ms)),
            ..Default::default()
        }
        .build(reactor.clone(), cfg.clone(), rpcs.bus().clone());
        let handle = rpcs.register(call.clone()).await;
        call.attach(&rpcs, handle);

        let rpc: Arc<dyn RetryableRpc> = call.clone();
        call.retrier()
            .delayed_retry(&rpc, Err(busy()), BackoffStrategy::Exponential)
            .expect("retry accepted");
        calls.push(call);
    }

    let started = Instant::now();
    rpcs.shutdown().await;
    // Drain must finish well before the now+310ms drain deadline.
    assert!(started.elapsed() < Duration::from_millis(310));

    for call in &calls {
        assert_eq!(call.finishes(), 1);
        assert_eq!(call.aborts(), 1);
        assert!(
            call.result()
                .expect("terminal status")
                .expect_err("aborted at shutdown")
                .is_aborted()
        );
    }

    // Shutdown is idempotent; the second call returns without work.
    rpcs.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_abort_all_leaves_the_registry_open() {
    let (reactor, rpcs) = fixture(Config::default());
    let call = TestCallSpec {
        name: "aborted-call",
        ..Default::default()
    }
    .build(reactor.clone(), Config::default(), rpcs.bus().clone());
    let handle = rpcs.register(call.clone()).await;
    call.attach(&rpcs, handle);

    let rpc: Arc<dyn RetryableRpc> = call.clone();
    call.retrier()
        .delayed_retry(&rpc, Err(busy()), BackoffStrategy::Exponential)
        .expect("retry accepted");

    rpcs.request_abort_all().await;
    call.wait_finished().await;
    assert_eq!(call.aborts(), 1);

    // Not a shutdown: new commands are still accepted.
    let late = TestCallSpec {
        name: "still-welcome",
        ..Default::default()
    }
    .build(reactor, Config::default(), rpcs.bus().clone());
    let mut late_handle = rpcs.register(late.clone()).await;
    assert!(late_handle.is_valid());
    rpcs.unregister(&mut late_handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_mutex_exposes_registry_state() {
    let shared = Arc::new(Mutex::new(rpcvisor::Calls::default()));
    let rpcs = Rpcs::with_mutex(Config::default(), shared.clone());
    let reactor = Arc::new(Reactor::new());

    {
        let calls = shared.lock().await;
        assert!(calls.is_empty());
        assert!(!calls.is_shut_down());
    }

    let call = TestCallSpec {
        name: "shared-call",
        ..Default::default()
    }
    .build(reactor, Config::default(), rpcs.bus().clone());
    let mut handle = rpcs.register(call.clone()).await;
    assert_eq!(shared.lock().await.len(), 1);

    rpcs.unregister(&mut handle).await;
    rpcs.shutdown().await;
    assert!(shared.lock().await.is_shut_down());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lifecycle_events_are_published() {
    let (reactor, rpcs) = fixture(Config::default());
    let mut events = rpcs.bus().subscribe();

    let call = TestCallSpec {
        name: "observed-call",
        ..Default::default()
    }
    .build(reactor, Config::default(), rpcs.bus().clone());
    let mut handle = rpcs.register(call.clone()).await;
    rpcs.unregister(&mut handle).await;
    rpcs.shutdown().await;

    let (mut registered, mut unregistered, mut shutdown, mut drained) =
        (false, false, false, false);
    while let Ok(ev) = events.try_recv() {
        match ev.kind {
            EventKind::CallRegistered { .. } => registered = true,
            EventKind::CallUnregistered { .. } => unregistered = true,
            EventKind::ShutdownRequested => shutdown = true,
            EventKind::DrainCompleted => drained = true,
            _ => {}
        }
    }
    assert!(registered, "missing CallRegistered");
    assert!(unregistered, "missing CallUnregistered");
    assert!(shutdown, "missing ShutdownRequested");
    assert!(drained, "missing DrainCompleted");
}
