use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::Bus;
use crate::event::Event;
#[cfg(feature = "logging")]
use crate::event::EventKind;

#[async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);
}

/// Spawns a background listener that forwards every bus event to `observer`.
///
/// The listener exits when the bus is dropped.
pub fn spawn_observer(bus: &Bus, observer: Arc<dyn Observer>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = rx.recv().await {
            observer.on_event(&ev).await;
        }
    });
}

#[cfg(feature = "logging")]
pub struct TracingObserver;

#[cfg(feature = "logging")]
#[async_trait]
impl Observer for TracingObserver {
    async fn on_event(&self, e: &Event) {
        match &e.kind {
            EventKind::CallRegistered { call } => {
                tracing::debug!(%call, "call registered");
            }
            EventKind::CallUnregistered { call } => {
                tracing::debug!(%call, "call unregistered");
            }
            EventKind::CallAborted { call } => {
                tracing::info!(%call, "call aborted");
            }
            EventKind::AttemptStarting { call, attempt } => {
                tracing::debug!(%call, attempt = *attempt, "attempt starting");
            }
            EventKind::RetryScheduled {
                call,
                delay,
                attempt,
                cause,
            } => {
                tracing::info!(
                    %call,
                    ?delay,
                    attempt = *attempt,
                    cause = ?cause,
                    "retry scheduled"
                );
            }
            EventKind::ScheduleFailed { call, error } => {
                tracing::warn!(%call, %error, "failed to schedule retry");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("registry shutdown requested");
            }
            EventKind::DrainCompleted => {
                tracing::info!("registry drained");
            }
            EventKind::DrainTimedOut { outstanding } => {
                tracing::error!(outstanding = *outstanding, "registry drain timed out");
            }
        }
    }
}
