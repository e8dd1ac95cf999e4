//! # Contract of a retryable RPC command.
//!
//! An [`RpcCommand`] is the polymorphic operation the retry core drives. It is
//! shared-ownership by construction: the registry, any scheduled retry timer,
//! and user code all hold strong handles, so a command cannot be destroyed
//! between scheduling a retry and the timer firing.
//!
//! Commands that retry embed a [`Retrier`] and additionally implement
//! [`RetryableRpc`], which supplies the [`schedule_retry`] convenience.
//!
//! [`schedule_retry`]: RetryableRpc::schedule_retry

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Status;
use crate::retrier::{BackoffStrategy, Retrier};

/// Shared handle to a command object.
///
/// This is the type the [`Rpcs`](crate::Rpcs) registry tracks.
pub type RpcCommandPtr = Arc<dyn RpcCommand>;

/// One logical RPC operation, driven through attempts by the retry core.
///
/// The `Display` rendering identifies the command in errors and logs.
#[async_trait]
pub trait RpcCommand: fmt::Display + Send + Sync + 'static {
    /// Starts (or restarts) an attempt of this command.
    ///
    /// Takes `Arc<Self>` so the implementation can hand out further strong
    /// references, e.g. when scheduling its own retry.
    async fn send(self: Arc<Self>);

    /// Delivers the terminal status. Invoked at most once per command.
    async fn finished(&self, status: Status);

    /// Stops the command; retryable commands delegate to
    /// [`Retrier::abort`].
    async fn abort(&self);

    /// Absolute instant past which this command may not run.
    fn deadline(&self) -> Instant;
}

/// A command with an embedded [`Retrier`].
#[async_trait]
pub trait RetryableRpc: RpcCommand {
    /// The retrier embedded in this command.
    fn retrier(&self) -> &Retrier;

    /// Schedules a linear-backoff retry of this command, delivering the error
    /// through [`RpcCommand::finished`] when scheduling fails.
    async fn schedule_retry(self: Arc<Self>, why_status: Status)
    where
        Self: Sized,
    {
        let rpc: Arc<dyn RetryableRpc> = self.clone();
        if let Err(err) =
            self.retrier()
                .delayed_retry(&rpc, why_status, BackoffStrategy::Linear)
        {
            warn!(call = %self, error = %err, "failed to schedule retry");
            self.finished(Err(err)).await;
        }
    }
}
