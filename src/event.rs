//! Lifecycle announcements emitted by the retry core.
//!
//! Every observable transition of a command is published as an [`Event`]: the
//! registry reports tracking changes (registration, removal, aborts, drain
//! progress) and each retrier reports scheduling decisions (retries armed,
//! attempts started, schedule failures). An event pairs a timestamp with an
//! [`EventKind`] whose payload carries exactly what that transition knows;
//! consumers match on the kind instead of probing optional fields.

use std::time::{Duration, SystemTime};

/// What happened to a tracked command, with the data of that transition.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A command entered the registry.
    CallRegistered { call: String },
    /// A command left the registry; the drain condition was signalled.
    CallUnregistered { call: String },
    /// A command was asked to stop.
    CallAborted { call: String },
    /// A retry timer fired and the command is about to send again.
    AttemptStarting { call: String, attempt: u32 },
    /// A retry was armed on the reactor.
    RetryScheduled {
        call: String,
        delay: Duration,
        attempt: u32,
        /// The failure that made the retry necessary, if any.
        cause: Option<String>,
    },
    /// The reactor refused the delayed task.
    ScheduleFailed { call: String, error: String },
    /// The registry stopped accepting commands.
    ShutdownRequested,
    /// Every tracked command unregistered before the drain deadline.
    DrainCompleted,
    /// The drain deadline elapsed with commands still registered.
    DrainTimedOut { outstanding: usize },
}

/// A single lifecycle announcement.
#[derive(Debug, Clone)]
pub struct Event {
    pub at: SystemTime,
    pub kind: EventKind,
}

impl Event {
    /// Stamps `kind` with the current wall-clock time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            at: SystemTime::now(),
            kind,
        }
    }

    /// Name of the command this event concerns, when it concerns one.
    pub fn call(&self) -> Option<&str> {
        match &self.kind {
            EventKind::CallRegistered { call }
            | EventKind::CallUnregistered { call }
            | EventKind::CallAborted { call }
            | EventKind::AttemptStarting { call, .. }
            | EventKind::RetryScheduled { call, .. }
            | EventKind::ScheduleFailed { call, .. } => Some(call),
            EventKind::ShutdownRequested
            | EventKind::DrainCompleted
            | EventKind::DrainTimedOut { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_events_name_their_call() {
        let ev = Event::now(EventKind::RetryScheduled {
            call: "write-batch".into(),
            delay: Duration::from_millis(130),
            attempt: 2,
            cause: Some("remote error".into()),
        });
        assert_eq!(ev.call(), Some("write-batch"));
    }

    #[test]
    fn registry_wide_events_concern_no_single_call() {
        assert_eq!(
            Event::now(EventKind::DrainTimedOut { outstanding: 3 }).call(),
            None
        );
        assert_eq!(Event::now(EventKind::ShutdownRequested).call(), None);
    }
}
