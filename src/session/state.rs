//! Session lifecycle state machine.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Lifecycle states of one recognition session.
///
/// ```text
/// Created -> Connecting -> Active -> Draining -> Closed
///                \------------\---------\-----> Failed
/// ```
///
/// `Closed` and `Failed` are terminal. `Failed` is reachable from every
/// non-terminal state; `Closed` is reached through a drain, or directly when
/// the session is shut down before the transport is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handle exists, transport not yet started.
    Created,
    /// Transport handshake in progress.
    Connecting,
    /// Audio submission and message reception are valid.
    Active,
    /// Shutdown requested: no new audio, pending messages still delivered.
    Draining,
    /// Drain finished and transport released.
    Closed,
    /// The session ended with a transport or protocol failure.
    Failed,
}

impl SessionState {
    /// True for states no transition leaves.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// True while audio submission is valid.
    #[inline]
    pub fn accepts_audio(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the state machine permits moving to `next` from here.
    pub(crate) fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Created, Connecting) => true,
            (Connecting, Active) => true,
            (Active, Draining) => true,
            (Draining, Closed) => true,
            // Shutdown before the transport came up tears straight down.
            (Created, Closed) | (Connecting, Closed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, watchable session state with transition enforcement.
///
/// Backed by a `watch` channel so callers can await transitions; illegal
/// transitions are rejected rather than applied, which also gives
/// exactly-once semantics for the move into `Failed`.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    pub fn new() -> (Arc<Self>, watch::Receiver<SessionState>) {
        let (tx, rx) = watch::channel(SessionState::Created);
        (Arc::new(Self { tx }), rx)
    }

    /// Current state.
    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Attempt a transition; returns whether it was applied.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut moved = false;
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                moved = true;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(state = %next, "session state changed");
        }
        moved
    }

    /// A fresh receiver observing this cell.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}
