//! Audio submission channel.
//!
//! Outbound audio flows through a bounded channel into the session's
//! transport task. The bound is the backpressure mechanism: when the
//! transport falls behind, submission suspends the caller until capacity
//! frees up. Bytes are never reordered or dropped; frames reach the service
//! in submission order.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::{UspError, UspResult};
use crate::session::state::SessionState;

/// Depth of the outbound audio queue.
pub(crate) const AUDIO_QUEUE_DEPTH: usize = 32;

/// Caller-side handle for submitting audio frames to one session.
#[derive(Debug)]
pub(crate) struct AudioChannel {
    tx: mpsc::Sender<Bytes>,
    state: watch::Receiver<SessionState>,
}

impl AudioChannel {
    pub fn new(tx: mpsc::Sender<Bytes>, state: watch::Receiver<SessionState>) -> Self {
        Self { tx, state }
    }

    /// Queue one audio frame for transmission.
    ///
    /// Valid only while the session is active; every other state yields an
    /// invalid-state error without touching the frame. Suspends while the
    /// queue is full.
    pub async fn submit(&self, frame: Bytes) -> UspResult<()> {
        let state = *self.state.borrow();
        if !state.accepts_audio() {
            return Err(UspError::InvalidState(format!(
                "cannot submit audio while session is {state}"
            )));
        }

        let len = frame.len();
        self.tx.send(frame).await.map_err(|_| {
            UspError::NetworkError("audio channel closed before the frame was accepted".to_string())
        })?;
        debug!(bytes = len, "queued audio frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_in(state: SessionState) -> (AudioChannel, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let (_state_tx, state_rx) = watch::channel(state);
        // watch receivers keep serving the last value after the sender drops
        (AudioChannel::new(tx, state_rx), rx)
    }

    #[tokio::test]
    async fn test_submit_rejected_before_active() {
        let (channel, _rx) = channel_in(SessionState::Connecting);
        let result = channel.submit(Bytes::from_static(b"pcm")).await;
        assert!(matches!(result, Err(UspError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_submit_rejected_after_drain_begins() {
        for state in [
            SessionState::Draining,
            SessionState::Closed,
            SessionState::Failed,
        ] {
            let (channel, _rx) = channel_in(state);
            let result = channel.submit(Bytes::from_static(b"pcm")).await;
            assert!(
                matches!(result, Err(UspError::InvalidState(_))),
                "submit should fail in {state}"
            );
        }
    }

    #[tokio::test]
    async fn test_submit_preserves_order() {
        let (channel, mut rx) = channel_in(SessionState::Active);

        channel.submit(Bytes::from_static(b"one")).await.unwrap();
        channel.submit(Bytes::from_static(b"two")).await.unwrap();
        channel.submit(Bytes::from_static(b"three")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"three"));
    }

    #[tokio::test]
    async fn test_submit_reports_closed_transport() {
        let (channel, rx) = channel_in(SessionState::Active);
        drop(rx);

        let result = channel.submit(Bytes::from_static(b"pcm")).await;
        assert!(matches!(result, Err(UspError::NetworkError(_))));
    }
}
