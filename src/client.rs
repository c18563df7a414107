//! Public session handle.
//!
//! [`UspClient`] is the owned handle for one recognition session: create it
//! with a configuration and callback set, feed it audio, shut it down. The
//! handle is exclusively owned (operations take `&mut self`) and is safe
//! to move across threads; distinct handles are fully independent.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tracing::{debug, info};

use crate::config::UspConfig;
use crate::error::{UspError, UspResult};
use crate::session::audio::{AudioChannel, AUDIO_QUEUE_DEPTH};
use crate::session::connection::{self, ConnectionParams};
use crate::session::dispatch::{self, SessionCallbacks, SessionEvent};
use crate::session::state::{SessionState, StateCell};

use std::sync::Arc;

/// Handle for one streaming recognition session.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use usp_client::{SessionCallbacks, UspClient, UspConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = UspConfig {
///         subscription_key: "your-subscription-key".to_string(),
///         ..Default::default()
///     };
///
///     let callbacks = SessionCallbacks::new().with_speech_phrase(Arc::new(|phrase| {
///         Box::pin(async move {
///             if let Some(text) = phrase.text() {
///                 println!("recognized: {text}");
///             }
///         })
///     }));
///
///     let mut session = UspClient::initialize(config, callbacks)?;
///     session.wait_until_active(Duration::from_secs(30)).await?;
///
///     let audio = vec![0u8; 3200]; // your PCM audio
///     session.write(audio).await?;
///
///     session.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct UspClient {
    connection_id: String,
    state: Arc<StateCell>,
    state_rx: watch::Receiver<SessionState>,
    audio: AudioChannel,
    shutdown_tx: Option<oneshot::Sender<()>>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    connection_handle: Option<JoinHandle<()>>,
    dispatch_handle: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl UspClient {
    /// Create a session and start connecting in the background.
    ///
    /// Only locally detectable problems (invalid configuration, missing
    /// credentials) fail here; the handle is returned while the transport
    /// handshake proceeds. Connection failure surfaces through the `Error`
    /// callback and the `Failed` state. Must be called from within a Tokio
    /// runtime, which the background tasks are spawned onto.
    pub fn initialize(config: UspConfig, callbacks: SessionCallbacks) -> UspResult<Self> {
        config.validate()?;

        let connection_id = generate_key();
        let shutdown_timeout = config.shutdown_timeout;

        let (state, state_rx) = StateCell::new();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let dispatch_handle = dispatch::spawn(callbacks, event_rx);

        state.transition(SessionState::Connecting);
        let connection_handle = tokio::spawn(connection::run(
            ConnectionParams {
                config,
                connection_id: connection_id.clone(),
            },
            state.clone(),
            audio_rx,
            shutdown_rx,
            event_tx.clone(),
        ));

        debug!(%connection_id, "session initialized");

        Ok(Self {
            audio: AudioChannel::new(audio_tx, state_rx.clone()),
            connection_id,
            state,
            state_rx,
            shutdown_tx: Some(shutdown_tx),
            events: Some(event_tx),
            connection_handle: Some(connection_handle),
            dispatch_handle: Some(dispatch_handle),
            shutdown_timeout,
        })
    }

    /// The connection id sent to the service, for correlating logs.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Wait until the session is ready for audio.
    ///
    /// Resolves as soon as the session becomes active; errors if the session
    /// reaches a terminal state first or the wait times out.
    pub async fn wait_until_active(&mut self, limit: Duration) -> UspResult<()> {
        let mut rx = self.state_rx.clone();
        let wait = rx.wait_for(|s| *s == SessionState::Active || s.is_terminal());
        let result = match timeout(limit, wait).await {
            Err(_) => Err(UspError::Timeout(format!(
                "session did not become active within {limit:?}"
            ))),
            Ok(Err(_)) => Err(UspError::NetworkError(
                "session tasks terminated unexpectedly".to_string(),
            )),
            Ok(Ok(reached)) => match *reached {
                SessionState::Active => Ok(()),
                SessionState::Failed => Err(UspError::ConnectionFailed(
                    "session failed during connection establishment".to_string(),
                )),
                other => Err(UspError::InvalidState(format!(
                    "session reached {other} before becoming active"
                ))),
            },
        };
        result
    }

    /// Wait until the session reaches `Closed` or `Failed`, returning the
    /// state reached (or the current state if the limit elapses first).
    pub async fn wait_until_terminal(&self, limit: Option<Duration>) -> SessionState {
        let mut rx = self.state_rx.clone();
        let wait = rx.wait_for(|s| s.is_terminal());
        match limit {
            Some(d) => match timeout(d, wait).await {
                Ok(Ok(reached)) => *reached,
                _ => self.state(),
            },
            None => match wait.await {
                Ok(reached) => *reached,
                Err(_) => self.state(),
            },
        }
    }

    /// Submit audio bytes for recognition.
    ///
    /// Valid only while the session is active. The bytes are transmitted in
    /// submission order; when the transport lags, this call suspends until
    /// queue capacity frees up; that backpressure never drops bytes.
    pub async fn write(&mut self, audio: impl Into<Bytes>) -> UspResult<()> {
        self.audio.submit(audio.into()).await
    }

    /// Shut the session down, draining with the configured timeout.
    ///
    /// See [`shutdown_with_timeout`](Self::shutdown_with_timeout).
    pub async fn shutdown(&mut self) -> UspResult<()> {
        self.shutdown_with_timeout(self.shutdown_timeout).await
    }

    /// Shut the session down, bounding the drain by `limit`.
    ///
    /// From `Active`, the session stops accepting audio, tells the service
    /// the audio stream is complete, and keeps delivering pending messages
    /// until the final turn closes; it then releases the transport and moves
    /// to `Closed`. If the drain outlives `limit` the session is forced to
    /// `Failed` and a timeout error is both delivered to the error callback
    /// and returned.
    ///
    /// Shutting down a session that is already `Closed` or `Failed` is a
    /// no-op. Callable from any thread holding the handle.
    pub async fn shutdown_with_timeout(&mut self, limit: Duration) -> UspResult<()> {
        let current = self.state();

        if current.is_terminal() {
            // Idempotent; just make sure pending dispatches finish.
            self.release_tasks().await;
            return Ok(());
        }

        if matches!(current, SessionState::Created | SessionState::Connecting) {
            // No established transport to drain.
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = self.connection_handle.take() {
                handle.abort();
                let _ = handle.await;
            }
            self.state.transition(SessionState::Closed);
            self.release_tasks().await;
            info!(connection_id = %self.connection_id, "session closed before activation");
            return Ok(());
        }

        // Active (or already draining): run the drain under the limit.
        self.state.transition(SessionState::Draining);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut handle) = self.connection_handle.take() {
            match timeout(limit, &mut handle).await {
                Ok(_) => {
                    self.release_tasks().await;
                    self.state.transition(SessionState::Closed);
                    info!(connection_id = %self.connection_id, "session closed");
                    Ok(())
                }
                Err(_) => {
                    handle.abort();
                    let err = UspError::Timeout(format!(
                        "session drain did not complete within {limit:?}"
                    ));
                    if self.state.transition(SessionState::Failed) {
                        if let Some(events) = &self.events {
                            let _ = events.send(SessionEvent::Error(err.clone()));
                        }
                    }
                    self.release_tasks().await;
                    Err(err)
                }
            }
        } else {
            self.release_tasks().await;
            self.state.transition(SessionState::Closed);
            Ok(())
        }
    }

    /// Drop the event sender and wait for the dispatch task to deliver
    /// everything still queued.
    async fn release_tasks(&mut self) {
        self.events.take();
        if let Some(handle) = self.dispatch_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for UspClient {
    fn drop(&mut self) {
        // Best-effort teardown signal; the connection task drains on it.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UspConfig;

    #[tokio::test]
    async fn test_initialize_rejects_missing_key() {
        let result = UspClient::initialize(UspConfig::default(), SessionCallbacks::new());
        assert!(matches!(result, Err(UspError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_endpoint() {
        let config = UspConfig {
            endpoint: Some("http://not-a-websocket".to_string()),
            ..Default::default()
        };
        let result = UspClient::initialize(config, SessionCallbacks::new());
        assert!(matches!(result, Err(UspError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_write_before_active_is_invalid_state() {
        // Nothing listens on this endpoint; the session stays in Connecting
        // long enough to observe the usage error.
        let config = UspConfig {
            endpoint: Some("ws://127.0.0.1:9".to_string()),
            connect_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let mut session = UspClient::initialize(config, SessionCallbacks::new()).unwrap();

        let result = session.write(vec![0u8; 16]).await;
        assert!(matches!(result, Err(UspError::InvalidState(_))));

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let config = UspConfig {
            endpoint: Some("ws://127.0.0.1:9".to_string()),
            ..Default::default()
        };
        let mut a = UspClient::initialize(config.clone(), SessionCallbacks::new()).unwrap();
        let mut b = UspClient::initialize(config, SessionCallbacks::new()).unwrap();

        assert_ne!(a.connection_id(), b.connection_id());

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }
}
