//! Background transport task for one session.
//!
//! Each session spawns exactly one connection task. It establishes the
//! WebSocket transport, announces the session with a `speech.config`
//! message, then multiplexes three concerns in a single loop: draining the
//! outbound audio queue (prioritized for latency), decoding inbound service
//! messages and feeding them to dispatch, and reacting to the shutdown
//! signal by draining the session to completion.
//!
//! Any transport or protocol failure moves the session to `Failed` and
//! emits exactly one error event; the transition guard in the state cell is
//! what makes the "exactly one" hold.

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::codec::{self, MessageDecoder};
use crate::config::UspConfig;
use crate::error::UspError;
use crate::messages::ServiceMessage;
use crate::session::dispatch::SessionEvent;
use crate::session::state::{SessionState, StateCell};

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Inputs for one connection task.
pub(crate) struct ConnectionParams {
    pub config: UspConfig,
    /// Session connection id, sent in the handshake and stamped on every
    /// outbound frame for log correlation.
    pub connection_id: String,
}

/// Enforces the turn-boundary contract on the inbound stream: content
/// messages are only valid between `turn.start` and `turn.end`, and turn
/// markers must alternate. Violations are protocol errors.
#[derive(Debug, Default)]
pub(crate) struct TurnTracker {
    in_turn: bool,
}

impl TurnTracker {
    pub fn observe(&mut self, message: &ServiceMessage) -> Result<(), UspError> {
        match message {
            ServiceMessage::TurnStart(_) => {
                if self.in_turn {
                    return Err(UspError::ProtocolError(
                        "turn.start received while a turn is already open".to_string(),
                    ));
                }
                self.in_turn = true;
                Ok(())
            }
            ServiceMessage::TurnEnd(_) => {
                if !self.in_turn {
                    return Err(UspError::ProtocolError(
                        "turn.end received with no open turn".to_string(),
                    ));
                }
                self.in_turn = false;
                Ok(())
            }
            ServiceMessage::Unknown { .. } => Ok(()),
            content if content.is_turn_content() => {
                if !self.in_turn {
                    return Err(UspError::ProtocolError(format!(
                        "{} received outside a turn",
                        content.path()
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Run the transport for one session until it closes or fails.
pub(crate) async fn run(
    params: ConnectionParams,
    state: Arc<StateCell>,
    mut audio_rx: mpsc::Receiver<Bytes>,
    mut shutdown_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let config = params.config;
    let connection_id = params.connection_id;

    let url = config.build_websocket_url();
    let request = match build_request(&config, &connection_id, &url) {
        Ok(request) => request,
        Err(err) => {
            fail(&state, &events, err);
            return;
        }
    };

    let connect_result = match timeout(config.connect_timeout, connect_async(request)).await {
        Ok(result) => result,
        Err(_) => {
            fail(
                &state,
                &events,
                UspError::ConnectionFailed(format!(
                    "handshake with {url} timed out after {:?}",
                    config.connect_timeout
                )),
            );
            return;
        }
    };

    let (ws, _response) = match connect_result {
        Ok(ok) => ok,
        Err(e) => {
            let detail = e.to_string();
            let err = if detail.contains("401") || detail.contains("Unauthorized") {
                UspError::AuthenticationFailed(
                    "service rejected the subscription key".to_string(),
                )
            } else if detail.contains("403") || detail.contains("Forbidden") {
                UspError::AuthenticationFailed(
                    "service refused access; subscription may be inactive or region wrong"
                        .to_string(),
                )
            } else {
                UspError::ConnectionFailed(detail)
            };
            fail(&state, &events, err);
            return;
        }
    };

    info!(%connection_id, "connected to recognition service");

    let (mut sink, mut stream) = ws.split();

    if !state.transition(SessionState::Active) {
        // Shutdown won the race against the handshake; release the transport.
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    // Announce the session before any audio.
    let greeting = codec::encode_text_message(
        "speech.config",
        &connection_id,
        &speech_config_body(),
    );
    if let Err(e) = sink.send(Message::Text(greeting.into())).await {
        fail(
            &state,
            &events,
            UspError::NetworkError(format!("failed to send speech.config: {e}")),
        );
        return;
    }

    let content_type = config.content_type();
    let mut decoder = MessageDecoder::new();
    let mut turns = TurnTracker::default();
    let mut draining = false;

    'io: loop {
        tokio::select! {
            // Audio first: outbound latency is the product's latency.
            biased;

            frame = audio_rx.recv(), if !draining => {
                match frame {
                    Some(payload) => {
                        let frame = codec::encode_audio_frame(&connection_id, &content_type, &payload);
                        if let Err(e) = sink.send(Message::Binary(frame)).await {
                            fail(&state, &events, UspError::NetworkError(format!("failed to send audio: {e}")));
                            return;
                        }
                    }
                    None => {
                        // Handle dropped without an explicit shutdown; drain anyway.
                        draining = true;
                        flush_and_mark_end(&mut sink, &mut audio_rx, &connection_id, &content_type).await;
                    }
                }
            }

            _ = &mut shutdown_rx, if !draining => {
                debug!(%connection_id, "shutdown requested, draining session");
                draining = true;
                flush_and_mark_end(&mut sink, &mut audio_rx, &connection_id, &content_type).await;
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let decoded = match decoder.push(text.as_bytes()) {
                            Ok(messages) => messages,
                            Err(err) => {
                                fail(&state, &events, err);
                                return;
                            }
                        };
                        for message in decoded {
                            if let Err(err) = turns.observe(&message) {
                                fail(&state, &events, err);
                                return;
                            }
                            let closes_turn = matches!(message, ServiceMessage::TurnEnd(_));
                            if config.interim_results
                                || !matches!(message, ServiceMessage::SpeechHypothesis(_))
                            {
                                let _ = events.send(SessionEvent::Message(message));
                            }
                            if draining && closes_turn {
                                // Final turn delivered; release the transport.
                                let _ = sink.send(Message::Close(None)).await;
                                break 'io;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(bytes = data.len(), "ignoring binary frame from service");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if draining {
                            debug!(?frame, "service closed the connection during drain");
                            break 'io;
                        }
                        fail(
                            &state,
                            &events,
                            UspError::NetworkError("connection closed by service".to_string()),
                        );
                        return;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if draining {
                            warn!(error = %e, "transport error during drain");
                            break 'io;
                        }
                        fail(
                            &state,
                            &events,
                            UspError::NetworkError(format!("websocket error: {e}")),
                        );
                        return;
                    }
                    None => {
                        if draining {
                            break 'io;
                        }
                        fail(
                            &state,
                            &events,
                            UspError::NetworkError("connection closed by service".to_string()),
                        );
                        return;
                    }
                }
            }
        }
    }

    debug!(%connection_id, "connection task finished draining");
}

/// Flush audio frames already accepted into the queue, then send the
/// zero-length end-of-audio marker so the service finalizes the last
/// utterance. Accepted bytes are never dropped.
async fn flush_and_mark_end(
    sink: &mut WsSink,
    audio_rx: &mut mpsc::Receiver<Bytes>,
    connection_id: &str,
    content_type: &str,
) {
    audio_rx.close();
    while let Some(payload) = audio_rx.recv().await {
        let frame = codec::encode_audio_frame(connection_id, content_type, &payload);
        if let Err(e) = sink.send(Message::Binary(frame)).await {
            warn!(error = %e, "failed to flush queued audio during drain");
            return;
        }
    }

    let marker = codec::encode_audio_frame(connection_id, content_type, &[]);
    if let Err(e) = sink.send(Message::Binary(marker)).await {
        warn!(error = %e, "failed to send end-of-audio marker");
    }
}

/// Move the session to `Failed` and emit the error event. The transition
/// guard ensures only the first failure is reported.
fn fail(state: &StateCell, events: &mpsc::UnboundedSender<SessionEvent>, err: UspError) {
    if state.transition(SessionState::Failed) {
        error!(error = %err, "session failed");
        let _ = events.send(SessionEvent::Error(err));
    }
}

/// Handshake request carrying the session credentials and identity.
fn build_request(
    config: &UspConfig,
    connection_id: &str,
    url: &str,
) -> Result<Request<()>, UspError> {
    Request::builder()
        .method("GET")
        .uri(url)
        .header("Host", config.host()?)
        .header("Upgrade", "websocket")
        .header("Connection", "upgrade")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Sec-WebSocket-Version", "13")
        .header("Ocp-Apim-Subscription-Key", &config.subscription_key)
        .header("X-ConnectionId", connection_id)
        .header("Content-Type", config.content_type())
        .body(())
        .map_err(|e| UspError::ConnectionFailed(format!("failed to build handshake request: {e}")))
}

/// Body of the `speech.config` greeting describing this client.
fn speech_config_body() -> String {
    serde_json::json!({
        "context": {
            "system": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "os": {
                "platform": std::env::consts::OS,
            },
        }
    })
    .to_string()
}
