//! Callback registration and the per-session dispatch task.
//!
//! Each session owns one dispatch task consuming an event channel fed by
//! the transport task. Because a single task drains the channel, handlers
//! for one session never run concurrently and messages are delivered in the
//! order the session observed them on the wire. Independent sessions have
//! independent dispatch tasks and may dispatch concurrently.
//!
//! Handlers are async closures. A handler that panics does not take the
//! dispatch loop down: the panic is caught and surfaced as a session error
//! through the `on_error` slot.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::UspError;
use crate::messages::{
    ServiceMessage, SpeechEndDetected, SpeechHypothesis, SpeechPhrase, SpeechStartDetected,
    TurnEnd, TurnStart,
};

/// Async handler for one message kind. Session context travels by closure
/// capture rather than an opaque context pointer.
pub type EventHandler<T> =
    Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The callback set registered at session initialization, one optional slot
/// per message kind. Unset slots are silently skipped. The set is fixed for
/// the session's lifetime.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    pub on_speech_start_detected: Option<EventHandler<SpeechStartDetected>>,
    pub on_speech_end_detected: Option<EventHandler<SpeechEndDetected>>,
    pub on_speech_hypothesis: Option<EventHandler<SpeechHypothesis>>,
    pub on_speech_phrase: Option<EventHandler<SpeechPhrase>>,
    pub on_turn_start: Option<EventHandler<TurnStart>>,
    pub on_turn_end: Option<EventHandler<TurnEnd>>,
    pub on_error: Option<EventHandler<UspError>>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speech_start_detected(mut self, handler: EventHandler<SpeechStartDetected>) -> Self {
        self.on_speech_start_detected = Some(handler);
        self
    }

    pub fn with_speech_end_detected(mut self, handler: EventHandler<SpeechEndDetected>) -> Self {
        self.on_speech_end_detected = Some(handler);
        self
    }

    pub fn with_speech_hypothesis(mut self, handler: EventHandler<SpeechHypothesis>) -> Self {
        self.on_speech_hypothesis = Some(handler);
        self
    }

    pub fn with_speech_phrase(mut self, handler: EventHandler<SpeechPhrase>) -> Self {
        self.on_speech_phrase = Some(handler);
        self
    }

    pub fn with_turn_start(mut self, handler: EventHandler<TurnStart>) -> Self {
        self.on_turn_start = Some(handler);
        self
    }

    pub fn with_turn_end(mut self, handler: EventHandler<TurnEnd>) -> Self {
        self.on_turn_end = Some(handler);
        self
    }

    pub fn with_error(mut self, handler: EventHandler<UspError>) -> Self {
        self.on_error = Some(handler);
        self
    }
}

/// One event queued for dispatch.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// A decoded service message.
    Message(ServiceMessage),
    /// A session-level error to surface through `on_error`.
    Error(UspError),
}

/// Spawn the dispatch task for one session.
pub(crate) fn spawn(
    callbacks: SessionCallbacks,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(run(callbacks, rx))
}

async fn run(callbacks: SessionCallbacks, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Message(message) => {
                if let Err(reason) = deliver(&callbacks, message).await {
                    warn!(%reason, "handler failed; surfacing as session error");
                    fire_error(&callbacks, UspError::HandlerFailed(reason)).await;
                }
            }
            SessionEvent::Error(err) => fire_error(&callbacks, err).await,
        }
    }
    debug!("dispatch task finished");
}

/// Route one message to its handler slot. Returns a description of the
/// failure if the handler panicked.
async fn deliver(callbacks: &SessionCallbacks, message: ServiceMessage) -> Result<(), String> {
    match message {
        ServiceMessage::SpeechStartDetected(payload) => {
            invoke(
                &callbacks.on_speech_start_detected,
                payload,
                "speech.startDetected",
            )
            .await
        }
        ServiceMessage::SpeechEndDetected(payload) => {
            invoke(
                &callbacks.on_speech_end_detected,
                payload,
                "speech.endDetected",
            )
            .await
        }
        ServiceMessage::SpeechHypothesis(payload) => {
            invoke(&callbacks.on_speech_hypothesis, payload, "speech.hypothesis").await
        }
        ServiceMessage::SpeechPhrase(payload) => {
            invoke(&callbacks.on_speech_phrase, payload, "speech.phrase").await
        }
        ServiceMessage::TurnStart(payload) => {
            invoke(&callbacks.on_turn_start, payload, "turn.start").await
        }
        ServiceMessage::TurnEnd(payload) => {
            invoke(&callbacks.on_turn_end, payload, "turn.end").await
        }
        ServiceMessage::Unknown { path, preview } => {
            debug!(%path, %preview, "ignoring unrecognized service message");
            Ok(())
        }
    }
}

async fn invoke<T>(
    slot: &Option<EventHandler<T>>,
    payload: T,
    label: &str,
) -> Result<(), String> {
    let Some(handler) = slot else {
        return Ok(());
    };
    match AssertUnwindSafe(handler(payload)).catch_unwind().await {
        Ok(()) => Ok(()),
        Err(panic) => Err(format!("{label} handler panicked: {}", panic_message(&panic))),
    }
}

async fn fire_error(callbacks: &SessionCallbacks, err: UspError) {
    let Some(handler) = &callbacks.on_error else {
        error!(%err, "session error with no error handler registered");
        return;
    };
    if AssertUnwindSafe(handler(err))
        .catch_unwind()
        .await
        .is_err()
    {
        error!("error handler panicked");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_handler<T: Send + 'static>(
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> EventHandler<T> {
        Arc::new(move |_payload| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(label.to_string());
            })
        })
    }

    fn message(path: &str, body: &str) -> ServiceMessage {
        ServiceMessage::from_path(path, body).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let callbacks = SessionCallbacks::new()
            .with_turn_start(recording_handler(log.clone(), "turn.start"))
            .with_speech_hypothesis(recording_handler(log.clone(), "hypothesis"))
            .with_speech_phrase(recording_handler(log.clone(), "phrase"))
            .with_turn_end(recording_handler(log.clone(), "turn.end"));

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn(callbacks, rx);

        tx.send(SessionEvent::Message(message("turn.start", "{}")))
            .unwrap();
        tx.send(SessionEvent::Message(message(
            "speech.hypothesis",
            r#"{"Text": "a", "Offset": 0, "Duration": 0}"#,
        )))
        .unwrap();
        tx.send(SessionEvent::Message(message(
            "speech.phrase",
            r#"{"RecognitionStatus": "Success", "DisplayText": "a"}"#,
        )))
        .unwrap();
        tx.send(SessionEvent::Message(message("turn.end", "{}")))
            .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            ["turn.start", "hypothesis", "phrase", "turn.end"]
        );
    }

    #[tokio::test]
    async fn test_unregistered_slots_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let callbacks =
            SessionCallbacks::new().with_speech_phrase(recording_handler(log.clone(), "phrase"));

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn(callbacks, rx);

        tx.send(SessionEvent::Message(message("turn.start", "{}")))
            .unwrap();
        tx.send(SessionEvent::Message(message(
            "speech.phrase",
            r#"{"RecognitionStatus": "Success", "DisplayText": "a"}"#,
        )))
        .unwrap();
        tx.send(SessionEvent::Message(message("turn.end", "{}")))
            .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(*log.lock().unwrap(), ["phrase"]);
    }

    #[tokio::test]
    async fn test_handler_panic_surfaces_as_session_error() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_log = errors.clone();
        let seen_after = Arc::new(Mutex::new(Vec::new()));

        let callbacks = SessionCallbacks::new()
            .with_speech_phrase(Arc::new(|_phrase| {
                Box::pin(async { panic!("phrase handler exploded") })
            }))
            .with_turn_end(recording_handler(seen_after.clone(), "turn.end"))
            .with_error(Arc::new(move |err| {
                let errors = errors_log.clone();
                Box::pin(async move {
                    errors.lock().unwrap().push(err.to_string());
                })
            }));

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn(callbacks, rx);

        tx.send(SessionEvent::Message(message(
            "speech.phrase",
            r#"{"RecognitionStatus": "Success", "DisplayText": "a"}"#,
        )))
        .unwrap();
        // The loop must survive the panic and keep delivering.
        tx.send(SessionEvent::Message(message("turn.end", "{}")))
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("phrase handler exploded"));
        assert_eq!(*seen_after.lock().unwrap(), ["turn.end"]);
    }

    #[tokio::test]
    async fn test_error_events_reach_error_handler() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_log = errors.clone();

        let callbacks = SessionCallbacks::new().with_error(Arc::new(move |err| {
            let errors = errors_log.clone();
            Box::pin(async move {
                errors.lock().unwrap().push(err.to_string());
            })
        }));

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn(callbacks, rx);

        tx.send(SessionEvent::Error(UspError::NetworkError(
            "connection dropped".to_string(),
        )))
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("connection dropped"));
    }
}
