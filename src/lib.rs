//! Streaming client for a cloud speech-recognition service speaking the
//! Universal Speech Protocol.
//!
//! The client pushes framed audio over a WebSocket transport and delivers
//! the service's typed events (turn boundaries, interim hypotheses, final
//! phrases, speech start/end detection, errors) through per-kind callbacks,
//! strictly ordered per session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐      ┌───────────────────┐      ┌──────────────────┐
//! │   write()    │─────▶│ audio queue (mpsc)│─────▶│  Transport Task  │
//! └──────────────┘      └───────────────────┘      └────────┬─────────┘
//!                                                           │ decoded messages
//!                        ┌───────────────────┐              │
//!                        │ event queue (mpsc)│◀─────────────┘
//!                        └─────────┬─────────┘
//!                                  │
//!                        ┌─────────▼─────────┐
//!                        │   Dispatch Task   │─────▶ registered callbacks
//!                        └───────────────────┘
//! ```
//!
//! Each session runs one transport task and one dispatch task; the single
//! dispatch consumer is what guarantees in-order, non-overlapping callback
//! delivery per session while independent sessions proceed concurrently.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use usp_client::{ServiceRegion, SessionCallbacks, UspClient, UspConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UspConfig {
//!         subscription_key: "your-subscription-key".to_string(),
//!         region: ServiceRegion::WestEurope,
//!         ..Default::default()
//!     };
//!
//!     let callbacks = SessionCallbacks::new()
//!         .with_speech_hypothesis(Arc::new(|hypothesis| {
//!             Box::pin(async move {
//!                 println!("hearing: {}", hypothesis.text);
//!             })
//!         }))
//!         .with_speech_phrase(Arc::new(|phrase| {
//!             Box::pin(async move {
//!                 if let Some(text) = phrase.text() {
//!                     println!("recognized: {text}");
//!                 }
//!             })
//!         }));
//!
//!     let mut session = UspClient::initialize(config, callbacks)?;
//!     session.wait_until_active(Duration::from_secs(30)).await?;
//!
//!     session.write(std::fs::read("utterance.wav")?).await?;
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod messages;
pub mod session;

// Re-export the public surface for convenience
pub use client::UspClient;
pub use config::{OutputFormat, ProfanityOption, ServiceRegion, UspConfig};
pub use error::{UspError, UspResult};
pub use messages::{
    NBest, RecognitionStatus, ServiceMessage, SpeechEndDetected, SpeechHypothesis, SpeechPhrase,
    SpeechStartDetected, TurnContext, TurnEnd, TurnStart,
};
pub use session::{EventHandler, SessionCallbacks, SessionState};
