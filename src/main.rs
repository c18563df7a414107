//! Console client: stream an audio file through one recognition session and
//! print the events it produces.
//!
//! ```text
//! SPEECH_KEY=<subscription-key> SPEECH_REGION=westeurope usp-client audio.wav
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};

use usp_client::{ServiceRegion, SessionCallbacks, UspClient, UspConfig};

/// 100 ms of 16 kHz 16-bit mono PCM per frame.
const CHUNK_BYTES: usize = 3200;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Install the crypto provider before any TLS connection is attempted.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install default crypto provider"))?;

    let mut args = env::args().skip(1);
    let audio_path = args
        .next()
        .ok_or_else(|| anyhow!("usage: usp-client <audio-file>"))?;
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument '{extra}'");
    }

    let subscription_key =
        env::var("SPEECH_KEY").context("SPEECH_KEY environment variable must be set")?;
    let region = env::var("SPEECH_REGION")
        .map(|r| r.parse::<ServiceRegion>().unwrap_or_default())
        .unwrap_or_default();

    // Whole-file read into a dynamically sized buffer; a file shorter than
    // one chunk simply streams as a single short frame.
    let audio = std::fs::read(&audio_path)
        .with_context(|| format!("failed to read audio file {audio_path}"))?;
    println!("streaming {} bytes from {audio_path}", audio.len());

    let callbacks = SessionCallbacks::new()
        .with_turn_start(Arc::new(|_turn| {
            Box::pin(async {
                println!("turn started");
            })
        }))
        .with_speech_start_detected(Arc::new(|start| {
            Box::pin(async move {
                println!("speech detected at {:.2}s", start.offset_seconds());
            })
        }))
        .with_speech_hypothesis(Arc::new(|hypothesis| {
            Box::pin(async move {
                println!("  ... {}", hypothesis.text);
            })
        }))
        .with_speech_phrase(Arc::new(|phrase| {
            Box::pin(async move {
                match phrase.text() {
                    Some(text) => println!(
                        "recognized ({:.0}%): {text}",
                        phrase.confidence() * 100.0
                    ),
                    None => println!("no speech recognized ({:?})", phrase.recognition_status),
                }
            })
        }))
        .with_speech_end_detected(Arc::new(|end| {
            Box::pin(async move {
                println!("speech ended at {:.2}s", end.offset_seconds());
            })
        }))
        .with_turn_end(Arc::new(|_turn| {
            Box::pin(async {
                println!("turn ended");
            })
        }))
        .with_error(Arc::new(|err| {
            Box::pin(async move {
                eprintln!("session error: {err}");
            })
        }));

    let config = UspConfig {
        subscription_key,
        region,
        ..Default::default()
    };

    let mut session = UspClient::initialize(config, callbacks)?;
    session.wait_until_active(Duration::from_secs(30)).await?;

    for chunk in audio.chunks(CHUNK_BYTES) {
        session.write(chunk.to_vec()).await?;
    }

    // Drain: remaining results arrive through the callbacks before this
    // returns, so no wait loop is needed.
    session
        .shutdown_with_timeout(Duration::from_secs(30))
        .await?;

    println!("session finished ({})", session.state());
    Ok(())
}
