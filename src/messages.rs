//! Typed protocol messages received from the recognition service.
//!
//! The service sends header-framed text messages whose `Path` header names
//! the message kind and whose body is a JSON object:
//!
//! ```text
//! X-RequestId:5FD045C026B14B0E926AA65EF3E00B72
//! Path:speech.phrase
//! Content-Type:application/json; charset=utf-8
//!
//! {"RecognitionStatus":"Success","DisplayText":"Hello world.","Offset":5000000,"Duration":28500000}
//! ```
//!
//! [`ServiceMessage::from_path`] turns a path/body pair into the matching
//! typed variant. Unrecognized paths become [`ServiceMessage::Unknown`] so a
//! newer service does not break this client; a payload that fails to parse
//! for a known path is a protocol error.

use serde::Deserialize;

use crate::error::UspError;

/// 100-nanosecond ticks per second, the unit the service reports offsets in.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

// =============================================================================
// Recognition Status
// =============================================================================

/// Outcome of a recognition attempt, carried by `speech.phrase` messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionStatus {
    /// Speech was successfully recognized.
    Success,
    /// Audio was processed but no speech was detected.
    NoMatch,
    /// Too much silence before any speech.
    InitialSilenceTimeout,
    /// Unintelligible audio (noise, overlapping speakers).
    BabbleTimeout,
    /// The service failed while processing the turn.
    Error,
    /// The dictation session has ended.
    EndOfDictation,
    /// A status value this client does not know yet.
    Unknown(String),
}

impl RecognitionStatus {
    /// True when the phrase carries a usable transcription.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// True when the status reports a service-side failure.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::BabbleTimeout)
    }

    /// True when audio was processed but contained no speech.
    #[inline]
    pub fn is_no_speech(&self) -> bool {
        matches!(self, Self::NoMatch | Self::InitialSilenceTimeout)
    }

    /// Map a wire status tag to its variant. Unknown tags are preserved for
    /// forward compatibility, so this never fails.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Success" => Self::Success,
            "NoMatch" => Self::NoMatch,
            "InitialSilenceTimeout" => Self::InitialSilenceTimeout,
            "BabbleTimeout" => Self::BabbleTimeout,
            "Error" => Self::Error,
            "EndOfDictation" => Self::EndOfDictation,
            _ => Self::Unknown(tag.to_string()),
        }
    }
}

impl std::str::FromStr for RecognitionStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_tag(s))
    }
}

impl<'de> Deserialize<'de> for RecognitionStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&s))
    }
}

// =============================================================================
// Phrase Payloads
// =============================================================================

/// One ranked alternative in a detailed-format phrase.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NBest {
    /// Confidence score from 0.0 to 1.0.
    pub confidence: f64,

    /// Raw recognition without formatting ("one two three").
    pub lexical: String,

    /// Inverse-text-normalized form ("123").
    #[serde(rename = "ITN")]
    pub itn: String,

    /// ITN form with profanity masking applied.
    #[serde(rename = "MaskedITN")]
    pub masked_itn: String,

    /// Display text with punctuation and capitalization.
    pub display: String,
}

/// Final recognition result for one utterance (`speech.phrase`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechPhrase {
    /// Outcome of the recognition attempt.
    pub recognition_status: RecognitionStatus,

    /// Start position in the audio stream (100-nanosecond units).
    #[serde(default)]
    pub offset: u64,

    /// Duration of the recognized speech (100-nanosecond units).
    #[serde(default)]
    pub duration: u64,

    /// Display text; present in simple output format.
    #[serde(default)]
    pub display_text: Option<String>,

    /// Ranked alternatives; present in detailed output format.
    #[serde(default, rename = "NBest")]
    pub n_best: Option<Vec<NBest>>,
}

impl SpeechPhrase {
    /// Best transcription text, regardless of output format.
    pub fn text(&self) -> Option<&str> {
        if let Some(text) = &self.display_text {
            return Some(text.as_str());
        }
        self.n_best
            .as_ref()
            .and_then(|alternatives| alternatives.first())
            .map(|best| best.display.as_str())
    }

    /// Confidence of the best alternative. Simple-format results carry no
    /// confidence, so successful ones report 1.0.
    pub fn confidence(&self) -> f32 {
        if let Some(best) = self.n_best.as_ref().and_then(|a| a.first()) {
            return best.confidence as f32;
        }
        if self.recognition_status.is_success() {
            1.0
        } else {
            0.0
        }
    }

    /// Start of the utterance in seconds.
    #[inline]
    pub fn offset_seconds(&self) -> f64 {
        self.offset as f64 / TICKS_PER_SECOND
    }

    /// Duration of the utterance in seconds.
    #[inline]
    pub fn duration_seconds(&self) -> f64 {
        self.duration as f64 / TICKS_PER_SECOND
    }
}

/// Interim recognition result for speech still in progress
/// (`speech.hypothesis`). The text may change as more audio arrives.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechHypothesis {
    /// Current partial transcription.
    pub text: String,

    /// Start position in the audio stream (100-nanosecond units).
    #[serde(default)]
    pub offset: u64,

    /// Duration processed so far (100-nanosecond units).
    #[serde(default)]
    pub duration: u64,
}

impl SpeechHypothesis {
    /// Start of the hypothesized speech in seconds.
    #[inline]
    pub fn offset_seconds(&self) -> f64 {
        self.offset as f64 / TICKS_PER_SECOND
    }
}

// =============================================================================
// Detection and Turn Payloads
// =============================================================================

/// The service detected the beginning of speech (`speech.startDetected`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechStartDetected {
    /// Stream position where speech was detected (100-nanosecond units).
    #[serde(default)]
    pub offset: u64,
}

impl SpeechStartDetected {
    #[inline]
    pub fn offset_seconds(&self) -> f64 {
        self.offset as f64 / TICKS_PER_SECOND
    }
}

/// The service detected the end of speech (`speech.endDetected`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechEndDetected {
    /// Stream position where speech ended (100-nanosecond units).
    #[serde(default)]
    pub offset: u64,
}

impl SpeechEndDetected {
    #[inline]
    pub fn offset_seconds(&self) -> f64 {
        self.offset as f64 / TICKS_PER_SECOND
    }
}

/// A recognition turn opened (`turn.start`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnStart {
    /// Service-side context for the turn.
    #[serde(default)]
    pub context: Option<TurnContext>,
}

/// Context block inside `turn.start`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnContext {
    /// Tag correlating the turn with service-side logs.
    #[serde(default, rename = "serviceTag")]
    pub service_tag: Option<String>,
}

/// A recognition turn closed (`turn.end`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnEnd {}

// =============================================================================
// Message Enum
// =============================================================================

/// A decoded service message, tagged by kind.
#[derive(Debug, Clone)]
pub enum ServiceMessage {
    /// Speech was detected in the audio stream.
    SpeechStartDetected(SpeechStartDetected),
    /// End of a speech segment was detected.
    SpeechEndDetected(SpeechEndDetected),
    /// Interim transcription (may change).
    SpeechHypothesis(SpeechHypothesis),
    /// Final transcription for one utterance.
    SpeechPhrase(SpeechPhrase),
    /// Beginning of a recognition turn.
    TurnStart(TurnStart),
    /// End of a recognition turn.
    TurnEnd(TurnEnd),
    /// A message kind this client does not understand. Carried for
    /// diagnostics; never fatal.
    Unknown {
        /// The unrecognized `Path` header value.
        path: String,
        /// Truncated body for logging.
        preview: String,
    },
}

impl ServiceMessage {
    /// Decode a message from its `Path` header value and JSON body.
    ///
    /// Unknown paths yield [`ServiceMessage::Unknown`]; a body that does not
    /// parse for a known path is a protocol error.
    pub fn from_path(path: &str, body: &str) -> Result<Self, UspError> {
        fn parse<'de, T: Deserialize<'de>>(path: &str, body: &'de str) -> Result<T, UspError> {
            serde_json::from_str(body)
                .map_err(|e| UspError::ProtocolError(format!("malformed {path} payload: {e}")))
        }

        match path {
            "speech.startDetected" => Ok(Self::SpeechStartDetected(parse(path, body)?)),
            "speech.endDetected" => Ok(Self::SpeechEndDetected(parse(path, body)?)),
            "speech.hypothesis" => Ok(Self::SpeechHypothesis(parse(path, body)?)),
            "speech.phrase" => Ok(Self::SpeechPhrase(parse(path, body)?)),
            "turn.start" => Ok(Self::TurnStart(parse(path, body)?)),
            "turn.end" => Ok(Self::TurnEnd(parse(path, body)?)),
            _ => Ok(Self::Unknown {
                path: path.to_string(),
                preview: text_preview(body),
            }),
        }
    }

    /// The wire path of this message kind.
    pub fn path(&self) -> &str {
        match self {
            Self::SpeechStartDetected(_) => "speech.startDetected",
            Self::SpeechEndDetected(_) => "speech.endDetected",
            Self::SpeechHypothesis(_) => "speech.hypothesis",
            Self::SpeechPhrase(_) => "speech.phrase",
            Self::TurnStart(_) => "turn.start",
            Self::TurnEnd(_) => "turn.end",
            Self::Unknown { path, .. } => path.as_str(),
        }
    }

    /// True for messages reporting speech content or detection, i.e. every
    /// kind that is only valid inside an open turn.
    pub fn is_turn_content(&self) -> bool {
        matches!(
            self,
            Self::SpeechStartDetected(_)
                | Self::SpeechEndDetected(_)
                | Self::SpeechHypothesis(_)
                | Self::SpeechPhrase(_)
        )
    }
}

/// Truncate a body for diagnostics.
fn text_preview(text: &str) -> String {
    const MAX_LEN: usize = 100;
    if text.len() <= MAX_LEN {
        text.to_string()
    } else {
        let mut end = MAX_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognition_status_from_str() {
        assert_eq!(
            "Success".parse::<RecognitionStatus>().unwrap(),
            RecognitionStatus::Success
        );
        assert_eq!(
            "NoMatch".parse::<RecognitionStatus>().unwrap(),
            RecognitionStatus::NoMatch
        );
        assert!(matches!(
            "SomethingNew".parse::<RecognitionStatus>().unwrap(),
            RecognitionStatus::Unknown(_)
        ));
    }

    #[test]
    fn test_recognition_status_classification() {
        assert!(RecognitionStatus::Success.is_success());
        assert!(RecognitionStatus::Error.is_error());
        assert!(RecognitionStatus::BabbleTimeout.is_error());
        assert!(RecognitionStatus::NoMatch.is_no_speech());
        assert!(RecognitionStatus::InitialSilenceTimeout.is_no_speech());
        assert!(!RecognitionStatus::EndOfDictation.is_error());
    }

    #[test]
    fn test_phrase_simple_format() {
        let body = r#"{
            "RecognitionStatus": "Success",
            "Offset": 5000000,
            "Duration": 28500000,
            "DisplayText": "Hello world."
        }"#;
        let phrase: SpeechPhrase = serde_json::from_str(body).unwrap();

        assert_eq!(phrase.recognition_status, RecognitionStatus::Success);
        assert_eq!(phrase.text(), Some("Hello world."));
        assert!((phrase.confidence() - 1.0).abs() < 0.001);
        assert!((phrase.offset_seconds() - 0.5).abs() < 0.001);
        assert!((phrase.duration_seconds() - 2.85).abs() < 0.001);
    }

    #[test]
    fn test_phrase_detailed_format() {
        let body = r#"{
            "RecognitionStatus": "Success",
            "Offset": 0,
            "Duration": 0,
            "NBest": [
                {"Confidence": 0.95, "Lexical": "hello world", "ITN": "hello world",
                 "MaskedITN": "hello world", "Display": "Hello world."},
                {"Confidence": 0.61, "Lexical": "hollow world", "ITN": "hollow world",
                 "MaskedITN": "hollow world", "Display": "Hollow world."}
            ]
        }"#;
        let phrase: SpeechPhrase = serde_json::from_str(body).unwrap();

        assert_eq!(phrase.text(), Some("Hello world."));
        assert!((phrase.confidence() - 0.95).abs() < 0.001);
    }

    #[test]
    fn test_phrase_no_match_has_no_text() {
        let body = r#"{"RecognitionStatus": "NoMatch", "Offset": 0, "Duration": 0}"#;
        let phrase: SpeechPhrase = serde_json::from_str(body).unwrap();

        assert!(phrase.text().is_none());
        assert!((phrase.confidence() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_hypothesis_parsing() {
        let body = r#"{"Text": "hello wor", "Offset": 10000000, "Duration": 5000000}"#;
        let hypothesis: SpeechHypothesis = serde_json::from_str(body).unwrap();

        assert_eq!(hypothesis.text, "hello wor");
        assert!((hypothesis.offset_seconds() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_from_path_all_kinds() {
        let cases = [
            ("speech.startDetected", r#"{"Offset": 0}"#),
            ("speech.endDetected", r#"{"Offset": 0}"#),
            (
                "speech.hypothesis",
                r#"{"Text": "a", "Offset": 0, "Duration": 0}"#,
            ),
            (
                "speech.phrase",
                r#"{"RecognitionStatus": "Success", "DisplayText": "a"}"#,
            ),
            ("turn.start", r#"{"context": {"serviceTag": "tag"}}"#),
            ("turn.end", "{}"),
        ];

        for (path, body) in cases {
            let msg = ServiceMessage::from_path(path, body).unwrap();
            assert_eq!(msg.path(), path);
        }
    }

    #[test]
    fn test_from_path_unknown_is_diagnostic() {
        let msg = ServiceMessage::from_path("speech.fragment", r#"{"Text": "x"}"#).unwrap();
        assert!(matches!(msg, ServiceMessage::Unknown { .. }));
        assert_eq!(msg.path(), "speech.fragment");
    }

    #[test]
    fn test_from_path_malformed_payload_is_protocol_error() {
        let result = ServiceMessage::from_path("speech.hypothesis", r#"{"Offset": "not-a-number"}"#);
        assert!(matches!(result, Err(UspError::ProtocolError(_))));
    }

    #[test]
    fn test_turn_start_service_tag() {
        let msg =
            ServiceMessage::from_path("turn.start", r#"{"context": {"serviceTag": "abc"}}"#)
                .unwrap();
        match msg {
            ServiceMessage::TurnStart(start) => {
                assert_eq!(start.context.unwrap().service_tag.as_deref(), Some("abc"));
            }
            other => panic!("expected turn.start, got {}", other.path()),
        }
    }

    #[test]
    fn test_turn_content_classification() {
        let phrase = ServiceMessage::from_path(
            "speech.phrase",
            r#"{"RecognitionStatus": "Success", "DisplayText": "a"}"#,
        )
        .unwrap();
        let turn_end = ServiceMessage::from_path("turn.end", "{}").unwrap();

        assert!(phrase.is_turn_content());
        assert!(!turn_end.is_turn_content());
    }

    #[test]
    fn test_preview_truncates_long_bodies() {
        let long = format!("{{\"x\": \"{}\"}}", "y".repeat(300));
        let msg = ServiceMessage::from_path("some.new.path", &long).unwrap();
        match msg {
            ServiceMessage::Unknown { preview, .. } => {
                assert!(preview.len() <= 103);
                assert!(preview.ends_with("..."));
            }
            other => panic!("expected unknown message, got {}", other.path()),
        }
    }
}
