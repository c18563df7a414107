//! Session configuration for the recognition service.
//!
//! This module contains everything needed to describe where and how a
//! session connects:
//!
//! - Regional endpoint selection
//! - Output format and profanity handling
//! - Timeouts and interim-result behavior
//! - WebSocket URL construction

use std::time::Duration;

use url::Url;

use crate::error::{UspError, UspResult};

// =============================================================================
// Service Regions
// =============================================================================

/// Regions hosting the speech recognition service.
///
/// Choose the region closest to your users for optimal latency. Regions not
/// listed here can be supplied through the `Custom` variant without code
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceRegion {
    /// East US (Virginia)
    #[default]
    EastUs,
    /// West US (California)
    WestUs,
    /// West US 2 (Washington)
    WestUs2,
    /// Central US (Iowa)
    CentralUs,
    /// South Central US (Texas)
    SouthCentralUs,
    /// West Europe (Netherlands)
    WestEurope,
    /// North Europe (Ireland)
    NorthEurope,
    /// UK South (London)
    UkSouth,
    /// East Asia (Hong Kong)
    EastAsia,
    /// Southeast Asia (Singapore)
    SoutheastAsia,
    /// Japan East (Tokyo)
    JapanEast,
    /// Australia East (Sydney)
    AustraliaEast,
    /// A region identifier not listed above.
    Custom(String),
}

impl ServiceRegion {
    /// The region identifier used in service URLs.
    #[inline]
    pub fn as_str(&self) -> &str {
        match self {
            Self::EastUs => "eastus",
            Self::WestUs => "westus",
            Self::WestUs2 => "westus2",
            Self::CentralUs => "centralus",
            Self::SouthCentralUs => "southcentralus",
            Self::WestEurope => "westeurope",
            Self::NorthEurope => "northeurope",
            Self::UkSouth => "uksouth",
            Self::EastAsia => "eastasia",
            Self::SoutheastAsia => "southeastasia",
            Self::JapanEast => "japaneast",
            Self::AustraliaEast => "australiaeast",
            Self::Custom(region) => region.as_str(),
        }
    }

    /// Hostname of the recognition endpoint in this region.
    #[inline]
    pub fn hostname(&self) -> String {
        format!("{}.stt.speech.microsoft.com", self.as_str())
    }

    /// Base WebSocket URL of the recognition endpoint in this region.
    #[inline]
    pub fn websocket_base_url(&self) -> String {
        format!("wss://{}", self.hostname())
    }
}

impl std::str::FromStr for ServiceRegion {
    type Err = std::convert::Infallible;

    /// Parse a region identifier. Unknown identifiers become `Custom`, so
    /// parsing never fails.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let region = match s.to_lowercase().as_str() {
            "eastus" => Self::EastUs,
            "westus" => Self::WestUs,
            "westus2" => Self::WestUs2,
            "centralus" => Self::CentralUs,
            "southcentralus" => Self::SouthCentralUs,
            "westeurope" => Self::WestEurope,
            "northeurope" => Self::NorthEurope,
            "uksouth" => Self::UkSouth,
            "eastasia" => Self::EastAsia,
            "southeastasia" => Self::SoutheastAsia,
            "japaneast" => Self::JapanEast,
            "australiaeast" => Self::AustraliaEast,
            _ => Self::Custom(s.to_string()),
        };
        Ok(region)
    }
}

// =============================================================================
// Output Format
// =============================================================================

/// Level of detail requested for recognition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Basic results carrying only the display text of each phrase.
    Simple,

    /// Rich results with ranked alternatives and confidence scores.
    #[default]
    Detailed,
}

impl OutputFormat {
    /// Query-parameter value for this format.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Detailed => "detailed",
        }
    }
}

// =============================================================================
// Profanity Handling
// =============================================================================

/// How profane words appear in recognition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfanityOption {
    /// Replace profane words with asterisks.
    #[default]
    Masked,
    /// Omit profane words from the transcription entirely.
    Removed,
    /// Return the exact transcription including profanity.
    Raw,
}

impl ProfanityOption {
    /// Query-parameter value for this option.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Masked => "masked",
            Self::Removed => "removed",
            Self::Raw => "raw",
        }
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Configuration for one recognition session.
///
/// # Example
///
/// ```rust
/// use usp_client::{ServiceRegion, UspConfig};
///
/// let config = UspConfig {
///     subscription_key: "your-subscription-key".to_string(),
///     region: ServiceRegion::WestEurope,
///     language: "de-DE".to_string(),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct UspConfig {
    /// Subscription key presented during the transport handshake. The key is
    /// opaque to this client; it is forwarded as-is.
    pub subscription_key: String,

    /// Region of the recognition endpoint. Ignored when `endpoint` is set.
    pub region: ServiceRegion,

    /// BCP-47 language code for recognition (e.g. "en-US").
    pub language: String,

    /// Sample rate of the submitted PCM audio in Hz.
    pub sample_rate: u32,

    /// Level of detail for phrase results.
    pub output_format: OutputFormat,

    /// Profanity handling for transcription text.
    pub profanity: ProfanityOption,

    /// Deliver interim `speech.hypothesis` events while speech is still in
    /// progress. When disabled, hypotheses are dropped before dispatch.
    pub interim_results: bool,

    /// Full endpoint URL override (`ws://` or `wss://`). When set, the
    /// region-based URL is not used. Also how tests point a session at a
    /// local mock service.
    pub endpoint: Option<String>,

    /// Bound on transport establishment.
    pub connect_timeout: Duration,

    /// Default bound on shutdown drain before the session is forced to fail.
    pub shutdown_timeout: Duration,
}

impl Default for UspConfig {
    fn default() -> Self {
        Self {
            subscription_key: String::new(),
            region: ServiceRegion::default(),
            language: "en-US".to_string(),
            sample_rate: 16_000,
            output_format: OutputFormat::default(),
            profanity: ProfanityOption::default(),
            interim_results: true,
            endpoint: None,
            connect_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl UspConfig {
    /// Check the configuration for problems detectable without touching the
    /// network. Called by session initialization; failures here are returned
    /// synchronously to the caller.
    pub fn validate(&self) -> UspResult<()> {
        if self.endpoint.is_none() && self.subscription_key.is_empty() {
            return Err(UspError::AuthenticationFailed(
                "a subscription key is required".to_string(),
            ));
        }
        if self.language.is_empty() {
            return Err(UspError::ConfigurationError(
                "a recognition language is required".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(UspError::ConfigurationError(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            let url = Url::parse(endpoint).map_err(|e| {
                UspError::ConfigurationError(format!("invalid endpoint '{endpoint}': {e}"))
            })?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(UspError::ConfigurationError(format!(
                    "endpoint scheme must be ws or wss, got '{}'",
                    url.scheme()
                )));
            }
            if url.host_str().is_none() {
                return Err(UspError::ConfigurationError(format!(
                    "endpoint '{endpoint}' has no host"
                )));
            }
        }
        Ok(())
    }

    /// The complete WebSocket URL for this session.
    ///
    /// Custom endpoints are used verbatim; otherwise the region URL is
    /// combined with the recognition path and query parameters:
    ///
    /// ```text
    /// wss://eastus.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1
    ///     ?language=en-US&format=detailed&profanity=masked
    /// ```
    pub fn build_websocket_url(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }

        format!(
            "{}/speech/recognition/conversation/cognitiveservices/v1?language={}&format={}&profanity={}",
            self.region.websocket_base_url(),
            self.language,
            self.output_format.as_str(),
            self.profanity.as_str()
        )
    }

    /// `Host` header value for the transport handshake.
    pub fn host(&self) -> UspResult<String> {
        match &self.endpoint {
            Some(endpoint) => {
                let url = Url::parse(endpoint).map_err(|e| {
                    UspError::ConfigurationError(format!("invalid endpoint '{endpoint}': {e}"))
                })?;
                let host = url.host_str().ok_or_else(|| {
                    UspError::ConfigurationError(format!("endpoint '{endpoint}' has no host"))
                })?;
                Ok(match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                })
            }
            None => Ok(self.region.hostname()),
        }
    }

    /// `Content-Type` header value describing the submitted audio format.
    pub fn content_type(&self) -> String {
        format!(
            "audio/wav; codecs=audio/pcm; samplerate={}",
            self.sample_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_strings() {
        assert_eq!(ServiceRegion::EastUs.as_str(), "eastus");
        assert_eq!(
            ServiceRegion::WestEurope.hostname(),
            "westeurope.stt.speech.microsoft.com"
        );
        assert_eq!(
            ServiceRegion::SoutheastAsia.websocket_base_url(),
            "wss://southeastasia.stt.speech.microsoft.com"
        );
    }

    #[test]
    fn test_region_from_str() {
        assert_eq!(
            "eastus".parse::<ServiceRegion>().unwrap(),
            ServiceRegion::EastUs
        );
        assert_eq!(
            "WESTEUROPE".parse::<ServiceRegion>().unwrap(),
            ServiceRegion::WestEurope
        );
        assert_eq!(
            "somewhere-new".parse::<ServiceRegion>().unwrap(),
            ServiceRegion::Custom("somewhere-new".to_string())
        );
    }

    #[test]
    fn test_build_url_region() {
        let config = UspConfig {
            subscription_key: "key".to_string(),
            region: ServiceRegion::WestEurope,
            language: "de-DE".to_string(),
            profanity: ProfanityOption::Raw,
            ..Default::default()
        };

        let url = config.build_websocket_url();
        assert!(url.starts_with("wss://westeurope.stt.speech.microsoft.com"));
        assert!(url.contains("language=de-DE"));
        assert!(url.contains("format=detailed"));
        assert!(url.contains("profanity=raw"));
    }

    #[test]
    fn test_build_url_custom_endpoint() {
        let config = UspConfig {
            endpoint: Some("ws://127.0.0.1:9000".to_string()),
            ..Default::default()
        };
        assert_eq!(config.build_websocket_url(), "ws://127.0.0.1:9000");
        assert_eq!(config.host().unwrap(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate_requires_key() {
        let config = UspConfig::default();
        assert!(matches!(
            config.validate(),
            Err(UspError::AuthenticationFailed(_))
        ));

        // A custom endpoint (e.g. a local mock) does not need a key.
        let config = UspConfig {
            endpoint: Some("ws://127.0.0.1:9000".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = UspConfig {
            subscription_key: "key".to_string(),
            endpoint: Some("http://example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UspError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_sample_rate() {
        let config = UspConfig {
            subscription_key: "key".to_string(),
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UspError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_content_type() {
        let config = UspConfig {
            sample_rate: 8000,
            ..Default::default()
        };
        assert_eq!(
            config.content_type(),
            "audio/wav; codecs=audio/pcm; samplerate=8000"
        );
    }
}
