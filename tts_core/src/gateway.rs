//! Upstream speech provider client.
//!
//! [`SpeechSynthesizer`] is the seam the server depends on; the OpenAI
//! implementation streams the response body back as an [`AudioStream`]
//! instead of buffering the whole utterance.
use std::{fmt, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{AudioStream, GatewayError, ResponseFormat, SpeechRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "tts-1";
const SPEECH_PATH: &str = "/v1/audio/speech";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns validated text into a lazily readable audio byte stream.
///
/// Callers must either drain the returned stream or drop it; dropping aborts
/// the underlying read.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream, GatewayError>;

    /// Format of the bytes produced by [`SpeechSynthesizer::synthesize`].
    fn response_format(&self) -> ResponseFormat {
        ResponseFormat::Mp3
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub response_format: ResponseFormat,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            response_format: ResponseFormat::default(),
        }
    }
}

// Keep the credential out of logs.
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("response_format", &self.response_format)
            .finish()
    }
}

/// Body of `POST /v1/audio/speech`.
#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

#[derive(Debug, Clone)]
pub struct OpenAiSpeechClient {
    config: GatewayConfig,
    client: Client,
}

impl OpenAiSpeechClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        if config.api_key.trim().is_empty() {
            return Err(GatewayError::Config("API key must not be empty".to_string()));
        }
        // No overall timeout here: it would also cap the streamed body.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(GatewayError::Network)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), SPEECH_PATH)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream, GatewayError> {
        let body = SpeechBody {
            model: &self.config.model,
            input: &request.text,
            voice: request.voice.as_str(),
            speed: request.speed,
            response_format: self.config.response_format.as_str(),
        };

        debug!(voice = %request.voice, chars = request.text.chars().count(), "requesting speech");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "speech provider rejected request");
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| GatewayError::Read(e.to_string()))
            .boxed())
    }

    fn response_format(&self) -> ResponseFormat {
        self.config.response_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Voice;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> OpenAiSpeechClient {
        let mut config = GatewayConfig::new("test-key");
        config.base_url = server.url();
        OpenAiSpeechClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_synthesize_streams_body() {
        let mut server = mockito::Server::new_async().await;
        let audio = vec![7u8; 40_000];
        let mock = server
            .mock("POST", "/v1/audio/speech")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "tts-1",
                "input": "Hello",
                "voice": "nova",
                "speed": 1.5,
                "response_format": "mp3"
            })))
            .with_status(200)
            .with_header("content-type", "audio/mpeg")
            .with_body(audio.clone())
            .create_async()
            .await;

        let client = client_for(&server);
        let request = SpeechRequest::new("Hello", Voice::Nova, 1.5);
        let mut stream = client.synthesize(&request).await.unwrap();

        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, audio);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/audio/speech")
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;

        let client = client_for(&server);
        let request = SpeechRequest::new("Hello", Voice::Alloy, 1.0);
        let err = client.synthesize(&request).await.err().unwrap();
        assert!(matches!(err, GatewayError::Upstream { status: 401, .. }));
        assert_eq!(err.to_string(), "OpenAI TTS API error: 401 - invalid api key");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_network_error() {
        let mut config = GatewayConfig::new("test-key");
        // Port 9 (discard) on localhost is closed in test environments.
        config.base_url = "http://127.0.0.1:9".to_string();
        let client = OpenAiSpeechClient::new(config).unwrap();
        let request = SpeechRequest::new("Hello", Voice::Alloy, 1.0);
        let err = client.synthesize(&request).await.err().unwrap();
        assert!(matches!(err, GatewayError::Network(_)));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let err = OpenAiSpeechClient::new(GatewayConfig::new("  ")).err().unwrap();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", GatewayConfig::new("sk-secret"));
        assert!(!rendered.contains("sk-secret"));
    }
}
