use thiserror::Error;

/// Failures raised while talking to the speech provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider answered with a non-success status.
    #[error("OpenAI TTS API error: {status} - {message}")]
    Upstream { status: u16, message: String },

    /// The request never produced a response (DNS, TLS, connect, ...).
    #[error("OpenAI TTS request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// The response body broke off mid-transfer.
    #[error("Audio stream read failed: {0}")]
    Read(String),

    /// A voice name outside the provider's catalogue.
    #[error("Unsupported voice: {0}")]
    InvalidVoice(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

