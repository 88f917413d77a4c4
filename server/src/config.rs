// Configuration for the server and the speech streaming pipeline

use std::time::Duration;

use tracing::warn;
use tts_core::{
    gateway::{DEFAULT_BASE_URL, DEFAULT_MODEL},
    GatewayConfig, ResponseFormat,
};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub max_connections: usize,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub tts_model: String,
    pub tts_response_format: ResponseFormat,
    pub stream: StreamConfig,
}

/// Tuning for a single speech stream.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub pacing_delay_ms: u64,
    pub max_chunk_bytes: usize,
    pub upstream_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub outbound_queue: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pacing_delay_ms: 5,
            max_chunk_bytes: 16 * 1024,
            upstream_timeout_secs: 60,
            read_timeout_secs: 30,
            outbound_queue: 64,
        }
    }
}

impl StreamConfig {
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            max_connections: 1000,
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            tts_model: DEFAULT_MODEL.to_string(),
            tts_response_format: ResponseFormat::Mp3,
            stream: StreamConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let stream_defaults = StreamConfig::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        let tts_response_format = match std::env::var("TTS_RESPONSE_FORMAT") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{e}, falling back to mp3");
                ResponseFormat::Mp3
            }),
            Err(_) => defaults.tts_response_format,
        };

        let stream = StreamConfig {
            pacing_delay_ms: env_parse("TTS_PACING_DELAY_MS")
                .unwrap_or(stream_defaults.pacing_delay_ms),
            max_chunk_bytes: env_parse("TTS_MAX_CHUNK_BYTES")
                .unwrap_or(stream_defaults.max_chunk_bytes),
            upstream_timeout_secs: env_parse("TTS_UPSTREAM_TIMEOUT_SECS")
                .unwrap_or(stream_defaults.upstream_timeout_secs),
            read_timeout_secs: env_parse("TTS_STREAM_READ_TIMEOUT_SECS")
                .unwrap_or(stream_defaults.read_timeout_secs),
            outbound_queue: env_parse("WS_OUTBOUND_QUEUE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(stream_defaults.outbound_queue),
        };

        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            cors_allowed_origins,
            max_connections: env_parse("MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            openai_base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            tts_model: std::env::var("TTS_MODEL").unwrap_or(defaults.tts_model),
            tts_response_format,
            stream,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Gateway settings, if a credential is configured.
    pub fn gateway_config(&self) -> Option<GatewayConfig> {
        let api_key = self.openai_api_key.clone()?;
        Some(GatewayConfig {
            api_key,
            base_url: self.openai_base_url.clone(),
            model: self.tts_model.clone(),
            response_format: self.tts_response_format,
        })
    }
}
