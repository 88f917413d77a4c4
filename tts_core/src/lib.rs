//! Speech synthesis primitives shared by the streaming server.
//!
//! This crate owns everything that talks to the upstream speech provider:
//! the voice catalogue, the validated [`SpeechRequest`], the
//! [`SpeechSynthesizer`] seam and its OpenAI implementation, plus the
//! helpers used to cut the provider's byte stream into wire frames.
mod error;
pub mod gateway;
pub mod stream;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use error::GatewayError;
pub use gateway::{GatewayConfig, OpenAiSpeechClient, SpeechSynthesizer};
pub use stream::{encode_chunk, split_frames, AudioStream};

/// Maximum number of characters accepted in a single request.
pub const MAX_TEXT_CHARS: usize = 4000;
/// Playback speed bounds accepted by the provider.
pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 4.0;
pub const DEFAULT_SPEED: f32 = 1.0;

/// Voices supported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl Voice {
    pub const ALL: [Voice; 6] = [
        Voice::Alloy,
        Voice::Echo,
        Voice::Fable,
        Voice::Onyx,
        Voice::Nova,
        Voice::Shimmer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Fable => "fable",
            Voice::Onyx => "onyx",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidVoice(s.to_string()))
    }
}

/// Container format requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Mp3,
    Opus,
    Aac,
    Flac,
    Wav,
    Pcm,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Mp3 => "mp3",
            ResponseFormat::Opus => "opus",
            ResponseFormat::Aac => "aac",
            ResponseFormat::Flac => "flac",
            ResponseFormat::Wav => "wav",
            ResponseFormat::Pcm => "pcm",
        }
    }

    /// Rough encoded bytes per second of speech.
    ///
    /// Compressed formats use the provider's nominal bitrate; `wav` and `pcm`
    /// are 24 kHz mono 16-bit.
    pub fn approx_bytes_per_second(&self) -> f64 {
        match self {
            ResponseFormat::Mp3 | ResponseFormat::Aac => 16_000.0,
            ResponseFormat::Opus => 8_000.0,
            ResponseFormat::Flac => 32_000.0,
            ResponseFormat::Wav | ResponseFormat::Pcm => 48_000.0,
        }
    }

    /// Approximate playback duration in seconds for `total_bytes` of audio.
    pub fn estimate_duration_secs(&self, total_bytes: u64) -> f64 {
        total_bytes as f64 / self.approx_bytes_per_second()
    }
}

impl FromStr for ResponseFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(ResponseFormat::Mp3),
            "opus" => Ok(ResponseFormat::Opus),
            "aac" => Ok(ResponseFormat::Aac),
            "flac" => Ok(ResponseFormat::Flac),
            "wav" => Ok(ResponseFormat::Wav),
            "pcm" => Ok(ResponseFormat::Pcm),
            other => Err(GatewayError::Config(format!(
                "Unsupported response format: {other}"
            ))),
        }
    }
}

/// A validated synthesis request. The gateway trusts these fields as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: Voice,
    pub speed: f32,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice: Voice, speed: f32) -> Self {
        Self {
            text: text.into(),
            voice,
            speed,
        }
    }
}
