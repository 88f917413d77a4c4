use tts_core::{SpeechRequest, Voice, DEFAULT_SPEED, MAX_SPEED, MAX_TEXT_CHARS, MIN_SPEED};

use crate::error::SpeechError;

/// Validate a `generate-speech` payload and build the request the gateway
/// will see. Length is counted in characters, not bytes.
pub fn validate_speech_request(
    text: &str,
    voice: Option<&str>,
    speed: Option<f32>,
) -> Result<SpeechRequest, SpeechError> {
    if text.trim().is_empty() {
        return Err(SpeechError::InvalidRequest("Text is required".to_string()));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(SpeechError::InvalidRequest(format!(
            "Text is too long (max {} characters)",
            MAX_TEXT_CHARS
        )));
    }

    let voice = match voice {
        Some(v) => v
            .parse::<Voice>()
            .map_err(|e| SpeechError::InvalidRequest(e.to_string()))?,
        None => Voice::default(),
    };

    let speed = speed.unwrap_or(DEFAULT_SPEED);
    if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(SpeechError::InvalidRequest(format!(
            "Speed must be between {} and {}",
            MIN_SPEED, MAX_SPEED
        )));
    }

    Ok(SpeechRequest::new(text, voice, speed))
}
