//! Wire events and the outbound transport seam.
//!
//! Frames are JSON text messages shaped as
//! `{"event": "<name>", "data": {...}, "ack": <id>}`; `ack` is only present
//! on inbound frames that want an admission reply.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tts_core::Voice;

/// Events sent from the server to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "tts-connected")]
    Connected {
        message: String,
        #[serde(rename = "socketId")]
        socket_id: String,
    },
    #[serde(rename = "speech-start")]
    SpeechStart { text: String, voice: Voice },
    #[serde(rename = "audio-chunk")]
    AudioChunk { data: String, index: u64 },
    #[serde(rename = "speech-end")]
    SpeechEnd {
        #[serde(rename = "totalBytes")]
        total_bytes: u64,
        duration: f64,
    },
    #[serde(rename = "tts-error")]
    Error { message: String },
    #[serde(rename = "ack")]
    Ack {
        id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "tts-connected",
            ServerEvent::SpeechStart { .. } => "speech-start",
            ServerEvent::AudioChunk { .. } => "audio-chunk",
            ServerEvent::SpeechEnd { .. } => "speech-end",
            ServerEvent::Error { .. } => "tts-error",
            ServerEvent::Ack { .. } => "ack",
        }
    }
}

/// Payload of `generate-speech`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateSpeech {
    #[serde(default)]
    pub text: String,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// Events received from a client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    GenerateSpeech(GenerateSpeech),
    StopSpeech,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    ack: Option<u64>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid payload for {event}: {source}")]
    Payload {
        event: String,
        ack: Option<u64>,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

impl ClientEvent {
    /// Parse one inbound text frame into an event and its optional ack id.
    pub fn parse(raw: &str) -> Result<(ClientEvent, Option<u64>), FrameError> {
        let frame: InboundFrame = serde_json::from_str(raw)?;
        let event = match frame.event.as_str() {
            "generate-speech" => {
                let payload = if frame.data.is_null() {
                    GenerateSpeech::default()
                } else {
                    serde_json::from_value(frame.data).map_err(|source| FrameError::Payload {
                        event: frame.event.clone(),
                        ack: frame.ack,
                        source,
                    })?
                };
                ClientEvent::GenerateSpeech(payload)
            }
            "stop-speech" => ClientEvent::StopSpeech,
            other => return Err(FrameError::UnknownEvent(other.to_string())),
        };
        Ok((event, frame.ack))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

/// Outbound half of a client connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue one event for delivery. Waits while the outbound queue is full.
    async fn send(&self, event: ServerEvent) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Transport backed by a bounded queue drained by the socket writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<ServerEvent>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue `event` without waiting. Used for frames the inbound loop must
    /// not block on.
    pub fn try_send(&self, event: ServerEvent) -> Result<(), TransportError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, event: ServerEvent) -> Result<(), TransportError> {
        self.tx.send(event).await.map_err(|_| TransportError::Closed)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_generate_speech_with_ack() {
        let raw = r#"{"event":"generate-speech","data":{"text":"Hello","voice":"nova","speed":1.25},"ack":7}"#;
        let (event, ack) = ClientEvent::parse(raw).unwrap();
        assert_eq!(ack, Some(7));
        match event {
            ClientEvent::GenerateSpeech(p) => {
                assert_eq!(p.text, "Hello");
                assert_eq!(p.voice.as_deref(), Some("nova"));
                assert_eq!(p.speed, Some(1.25));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_generate_speech_without_data() {
        let (event, ack) = ClientEvent::parse(r#"{"event":"generate-speech"}"#).unwrap();
        assert!(ack.is_none());
        assert!(matches!(event, ClientEvent::GenerateSpeech(p) if p.text.is_empty()));
    }

    #[test]
    fn test_parse_stop_speech() {
        let (event, _) = ClientEvent::parse(r#"{"event":"stop-speech","data":{}}"#).unwrap();
        assert!(matches!(event, ClientEvent::StopSpeech));
        let (event, _) = ClientEvent::parse(r#"{"event":"stop-speech"}"#).unwrap();
        assert!(matches!(event, ClientEvent::StopSpeech));
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"dance"}"#),
            Err(FrameError::UnknownEvent(e)) if e == "dance"
        ));
        assert!(matches!(ClientEvent::parse("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"generate-speech","data":{"text":5},"ack":2}"#),
            Err(FrameError::Payload { ack: Some(2), .. })
        ));
    }

    #[test]
    fn test_server_event_wire_shape() {
        let value = serde_json::to_value(ServerEvent::SpeechEnd {
            total_bytes: 32000,
            duration: 2.0,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"event": "speech-end", "data": {"totalBytes": 32000, "duration": 2.0}})
        );

        let value = serde_json::to_value(ServerEvent::Connected {
            message: "TTS service ready".into(),
            socket_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(value["data"]["socketId"], "abc");

        let value = serde_json::to_value(ServerEvent::Ack {
            id: 1,
            success: true,
            error: None,
        })
        .unwrap();
        assert_eq!(value, json!({"event": "ack", "data": {"id": 1, "success": true}}));
    }

    #[tokio::test]
    async fn test_channel_transport_reports_closed() {
        let (transport, rx) = ChannelTransport::new(4);
        assert!(!transport.is_closed());
        drop(rx);
        assert!(transport.is_closed());
        let err = transport
            .send(ServerEvent::Error { message: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_try_send_does_not_wait_on_full_queue() {
        let (transport, mut rx) = ChannelTransport::new(1);
        transport
            .send(ServerEvent::Error { message: "first".into() })
            .await
            .unwrap();

        let ack = ServerEvent::Ack {
            id: 1,
            success: true,
            error: None,
        };
        assert!(matches!(transport.try_send(ack.clone()), Err(TransportError::Full)));

        rx.recv().await.unwrap();
        transport.try_send(ack.clone()).unwrap();
        assert_eq!(rx.recv().await, Some(ack.clone()));

        drop(rx);
        assert!(matches!(transport.try_send(ack), Err(TransportError::Closed)));
    }
}
