//! Per-connection speech lifecycle.
//!
//! `Idle -> Requested -> Streaming -> {Completed | Errored | Cancelled} -> Idle`
//!
//! The controller admits or drops `generate-speech` requests, spawns one
//! task per accepted session, and turns stop and disconnect into
//! cancellation. The session slot on the [`Connection`] is the single-flight
//! guard. The session task releases it on completion or failure; a stop or
//! disconnect releases it immediately.
use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};
use tts_core::{SpeechRequest, SpeechSynthesizer};

use crate::{
    config::StreamConfig,
    error::SpeechError,
    metrics::StreamMetrics,
    pump::{PumpConfig, PumpOutcome, StreamPump},
    registry::{Connection, ConnectionId, ConnectionRegistry, RegistryError, StreamSession},
    transport::{ClientEvent, GenerateSpeech, ServerEvent, Transport},
    validation::validate_speech_request,
};

const READY_MESSAGE: &str = "TTS service ready";

/// Synchronous result of a `generate-speech` request. This is what the
/// client's ack reports; it says nothing about whether synthesis succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted,
    /// A session is already live for this connection; the request was dropped.
    Ignored,
    Rejected(String),
}

impl Admission {
    pub fn ack(&self, id: u64) -> ServerEvent {
        match self {
            Admission::Accepted | Admission::Ignored => ServerEvent::Ack {
                id,
                success: true,
                error: None,
            },
            Admission::Rejected(reason) => ServerEvent::Ack {
                id,
                success: false,
                error: Some(reason.clone()),
            },
        }
    }
}

#[derive(Clone)]
pub struct SpeechController {
    registry: Arc<ConnectionRegistry>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    metrics: Arc<StreamMetrics>,
    pump: PumpConfig,
    upstream_timeout: Duration,
}

impl SpeechController {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        metrics: Arc<StreamMetrics>,
        stream: &StreamConfig,
    ) -> Self {
        let pump = PumpConfig::new(stream, synthesizer.response_format());
        Self {
            registry,
            synthesizer,
            metrics,
            pump,
            upstream_timeout: stream.upstream_timeout(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Register a new client and greet it with `tts-connected`.
    pub async fn connect(
        &self,
        id: ConnectionId,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Connection>, RegistryError> {
        let connection = self.registry.register(id, transport).await?;
        StreamMetrics::incr(&self.metrics.connections_opened);
        info!(connection = %connection.id(), "client connected");

        let greeting = ServerEvent::Connected {
            message: READY_MESSAGE.to_string(),
            socket_id: connection.id().to_string(),
        };
        if connection.transport().send(greeting).await.is_err() {
            warn!(connection = %connection.id(), "client went away before greeting");
        }
        Ok(connection)
    }

    /// Dispatch one inbound event. Returns the admission for requests that
    /// can be acknowledged.
    pub async fn handle(&self, id: &ConnectionId, event: ClientEvent) -> Option<Admission> {
        match event {
            ClientEvent::GenerateSpeech(payload) => Some(self.generate_speech(id, payload).await),
            ClientEvent::StopSpeech => {
                self.stop_speech(id).await;
                None
            }
        }
    }

    pub async fn generate_speech(&self, id: &ConnectionId, payload: GenerateSpeech) -> Admission {
        let Some(connection) = self.registry.get(id).await else {
            warn!(connection = %id, "speech requested on unknown connection");
            return Admission::Rejected("Connection not found".to_string());
        };

        let session = match connection.begin_session() {
            Ok(session) => session,
            Err(e) => {
                info!(connection = %id, "{e}, ignoring request");
                StreamMetrics::incr(&self.metrics.requests_ignored);
                return Admission::Ignored;
            }
        };

        let request = match validate_speech_request(
            &payload.text,
            payload.voice.as_deref(),
            payload.speed,
        ) {
            Ok(request) => request,
            Err(err) => {
                connection.end_session(session.id());
                StreamMetrics::incr(&self.metrics.requests_rejected);
                debug!(connection = %id, "rejected speech request: {err}");
                let message = err.to_string();
                let _ = connection
                    .transport()
                    .send(ServerEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                return Admission::Rejected(message);
            }
        };

        StreamMetrics::incr(&self.metrics.sessions_started);
        let controller = self.clone();
        tokio::spawn(async move {
            controller.run_session(connection, session, request).await;
        });
        Admission::Accepted
    }

    /// Halt the live session, if any. The client receives nothing, and the
    /// next `generate-speech` is admitted right away.
    pub async fn stop_speech(&self, id: &ConnectionId) -> bool {
        let Some(connection) = self.registry.get(id).await else {
            return false;
        };
        let stopped = connection.cancel_session();
        if stopped {
            info!(connection = %id, "speech stopped by client");
        }
        stopped
    }

    pub async fn disconnect(&self, id: &ConnectionId) {
        if self.registry.unregister(id).await.is_some() {
            StreamMetrics::incr(&self.metrics.connections_closed);
            info!(connection = %id, "client disconnected");
        }
    }

    /// Cancel every live session and forget every connection.
    pub async fn shutdown(&self) -> usize {
        let dropped = self.registry.clear().await;
        info!("speech controller shut down, dropped {dropped} connection(s)");
        dropped
    }

    async fn run_session(
        self,
        connection: Arc<Connection>,
        mut session: StreamSession,
        request: SpeechRequest,
    ) {
        let id = connection.id().clone();
        let preview: String = request.text.chars().take(50).collect();
        info!(
            connection = %id,
            session = session.id(),
            voice = %request.voice,
            "generating speech: \"{preview}\""
        );

        let outcome = self.stream_speech(&connection, &mut session, &request).await;
        match &outcome {
            PumpOutcome::Completed { total_bytes, chunks } => {
                StreamMetrics::incr(&self.metrics.sessions_completed);
                info!(connection = %id, total_bytes, chunks, "speech generation completed");
            }
            PumpOutcome::Cancelled { total_bytes, chunks } => {
                StreamMetrics::incr(&self.metrics.sessions_cancelled);
                info!(connection = %id, total_bytes, chunks, "speech generation cancelled");
            }
            PumpOutcome::Failed(err) => {
                StreamMetrics::incr(&self.metrics.sessions_errored);
                warn!(connection = %id, kind = err.kind(), "speech generation failed: {err}");
            }
        }
        connection.end_session(session.id());
    }

    async fn stream_speech(
        &self,
        connection: &Connection,
        session: &mut StreamSession,
        request: &SpeechRequest,
    ) -> PumpOutcome {
        let pump = StreamPump::new(
            &self.registry,
            connection,
            &self.metrics,
            &self.pump,
            Instant::now(),
        );

        let request_audio = tokio::time::timeout(
            self.upstream_timeout,
            self.synthesizer.synthesize(request),
        );
        let synthesis = tokio::select! {
            biased;
            _ = session.cancelled() => return PumpOutcome::cancelled(session),
            result = request_audio => result,
        };

        let audio = match synthesis {
            Err(_) => {
                let err = SpeechError::Timeout(format!(
                    "Speech provider did not respond within {}s",
                    self.upstream_timeout.as_secs()
                ));
                return pump.fail(session, err).await;
            }
            Ok(Err(e)) => return pump.fail(session, SpeechError::Upstream(e)).await,
            Ok(Ok(audio)) => audio,
        };

        let start = ServerEvent::SpeechStart {
            text: request.text.clone(),
            voice: request.voice,
        };
        if pump.emit(session, start).await.is_err() {
            return PumpOutcome::cancelled(session);
        }
        pump.run(session, audio).await
    }
}
