//! Stream pump: drains the provider's audio stream into `audio-chunk` frames.
//!
//! Every emission is gated on the session's cancellation token, on the
//! transport still being open and on the connection still being registered.
//! Reads, sends and the pacing delay all race the token, so a stop or
//! disconnect never waits on a stalled read.
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::debug;
use tts_core::{encode_chunk, split_frames, AudioStream, ResponseFormat};

use crate::{
    config::StreamConfig,
    error::SpeechError,
    metrics::StreamMetrics,
    registry::{Connection, ConnectionRegistry, StreamSession},
    transport::ServerEvent,
};

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Fixed delay after each emitted frame.
    pub pacing_delay: Duration,
    /// Upper bound on a single frame's payload; larger buffers are split.
    pub max_chunk_bytes: usize,
    /// Longest wait for the next buffer before the stream is declared stalled.
    /// Zero disables the check.
    pub read_timeout: Duration,
    pub response_format: ResponseFormat,
}

impl PumpConfig {
    pub fn new(stream: &StreamConfig, response_format: ResponseFormat) -> Self {
        Self {
            pacing_delay: stream.pacing_delay(),
            max_chunk_bytes: stream.max_chunk_bytes,
            read_timeout: stream.read_timeout(),
            response_format,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum PumpOutcome {
    Completed { total_bytes: u64, chunks: u64 },
    Cancelled { total_bytes: u64, chunks: u64 },
    Failed(SpeechError),
}

impl PumpOutcome {
    pub fn cancelled(session: &StreamSession) -> Self {
        PumpOutcome::Cancelled {
            total_bytes: session.total_bytes(),
            chunks: session.chunks_sent(),
        }
    }
}

/// The session was cancelled or the connection went away.
#[derive(Debug)]
pub struct Halted;

pub struct StreamPump<'a> {
    registry: &'a ConnectionRegistry,
    connection: &'a Connection,
    metrics: &'a StreamMetrics,
    config: &'a PumpConfig,
    accepted_at: Instant,
}

impl<'a> StreamPump<'a> {
    pub fn new(
        registry: &'a ConnectionRegistry,
        connection: &'a Connection,
        metrics: &'a StreamMetrics,
        config: &'a PumpConfig,
        accepted_at: Instant,
    ) -> Self {
        Self {
            registry,
            connection,
            metrics,
            config,
            accepted_at,
        }
    }

    /// Drain `audio` until it ends, fails, or the session is cancelled.
    ///
    /// `audio` is dropped on every exit path, which aborts the upstream read.
    pub async fn run(&self, session: &mut StreamSession, mut audio: AudioStream) -> PumpOutcome {
        loop {
            if self.halted(session).await {
                debug!(connection = %self.connection.id(), "stream interrupted");
                return PumpOutcome::cancelled(session);
            }

            let next = tokio::select! {
                biased;
                _ = session.cancelled() => return PumpOutcome::cancelled(session),
                next = self.read_next(&mut audio) => next,
            };

            let buf = match next {
                Err(()) => {
                    let err = SpeechError::Timeout(format!(
                        "Audio stream stalled for more than {}s",
                        self.config.read_timeout.as_secs()
                    ));
                    return self.fail(session, err).await;
                }
                Ok(None) => return self.finish(session).await,
                Ok(Some(Err(e))) => return self.fail(session, SpeechError::Read(e)).await,
                Ok(Some(Ok(buf))) => buf,
            };

            for frame in split_frames(buf, self.config.max_chunk_bytes) {
                let event = ServerEvent::AudioChunk {
                    data: encode_chunk(&frame),
                    index: session.next_index(),
                };
                if self.emit(session, event).await.is_err() {
                    return PumpOutcome::cancelled(session);
                }
                if session.record_frame(frame.len()) == 0 {
                    let elapsed = self.accepted_at.elapsed().as_millis() as u64;
                    self.metrics.first_chunk_latency.record(elapsed);
                }
                self.metrics.record_chunk(frame.len());

                if self.pause(session).await.is_err() {
                    return PumpOutcome::cancelled(session);
                }
            }
        }
    }

    /// Send one event unless the session has been halted.
    pub async fn emit(&self, session: &StreamSession, event: ServerEvent) -> Result<(), Halted> {
        if self.halted(session).await {
            return Err(Halted);
        }
        tokio::select! {
            biased;
            _ = session.cancelled() => Err(Halted),
            sent = self.connection.transport().send(event) => sent.map_err(|_| Halted),
        }
    }

    /// Report `err` to the client and end the session as failed.
    pub async fn fail(&self, session: &StreamSession, err: SpeechError) -> PumpOutcome {
        let event = ServerEvent::Error {
            message: err.to_string(),
        };
        match self.emit(session, event).await {
            Ok(()) => PumpOutcome::Failed(err),
            Err(Halted) => PumpOutcome::cancelled(session),
        }
    }

    async fn finish(&self, session: &StreamSession) -> PumpOutcome {
        let total_bytes = session.total_bytes();
        let event = ServerEvent::SpeechEnd {
            total_bytes,
            duration: self.config.response_format.estimate_duration_secs(total_bytes),
        };
        match self.emit(session, event).await {
            Ok(()) => PumpOutcome::Completed {
                total_bytes,
                chunks: session.chunks_sent(),
            },
            Err(Halted) => PumpOutcome::cancelled(session),
        }
    }

    async fn halted(&self, session: &StreamSession) -> bool {
        session.is_cancelled()
            || self.connection.transport().is_closed()
            || !self.registry.contains(self.connection.id()).await
    }

    async fn read_next(
        &self,
        audio: &mut AudioStream,
    ) -> Result<Option<Result<bytes::Bytes, tts_core::GatewayError>>, ()> {
        if self.config.read_timeout.is_zero() {
            return Ok(audio.next().await);
        }
        tokio::time::timeout(self.config.read_timeout, audio.next())
            .await
            .map_err(|_| ())
    }

    async fn pause(&self, session: &StreamSession) -> Result<(), Halted> {
        if self.config.pacing_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = session.cancelled() => Err(Halted),
            _ = tokio::time::sleep(self.config.pacing_delay) => Ok(()),
        }
    }
}
