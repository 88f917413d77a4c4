//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::{stream, StreamExt};
use server::{
    config::StreamConfig,
    controller::SpeechController,
    metrics::StreamMetrics,
    registry::{ConnectionId, ConnectionRegistry},
    transport::{GenerateSpeech, ServerEvent, Transport, TransportError},
};
use tts_core::{AudioStream, GatewayError, SpeechRequest, SpeechSynthesizer};

/// What the scripted provider does when asked to synthesize.
#[derive(Clone)]
pub enum Script {
    /// Yield every buffer, then end.
    Chunks(Vec<Vec<u8>>),
    /// Yield every buffer with `delay` before each, then end.
    Paced { chunks: Vec<Vec<u8>>, delay: Duration },
    /// Yield the buffers, then fail the read.
    FailAfter(Vec<Vec<u8>>),
    /// Yield the buffers, then never produce anything again.
    StallAfter(Vec<Vec<u8>>),
    /// Reject the request with a status.
    Reject { status: u16, message: String },
    /// Never answer the request.
    Hang,
}

/// Deterministic stand-in for the speech provider.
pub struct ScriptedSynthesizer {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<SpeechRequest>>,
    stream_dropped: Arc<AtomicBool>,
}

impl ScriptedSynthesizer {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// True once the last stream handed out has been dropped.
    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }
}

struct DropSignal(Arc<AtomicBool>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn ok_chunks(chunks: Vec<Vec<u8>>) -> Vec<Result<Bytes, GatewayError>> {
    chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect()
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.stream_dropped.store(false, Ordering::SeqCst);

        let audio: AudioStream = match self.script.clone() {
            Script::Chunks(chunks) => stream::iter(ok_chunks(chunks)).boxed(),
            Script::Paced { chunks, delay } => stream::iter(chunks)
                .then(move |c| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, GatewayError>(Bytes::from(c))
                })
                .boxed(),
            Script::FailAfter(chunks) => stream::iter(ok_chunks(chunks))
                .chain(stream::once(async {
                    Err(GatewayError::Read("connection reset".to_string()))
                }))
                .boxed(),
            Script::StallAfter(chunks) => stream::iter(ok_chunks(chunks))
                .chain(stream::pending())
                .boxed(),
            Script::Reject { status, message } => {
                return Err(GatewayError::Upstream { status, message })
            }
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };

        let guard = DropSignal(self.stream_dropped.clone());
        Ok(audio
            .map(move |item| {
                let _keep = &guard;
                item
            })
            .boxed())
    }
}

/// Transport double that records everything the server tries to send.
#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<ServerEvent>>,
    sends: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn send_calls(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    /// `(index, decoded payload)` for every audio chunk, in send order.
    pub fn chunks(&self) -> Vec<(u64, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::AudioChunk { data, index } => Some((
                    index,
                    base64::engine::general_purpose::STANDARD.decode(data).unwrap(),
                )),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn speech_end(&self) -> Option<(u64, f64)> {
        self.events().into_iter().find_map(|e| match e {
            ServerEvent::SpeechEnd { total_bytes, duration } => Some((total_bytes, duration)),
            _ => None,
        })
    }

    /// Poll until `pred` holds for the recorded events.
    pub async fn wait_for(&self, pred: impl Fn(&RecordingTransport) -> bool) {
        for _ in 0..5_000 {
            if pred(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not met; events: {:?}", self.events());
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, event: ServerEvent) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub controller: SpeechController,
    pub registry: Arc<ConnectionRegistry>,
    pub synth: Arc<ScriptedSynthesizer>,
    pub metrics: Arc<StreamMetrics>,
}

pub fn stream_config() -> StreamConfig {
    StreamConfig {
        pacing_delay_ms: 5,
        max_chunk_bytes: 16 * 1024,
        upstream_timeout_secs: 60,
        read_timeout_secs: 30,
        outbound_queue: 64,
    }
}

pub fn harness(script: Script) -> Harness {
    harness_with(script, stream_config())
}

pub fn harness_with(script: Script, config: StreamConfig) -> Harness {
    let registry = Arc::new(ConnectionRegistry::new());
    let synth = Arc::new(ScriptedSynthesizer::new(script));
    let metrics = Arc::new(StreamMetrics::new());
    let controller =
        SpeechController::new(registry.clone(), synth.clone(), metrics.clone(), &config);
    Harness {
        controller,
        registry,
        synth,
        metrics,
    }
}

impl Harness {
    pub async fn connect(&self, id: &str) -> Arc<RecordingTransport> {
        let transport = Arc::new(RecordingTransport::default());
        self.controller
            .connect(ConnectionId::from(id), transport.clone())
            .await
            .unwrap();
        transport
    }

    pub async fn is_streaming(&self, id: &str) -> bool {
        match self.registry.get(&ConnectionId::from(id)).await {
            Some(conn) => conn.is_streaming(),
            None => false,
        }
    }

    /// Wait until the connection's session slot is free again.
    pub async fn wait_idle(&self, id: &str) {
        for _ in 0..5_000 {
            if !self.is_streaming(id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("connection {id} never returned to idle");
    }
}

pub fn speech(text: &str) -> GenerateSpeech {
    GenerateSpeech {
        text: text.to_string(),
        voice: None,
        speed: None,
    }
}

pub fn paced(count: usize, size: usize, delay_ms: u64) -> Script {
    Script::Paced {
        chunks: (0..count).map(|i| vec![i as u8; size]).collect(),
        delay: Duration::from_millis(delay_ms),
    }
}
