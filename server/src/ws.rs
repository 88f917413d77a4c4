//! WebSocket acceptor: binds one socket to one registered connection.
//!
//! Each socket gets a bounded outbound queue drained by a writer task, and an
//! inbound loop that feeds parsed events to the [`SpeechController`]. When the
//! inbound side ends, the connection is unregistered, which cancels any
//! stream still running for it.
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::{
    controller::SpeechController,
    error::ApiError,
    registry::ConnectionId,
    transport::{ChannelTransport, ClientEvent, FrameError, ServerEvent},
    AppState,
};

pub async fn speech_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let active = state.controller.registry().len().await;
    if active >= state.config.max_connections {
        return Err(ApiError::ServiceUnavailable(format!(
            "connection limit reached ({active})"
        )));
    }

    let controller = state.controller.clone();
    let queue = state.config.stream.outbound_queue;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, controller, queue)))
}

pub async fn handle_socket(socket: WebSocket, controller: SpeechController, queue: usize) {
    let (mut sink, mut inbound) = socket.split();
    let (transport, mut outbound) = ChannelTransport::new(queue);
    let id = ConnectionId::new();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode {} frame: {e}", event.name());
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!("Failed to send WS message: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    if let Err(e) = controller.connect(id.clone(), Arc::new(transport.clone())).await {
        warn!("Could not register connection: {e}");
        writer.abort();
        return;
    }

    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Text(text)) => dispatch(&controller, &id, &transport, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => debug!(connection = %id, "ignoring binary frame"),
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %id, "socket error: {e}");
                break;
            }
        }
    }

    controller.disconnect(&id).await;
    writer.abort();
}

async fn dispatch(
    controller: &SpeechController,
    id: &ConnectionId,
    transport: &ChannelTransport,
    raw: &str,
) {
    match ClientEvent::parse(raw) {
        Ok((event, ack)) => {
            let admission = controller.handle(id, event).await;
            if let (Some(admission), Some(ack)) = (admission, ack) {
                send_ack(id, transport, admission.ack(ack));
            }
        }
        Err(FrameError::Payload { event, ack, source }) => {
            warn!(connection = %id, "invalid {event} payload: {source}");
            if let Some(ack) = ack {
                let reply = ServerEvent::Ack {
                    id: ack,
                    success: false,
                    error: Some(format!("Invalid {event} payload")),
                };
                send_ack(id, transport, reply);
            }
        }
        Err(e) => warn!(connection = %id, "dropping frame: {e}"),
    }
}

/// Acks never wait for queue space, so a slow reader cannot hold up a
/// pending `stop-speech` behind them.
fn send_ack(id: &ConnectionId, transport: &ChannelTransport, ack: ServerEvent) {
    if let Err(e) = transport.try_send(ack) {
        debug!(connection = %id, "dropping ack: {e}");
    }
}
