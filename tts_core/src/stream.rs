//! Streaming synthesis helpers.
//!
//! The provider hands back audio as a sequence of arbitrarily sized byte
//! buffers. The server forwards them as frames, so this module provides the
//! stream alias the gateway returns, a splitter that caps frame size, and the
//! text encoding used for frame payloads on the wire.
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::GatewayError;

/// Lazily readable audio from the provider. Dropping it aborts the read.
pub type AudioStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// Split `buf` into frames of at most `max_len` bytes without copying.
///
/// A `max_len` of zero disables splitting.
pub fn split_frames(buf: Bytes, max_len: usize) -> impl Iterator<Item = Bytes> {
    let max_len = if max_len == 0 { buf.len().max(1) } else { max_len };
    let len = buf.len();
    (0..len)
        .step_by(max_len)
        .map(move |start| buf.slice(start..(start + max_len).min(len)))
}

/// Encode a frame payload for a JSON text message.
pub fn encode_chunk(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}
