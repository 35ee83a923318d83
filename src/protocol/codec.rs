use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, PhaseSnapshot};
use crate::core::{Error, MAX_PAYLOAD_SIZE};

/// JSON codec for connection-per-message framing
///
/// Each connection carries exactly one record, so a frame ends at EOF rather
/// than at a length prefix. `decode` only buffers; `decode_eof` parses.
#[derive(Clone, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new message codec
    pub fn new() -> Self {
        MessageCodec
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::codec(format!(
                "Payload exceeds {} bytes",
                MAX_PAYLOAD_SIZE
            )));
        }
        // Wait for the peer to close its side
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let payload = src.split();
        decode_message(&payload).map(Some)
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(&item)
            .map_err(|e| Error::codec(format!("Failed to serialize message: {}", e)))?;
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

/// Decodes one complete payload
pub fn decode_message(payload: &[u8]) -> Result<Message, Error> {
    serde_json::from_slice(payload)
        .map_err(|e| Error::codec(format!("Failed to deserialize message: {}", e)))
}

/// Encodes a protocol message into a wire payload
pub fn encode_message(message: &Message) -> Result<Bytes, Error> {
    encode(message)
}

/// Encodes a visualizer snapshot into a wire payload
pub fn encode_snapshot(snapshot: &PhaseSnapshot) -> Result<Bytes, Error> {
    encode(snapshot)
}

fn encode<T: Serialize>(item: T) -> Result<Bytes, Error> {
    let mut dst = BytesMut::new();
    MessageCodec::new().encode(item, &mut dst)?;
    Ok(dst.freeze())
}
