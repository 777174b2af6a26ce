//! `<decimal byte length>:<json>` frame codec.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use switchyard_protocols::ChannelError;
use tokio_util::codec::{Decoder, Encoder};

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

/// Longest accepted length prefix, in digits.
const MAX_PREFIX_DIGITS: usize = 20;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Value),
    /// The frame was complete but its body was not valid JSON.
    Malformed { raw: String, reason: String },
}

/// Length-prefixed JSON codec.
///
/// An invalid length prefix is fatal to the stream. A body that fails to
/// parse only yields [`Frame::Malformed`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    body_len: Option<usize>,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            body_len: None,
        }
    }

    fn decode_prefix(&self, src: &BytesMut) -> Result<Option<(usize, usize)>, ChannelError> {
        let Some(colon) = src.iter().position(|b| *b == b':') else {
            if src.len() > MAX_PREFIX_DIGITS || !src.iter().all(u8::is_ascii_digit) {
                return Err(invalid_prefix(src));
            }
            return Ok(None);
        };

        let prefix = &src[..colon];
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_DIGITS || !prefix.iter().all(u8::is_ascii_digit)
        {
            return Err(invalid_prefix(prefix));
        }
        let len: usize = std::str::from_utf8(prefix)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| invalid_prefix(prefix))?;
        if len > self.max_frame_bytes {
            return Err(ChannelError::Protocol(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                len, self.max_frame_bytes
            )));
        }
        Ok(Some((colon + 1, len)))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

fn invalid_prefix(bytes: &[u8]) -> ChannelError {
    let shown = String::from_utf8_lossy(&bytes[..bytes.len().min(32)]).into_owned();
    ChannelError::Protocol(format!("invalid frame length prefix {:?}", shown))
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ChannelError> {
        let len = match self.body_len {
            Some(len) => len,
            None => match self.decode_prefix(src)? {
                Some((consumed, len)) => {
                    src.advance(consumed);
                    self.body_len = Some(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let body = src.split_to(len);
        self.body_len = None;
        let frame = match serde_json::from_slice(&body) {
            Ok(value) => Frame::Message(value),
            Err(e) => Frame::Malformed {
                raw: String::from_utf8_lossy(&body).into_owned(),
                reason: e.to_string(),
            },
        };
        Ok(Some(frame))
    }
}

impl Encoder<Value> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(&item)
            .map_err(|e| ChannelError::Protocol(format!("failed to encode frame: {}", e)))?;
        let prefix = format!("{}:", body.len());
        dst.reserve(prefix.len() + body.len());
        dst.put_slice(prefix.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
