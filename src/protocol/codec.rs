//! Frame codec for encoding/decoding messages
//!
//! Handles framing of message bodies into the wire format and incremental
//! decoding of frames out of a receive buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::message::{Message, MessageError};
use super::{HEADER_SIZE, MAX_BODY_SIZE};

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid message length {0} (expected 1..=65529)")]
    InvalidLength(usize),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

/// One complete header+body unit as read off the wire
#[derive(Debug)]
pub struct Frame {
    /// Checksum carried in the frame header
    pub checksum: u32,
    /// The decoded message body
    pub message: Message,
}

impl Frame {
    /// Recompute the body checksum and compare it with the header value
    pub fn verify_checksum(&self) -> bool {
        self.message.compute_checksum() == self.checksum
    }
}

/// Encode a message into the wire format.
///
/// The checksum is computed over the body before the header is written;
/// both header fields are little-endian.
pub fn encode(message: &Message, buf: &mut BytesMut) -> Result<(), CodecError> {
    let length = message.len();
    if length == 0 || length > MAX_BODY_SIZE {
        return Err(CodecError::InvalidLength(length));
    }

    let checksum = message.compute_checksum();

    buf.reserve(HEADER_SIZE + length);
    buf.put_u16_le(length as u16);
    buf.put_u32_le(checksum);
    buf.put_slice(message.body());

    Ok(())
}

/// Encode a message into a freshly allocated frame
pub fn encode_frame(message: &Message) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + message.len());
    encode(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Decodes frames from the wire format
pub struct Decoder {
    state: DecodeState,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Body {
        length: usize,
        checksum: u32,
    },
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
        }
    }

    /// True once a header has been consumed and the body is still owed.
    /// Callers use this to account header and body reads separately.
    pub fn awaiting_body(&self) -> bool {
        matches!(self.state, DecodeState::Body { .. })
    }

    /// Attempt to decode a frame from the buffer.
    /// Returns Ok(None) if more data is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let length = u16::from_le_bytes([buf[0], buf[1]]) as usize;
                    if length == 0 || length > MAX_BODY_SIZE {
                        return Err(CodecError::InvalidLength(length));
                    }

                    let checksum = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
                    buf.advance(HEADER_SIZE);

                    self.state = DecodeState::Body { length, checksum };
                }
                DecodeState::Body { length, checksum } => {
                    if buf.len() < *length {
                        return Ok(None);
                    }

                    let body = buf.split_to(*length).to_vec();
                    let checksum = *checksum;

                    self.state = DecodeState::Header;

                    return Ok(Some(Frame {
                        checksum,
                        message: Message::from_body(body),
                    }));
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(body: &[u8]) -> BytesMut {
        let mut message = Message::new();
        message.add_bytes(body).unwrap();
        let mut buf = BytesMut::new();
        encode(&message, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = frame_of(b"hello!!!");
        assert_eq!(buf.len(), HEADER_SIZE + 8);

        let frame = Decoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.message.body(), b"hello!!!");
        assert!(frame.verify_checksum());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_message_not_encodable() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode(&Message::new(), &mut buf),
            Err(CodecError::InvalidLength(0))
        ));
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let full = frame_of(b"partial delivery");
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        let mut decoded = None;
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            match decoder.decode(&mut buf).unwrap() {
                Some(frame) => {
                    assert_eq!(i, full.len() - 1, "frame completed too early");
                    decoded = Some(frame);
                }
                None => assert!(i < full.len() - 1),
            }
        }

        let frame = decoded.expect("frame never completed");
        assert_eq!(frame.message.body(), b"partial delivery");
        assert!(frame.verify_checksum());
    }

    #[test]
    fn test_decode_split_mid_header() {
        let full = frame_of(b"split");
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        // First chunk ends inside the checksum field
        buf.extend_from_slice(&full[..4]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[4..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.message.body(), b"split");
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = frame_of(b"first");
        buf.extend_from_slice(&frame_of(b"second"));

        let mut decoder = Decoder::new();
        let one = decoder.decode(&mut buf).unwrap().unwrap();
        let two = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(one.message.body(), b"first");
        assert_eq!(two.message.body(), b"second");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_zero_length_header_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0);
        buf.put_u32_le(1);

        assert!(matches!(
            Decoder::new().decode(&mut buf),
            Err(CodecError::InvalidLength(0))
        ));
    }

    #[test]
    fn test_over_limit_header_rejected() {
        // 65530 is the first invalid length; u16::MAX the last expressible
        for length in [MAX_BODY_SIZE as u16 + 1, u16::MAX] {
            let mut buf = BytesMut::new();
            buf.put_u16_le(length);
            buf.put_u32_le(0);
            buf.extend_from_slice(&[0u8; 16]);

            assert!(matches!(
                Decoder::new().decode(&mut buf),
                Err(CodecError::InvalidLength(l)) if l == length as usize
            ));
        }
    }

    #[test]
    fn test_checksum_sensitive_to_any_bit_flip() {
        let body = b"hello!!!";
        for bit in 0..body.len() * 8 {
            let mut buf = frame_of(body);
            buf[HEADER_SIZE + bit / 8] ^= 1 << (bit % 8);

            let frame = Decoder::new().decode(&mut buf).unwrap().unwrap();
            assert!(!frame.verify_checksum(), "flip of bit {bit} went undetected");
        }
    }

    #[test]
    fn test_awaiting_body_tracks_state() {
        let full = frame_of(b"state");
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        assert!(!decoder.awaiting_body());
        buf.extend_from_slice(&full[..HEADER_SIZE]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(decoder.awaiting_body());

        buf.extend_from_slice(&full[HEADER_SIZE..]);
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(!decoder.awaiting_body());
    }
}
