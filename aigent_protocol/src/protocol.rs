use thiserror::Error;

/// Bytes in front of every payload: `[code:u16][timestamp:u32]`
pub const HEADER_LEN: usize = 6;

/// Sentinel payload carried by a flush message
pub const FLUSH_PAYLOAD: [u8; 1] = [0];

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("Frame too short: {0} bytes")]
    Truncated(usize),

    #[error("Metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Message types multiplexed over one stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Call metadata, exactly one per connection and always first
    Metadata = 1,
    /// Raw audio chunk
    Voice = 2,
    /// End-of-stream marker, logically last
    Flush = 3,
}

impl MessageType {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Encode `payload` as a frame of this type, stamped with the current time
    pub fn encode(self, payload: &[u8]) -> Vec<u8> {
        encode(self.code(), payload)
    }
}

impl TryFrom<u16> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Metadata),
            2 => Ok(MessageType::Voice),
            3 => Ok(MessageType::Flush),
            _ => Err(ProtocolError::InvalidMessageType(value)),
        }
    }
}

/// Current Unix time in whole seconds, truncated to 32 bits
pub fn unix_timestamp() -> u32 {
    chrono::Utc::now().timestamp() as u32
}

/// Build a wire frame: `[code:u16 LE][timestamp:u32 LE][payload...]`
///
/// The timestamp is taken when the frame is built, not when the payload was
/// queued. It is informational only; ordering comes from the transport.
pub fn encode(code: u16, payload: &[u8]) -> Vec<u8> {
    encode_at(code, unix_timestamp(), payload)
}

/// Same as [`encode`] with an explicit timestamp
pub fn encode_at(code: u16, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&code.to_le_bytes());
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// A decoded frame as seen by the receiving side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u16,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Split raw frame bytes into header fields and payload
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated(bytes.len()));
        }

        let code = u16::from_le_bytes([bytes[0], bytes[1]]);
        let timestamp = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        Ok(Frame {
            code,
            timestamp,
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// Unknown codes are kept in `code` and only rejected here
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let payload = b"hello";
        let before = unix_timestamp();
        let frame = encode(MessageType::Metadata.code(), payload);
        let after = unix_timestamp();

        assert_eq!(frame.len(), payload.len() + HEADER_LEN);
        assert_eq!(&frame[0..2], &[0x01, 0x00]);

        let timestamp = u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]);
        assert!(timestamp >= before && timestamp <= after);
        assert_eq!(&frame[HEADER_LEN..], payload);
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode(MessageType::Voice.code(), &[]);
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(&frame[0..2], &[0x02, 0x00]);
    }

    #[test]
    fn test_code_is_little_endian() {
        let frame = encode_at(0x0A0B, 0x01020304, &[0xFF]);
        assert_eq!(frame, vec![0x0B, 0x0A, 0x04, 0x03, 0x02, 0x01, 0xFF]);
    }

    #[test]
    fn test_timestamp_is_truncated_to_u32() {
        let now = chrono::Utc::now().timestamp();
        let stamp = unix_timestamp() as i64;
        // Valid until 2106; after that only the low 32 bits are kept
        assert!((now - stamp).abs() <= 1);
    }

    #[test]
    fn test_flush_frame() {
        let frame = MessageType::Flush.encode(&FLUSH_PAYLOAD);
        let parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.message_type().unwrap(), MessageType::Flush);
        assert_eq!(parsed.payload, vec![0]);
    }

    #[test]
    fn test_parse_rejects_short_frames() {
        match Frame::parse(&[0x02, 0x00, 0x01]) {
            Err(ProtocolError::Truncated(3)) => {}
            other => panic!("expected Truncated(3), got {:?}", other),
        }
    }

    #[test]
    fn test_parse_keeps_unknown_codes() {
        let frame = Frame::parse(&encode_at(9, 42, b"x")).unwrap();
        assert_eq!(frame.code, 9);
        assert_eq!(frame.timestamp, 42);
        assert!(matches!(
            frame.message_type(),
            Err(ProtocolError::InvalidMessageType(9))
        ));
        assert_eq!(frame.payload, b"x".to_vec());
    }

    #[test]
    fn test_message_type_codes() {
        assert_eq!(MessageType::try_from(1).unwrap(), MessageType::Metadata);
        assert_eq!(MessageType::try_from(2).unwrap(), MessageType::Voice);
        assert_eq!(MessageType::try_from(3).unwrap(), MessageType::Flush);
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(4).is_err());
    }
}
