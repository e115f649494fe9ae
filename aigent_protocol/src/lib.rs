//! # Aigent Protocol
//!
//! Wire format spoken between a stream connector and the Aigent cluster.
//!
//! This crate provides:
//! - Message types and the binary frame encoder/parser
//! - The call metadata record sent as the first message of every stream
//!
//! ## Example Usage
//!
//! ```rust
//! use aigent_protocol::{encode, Frame, MessageType};
//!
//! let frame = encode(MessageType::Voice.code(), &[0x01, 0x02]);
//! assert_eq!(frame.len(), 8);
//!
//! let parsed = Frame::parse(&frame).unwrap();
//! assert_eq!(parsed.message_type().unwrap(), MessageType::Voice);
//! assert_eq!(parsed.payload, vec![0x01, 0x02]);
//! ```

pub mod metadata;
pub mod protocol;

// Re-export commonly used types
pub use metadata::{generate_call_id, CallMetadata, Channel, Direction, VoiceMetadata};
pub use protocol::{
    encode, encode_at, unix_timestamp, Frame, MessageType, ProtocolError, FLUSH_PAYLOAD,
    HEADER_LEN,
};
