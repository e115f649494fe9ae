//! Message-oriented transport seen by the stream connector.
//!
//! A transport handle only sends; everything the connection reports back
//! (handshake done, inbound data, errors, closure) arrives as a
//! [`TransportEvent`] on the receiver returned by [`Dialer::dial`]. The
//! connector consumes that queue from a single task, so no locking is needed.

pub mod websocket;

use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub use websocket::{WebSocketDialer, WebSocketTransport};

/// Close code for a normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,

    #[error("Transport connection is gone")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// How a connection ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseInfo {
    /// Both sides completed the closing handshake
    pub clean: bool,
    pub code: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(Vec<u8>),
    Closed(CloseInfo),
    Error(String),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

pub trait Transport {
    fn ready_state(&self) -> ReadyState;

    /// Queue one binary message. Messages go out in call order.
    fn send(&mut self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Start the closing handshake; the `Closed` event follows later
    fn close(&mut self, code: u16);
}

/// Opens connections without waiting for the handshake
pub trait Dialer {
    type Transport: Transport;

    fn dial(&self, uri: &Url) -> (Self::Transport, TransportEvents);
}
