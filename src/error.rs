use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConnectorError>;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] aigent_protocol::ProtocolError),

    #[error("Stream already started (state: {0:?})")]
    AlreadyStarted(crate::connector::ConnectionState),
}
