pub mod config;
pub mod connector;
pub mod error;
pub mod keycloak;
pub mod transport;

pub use aigent_protocol as protocol;
pub use connector::{Admission, ConnectionState, ConnectorOptions, StreamConnector};
pub use error::{ConnectorError, Result};
