//! Fatal session errors.
//!
//! Build-tool faults are not here: the dispatcher reports those to the peer
//! as a `Failure` message and the session still ends normally.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use proxy_protocol::FrameError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Incoming connection timeout after {} ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    #[error("Target build parameters were not received within {} ms", .0.as_millis())]
    ParametersTimeout(Duration),

    #[error("peer sent an unreadable frame")]
    InvalidFrame(#[source] FrameError),

    #[error("result acknowledgment was not received within {} ms", .0.as_millis())]
    AckTimeout(Duration),

    #[error("no peer connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Bind { .. } | Self::Io(_) => 1,
            Self::ConnectionTimeout(_)
            | Self::ParametersTimeout(_)
            | Self::InvalidFrame(_)
            | Self::NotConnected => 2,
            Self::AckTimeout(_) => 3,
        }
    }
}
