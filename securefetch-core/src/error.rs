//! Error types for the securefetch session protocol

use crate::protocol::RpcErrorCode;
use thiserror::Error;

/// Result type for securefetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// securefetch error types
#[derive(Error, Debug)]
pub enum Error {
    /// Transport read/write failure; always fatal to the session
    #[error("Channel error: {0}")]
    Channel(#[source] std::io::Error),

    /// Peer closed the channel at a frame boundary
    #[error("Channel closed by peer")]
    ChannelClosed,

    /// Handshake or idle wait expired
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// TLS setup or negotiation failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Malformed frame or unexpected message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer reported a protocol error code
    #[error("Remote protocol error: {0}")]
    Rpc(RpcErrorCode),

    /// Peer reported a file error with an OS error number
    #[error("Remote file error: {}", std::io::Error::from_raw_os_error(*.0))]
    RemoteFile(i32),

    /// Local file operation failed
    #[error("File error: {0}")]
    File(#[source] std::io::Error),

    /// Credentials rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error ends the session it occurred in
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Channel(_)
                | Error::ChannelClosed
                | Error::Timeout(_)
                | Error::Tls(_)
                | Error::Protocol(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Channel(err)
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parsing error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(err.to_string())
    }
}
