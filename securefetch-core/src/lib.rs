//! securefetch core - authenticated file listing and download over TLS
//!
//! This crate holds the session protocol shared by the client and the
//! server: the length-prefixed frame codec, the command and response model,
//! the username/password handshake, directory listing and the chunked file
//! transfer loop. The TLS channel itself lives in [`transport`]; every other
//! module works on any `AsyncRead + AsyncWrite` stream.

pub mod audit;
pub mod auth;
pub mod error;
pub mod listing;
pub mod protocol;
pub mod transfer;
pub mod transport;

// Re-export commonly used types
pub use audit::{AuditAction, AuditEvent, AuditResult};
pub use auth::{AuthOutcome, AuthStatus, CredentialStore, StaticCredential};
pub use error::{Error, Result};
pub use listing::DirectoryEntry;
pub use protocol::{Command, Frame, FrameKind, Response, RpcErrorCode};
pub use transfer::TransferState;

/// Wire protocol version carried in every frame header
pub const PROTOCOL_VERSION: u8 = 1;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 4433;

/// Default file chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Default bound on TLS accept plus credential exchange
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Default bound on waiting for the next command
pub const IDLE_TIMEOUT_SECS: u64 = 300;

/// Default number of credential attempts per session
pub const MAX_AUTH_ATTEMPTS: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_constants() {
        assert_eq!(PROTOCOL_VERSION, 1);
        assert_eq!(DEFAULT_PORT, 4433);
        assert!(DEFAULT_CHUNK_SIZE <= protocol::MAX_FRAME_PAYLOAD);
        assert!(MAX_AUTH_ATTEMPTS >= 1);
    }
}
