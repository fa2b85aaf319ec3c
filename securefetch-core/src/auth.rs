//! Username/password authentication for securefetch sessions
//!
//! The server runs [`server_handshake`], a small state machine
//! (`AwaitingUsername -> AwaitingPassword -> Accepted | Rejected`) that reads a
//! `user` frame and a `pass` frame and asks a [`CredentialStore`] to verify
//! them. A rejected attempt loops back to `AwaitingUsername` until the
//! configured attempt limit is used up. Clients use [`client_handshake`].

use crate::audit::{AuditAction, AuditEvent, AuditResult};
use crate::error::{Error, Result};
use crate::protocol::{read_frame, write_frame, Command, FrameKind, Response, RpcErrorCode};
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

/// Longest accepted username in bytes
pub const MAX_USERNAME_LEN: usize = 32;

/// Longest accepted password in bytes
pub const MAX_PASSWORD_LEN: usize = 256;

/// Random salt length drawn for every verification
pub const SALT_LEN: usize = 16;

/// Default PBKDF2 iteration count
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

const HASH_LEN: usize = 32;

/// Credential lookup capability
pub trait CredentialStore: Send + Sync {
    /// Check a username/password pair; both must match together
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// A single reference credential held in memory
pub struct StaticCredential {
    username: String,
    password: Zeroizing<String>,
    iterations: NonZeroU32,
}

impl StaticCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            iterations: NonZeroU32::new(DEFAULT_PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN);
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn salted_hash(&self, password: &[u8], salt: &[u8]) -> Zeroizing<[u8; HASH_LEN]> {
        let mut out = Zeroizing::new([0u8; HASH_LEN]);
        ring::pbkdf2::derive(
            ring::pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            password,
            &mut out[..],
        );
        out
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential")
            .field("username", &self.username)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl CredentialStore for StaticCredential {
    fn verify(&self, username: &str, password: &str) -> bool {
        if username.len() > MAX_USERNAME_LEN || password.len() > MAX_PASSWORD_LEN {
            return false;
        }

        // Fresh salt per attempt; both sides are hashed with it
        let mut salt = [0u8; SALT_LEN];
        if SystemRandom::new().fill(&mut salt).is_err() {
            tracing::error!("system random source failed while generating salt");
            return false;
        }

        let supplied = self.salted_hash(password.as_bytes(), &salt);
        let reference = self.salted_hash(self.password.as_bytes(), &salt);

        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = supplied[..].ct_eq(&reference[..]);
        bool::from(user_ok & pass_ok)
    }
}

/// Handshake states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingUsername,
    AwaitingPassword { username: String },
    Accepted { username: String },
    Rejected,
}

/// Final result of the server side of the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted { username: String },
    Rejected,
}

/// Client view of one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Accepted,
    Rejected { remaining: u32 },
}

/// Run the server side of the handshake on `channel`.
///
/// A first frame other than `user`, or a second other than `pass`, is
/// answered with `rpcerror 3` and fails with a protocol error.
pub async fn server_handshake<S>(
    channel: &mut S,
    store: Arc<dyn CredentialStore>,
    max_attempts: u32,
    peer: &str,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = 0u32;
    let mut state = HandshakeState::AwaitingUsername;

    loop {
        state = match state {
            HandshakeState::AwaitingUsername => match expect_command(channel).await? {
                Command::User(username) => HandshakeState::AwaitingPassword { username },
                other => return reject_unexpected(channel, VerbExpected::User, &other).await,
            },
            HandshakeState::AwaitingPassword { username } => {
                let secret = match expect_command(channel).await? {
                    Command::Pass(secret) => Zeroizing::new(secret),
                    other => return reject_unexpected(channel, VerbExpected::Pass, &other).await,
                };
                attempts += 1;

                let store = Arc::clone(&store);
                let candidate = username.clone();
                let matched =
                    tokio::task::spawn_blocking(move || store.verify(&candidate, &secret))
                        .await
                        .map_err(|e| Error::Auth(format!("credential check failed: {}", e)))?;

                if matched {
                    HandshakeState::Accepted { username }
                } else {
                    AuditEvent::new(AuditAction::Authentication, AuditResult::Failure)
                        .with_source(peer)
                        .with_user(&username)
                        .with_metadata("attempt", attempts.to_string())
                        .emit();

                    let remaining = max_attempts.saturating_sub(attempts);
                    write_frame(channel, &Response::AuthFailed { remaining }.to_frame()).await?;
                    if remaining == 0 {
                        HandshakeState::Rejected
                    } else {
                        HandshakeState::AwaitingUsername
                    }
                }
            }
            HandshakeState::Accepted { username } => {
                write_frame(channel, &Response::AuthOk.to_frame()).await?;
                AuditEvent::new(AuditAction::Authentication, AuditResult::Success)
                    .with_source(peer)
                    .with_user(&username)
                    .emit();
                return Ok(AuthOutcome::Accepted { username });
            }
            HandshakeState::Rejected => {
                AuditEvent::new(AuditAction::Authentication, AuditResult::Denied)
                    .with_source(peer)
                    .with_metadata("attempts", attempts.to_string())
                    .emit();
                return Ok(AuthOutcome::Rejected);
            }
        };
    }
}

#[derive(Debug, Clone, Copy)]
enum VerbExpected {
    User,
    Pass,
}

async fn expect_command<S>(channel: &mut S) -> Result<Command>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = read_frame(channel).await?;
    if frame.kind != FrameKind::Text {
        return Ok(Command::Unknown(String::new()));
    }
    Ok(Command::parse(&frame.payload).unwrap_or(Command::Unknown(String::new())))
}

async fn reject_unexpected<S>(
    channel: &mut S,
    expected: VerbExpected,
    got: &Command,
) -> Result<AuthOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(
        channel,
        &Response::RpcError(RpcErrorCode::InvalidOperation).to_frame(),
    )
    .await?;
    Err(Error::Protocol(format!(
        "expected {:?} during handshake, got {:?}",
        expected,
        got.verb()
    )))
}

/// Send credentials and wait for the server's verdict
pub async fn client_handshake<S>(channel: &mut S, username: &str, password: &str) -> Result<AuthStatus>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if username.is_empty() || username.split_whitespace().count() != 1 {
        return Err(Error::Auth("username must be a single word".to_string()));
    }

    write_frame(channel, &Command::User(username.to_string()).to_frame()).await?;
    write_frame(channel, &Command::Pass(password.to_string()).to_frame()).await?;

    match Response::from_frame(read_frame(channel).await?)? {
        Response::AuthOk => Ok(AuthStatus::Accepted),
        Response::AuthFailed { remaining } => Ok(AuthStatus::Rejected { remaining }),
        Response::RpcError(code) => Err(Error::Rpc(code)),
        other => Err(Error::Protocol(format!(
            "unexpected handshake response: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;

    fn store() -> Arc<dyn CredentialStore> {
        Arc::new(StaticCredential::new("GroupProject", "hello").with_iterations(1_000))
    }

    #[test]
    fn test_static_credential_verify() {
        let cred = StaticCredential::new("GroupProject", "hello").with_iterations(1_000);
        assert!(cred.verify("GroupProject", "hello"));
        assert!(!cred.verify("GroupProject", "hello!"));
        assert!(!cred.verify("groupproject", "hello"));
        assert!(!cred.verify("", ""));
        assert!(!cred.verify(&"x".repeat(MAX_USERNAME_LEN + 1), "hello"));
    }

    #[test]
    fn test_debug_hides_password() {
        let cred = StaticCredential::new("GroupProject", "hello");
        assert!(!format!("{:?}", cred).contains("hello"));
    }

    #[tokio::test]
    async fn test_handshake_accepts_reference_credential() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            server_handshake(&mut server, store(), 3, "test-peer").await
        });

        let status = client_handshake(&mut client, "GroupProject", "hello")
            .await
            .unwrap();
        assert_eq!(status, AuthStatus::Accepted);
        assert_eq!(
            server_task.await.unwrap().unwrap(),
            AuthOutcome::Accepted {
                username: "GroupProject".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_handshake_retries_then_rejects() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            server_handshake(&mut server, store(), 2, "test-peer").await
        });

        let first = client_handshake(&mut client, "GroupProject", "wrong")
            .await
            .unwrap();
        assert_eq!(first, AuthStatus::Rejected { remaining: 1 });
        let second = client_handshake(&mut client, "intruder", "hello")
            .await
            .unwrap();
        assert_eq!(second, AuthStatus::Rejected { remaining: 0 });

        assert_eq!(server_task.await.unwrap().unwrap(), AuthOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_handshake_retry_can_succeed() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            server_handshake(&mut server, store(), 3, "test-peer").await
        });

        let first = client_handshake(&mut client, "GroupProject", "nope")
            .await
            .unwrap();
        assert_eq!(first, AuthStatus::Rejected { remaining: 2 });
        let second = client_handshake(&mut client, "GroupProject", "hello")
            .await
            .unwrap();
        assert_eq!(second, AuthStatus::Accepted);
        assert!(matches!(
            server_task.await.unwrap().unwrap(),
            AuthOutcome::Accepted { .. }
        ));
    }

    #[tokio::test]
    async fn test_handshake_requires_user_first() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            server_handshake(&mut server, store(), 3, "test-peer").await
        });

        write_frame(&mut client, &Frame::text("ls")).await.unwrap();
        let reply = Response::from_frame(read_frame(&mut client).await.unwrap()).unwrap();
        assert_eq!(reply, Response::RpcError(RpcErrorCode::InvalidOperation));
        assert!(matches!(
            server_task.await.unwrap(),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_requires_pass_second() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            server_handshake(&mut server, store(), 3, "test-peer").await
        });

        write_frame(&mut client, &Frame::text("user GroupProject")).await.unwrap();
        write_frame(&mut client, &Frame::text("user again")).await.unwrap();
        let reply = Response::from_frame(read_frame(&mut client).await.unwrap()).unwrap();
        assert_eq!(reply, Response::RpcError(RpcErrorCode::InvalidOperation));
        assert!(server_task.await.unwrap().is_err());
    }
}
