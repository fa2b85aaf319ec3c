//! Per-connection session handling

use crate::dispatch::{Dispatcher, Flow};
use securefetch_core::auth::server_handshake;
use securefetch_core::protocol::read_frame;
use securefetch_core::{AuditAction, AuditEvent, AuditResult, AuthOutcome, CredentialStore, Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::Instrument;
use uuid::Uuid;

/// Identity of one client connection
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    pub peer: String,
    pub username: Option<String>,
}

impl SessionInfo {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            username: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Terminated,
}

/// Settings shared by every session of a server
pub struct SessionContext {
    pub store: Arc<dyn CredentialStore>,
    pub dispatcher: Dispatcher,
    pub max_auth_attempts: u32,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
}

/// One authenticated command channel
pub struct Session<S> {
    channel: S,
    info: SessionInfo,
    state: SessionState,
    handshake_deadline: Option<tokio::time::Instant>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(channel: S, peer: impl Into<String>) -> Self {
        Self {
            channel,
            info: SessionInfo::new(peer),
            state: SessionState::Unauthenticated,
            handshake_deadline: None,
        }
    }

    /// Finish the credential exchange by `deadline` instead of
    /// `handshake_timeout` from the start of [`Session::run`]
    pub fn with_handshake_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.handshake_deadline = Some(deadline);
        self
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the session to completion and close the channel
    pub async fn run(mut self, ctx: &SessionContext) -> Result<()> {
        let span = tracing::info_span!("session", id = %self.info.id, peer = %self.info.peer);
        async move {
            let started = Instant::now();
            AuditEvent::new(AuditAction::SessionStart, AuditResult::Success)
                .with_session_id(self.info.id)
                .with_source(&self.info.peer)
                .emit();

            let result = self.serve(ctx).await;
            self.close().await;

            let audit_result = match &result {
                Ok(()) => AuditResult::Success,
                Err(Error::ChannelClosed) => {
                    tracing::info!("peer closed the connection");
                    AuditResult::Success
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session ended with error");
                    AuditResult::Failure
                }
            };
            let mut event = AuditEvent::new(AuditAction::SessionEnd, audit_result)
                .with_session_id(self.info.id)
                .with_source(&self.info.peer)
                .with_elapsed(started);
            if let Some(user) = &self.info.username {
                event = event.with_user(user);
            }
            event.emit();

            match result {
                Err(Error::ChannelClosed) => Ok(()),
                other => other,
            }
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self, ctx: &SessionContext) -> Result<()> {
        let deadline = self
            .handshake_deadline
            .unwrap_or_else(|| tokio::time::Instant::now() + ctx.handshake_timeout);
        let handshake = server_handshake(
            &mut self.channel,
            Arc::clone(&ctx.store),
            ctx.max_auth_attempts,
            &self.info.peer,
        );
        let outcome = tokio::time::timeout_at(deadline, handshake)
            .await
            .map_err(|_| Error::Timeout("credential exchange".to_string()))??;

        match outcome {
            AuthOutcome::Accepted { username } => {
                tracing::info!(user = %username, "client authenticated");
                self.info.username = Some(username);
                self.state = SessionState::Authenticated;
            }
            AuthOutcome::Rejected => {
                tracing::warn!("authentication attempts exhausted, closing session");
                return Ok(());
            }
        }

        loop {
            let frame = tokio::time::timeout(ctx.idle_timeout, read_frame(&mut self.channel))
                .await
                .map_err(|_| Error::Timeout(format!("no command within {:?}", ctx.idle_timeout)))??;

            match ctx.dispatcher.dispatch(&mut self.channel, frame, &self.info).await? {
                Flow::Continue => {}
                Flow::Exit => return Ok(()),
            }
        }
    }

    async fn close(&mut self) {
        self.state = SessionState::Terminated;
        if let Err(e) = self.channel.shutdown().await {
            tracing::debug!(error = %e, "channel shutdown failed");
        }
    }
}

/// Serve one connection end to end
pub async fn handle_session<S>(channel: S, peer: String, ctx: Arc<SessionContext>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Session::new(channel, peer).run(&ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ServedRoot;
    use securefetch_core::auth::client_handshake;
    use securefetch_core::protocol::{write_frame, Command};
    use securefetch_core::{AuthStatus, StaticCredential};

    fn context(root: &std::path::Path, idle: Duration) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            store: Arc::new(StaticCredential::new("alice", "secret").with_iterations(1_000)),
            dispatcher: Dispatcher::new(ServedRoot::new(root).unwrap(), 1024, idle),
            max_auth_attempts: 2,
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: idle,
        })
    }

    #[test]
    fn test_new_session_is_unauthenticated() {
        let (a, _b) = tokio::io::duplex(64);
        let session = Session::new(a, "peer");
        assert_eq!(session.state(), &SessionState::Unauthenticated);
        assert!(session.info().username.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_close_session() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Duration::from_secs(5));
        let (server, mut client) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_session(server, "peer".to_string(), ctx));

        let first = client_handshake(&mut client, "alice", "wrong").await.unwrap();
        assert_eq!(first, AuthStatus::Rejected { remaining: 1 });
        let second = client_handshake(&mut client, "alice", "wrong").await.unwrap();
        assert_eq!(second, AuthStatus::Rejected { remaining: 0 });

        assert!(task.await.unwrap().is_ok());
        assert!(matches!(read_frame(&mut client).await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Duration::from_millis(50));
        let (server, mut client) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_session(server, "peer".to_string(), ctx));

        let status = client_handshake(&mut client, "alice", "secret").await.unwrap();
        assert_eq!(status, AuthStatus::Accepted);

        assert!(matches!(task.await.unwrap(), Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_stalled_reader_cannot_pin_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![0x5a; 4 * 1024 * 1024]).unwrap();
        let ctx = context(dir.path(), Duration::from_millis(200));
        let (server, mut client) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_session(server, "peer".to_string(), ctx));

        let status = client_handshake(&mut client, "alice", "secret").await.unwrap();
        assert_eq!(status, AuthStatus::Accepted);
        write_frame(&mut client, &Command::GetFile(vec!["big.bin".to_string()]).to_frame())
            .await
            .unwrap();

        // client keeps the channel open but never reads the response
        let finished = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("session should end once the peer stops reading");
        assert!(matches!(finished.unwrap(), Err(Error::Timeout(_))));
        drop(client);
    }

    #[tokio::test]
    async fn test_handshake_deadline_is_shared_with_tls_accept() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Duration::from_secs(5));
        let (server, _client) = tokio::io::duplex(4096);

        // the TLS accept already used up the whole window
        let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
        let session = Session::new(server, "peer").with_handshake_deadline(deadline);
        let result = tokio::time::timeout(Duration::from_secs(2), session.run(&ctx))
            .await
            .expect("credential exchange should stop at the shared deadline");
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_command_before_login_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Duration::from_secs(5));
        let (server, mut client) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_session(server, "peer".to_string(), ctx));

        write_frame(&mut client, &Command::Ls.to_frame()).await.unwrap();
        assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
    }
}
