//! Command dispatch for authenticated sessions

use crate::session::SessionInfo;
use securefetch_core::listing;
use securefetch_core::protocol::{write_frame_within, Command, Frame, FrameKind, Response, RpcErrorCode};
use securefetch_core::transfer::{os_error_code, send_file};
use securefetch_core::{AuditAction, AuditEvent, AuditResult, Error, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};

/// What the session loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// The single directory tree exposed to clients
#[derive(Debug, Clone)]
pub struct ServedRoot {
    path: PathBuf,
}

impl ServedRoot {
    /// Canonicalize `path`, which must be an existing directory
    pub fn new(path: &Path) -> Result<Self> {
        let path = std::fs::canonicalize(path).map_err(|e| {
            Error::Config(format!("served root {} is unusable: {}", path.display(), e))
        })?;
        if !path.is_dir() {
            return Err(Error::Config(format!(
                "served root {} is not a directory",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a client-supplied name inside the root.
    ///
    /// Absolute paths, `..` components and symlinks leading outside the root
    /// are refused with `EACCES`.
    pub async fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let denied = || io::Error::from_raw_os_error(libc::EACCES);

        let relative = Path::new(name);
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || !confined {
            return Err(denied());
        }

        let resolved = tokio::fs::canonicalize(self.path.join(relative)).await?;
        if !resolved.starts_with(&self.path) {
            return Err(denied());
        }
        Ok(resolved)
    }
}

/// Executes one command frame at a time
#[derive(Debug, Clone)]
pub struct Dispatcher {
    root: ServedRoot,
    chunk_size: usize,
    write_timeout: Duration,
}

impl Dispatcher {
    /// Every response frame must be taken by the peer within `write_timeout`
    pub fn new(root: ServedRoot, chunk_size: usize, write_timeout: Duration) -> Self {
        Self {
            root,
            chunk_size,
            write_timeout,
        }
    }

    pub fn root(&self) -> &ServedRoot {
        &self.root
    }

    /// Execute the command carried by `frame`.
    ///
    /// Only channel failures are returned as errors; protocol and file errors
    /// are reported to the peer and the session continues.
    pub async fn dispatch<S>(&self, channel: &mut S, frame: Frame, session: &SessionInfo) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let command = match frame.kind {
            FrameKind::Text => Command::parse(&frame.payload)
                .unwrap_or_else(|_| Command::Unknown("<invalid utf-8>".to_string())),
            kind => Command::Unknown(format!("<{:?} frame>", kind)),
        };
        tracing::debug!(verb = command.verb(), "dispatching command");

        match command {
            Command::Ls => self.list(channel, session).await?,
            Command::GetFile(args) => self.get_file(channel, &args, session).await?,
            Command::Exit => {
                tracing::info!("client requested exit");
                return Ok(Flow::Exit);
            }
            other => {
                tracing::warn!(verb = other.verb(), "unrecognized command");
                self.rpc_error(channel, RpcErrorCode::InvalidOperation).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn list<S>(&self, channel: &mut S, session: &SessionInfo) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let entries = match listing::list(self.root.path()).await {
            Ok(entries) => entries,
            Err(Error::File(e)) => {
                let code = os_error_code(&e);
                tracing::error!(root = %self.root.path().display(), error = %e, "cannot list served root");
                session
                    .audit(AuditAction::List, AuditResult::Failure)
                    .with_error_code(code)
                    .emit();
                return self.reply(channel, &Response::FileError(code)).await;
            }
            Err(e) => return Err(e),
        };

        for entry in &entries {
            self.reply(channel, &Response::Entry(entry.clone())).await?;
        }
        self.reply(channel, &Response::End).await?;

        session
            .audit(AuditAction::List, AuditResult::Success)
            .with_metadata("entries", entries.len().to_string())
            .emit();
        Ok(())
    }

    async fn get_file<S>(&self, channel: &mut S, args: &[String], session: &SessionInfo) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = match args {
            [] => return self.rpc_error(channel, RpcErrorCode::TooFewArgs).await,
            [name] => name.as_str(),
            _ => return self.rpc_error(channel, RpcErrorCode::TooManyArgs).await,
        };

        let mut file = match self.open(name).await {
            Ok(file) => file,
            Err(e) => {
                let code = os_error_code(&e);
                tracing::warn!(file = %name, error = %e, "could not open file");
                session
                    .audit(AuditAction::FileDownload, AuditResult::Failure)
                    .with_file_path(name)
                    .with_error_code(code)
                    .emit();
                return self.reply(channel, &Response::FileError(code)).await;
            }
        };

        let started = Instant::now();
        match send_file(channel, &mut file, self.chunk_size, self.write_timeout).await {
            Ok(state) => {
                tracing::info!(
                    file = %name,
                    bytes = state.bytes_transferred(),
                    "completed file transfer"
                );
                session
                    .audit(AuditAction::FileDownload, AuditResult::Success)
                    .with_file_path(name)
                    .with_bytes_transferred(state.bytes_transferred())
                    .with_elapsed(started)
                    .emit();
                Ok(())
            }
            Err(Error::File(e)) => {
                session
                    .audit(AuditAction::FileDownload, AuditResult::Failure)
                    .with_file_path(name)
                    .with_error_code(os_error_code(&e))
                    .with_elapsed(started)
                    .emit();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reply<S>(&self, channel: &mut S, response: &Response) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        write_frame_within(channel, &response.to_frame(), self.write_timeout).await
    }

    async fn rpc_error<S>(&self, channel: &mut S, code: RpcErrorCode) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        tracing::debug!(code = code as u8, "sending rpc error");
        self.reply(channel, &Response::RpcError(code)).await
    }

    async fn open(&self, name: &str) -> io::Result<File> {
        let path = self.root.resolve(name).await?;
        let file = File::open(&path).await?;
        if file.metadata().await?.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::EISDIR));
        }
        Ok(file)
    }
}

impl SessionInfo {
    fn audit(&self, action: AuditAction, result: AuditResult) -> AuditEvent {
        let event = AuditEvent::new(action, result)
            .with_session_id(self.id)
            .with_source(&self.peer);
        match &self.username {
            Some(user) => event.with_user(user),
            None => event,
        }
    }
}
