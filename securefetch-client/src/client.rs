//! securefetch client session

use crate::config::ClientConfig;
use securefetch_core::auth::client_handshake;
use securefetch_core::protocol::{read_frame, write_frame, Command, Frame, Response};
use securefetch_core::transfer::receive_file;
use securefetch_core::transport::{self, client_connector};
use securefetch_core::{AuthStatus, DirectoryEntry, Error, Result, TransferState};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A command channel to a securefetch server
pub struct Client<S> {
    channel: S,
    authenticated: bool,
}

/// Open a TLS connection as described by `config`
pub async fn connect(config: &ClientConfig) -> Result<Client<TlsStream<TcpStream>>> {
    let connector = client_connector(config.ca_cert.as_deref())?;
    let stream = transport::connect(
        &connector,
        &config.host,
        config.port,
        config.server_name.as_deref(),
        config.connect_timeout(),
    )
    .await?;
    tracing::info!(host = %config.host, port = config.port, "established TLS session");
    Ok(Client::new(stream))
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(channel: S) -> Self {
        Self {
            channel,
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Send one credential attempt
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<AuthStatus> {
        let status = client_handshake(&mut self.channel, username, password).await?;
        self.authenticated = status == AuthStatus::Accepted;
        Ok(status)
    }

    /// List the server's root directory
    pub async fn list(&mut self) -> Result<Vec<DirectoryEntry>> {
        write_frame(&mut self.channel, &Command::Ls.to_frame()).await?;

        let mut entries = Vec::new();
        loop {
            match Response::from_frame(read_frame(&mut self.channel).await?)? {
                Response::Entry(entry) => entries.push(entry),
                Response::End => return Ok(entries),
                Response::FileError(code) => return Err(Error::RemoteFile(code)),
                Response::RpcError(code) => return Err(Error::Rpc(code)),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected frame in listing: {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// Request `name` and write its bytes to `sink`
    pub async fn get_file<W, F>(&mut self, name: &str, sink: &mut W, on_chunk: F) -> Result<TransferState>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(u64),
    {
        write_frame(
            &mut self.channel,
            &Command::GetFile(vec![name.to_string()]).to_frame(),
        )
        .await?;
        receive_file(&mut self.channel, sink, on_chunk).await
    }

    /// Download `name` into `dir`.
    ///
    /// Bytes go to a hidden `.part` file that is renamed once the end marker
    /// arrives; on any failure it is removed and no partial file is left.
    pub async fn download<F>(&mut self, name: &str, dir: &Path, on_chunk: F) -> Result<(PathBuf, TransferState)>
    where
        F: FnMut(u64),
    {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::File(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{:?} does not name a file", name),
                ))
            })?;
        let target = dir.join(file_name);
        let partial = dir.join(format!(".{}.part", file_name));

        let mut sink = tokio::fs::File::create(&partial).await.map_err(Error::File)?;
        let result = self.get_file(name, &mut sink, on_chunk).await;
        let result = match result {
            Ok(state) => sink.sync_all().await.map(|_| state).map_err(Error::File),
            Err(e) => Err(e),
        };
        drop(sink);

        match result {
            Ok(state) => {
                tokio::fs::rename(&partial, &target).await.map_err(Error::File)?;
                tracing::info!(
                    file = %name,
                    bytes = state.bytes_transferred(),
                    "download complete"
                );
                Ok((target, state))
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    tracing::debug!(error = %cleanup, "could not remove partial download");
                }
                Err(e)
            }
        }
    }

    /// Send an arbitrary command line and return the first response
    pub async fn send_raw(&mut self, line: &str) -> Result<Response> {
        write_frame(&mut self.channel, &Frame::text(line)).await?;
        Response::from_frame(read_frame(&mut self.channel).await?)
    }

    /// Send `exit` and wait for the server to close the channel
    pub async fn exit(mut self) -> Result<()> {
        write_frame(&mut self.channel, &Command::Exit.to_frame()).await?;
        match read_frame(&mut self.channel).await {
            Err(Error::ChannelClosed) => {}
            Err(e) => return Err(e),
            Ok(frame) => {
                return Err(Error::Protocol(format!(
                    "unexpected {:?} frame after exit",
                    frame.kind
                )))
            }
        }
        if let Err(e) = self.channel.shutdown().await {
            tracing::debug!(error = %e, "shutdown after exit failed");
        }
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.channel
    }
}
