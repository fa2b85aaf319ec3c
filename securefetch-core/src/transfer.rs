//! Chunked file transfer
//!
//! The sending side streams `Data` frames of at most `chunk_size` bytes and
//! closes the response with an `End` frame. A read error replaces the `End`
//! frame with `fileerror <code>`. The receiving side only ever stops on
//! `End` or an error frame; an empty `Data` frame is not a terminator.

use crate::error::{Error, Result};
use crate::protocol::{read_frame, write_frame_within, Frame, Response, MAX_FRAME_PAYLOAD};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Progress of one in-flight transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferState {
    /// Offset of the next byte to read or write
    pub offset: u64,
    /// Data frames sent or received
    pub chunks: u64,
}

impl TransferState {
    /// Cumulative bytes transferred so far
    pub fn bytes_transferred(&self) -> u64 {
        self.offset
    }

    fn advance(&mut self, len: usize) {
        self.offset += len as u64;
        self.chunks += 1;
    }
}

/// Raw OS error number for an I/O error, `EIO` when there is none
pub fn os_error_code(err: &std::io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

/// Stream `source` to `channel`.
///
/// Returns [`Error::File`] after reporting a read failure to the peer; the
/// session stays usable. Channel errors are returned as is, and a frame the
/// peer does not take within `write_limit` fails with [`Error::Timeout`].
pub async fn send_file<S, R>(
    channel: &mut S,
    source: &mut R,
    chunk_size: usize,
    write_limit: Duration,
) -> Result<TransferState>
where
    S: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let chunk_size = chunk_size.clamp(1, MAX_FRAME_PAYLOAD);
    let mut buffer = vec![0u8; chunk_size];
    let mut state = TransferState::default();

    loop {
        match source.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                write_frame_within(channel, &Frame::data(buffer[..n].to_vec()), write_limit).await?;
                state.advance(n);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(offset = state.offset, error = %e, "read failed mid-transfer");
                let report = Response::FileError(os_error_code(&e)).to_frame();
                write_frame_within(channel, &report, write_limit).await?;
                return Err(Error::File(e));
            }
        }
    }

    write_frame_within(channel, &Frame::end(), write_limit).await?;
    Ok(state)
}

/// Receive a file response from `channel` into `sink`.
///
/// `on_chunk` is called with the length of every chunk written. A local
/// write failure does not stop the stream from being drained to its end
/// marker, so the channel stays in sync for the next command.
pub async fn receive_file<S, W, F>(channel: &mut S, sink: &mut W, mut on_chunk: F) -> Result<TransferState>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut state = TransferState::default();
    let mut write_error: Option<std::io::Error> = None;

    loop {
        match Response::from_frame(read_frame(channel).await?)? {
            Response::Chunk(bytes) => {
                if bytes.is_empty() {
                    tracing::debug!(offset = state.offset, "ignoring empty data frame");
                    continue;
                }
                if write_error.is_some() {
                    continue;
                }
                match sink.write_all(&bytes).await {
                    Ok(()) => {
                        state.advance(bytes.len());
                        on_chunk(bytes.len() as u64);
                    }
                    Err(e) => write_error = Some(e),
                }
            }
            Response::End => break,
            Response::FileError(code) => return Err(Error::RemoteFile(code)),
            Response::RpcError(code) => return Err(Error::Rpc(code)),
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected frame during transfer: {:?}",
                    other
                )))
            }
        }
    }

    if let Some(e) = write_error {
        return Err(Error::File(e));
    }
    sink.flush().await.map_err(Error::File)?;
    Ok(state)
}
