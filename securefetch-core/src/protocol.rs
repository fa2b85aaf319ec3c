//! securefetch wire protocol
//!
//! Every message travels in a length-prefixed frame:
//!
//! ```text
//! version: u8 | kind: u8 | length: u32 (big-endian) | payload[length]
//! ```
//!
//! Commands and textual responses are `Text` frames, file content travels in
//! `Data` frames and a multi-frame response is closed by an `End` frame. The
//! end of a response is therefore decided by the frame kind and never by the
//! payload, so binary file content may contain any byte sequence.

use crate::error::{Error, Result};
use crate::listing::DirectoryEntry;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the fixed frame header
pub const FRAME_HEADER_LEN: usize = 6;

/// Largest payload accepted in a single frame
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// Payload of the end-marker frame
pub const END_MARKER: &str = "EOF";

pub const VERB_USER: &str = "user";
pub const VERB_PASS: &str = "pass";
pub const VERB_LS: &str = "ls";
pub const VERB_GETFILE: &str = "getfile";
pub const VERB_EXIT: &str = "exit";

const RPC_ERROR: &str = "rpcerror";
const FILE_ERROR: &str = "fileerror";
const AUTH_OK: &str = "authok";
const AUTH_ERROR: &str = "autherror";

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// UTF-8 command or response line
    Text = 0x01,
    /// Raw file chunk
    Data = 0x02,
    /// End of a multi-frame response
    End = 0x03,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameKind::Text),
            0x02 => Ok(FrameKind::Data),
            0x03 => Ok(FrameKind::End),
            _ => Err(Error::Protocol(format!("Unknown frame kind: 0x{:02x}", value))),
        }
    }
}

/// One length-delimited unit on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn text(line: impl Into<String>) -> Self {
        Self::new(FrameKind::Text, Bytes::from(line.into()))
    }

    pub fn data(chunk: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Data, chunk)
    }

    pub fn end() -> Self {
        Self::new(FrameKind::End, Bytes::from_static(END_MARKER.as_bytes()))
    }

    /// Payload as text, for `Text` frames
    pub fn as_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| Error::Protocol("Text frame is not valid UTF-8".to_string()))
    }

    /// Serialize frame to bytes
    pub fn serialize(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(Error::Protocol(format!(
                "Frame payload of {} bytes exceeds limit of {}",
                self.payload.len(),
                MAX_FRAME_PAYLOAD
            )));
        }

        let mut buffer = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buffer.put_u8(crate::PROTOCOL_VERSION);
        buffer.put_u8(self.kind as u8);
        buffer.put_u32(self.payload.len() as u32);
        buffer.extend_from_slice(&self.payload);
        Ok(buffer.freeze())
    }

    /// Validate a header and return the kind and payload length
    pub fn parse_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<(FrameKind, usize)> {
        if header[0] != crate::PROTOCOL_VERSION {
            return Err(Error::Protocol(format!(
                "Unsupported protocol version: {}",
                header[0]
            )));
        }
        let kind = FrameKind::try_from(header[1])?;
        let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(Error::Protocol(format!(
                "Frame length {} exceeds limit of {}",
                length, MAX_FRAME_PAYLOAD
            )));
        }
        Ok((kind, length))
    }
}

/// Write one frame and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(channel: &mut W, frame: &Frame) -> Result<()> {
    let bytes = frame.serialize()?;
    channel.write_all(&bytes).await?;
    channel.flush().await?;
    Ok(())
}

/// Write one frame, failing with [`Error::Timeout`] if the peer does not
/// take it within `limit`
pub async fn write_frame_within<W: AsyncWrite + Unpin>(
    channel: &mut W,
    frame: &Frame,
    limit: Duration,
) -> Result<()> {
    tokio::time::timeout(limit, write_frame(channel, frame))
        .await
        .map_err(|_| Error::Timeout(format!("peer did not accept a frame within {:?}", limit)))?
}

/// Read one frame.
///
/// Returns [`Error::ChannelClosed`] when the peer closed the stream before the
/// first header byte; a stream that ends inside a frame is a channel error.
pub async fn read_frame<R: AsyncRead + Unpin>(channel: &mut R) -> Result<Frame> {
    let mut header = [0u8; FRAME_HEADER_LEN];

    match channel.read(&mut header[..1]).await {
        Ok(0) => return Err(Error::ChannelClosed),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ChannelClosed)
        }
        Err(e) => return Err(Error::Channel(e)),
    }
    channel.read_exact(&mut header[1..]).await?;

    let (kind, length) = Frame::parse_header(&header)?;
    let mut payload = vec![0u8; length];
    channel.read_exact(&mut payload).await?;

    Ok(Frame::new(kind, payload))
}

/// Protocol error codes reported with `rpcerror`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcErrorCode {
    TooFewArgs = 1,
    TooManyArgs = 2,
    InvalidOperation = 3,
}

impl TryFrom<u8> for RpcErrorCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RpcErrorCode::TooFewArgs),
            2 => Ok(RpcErrorCode::TooManyArgs),
            3 => Ok(RpcErrorCode::InvalidOperation),
            _ => Err(Error::Protocol(format!("Unknown rpc error code: {}", value))),
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RpcErrorCode::TooFewArgs => "no filename specified",
            RpcErrorCode::TooManyArgs => "too many file names provided",
            RpcErrorCode::InvalidOperation => "invalid operation",
        };
        write!(f, "{} ({})", text, *self as u8)
    }
}

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User(String),
    Pass(String),
    Ls,
    /// Arguments are kept unvalidated; the dispatcher checks the count
    GetFile(Vec<String>),
    Exit,
    Unknown(String),
}

impl Command {
    /// Parse a command from a frame payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::Protocol("Command is not valid UTF-8".to_string()))?;

        let mut tokens = text.split_whitespace();
        let verb = tokens.next().unwrap_or("");

        let command = match verb {
            VERB_USER => Command::User(tokens.collect::<Vec<_>>().join(" ")),
            VERB_PASS => {
                let secret = text
                    .trim_start()
                    .strip_prefix(VERB_PASS)
                    .and_then(|rest| rest.strip_prefix(' '))
                    .unwrap_or("");
                Command::Pass(secret.to_string())
            }
            VERB_LS => Command::Ls,
            VERB_GETFILE => Command::GetFile(tokens.map(str::to_string).collect()),
            VERB_EXIT => Command::Exit,
            other => Command::Unknown(other.to_string()),
        };
        Ok(command)
    }

    /// Verb used for logging; never includes arguments
    pub fn verb(&self) -> &str {
        match self {
            Command::User(_) => VERB_USER,
            Command::Pass(_) => VERB_PASS,
            Command::Ls => VERB_LS,
            Command::GetFile(_) => VERB_GETFILE,
            Command::Exit => VERB_EXIT,
            Command::Unknown(verb) => verb,
        }
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            Command::User(name) => Frame::text(format!("{} {}", VERB_USER, name)),
            Command::Pass(secret) => Frame::text(format!("{} {}", VERB_PASS, secret)),
            Command::Ls => Frame::text(VERB_LS),
            Command::GetFile(args) if args.is_empty() => Frame::text(VERB_GETFILE),
            Command::GetFile(args) => Frame::text(format!("{} {}", VERB_GETFILE, args.join(" "))),
            Command::Exit => Frame::text(VERB_EXIT),
            Command::Unknown(verb) => Frame::text(verb.clone()),
        }
    }
}

/// One server response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Entry(DirectoryEntry),
    Chunk(Bytes),
    RpcError(RpcErrorCode),
    FileError(i32),
    End,
    AuthOk,
    AuthFailed { remaining: u32 },
}

impl Response {
    pub fn to_frame(&self) -> Frame {
        match self {
            Response::Entry(entry) => Frame::text(entry.to_line()),
            Response::Chunk(bytes) => Frame::data(bytes.clone()),
            Response::RpcError(code) => Frame::text(format!("{} {}", RPC_ERROR, *code as u8)),
            Response::FileError(code) => Frame::text(format!("{} {}", FILE_ERROR, code)),
            Response::End => Frame::end(),
            Response::AuthOk => Frame::text(AUTH_OK),
            Response::AuthFailed { remaining } => {
                Frame::text(format!("{} {}", AUTH_ERROR, remaining))
            }
        }
    }

    pub fn from_frame(frame: Frame) -> Result<Self> {
        match frame.kind {
            FrameKind::Data => Ok(Response::Chunk(frame.payload)),
            FrameKind::End => Ok(Response::End),
            FrameKind::Text => {
                let text = frame.as_text()?;
                // Entry lines always carry a tab; status lines never do
                if text.contains('\t') {
                    return DirectoryEntry::parse_line(text).map(Response::Entry);
                }

                let (keyword, arg) = text.split_once(' ').unwrap_or((text, ""));
                match keyword {
                    RPC_ERROR => {
                        let code = parse_number::<u8>(arg)?;
                        Ok(Response::RpcError(RpcErrorCode::try_from(code)?))
                    }
                    FILE_ERROR => Ok(Response::FileError(parse_number(arg)?)),
                    AUTH_OK => Ok(Response::AuthOk),
                    AUTH_ERROR => Ok(Response::AuthFailed {
                        remaining: parse_number(arg)?,
                    }),
                    _ => Err(Error::Protocol(format!("Unexpected response: {:?}", text))),
                }
            }
        }
    }
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("Invalid numeric field: {:?}", text)))
}
