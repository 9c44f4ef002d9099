use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

mod mutf8;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 12345;
/// Upper bound for a single read or write while streaming a file payload.
pub const CHUNK_SIZE: usize = 4096;
/// Text values carry a `u16` byte-length prefix.
pub const MAX_TEXT_BYTES: usize = u16::MAX as usize;

pub const TAG_SUBMIT_NICK: &str = "SUBMITNICK";
pub const TAG_TEXT: &str = "TEXT";
pub const TAG_MSG_FROM: &str = "MSGFROM";
pub const TAG_MSG_TO: &str = "MSGTO";
pub const TAG_SEND_FILE: &str = "SENDFILE";
pub const USERLIST_PREFIX: &str = "USERLIST:";

pub type Nickname = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnnouncement {
    pub from: Nickname,
    pub file_name: String,
    pub size: u64,
}

/// A decoded server-to-client frame.
///
/// For [`InboundFrame::FileAnnouncement`] only the header has been consumed;
/// the caller must read exactly `size` payload bytes before the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    RosterUpdate(Vec<Nickname>),
    PeerMessage { from: Nickname, text: String },
    FileAnnouncement(FileAnnouncement),
    Unknown { tag: String },
}

/// A client-to-server frame header. File bodies are streamed separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Nickname(Nickname),
    MsgTo {
        to: Nickname,
        text: String,
    },
    SendFileHeader {
        to: Nickname,
        file_name: String,
        size: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolAnomaly {
    #[error("{tag} payload has no ':' separator")]
    MissingSeparator { tag: &'static str },
    #[error("{tag} payload does not start with {expected:?}")]
    UnexpectedText {
        tag: &'static str,
        expected: &'static str,
    },
    #[error("{tag} carries a malformed text value: {detail}")]
    MalformedText { tag: &'static str, detail: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed text value: {0}")]
    MalformedText(String),
    #[error("text value of {0} bytes exceeds the {max}-byte limit", max = MAX_TEXT_BYTES)]
    TextTooLong(usize),
    #[error("negative payload length {0}")]
    NegativeLength(i64),
    #[error("payload length {0} does not fit a signed 64-bit field")]
    LengthOverflow(u64),
    #[error(transparent)]
    Anomaly(#[from] ProtocolAnomaly),
}

impl FrameError {
    /// Anomalies are raised only after the whole frame has been consumed, so
    /// the stream is still aligned on the next tag.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Anomaly(_))
    }
}

pub fn put_text(out: &mut BytesMut, text: &str) -> Result<(), FrameError> {
    let len = mutf8::encoded_len(text);
    let len_u16 = u16::try_from(len).map_err(|_| FrameError::TextTooLong(len))?;
    out.reserve(2 + len);
    out.put_u16(len_u16);
    mutf8::encode_into(text, out);
    Ok(())
}

pub fn put_length(out: &mut BytesMut, len: u64) -> Result<(), FrameError> {
    let len_i64 = i64::try_from(len).map_err(|_| FrameError::LengthOverflow(len))?;
    out.put_i64(len_i64);
    Ok(())
}

pub fn encode_frame(frame: &OutboundFrame) -> Result<Bytes, FrameError> {
    let mut out = BytesMut::new();
    match frame {
        OutboundFrame::Nickname(nickname) => put_text(&mut out, nickname)?,
        OutboundFrame::MsgTo { to, text } => {
            put_text(&mut out, TAG_MSG_TO)?;
            put_text(&mut out, to)?;
            put_text(&mut out, text)?;
        }
        OutboundFrame::SendFileHeader {
            to,
            file_name,
            size,
        } => {
            put_text(&mut out, TAG_SEND_FILE)?;
            put_text(&mut out, to)?;
            put_text(&mut out, file_name)?;
            put_length(&mut out, *size)?;
        }
    }
    Ok(out.freeze())
}

/// Reads one text value. A malformed body is fatal here; inside
/// [`read_frame`] it is reported as an anomaly once the frame is consumed.
pub async fn read_text<R>(reader: &mut R) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let body = read_text_body(reader).await?;
    mutf8::decode(&body)
}

async fn read_text_body<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await.map_err(eof_as_closed)? as usize;
    let mut body = vec![0_u8; len];
    if len > 0 {
        reader.read_exact(&mut body).await.map_err(eof_as_closed)?;
    }
    Ok(body)
}

fn decode_field(tag: &'static str, body: &[u8]) -> Result<String, ProtocolAnomaly> {
    mutf8::decode(body).map_err(|err| ProtocolAnomaly::MalformedText {
        tag,
        detail: err.to_string(),
    })
}

/// Discards a file payload whose header could not be decoded.
async fn skip_payload<R>(reader: &mut R, size: u64) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let skipped = tokio::io::copy(&mut (&mut *reader).take(size), &mut tokio::io::sink()).await?;
    if skipped < size {
        return Err(FrameError::ConnectionClosed);
    }
    Ok(())
}

pub async fn read_length<R>(reader: &mut R) -> Result<u64, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_i64().await.map_err(eof_as_closed)?;
    u64::try_from(len).map_err(|_| FrameError::NegativeLength(len))
}

pub async fn read_frame<R>(reader: &mut R) -> Result<InboundFrame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let tag_body = read_text_body(reader).await?;
    let Ok(tag) = mutf8::decode(&tag_body) else {
        // Not one of ours; handled like any other unknown tag.
        return Ok(InboundFrame::Unknown {
            tag: String::from_utf8_lossy(&tag_body).into_owned(),
        });
    };
    match tag.as_str() {
        TAG_TEXT => {
            let body = read_text_body(reader).await?;
            let payload = decode_field(TAG_TEXT, &body)?;
            Ok(InboundFrame::RosterUpdate(parse_roster(&payload)?))
        }
        TAG_MSG_FROM => {
            let body = read_text_body(reader).await?;
            let payload = decode_field(TAG_MSG_FROM, &body)?;
            let (from, text) = split_peer_message(&payload)?;
            Ok(InboundFrame::PeerMessage { from, text })
        }
        TAG_SEND_FILE => {
            let from = read_text_body(reader).await?;
            let file_name = read_text_body(reader).await?;
            let size = read_length(reader).await?;
            match (
                decode_field(TAG_SEND_FILE, &from),
                decode_field(TAG_SEND_FILE, &file_name),
            ) {
                (Ok(from), Ok(file_name)) => Ok(InboundFrame::FileAnnouncement(FileAnnouncement {
                    from,
                    file_name,
                    size,
                })),
                (Err(anomaly), _) | (_, Err(anomaly)) => {
                    skip_payload(reader, size).await?;
                    Err(anomaly.into())
                }
            }
        }
        _ => Ok(InboundFrame::Unknown { tag }),
    }
}

/// Parses a `USERLIST:a,b,c` payload, dropping empty entries.
pub fn parse_roster(payload: &str) -> Result<Vec<Nickname>, ProtocolAnomaly> {
    let list = payload
        .strip_prefix(USERLIST_PREFIX)
        .ok_or(ProtocolAnomaly::UnexpectedText {
            tag: TAG_TEXT,
            expected: USERLIST_PREFIX,
        })?;
    Ok(list
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Splits a `from:message` payload on the first colon only.
pub fn split_peer_message(payload: &str) -> Result<(Nickname, String), ProtocolAnomaly> {
    payload
        .split_once(':')
        .map(|(from, text)| (from.to_owned(), text.to_owned()))
        .ok_or(ProtocolAnomaly::MissingSeparator { tag: TAG_MSG_FROM })
}

fn eof_as_closed(err: io::Error) -> FrameError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(err)
    }
}
