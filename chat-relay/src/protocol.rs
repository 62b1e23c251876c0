//! Types exchanged between the listener, the client readers and the
//! dispatcher, plus the newline framing used on the wire.
//!
//! A message is one line of text including its trailing `\n`. There is no
//! length prefix and no encoding negotiation; payload bytes are relayed
//! untouched.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_DELIMITER: u8 = b'\n';

/// Server-assigned identifier for one connected session.
///
/// Ids start at 1, are strictly increasing and are never reused within a
/// server process, even after the client leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An accepted transport session waiting for the dispatcher to register it.
#[derive(Debug)]
pub struct PendingConnection<S> {
    pub stream: S,
    pub peer: SocketAddr,
}

/// One line received from a client, newline included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: ClientId,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Payload without its line ending, lossily decoded for logging.
    pub fn text(&self) -> String {
        line_text(&self.payload)
    }
}

/// Strips one trailing `\n` (and a `\r` before it) and decodes the rest,
/// replacing invalid UTF-8 rather than rejecting it.
pub fn line_text(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Events flowing from a client reader to the dispatcher.
///
/// Lines and the final departure share one channel so the dispatcher always
/// sees a client's last lines before it sees the client leave.
#[derive(Debug)]
pub enum ClientEvent {
    Line(InboundMessage),
    Left { id: ClientId, reason: DepartureReason },
}

/// Why a client was dropped from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureReason {
    /// The peer closed its side of the connection.
    Closed,
    ReadFailed(io::ErrorKind),
    WriteFailed(io::ErrorKind),
    /// A broadcast write did not finish within the configured timeout.
    WriteTimedOut,
    ServerShutdown,
}

impl fmt::Display for DepartureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed by peer"),
            Self::ReadFailed(kind) => write!(f, "read failed: {kind}"),
            Self::WriteFailed(kind) => write!(f, "write failed: {kind}"),
            Self::WriteTimedOut => f.write_str("write timed out"),
            Self::ServerShutdown => f.write_str("server shutting down"),
        }
    }
}

/// Decisions made by the dispatcher, published to an optional observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotice {
    Joined { id: ClientId, peer: SocketAddr },
    Relayed { from: ClientId, recipients: Vec<ClientId> },
    Left { id: ClientId, reason: DepartureReason },
}

/// Reads the next complete line into `buf`, replacing its contents.
///
/// Returns `Ok(false)` once the stream is exhausted. Bytes left over at end of
/// stream without a trailing newline are not a message and are discarded.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let bytes = reader.read_until(LINE_DELIMITER, buf).await?;
    if bytes == 0 {
        return Ok(false);
    }

    if buf.last() != Some(&LINE_DELIMITER) {
        buf.clear();
        return Ok(false);
    }

    Ok(true)
}

/// Writes `payload` verbatim and flushes so the peer sees it immediately.
pub async fn write_line<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.flush().await
}
