//! Log frame decoding and the log multiplexer.
//!
//! A container's combined output arrives as a sequence of frames: an 8-byte
//! header (stream tag, three reserved bytes, big-endian payload length)
//! followed by the payload. The [`LogMultiplexer`] consumes one source at a
//! time and writes `prefix + payload` to its sink for every frame.
//!
//! Sources are handed over a rendezvous: [`LogMultiplexer::hand_off`] only
//! completes once the multiplexer has accepted the new source, which it does
//! only after the previous one has ended. Output of two process incarnations
//! therefore never interleaves.

use crate::container::runtime::ByteReader;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Length of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

const BOLD_ON: &[u8] = b"\x1b[1m";
const BOLD_OFF: &[u8] = b"\x1b[0m";

/// Which stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard input echo (tag 0)
    Stdin,
    /// Standard output (tag 1)
    Stdout,
    /// Standard error (tag 2)
    Stderr,
    /// Any other tag value
    Other(u8),
}

impl StreamKind {
    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => StreamKind::Stdin,
            1 => StreamKind::Stdout,
            2 => StreamKind::Stderr,
            other => StreamKind::Other(other),
        }
    }

    fn tag(self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
            StreamKind::Other(tag) => tag,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Stream the payload belongs to
    pub kind: StreamKind,
    /// Payload length in bytes
    pub len: u32,
}

impl FrameHeader {
    /// Decode a raw header.
    pub fn parse(raw: [u8; HEADER_LEN]) -> Self {
        Self {
            kind: StreamKind::from_tag(raw[0]),
            len: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    /// Encode into the wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let len = self.len.to_be_bytes();
        [self.kind.tag(), 0, 0, 0, len[0], len[1], len[2], len[3]]
    }
}

/// Encode one frame (header plus payload).
pub fn encode_frame(kind: StreamKind, payload: &[u8]) -> Bytes {
    let header = FrameHeader {
        kind,
        len: payload.len() as u32,
    };
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}

/// Timestamp prefix of a payload produced with timestamps enabled.
pub fn payload_timestamp(payload: &[u8]) -> Option<DateTime<Utc>> {
    let end = payload.iter().position(|b| *b == b' ')?;
    let raw = std::str::from_utf8(&payload[..end]).ok()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// One byte-stream source of multiplexed frames.
///
/// Closing the source (through its [`closer`](LogSource::closer)) makes the
/// multiplexer abandon it and move on to the next one.
pub struct LogSource {
    reader: ByteReader,
    closed: CancellationToken,
}

impl LogSource {
    /// Wrap a reader; `closed` ends the source when cancelled.
    pub fn new(reader: ByteReader, closed: CancellationToken) -> Self {
        Self { reader, closed }
    }

    /// Wrap any reader with a fresh close handle.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::new(Box::pin(reader), CancellationToken::new())
    }

    /// Handle that closes this source once it has been handed off.
    pub fn closer(&self) -> CancellationToken {
        self.closed.clone()
    }
}

struct Handoff {
    source: LogSource,
    accepted: oneshot::Sender<()>,
}

/// Relays frames from a succession of sources into one sink.
pub struct LogMultiplexer {
    sources: mpsc::Sender<Handoff>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl LogMultiplexer {
    /// Spawn the multiplexer task writing to `sink`.
    pub fn spawn<W>(sink: W, prefix: impl Into<String>, bold_stderr: bool) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sources, rx) = mpsc::channel(1);
        let stop = CancellationToken::new();
        let task = tokio::spawn(run(sink, prefix.into(), bold_stderr, rx, stop.clone()));
        Self {
            sources,
            stop,
            task,
        }
    }

    /// Deliver the next source and wait until the multiplexer accepts it.
    ///
    /// Returns `false` if the multiplexer is no longer running. If this
    /// future is dropped before acceptance the source is discarded.
    pub async fn hand_off(&self, source: LogSource) -> bool {
        let (accepted, ack) = oneshot::channel();
        if self.sources.send(Handoff { source, accepted }).await.is_err() {
            return false;
        }
        ack.await.is_ok()
    }

    /// Handle that abandons the active source and stops the task.
    pub fn stopper(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Stop accepting sources and wait for the task to finish.
    ///
    /// The active source gets up to `drain` to reach its end; after that it
    /// is abandoned. A zero `drain` abandons it right away.
    pub async fn finish(self, drain: Duration) {
        drop(self.sources);
        let mut task = self.task;
        let joined = match tokio::time::timeout(drain, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                if !drain.is_zero() {
                    debug!("Log source still open after {:?}, abandoning it", drain);
                }
                self.stop.cancel();
                task.await
            }
        };
        if let Err(e) = joined {
            debug!("Log multiplexer task ended abnormally: {}", e);
        }
    }
}

async fn run<W>(
    mut sink: W,
    prefix: String,
    bold_stderr: bool,
    mut rx: mpsc::Receiver<Handoff>,
    stop: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(Handoff { source, accepted }) = rx.recv().await {
        if stop.is_cancelled() {
            break;
        }
        if accepted.send(()).is_err() {
            debug!("Log source handoff abandoned before acceptance");
            continue;
        }
        let LogSource { mut reader, closed } = source;
        let mut bold_open = false;
        tokio::select! {
            _ = closed.cancelled() => trace!("Log source closed"),
            _ = stop.cancelled() => trace!("Log multiplexer stopped"),
            result = pump(&mut reader, &mut sink, prefix.as_bytes(), bold_stderr, &mut bold_open) => {
                if let Err(e) = result {
                    debug!("Log source ended: {}", e);
                }
            }
        }
        // A source abandoned mid-frame must not leave the terminal bold.
        if bold_open && sink.write_all(BOLD_OFF).await.is_err() {
            break;
        }
    }
    let _ = sink.flush().await;
}

/// Copy frames until the source fails or the sink rejects a write.
async fn pump<R, W>(
    reader: &mut R,
    sink: &mut W,
    prefix: &[u8],
    bold_stderr: bool,
    bold_open: &mut bool,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut raw = [0u8; HEADER_LEN];
    loop {
        reader.read_exact(&mut raw).await?;
        let header = FrameHeader::parse(raw);
        sink.write_all(prefix).await?;

        let styled = bold_stderr && header.kind == StreamKind::Stderr;
        if styled {
            sink.write_all(BOLD_ON).await?;
            *bold_open = true;
        }
        let expected = u64::from(header.len);
        let copied = tokio::io::copy(&mut (&mut *reader).take(expected), sink).await?;
        if copied != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("frame truncated after {} of {} bytes", copied, expected),
            ));
        }
        if styled {
            sink.write_all(BOLD_OFF).await?;
            *bold_open = false;
        }
        sink.flush().await?;
    }
}
