//! Framed TCP transport.
//!
//! Every envelope is written as an 8-byte little-endian length followed by
//! the encoded bytes. Each attempt is one future (connect, handshake, then
//! the receive and send loops) raced against a cancel signal, so closing an
//! attempt drops its socket at whatever stage it has reached. The future is
//! driven on its own thread with `block_on`; socket readiness comes from the
//! `async-io` reactor. All events funnel into one queue that the session
//! owner drains with [`TcpTransport::drain_events`].
//!
//! Handshake: the client writes `hello` with its join parameters and waits
//! for `welcome`. [`TransportEvent::Opened`] is only reported once the
//! welcome has arrived. Connect and handshake together must finish within
//! the open timeout.

use std::collections::HashMap;
use std::io;
use std::thread;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_io::Timer;
use async_net::TcpStream;
use futures_lite::future;
use futures_lite::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use lattice_wire::{ClientHello, Envelope, Inbound, WireError, events};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::{ClientConfig, MAX_FRAME_LEN, OPEN_TIMEOUT_MS};
use crate::transport::{AttemptId, JoinParams, Transport, TransportError, TransportEvent};

const HEADER_LEN: usize = 8;

// ============================================================================
// Framing
// ============================================================================

fn push_frame(buffer: &mut Vec<u8>, payload: &[u8]) {
    buffer.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buffer.extend_from_slice(payload);
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + payload.len());
    push_frame(&mut buffer, payload);
    writer.write_all(&buffer).await?;
    writer.flush().await
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]).await {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("truncated frame header: {filled} of {HEADER_LEN} bytes"),
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    let len = u64::from_le_bytes(header);
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= max_len)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit of {max_len}"),
            )
        })?;

    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug, Error)]
enum OpenError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("server closed the connection during handshake")]
    Closed,
    #[error("expected welcome, got `{0}`")]
    Unexpected(String),
    #[error("connect and handshake timed out after {0:?}")]
    TimedOut(Duration),
}

async fn handshake(
    stream: &mut TcpStream,
    join: &JoinParams,
    max_frame_len: usize,
) -> Result<String, OpenError> {
    let hello = ClientHello {
        room: join.room.clone(),
        name: join.name.clone(),
    };
    write_frame(stream, &Envelope::wrap(events::HELLO, &hello).to_bytes()).await?;

    let bytes = read_frame(stream, max_frame_len)
        .await?
        .ok_or(OpenError::Closed)?;
    let envelope = Envelope::from_bytes(&bytes)?;
    match Inbound::decode(&envelope)? {
        Inbound::Welcome(welcome) => Ok(welcome.connection_id),
        _ => Err(OpenError::Unexpected(envelope.event)),
    }
}

// ============================================================================
// Transport
// ============================================================================

struct LinkHandle {
    outbound: Sender<Vec<u8>>,
    cancel: Sender<()>,
}

impl LinkHandle {
    fn shutdown(&self) {
        // Closing the cancel channel wakes the attempt, which drops its socket.
        self.cancel.close();
        self.outbound.close();
    }
}

/// TCP provider for [`Transport`].
pub struct TcpTransport {
    max_frame_len: usize,
    open_timeout: Duration,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    links: HashMap<AttemptId, LinkHandle>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl TcpTransport {
    pub fn new(max_frame_len: usize) -> Self {
        let (events_tx, events_rx) = async_channel::unbounded();
        Self {
            max_frame_len,
            open_timeout: Duration::from_millis(OPEN_TIMEOUT_MS),
            events_tx,
            events_rx,
            links: HashMap::new(),
        }
    }

    /// Frame limit and open timeout taken from `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.max_frame_len)
            .with_open_timeout(Duration::from_millis(config.open_timeout_ms))
    }

    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    /// Take every event queued so far, in arrival order. Never blocks.
    pub fn drain_events(&self) -> Vec<TransportEvent> {
        std::iter::from_fn(|| self.events_rx.try_recv().ok()).collect()
    }

    /// Receiver for owners that want to wait on the queue.
    pub fn events(&self) -> Receiver<TransportEvent> {
        self.events_rx.clone()
    }

    /// Number of attempts not yet closed.
    pub fn open_attempts(&self) -> usize {
        self.links.len()
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, attempt: AttemptId, endpoint: &str, join: &JoinParams) {
        let (outbound_tx, outbound_rx) = async_channel::unbounded();
        let (cancel_tx, cancel_rx) = async_channel::bounded(1);

        let task = AttemptTask {
            attempt,
            endpoint: endpoint.to_string(),
            join: join.clone(),
            max_frame_len: self.max_frame_len,
            open_timeout: self.open_timeout,
            events: self.events_tx.clone(),
            outbound: outbound_rx,
        };

        let spawned = thread::Builder::new()
            .name(format!("lattice-conn-{attempt}"))
            .spawn(move || task.run(cancel_rx));
        if let Err(err) = spawned {
            warn!(attempt, %err, "failed to spawn connection thread");
            let _ = self.events_tx.try_send(TransportEvent::OpenFailed {
                attempt,
                reason: err.to_string(),
            });
            return;
        }

        self.links.insert(
            attempt,
            LinkHandle {
                outbound: outbound_tx,
                cancel: cancel_tx,
            },
        );
    }

    fn close(&mut self, attempt: AttemptId) {
        if let Some(link) = self.links.remove(&attempt) {
            debug!(attempt, "closing tcp link");
            link.shutdown();
        }
    }

    fn send(&mut self, attempt: AttemptId, frame: Vec<u8>) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame_len,
            });
        }
        let link = self
            .links
            .get(&attempt)
            .ok_or(TransportError::UnknownAttempt(attempt))?;
        link.outbound
            .try_send(frame)
            .map_err(|_| TransportError::Closed(attempt))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for link in self.links.values() {
            link.shutdown();
        }
    }
}

// ============================================================================
// Connection Tasks
// ============================================================================

struct AttemptTask {
    attempt: AttemptId,
    endpoint: String,
    join: JoinParams,
    max_frame_len: usize,
    open_timeout: Duration,
    events: Sender<TransportEvent>,
    outbound: Receiver<Vec<u8>>,
}

impl AttemptTask {
    fn run(self, cancel: Receiver<()>) {
        let attempt = self.attempt;
        future::block_on(future::or(self.drive(), async move {
            // Resolves once the owner closes the channel.
            let _ = cancel.recv().await;
            debug!(attempt, "tcp attempt cancelled");
        }));
    }

    async fn open(&self) -> Result<(TcpStream, String), OpenError> {
        let mut stream = TcpStream::connect(self.endpoint.as_str()).await?;
        if let Err(err) = stream.set_nodelay(true) {
            trace!(attempt = self.attempt, %err, "set_nodelay failed");
        }
        let connection_id = handshake(&mut stream, &self.join, self.max_frame_len).await?;
        Ok((stream, connection_id))
    }

    async fn drive(self) {
        let attempt = self.attempt;
        info!(attempt, endpoint = %self.endpoint, "tcp connecting");

        let opened = future::or(self.open(), async {
            Timer::after(self.open_timeout).await;
            Err(OpenError::TimedOut(self.open_timeout))
        })
        .await;

        let (stream, connection_id) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                let reason = err.to_string();
                debug!(attempt, %reason, "tcp open failed");
                let _ = self
                    .events
                    .send(TransportEvent::OpenFailed { attempt, reason })
                    .await;
                return;
            }
        };

        let opened = TransportEvent::Opened {
            attempt,
            connection_id,
        };
        if self.events.send(opened).await.is_err() {
            return;
        }

        let reader = stream.clone();
        future::or(
            recv_loop(attempt, reader, self.events.clone(), self.max_frame_len),
            send_loop(attempt, stream, self.outbound.clone()),
        )
        .await;

        self.outbound.close();
        let _ = self.events.send(TransportEvent::Dropped { attempt }).await;
    }
}

async fn recv_loop(
    attempt: AttemptId,
    mut reader: TcpStream,
    events: Sender<TransportEvent>,
    max_frame_len: usize,
) {
    loop {
        match read_frame(&mut reader, max_frame_len).await {
            Ok(Some(bytes)) => {
                trace!(attempt, len = bytes.len(), "frame received");
                if events
                    .send(TransportEvent::Frame { attempt, bytes })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                info!(attempt, "server closed connection");
                break;
            }
            Err(err) => {
                warn!(attempt, %err, "tcp read failed");
                break;
            }
        }
    }
}

async fn send_loop(attempt: AttemptId, mut writer: TcpStream, outbound: Receiver<Vec<u8>>) {
    while let Ok(first) = outbound.recv().await {
        // Frames queued in quick succession share one write.
        let mut buffer = Vec::new();
        push_frame(&mut buffer, &first);
        let mut batched = 1;
        while let Ok(frame) = outbound.try_recv() {
            push_frame(&mut buffer, &frame);
            batched += 1;
        }
        if batched > 1 {
            trace!(attempt, batched, "batching frames into one write");
        }

        let written = match writer.write_all(&buffer).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            debug!(attempt, %err, "tcp write failed");
            break;
        }
    }
    trace!(attempt, "send loop finished");
}

// ============================================================================
// Tests
// ============================================================================
