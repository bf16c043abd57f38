//! The connection engine: owns the socket on the worker thread.
//!
//! One loop multiplexes four sources:
//!
//! - **flush tick** (10 ms): pull outbound buffers from the host, gate them
//!   on authentication, write what may go.
//! - **socket read**: reassemble frames, observe login/disconnect replies,
//!   publish frames to the host.
//! - **socket write**: push queued frames out one `write` at a time.
//! - **retry timer**: reconnect after the backoff delay.
//! - **maintenance tick** (30 min): give back spare buffer capacity.
//!
//! The loop runs while the shared `running` flag is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::codec::FrameReassembler;
use crate::error::SocketError;
use crate::network::{Backoff, FrameWriter, OutboundGate};
use crate::packet::{CoreId, DisconnectPacket, DisconnectReason, LoginPacket, decode, peek_id};
use crate::state::ConnectionState;
use crate::worker::EngineQueues;

pub const FLUSH_INTERVAL: Duration = Duration::from_millis(10);
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 16 * 1024;

// ── Dialer ───────────────────────────────────────────────────────

/// Opens the byte stream the engine talks over.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// `host:port`, for logs.
    fn addr(&self) -> &str;

    async fn dial(&self) -> Result<Self::Stream, SocketError>;
}

enum Event {
    Flush,
    Read(std::io::Result<usize>),
    Wrote(std::io::Result<()>),
    Retry,
    Maintenance,
}

// ── ConnectionEngine ─────────────────────────────────────────────

pub struct ConnectionEngine<D: Dialer> {
    dialer: D,
    queues: EngineQueues,
    publisher: watch::Sender<ConnectionState>,
    running: Arc<AtomicBool>,

    state: ConnectionState,
    reader: Option<ReadHalf<D::Stream>>,
    writer: Option<FrameWriter<WriteHalf<D::Stream>>>,
    read_buf: BytesMut,
    reassembler: FrameReassembler,
    received: Vec<Bytes>,
    gate: OutboundGate,

    backoff: Backoff,
    retry_at: Option<Instant>,
    /// Floor for the next reconnect delay, set by a rate-limit notice.
    rate_limit: Option<Duration>,
}

impl<D: Dialer> ConnectionEngine<D> {
    pub fn new(
        dialer: D,
        queues: EngineQueues,
        publisher: watch::Sender<ConnectionState>,
        running: Arc<AtomicBool>,
        waiting_queue_limit: usize,
    ) -> Self {
        Self {
            dialer,
            queues,
            publisher,
            running,
            state: ConnectionState::default(),
            reader: None,
            writer: None,
            read_buf: BytesMut::new(),
            reassembler: FrameReassembler::new(),
            received: Vec::new(),
            gate: OutboundGate::new(waiting_queue_limit),
            backoff: Backoff::new(),
            retry_at: None,
            rate_limit: None,
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }

    /// Drive the link until `running` is cleared, then close it.
    ///
    /// Returns an error only for faults that make the engine unusable.
    pub async fn run(&mut self) -> Result<(), SocketError> {
        let mut flush = tokio::time::interval(FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut maintenance =
            tokio::time::interval_at(Instant::now() + MAINTENANCE_INTERVAL, MAINTENANCE_INTERVAL);

        info!(addr = self.dialer.addr(), "network engine started");
        self.retry_at = Some(Instant::now());

        while self.running() {
            if self.read_buf.capacity() - self.read_buf.len() < READ_CHUNK {
                self.read_buf.reserve(READ_CHUNK);
            }

            let event = tokio::select! {
                _ = flush.tick() => Event::Flush,
                read = read_link(&mut self.reader, &mut self.read_buf) => Event::Read(read),
                wrote = write_link(&mut self.writer) => Event::Wrote(wrote),
                _ = retry_due(self.retry_at) => Event::Retry,
                _ = maintenance.tick() => Event::Maintenance,
            };

            let step = match event {
                Event::Flush => self.flush(),
                Event::Read(Ok(0)) => {
                    self.handle_close("closed by peer");
                    Ok(())
                }
                Event::Read(Ok(_)) => self.on_readable(),
                Event::Read(Err(e)) | Event::Wrote(Err(e)) => {
                    self.handle_close(e);
                    Ok(())
                }
                Event::Wrote(Ok(())) => Ok(()),
                Event::Retry => {
                    self.connect().await;
                    Ok(())
                }
                Event::Maintenance => {
                    self.maintain();
                    Ok(())
                }
            };

            match step {
                Ok(()) => {}
                // The host went away while shutting down.
                Err(SocketError::ChannelClosed) if !self.running() => break,
                Err(e) => return Err(e),
            }
        }

        self.disconnect().await;
        Ok(())
    }

    // ── Connect / close ──────────────────────────────────────────

    async fn connect(&mut self) {
        self.retry_at = None;
        if let Err(e) = self.state.phase.begin_connect() {
            warn!(error = %e, "connect requested in the wrong phase");
            return;
        }
        self.publish();

        let addr = self.dialer.addr().to_string();
        let attempt = match tokio::time::timeout(CONNECT_TIMEOUT, self.dialer.dial()).await {
            Ok(result) => result,
            Err(_) => Err(SocketError::ConnectFault {
                addr: addr.clone(),
                reason: format!("no answer within {}s", CONNECT_TIMEOUT.as_secs()),
            }),
        };

        match attempt {
            Ok(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                self.reader = Some(reader);
                self.writer = Some(FrameWriter::new(writer));
                self.backoff.reset();
                self.state.epoch += 1;
                self.state.failed_attempts = 0;
                if let Err(e) = self.state.phase.complete_connect() {
                    warn!(error = %e, "connect completed in the wrong phase");
                }
                self.publish();
                info!(%addr, epoch = self.state.epoch, "connected to control node");
                self.queues.wake();
            }
            Err(e) => {
                if e.is_refusal() {
                    info!(error = %e, "control node is not accepting connections");
                } else {
                    error!(error = %e, "could not connect to control node");
                }
                self.state.phase.force_disconnect();
                self.schedule_retry();
                self.publish();
            }
        }
    }

    fn handle_close(&mut self, reason: impl std::fmt::Display) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        self.reader = None;
        let lost = writer.clear();
        if lost > 0 {
            debug!(lost, "outbound packets dropped with the connection");
        }

        // Pull in anything the host queued for the dying connection so a
        // stale login cannot leak onto the next one.
        let mut drained = Vec::new();
        if self.queues.handle_engine_result(&mut Vec::new(), &mut drained).is_ok() {
            self.gate.admit(drained, true);
        }
        let purged = self.gate.on_disconnect();

        self.reassembler.reset();
        self.read_buf.clear();
        self.state.phase.force_disconnect();
        warn!(%reason, purged, "connection to control node lost");

        self.schedule_retry();
        self.publish();
    }

    fn schedule_retry(&mut self) {
        let mut delay = self.backoff.next_delay();
        if let Some(floor) = self.rate_limit.take() {
            delay = delay.max(floor);
        }
        self.state.failed_attempts = u32::try_from(self.backoff.attempts()).unwrap_or(u32::MAX);
        self.retry_at = Some(Instant::now() + delay);
        info!(
            attempt = self.state.failed_attempts,
            delay = delay.as_secs(),
            "reconnect scheduled"
        );
    }

    /// Close the write side and drop the socket. No-op without a socket.
    ///
    /// Frames still queued are dropped; the close itself gives up after
    /// [`CLOSE_TIMEOUT`] when the peer stopped reading.
    pub async fn disconnect(&mut self) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            let lost = writer.clear();
            if lost > 0 {
                debug!(lost, "outbound packets dropped on disconnect");
            }
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "tls close did not complete cleanly"),
                Err(_) => debug!("tls close timed out"),
            }
            info!("disconnected from control node");
        }
        self.reassembler.reset();
        self.state.phase.force_disconnect();
        self.publish();
    }

    /// Final state once the loop is over, for whatever reason.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.reader = None;
        self.writer = None;
        self.retry_at = None;
        self.state.phase.force_disconnect();
        self.publish();
    }

    // ── Outbound ─────────────────────────────────────────────────

    fn exchange(&mut self) -> Result<(), SocketError> {
        let mut drained = Vec::new();
        self.queues
            .handle_engine_result(&mut self.received, &mut drained)?;
        self.gate.admit(drained, self.state.is_connected());
        Ok(())
    }

    /// Move releasable buffers into the write queue. The write branch of
    /// the loop puts them on the wire.
    fn flush(&mut self) -> Result<(), SocketError> {
        self.exchange()?;

        let ready = self
            .gate
            .release(self.state.is_connected(), self.state.is_authenticated());
        if ready.is_empty() {
            return Ok(());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let mut login_queued = false;
        for buf in ready {
            let is_login = peek_id(&buf) == Some(CoreId::Login as u32);
            match writer.push(buf) {
                Ok(()) => login_queued |= is_login,
                Err(e) => warn!(error = %e, "outbound packet cannot be framed, dropped"),
            }
        }

        if login_queued && !self.state.is_authenticated() {
            if let Err(e) = self.state.phase.begin_authentication() {
                warn!(error = %e, "login sent in the wrong phase");
            }
            self.publish();
            debug!("login on its way, awaiting the node's answer");
        }
        Ok(())
    }

    // ── Inbound ──────────────────────────────────────────────────

    fn on_readable(&mut self) -> Result<(), SocketError> {
        let chunk = self.read_buf.split();
        let (frames, fault) = self.reassembler.feed(&chunk);

        for frame in frames {
            self.observe(&frame);
            self.received.push(frame);
        }
        self.exchange()?;

        if let Some(e) = fault {
            error!(error = %e, "malformed frame from control node");
            self.handle_close(e);
        }
        Ok(())
    }

    /// Track the session protocol from the node's control packets.
    fn observe(&mut self, frame: &[u8]) {
        match peek_id(frame).and_then(|id| CoreId::try_from(id).ok()) {
            Some(CoreId::Login) if !self.state.is_authenticated() => {
                match decode::<LoginPacket>(frame) {
                    Ok(reply) => {
                        let node = reply.packet.assigned_node;
                        match self.state.phase.complete_authentication(node) {
                            Ok(()) => info!(node, "authenticated with control node"),
                            Err(e) => warn!(error = %e, "login reply in the wrong phase"),
                        }
                        self.publish();
                    }
                    Err(e) => warn!(error = %e, "unreadable login reply"),
                }
            }
            Some(CoreId::Disconnect) => match decode::<DisconnectPacket>(frame) {
                Ok(notice) => self.on_disconnect_notice(notice.packet),
                Err(e) => warn!(error = %e, "unreadable disconnect notice"),
            },
            _ => {}
        }
    }

    fn on_disconnect_notice(&mut self, notice: DisconnectPacket) {
        match notice.reason {
            DisconnectReason::AuthFail if !self.state.is_authenticated() => {
                error!(
                    "{}; check the credentials in the settings file",
                    SocketError::AuthenticationFailure
                );
                self.backoff.saturate();
            }
            DisconnectReason::RateLimited => {
                let floor = Duration::from_secs(u64::try_from(notice.rate_limit).unwrap_or(0));
                warn!(wait = floor.as_secs(), "control node is rate limiting us");
                self.rate_limit = Some(floor);
            }
            reason => info!(?reason, "control node is closing the link"),
        }
    }

    // ── Maintenance ──────────────────────────────────────────────

    fn maintain(&mut self) {
        self.reassembler.shrink();
        self.gate.shrink();
        if let Some(writer) = self.writer.as_mut() {
            writer.shrink();
        }
        self.received.shrink_to_fit();
        if self.read_buf.is_empty() {
            self.read_buf = BytesMut::new();
        }
        debug!(waiting = self.gate.len(), "buffers compacted");
    }
}

async fn read_link<S>(link: &mut Option<S>, buf: &mut BytesMut) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    match link {
        Some(stream) => stream.read_buf(buf).await,
        None => std::future::pending().await,
    }
}

async fn write_link<W>(writer: &mut Option<FrameWriter<W>>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match writer {
        Some(writer) if !writer.is_idle() => writer.write_some().await,
        _ => std::future::pending().await,
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
