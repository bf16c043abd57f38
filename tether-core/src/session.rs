//! Host-side facade over the network worker.
//!
//! The host never touches the socket. It submits packets, and calls
//! [`Session::pump`] (or [`Session::tick`]) from its own loop to exchange
//! queues with the worker, send the login when a new connection needs one,
//! and dispatch inbound packets to listeners.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::SocketError;
use crate::event::{EventDispatcher, ListenerId, ListenerResult};
use crate::network::{Dialer, TlsDialer};
use crate::packet::{EncodedPacket, KeepAlivePacket, Packet};
use crate::registry::PacketRegistry;
use crate::state::ConnectionState;
use crate::worker::{NetworkWorker, WakeNotifier};

/// How long construction waits for the first connection.
pub const STARTUP_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Session {
    registry: Arc<PacketRegistry>,
    events: EventDispatcher,
    worker: NetworkWorker,

    login: EncodedPacket,
    /// Connection epoch the last login was queued for.
    login_epoch: Option<u64>,

    keep_alive_interval: Duration,
    last_keep_alive: Instant,

    inbound: Vec<Bytes>,
    outbound: Vec<Bytes>,
}

impl Session {
    /// Connect to the control node described by `settings` over TLS.
    pub fn new(
        settings: &Settings,
        registry: Arc<PacketRegistry>,
        notifier: Option<Arc<dyn WakeNotifier>>,
    ) -> Result<Self, SocketError> {
        let dialer = TlsDialer::new(settings)?;
        Self::with_dialer(settings, dialer, registry, notifier)
    }

    /// Same as [`Session::new`] over any transport.
    pub fn with_dialer<D: Dialer>(
        settings: &Settings,
        dialer: D,
        registry: Arc<PacketRegistry>,
        notifier: Option<Arc<dyn WakeNotifier>>,
    ) -> Result<Self, SocketError> {
        let login = EncodedPacket::new(&settings.login_packet()?);
        let worker = NetworkWorker::spawn(dialer, settings.waiting_queue_limit, notifier)?;

        let mut session = Self {
            registry,
            events: EventDispatcher::new(),
            worker,
            login,
            login_epoch: None,
            keep_alive_interval: settings.keep_alive_interval(),
            last_keep_alive: Instant::now(),
            inbound: Vec::new(),
            outbound: Vec::new(),
        };

        if session.wait_until_connected(STARTUP_GRACE) {
            session.pump()?;
        } else {
            debug!("control node not reachable yet, continuing in the background");
        }
        Ok(session)
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Encode `packet`, queue it and pump right away.
    pub fn send_packet(&mut self, packet: &dyn Packet) -> Result<(), SocketError> {
        self.send_encoded(EncodedPacket::new(packet))
    }

    pub fn send_encoded(&mut self, packet: EncodedPacket) -> Result<(), SocketError> {
        self.outbound.push(packet.into_bytes());
        self.pump()
    }

    // ── Pumping ──────────────────────────────────────────────────

    /// Exchange queues with the worker and dispatch what arrived.
    pub fn pump(&mut self) -> Result<(), SocketError> {
        self.queue_login_if_needed();
        self.worker
            .queues()
            .handle_host_packets(&mut self.inbound, &mut self.outbound)?;

        for raw in std::mem::take(&mut self.inbound) {
            self.deliver(&raw);
        }
        Ok(())
    }

    /// Periodic entry point: pumps, and sends a keep-alive once per
    /// keep-alive interval.
    pub fn tick(&mut self) -> Result<(), SocketError> {
        if self.last_keep_alive.elapsed() >= self.keep_alive_interval {
            self.last_keep_alive = Instant::now();
            self.outbound.push(EncodedPacket::new(&KeepAlivePacket).into_bytes());
        }
        self.pump()
    }

    fn queue_login_if_needed(&mut self) {
        let state = self.worker.state();
        let needed = state.is_connected()
            && !state.is_authenticated()
            && !state.login_sent()
            && self.login_epoch != Some(state.epoch);
        if needed {
            self.login_epoch = Some(state.epoch);
            self.outbound.push(self.login.clone().into_bytes());
            debug!(epoch = state.epoch, "login queued");
        }
    }

    fn deliver(&mut self, raw: &[u8]) {
        match self.registry.decode(raw) {
            Ok(decoded) => {
                self.events.dispatch(&decoded);
            }
            Err(e) => warn!(error = %e, "discarding inbound packet"),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Stop the worker and stop waking the host.
    pub fn shutdown(&self) {
        self.worker.stop();
        self.worker.queues().detach_notifier();
    }

    /// Poll until connected or `max_wait` passes. Returns whether the link
    /// is up; success is not guaranteed.
    pub fn wait_until_connected(&self, max_wait: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.worker.state().is_connected() {
                return true;
            }
            if !self.worker.is_running() || started.elapsed() >= max_wait {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.worker.state()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// Node id handed out by the control node, once authenticated.
    pub fn assigned_node(&self) -> Option<i32> {
        self.state().assigned_node()
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn events(&mut self) -> &mut EventDispatcher {
        &mut self.events
    }

    /// Shorthand for [`EventDispatcher::listen_to_packets`].
    pub fn listen_to_packets<F>(&mut self, callback: F, ignored: impl IntoIterator<Item = u32>) -> ListenerId
    where
        F: FnMut(&dyn Packet) -> ListenerResult + 'static,
    {
        self.events.listen_to_packets(callback, ignored)
    }

    /// Shorthand for [`EventDispatcher::listen_only_packets`].
    pub fn listen_only_packets<F>(
        &mut self,
        callback: F,
        only: impl IntoIterator<Item = u32>,
    ) -> Result<ListenerId, SocketError>
    where
        F: FnMut(&dyn Packet) -> ListenerResult + 'static,
    {
        self.events.listen_only_packets(callback, only)
    }

    pub fn cancel_listener(&mut self, id: ListenerId) {
        self.events.cancel_listener(id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
