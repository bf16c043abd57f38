//! Authentication gating for outbound buffers.
//!
//! Until the node accepts our login, only login packets may cross the wire.
//! Everything else waits here in submission order and is released in that
//! same order once authenticated.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::warn;

use crate::packet::{CoreId, peek_id};

fn is(buf: &Bytes, id: CoreId) -> bool {
    peek_id(buf) == Some(id as u32)
}

#[derive(Debug)]
pub struct OutboundGate {
    waiting: VecDeque<Bytes>,
    limit: usize,
}

impl OutboundGate {
    /// `limit` caps the waiting queue; the oldest buffer is dropped first.
    pub fn new(limit: usize) -> Self {
        Self {
            waiting: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Take freshly drained outbound buffers.
    ///
    /// Keep-alives are discarded while no socket is open.
    pub fn admit(&mut self, drained: impl IntoIterator<Item = Bytes>, connected: bool) {
        for buf in drained {
            if !connected && is(&buf, CoreId::KeepAlive) {
                continue;
            }
            if self.waiting.len() >= self.limit {
                self.waiting.pop_front();
                warn!(limit = self.limit, "waiting queue full, dropping oldest outbound packet");
            }
            self.waiting.push_back(buf);
        }
    }

    /// Buffers that may be written now, in submission order.
    pub fn release(&mut self, connected: bool, authenticated: bool) -> Vec<Bytes> {
        if !connected {
            return Vec::new();
        }
        if authenticated {
            return self.waiting.drain(..).collect();
        }

        let mut ready = Vec::new();
        let mut held = VecDeque::with_capacity(self.waiting.len());
        for buf in self.waiting.drain(..) {
            if is(&buf, CoreId::Login) {
                ready.push(buf);
            } else {
                held.push_back(buf);
            }
        }
        self.waiting = held;
        ready
    }

    /// Forget buffers that only made sense for the connection that just
    /// closed: its login and any keep-alives.
    pub fn on_disconnect(&mut self) -> usize {
        let before = self.waiting.len();
        self.waiting
            .retain(|buf| !is(buf, CoreId::Login) && !is(buf, CoreId::KeepAlive));
        before - self.waiting.len()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn shrink(&mut self) {
        self.waiting.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{EncodedPacket, GenericPacket, KeepAlivePacket, LoginPacket};

    fn generic(tag: u8) -> Bytes {
        EncodedPacket::new(&GenericPacket::new(0x300, vec![tag])).into_bytes()
    }

    fn login() -> Bytes {
        EncodedPacket::new(&LoginPacket::with_password("pw")).into_bytes()
    }

    fn keep_alive() -> Bytes {
        EncodedPacket::new(&KeepAlivePacket).into_bytes()
    }

    #[test]
    fn nothing_leaves_while_disconnected() {
        let mut gate = OutboundGate::new(16);
        gate.admit([login(), generic(1)], false);
        assert!(gate.release(false, false).is_empty());
        assert_eq!(gate.len(), 2);
    }

    #[test]
    fn only_login_passes_before_authentication() {
        let mut gate = OutboundGate::new(16);
        gate.admit([generic(1), login(), generic(2)], true);

        let ready = gate.release(true, false);
        assert_eq!(ready, vec![login()]);
        assert_eq!(gate.len(), 2);
    }

    #[test]
    fn deferred_packets_release_in_submission_order() {
        let mut gate = OutboundGate::new(16);
        gate.admit([generic(1), login(), generic(2)], true);
        gate.release(true, false);
        gate.admit([generic(3)], true);
        assert!(gate.release(true, false).is_empty());

        let ready = gate.release(true, true);
        assert_eq!(ready, vec![generic(1), generic(2), generic(3)]);
        assert!(gate.is_empty());
    }

    #[test]
    fn keep_alives_are_dropped_while_disconnected() {
        let mut gate = OutboundGate::new(16);
        gate.admit([keep_alive(), generic(1), keep_alive()], false);
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.release(true, true), vec![generic(1)]);
    }

    #[test]
    fn disconnect_purges_stale_login_and_keep_alives() {
        let mut gate = OutboundGate::new(16);
        gate.admit([login(), keep_alive(), generic(1)], true);
        assert_eq!(gate.on_disconnect(), 2);
        assert_eq!(gate.release(true, true), vec![generic(1)]);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut gate = OutboundGate::new(2);
        gate.admit([generic(1), generic(2), generic(3)], true);
        assert_eq!(gate.release(true, true), vec![generic(2), generic(3)]);
    }
}
