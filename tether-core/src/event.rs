//! Publish/subscribe for decoded inbound packets.
//!
//! Listeners are kept in registration order and filtered by packet id:
//!
//! - **Blacklist**: fires for every id *not* in the set (empty = everything).
//! - **Whitelist**: fires only for ids in the set; must not be empty.
//!
//! A failing listener never stops the others from seeing the packet.

use std::collections::{BTreeMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, error, warn};

use crate::error::SocketError;
use crate::packet::{Decoded, Packet};

/// What a listener may return to report a failure.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Box<dyn FnMut(&dyn Packet) -> ListenerResult>;

/// Handle returned on registration, used to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Blacklist,
    Whitelist,
}

struct Listener {
    callback: Callback,
    mode: FilterMode,
    ids: HashSet<u32>,
}

impl Listener {
    fn wants(&self, id: u32) -> bool {
        match self.mode {
            FilterMode::Blacklist => !self.ids.contains(&id),
            FilterMode::Whitelist => self.ids.contains(&id),
        }
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Listener>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to every packet whose id is not in `ignored`.
    pub fn listen_to_packets<F>(&mut self, callback: F, ignored: impl IntoIterator<Item = u32>) -> ListenerId
    where
        F: FnMut(&dyn Packet) -> ListenerResult + 'static,
    {
        self.insert(Box::new(callback), FilterMode::Blacklist, ignored.into_iter().collect())
    }

    /// Listen only to packets whose id is in `only`.
    ///
    /// An empty set could never fire, so it is refused.
    pub fn listen_only_packets<F>(
        &mut self,
        callback: F,
        only: impl IntoIterator<Item = u32>,
    ) -> Result<ListenerId, SocketError>
    where
        F: FnMut(&dyn Packet) -> ListenerResult + 'static,
    {
        let ids: HashSet<u32> = only.into_iter().collect();
        if ids.is_empty() {
            return Err(SocketError::Configuration(
                "whitelist listeners need at least one packet id".into(),
            ));
        }
        Ok(self.insert(Box::new(callback), FilterMode::Whitelist, ids))
    }

    fn insert(&mut self, callback: Callback, mode: FilterMode, ids: HashSet<u32>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.insert(id, Listener { callback, mode, ids });
        debug!(listener = %id, ?mode, "listener registered");
        id
    }

    /// Remove a listener. Unknown or already removed ids are ignored.
    pub fn cancel_listener(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver one decoded packet to every interested listener.
    ///
    /// Returns the faults that were caught, in listener order.
    pub fn dispatch(&mut self, decoded: &Decoded<Box<dyn Packet>>) -> Vec<SocketError> {
        let packet = decoded.packet.as_ref();
        let pid = packet.network_id();
        let mut faults = Vec::new();

        for (id, listener) in self.listeners.iter_mut() {
            if !listener.wants(pid) {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| (listener.callback)(packet)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            error!(listener = %id, packet = packet.name(), %reason, "unhandled error in packet listener");
            faults.push(SocketError::ListenerFault {
                listener: id.get(),
                reason,
            });
        }

        if decoded.unread > 0 {
            warn!(
                packet = packet.name(),
                unread = decoded.unread,
                "bytes left unread after decode; client and server schemas disagree"
            );
        }

        faults
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}
