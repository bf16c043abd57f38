//! The network worker thread and the two queues that are its only contact
//! surface with the host.
//!
//! ```text
//!   host thread                         "socket" thread
//!  ┌─────────────┐   outbound (Bytes)   ┌──────────────────┐
//!  │ HostQueues  │ ───────────────────► │ EngineQueues     │
//!  │             │ ◄─────────────────── │ ConnectionEngine │
//!  └─────────────┘   inbound (Bytes)    └──────────────────┘
//!         ▲                                      │
//!         └──────────── WakeNotifier::wake ──────┘
//! ```
//!
//! Only encoded byte buffers cross the boundary. The connection state
//! travels separately through a `watch` channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::SocketError;
use crate::event::panic_message;
use crate::network::{ConnectionEngine, Dialer};
use crate::state::ConnectionState;

/// Upper bound on the graceful close after a worker fault.
const FAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ── WakeNotifier ─────────────────────────────────────────────────

/// Lets the worker ask the host to pump early because inbound data
/// arrived. Called from the worker thread.
pub trait WakeNotifier: Send + Sync {
    fn wake(&self);
}

impl<F> WakeNotifier for F
where
    F: Fn() + Send + Sync,
{
    fn wake(&self) {
        self()
    }
}

type NotifierSlot = Arc<Mutex<Option<Arc<dyn WakeNotifier>>>>;

// ── Queues ───────────────────────────────────────────────────────

/// Build the connected pair of queue ends.
pub fn queue_pair(notifier: Option<Arc<dyn WakeNotifier>>) -> (HostQueues, EngineQueues) {
    let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
    let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();
    let slot: NotifierSlot = Arc::new(Mutex::new(notifier));

    (
        HostQueues {
            inbound: inbound_rx,
            outbound: outbound_tx,
            notifier: Arc::clone(&slot),
        },
        EngineQueues {
            inbound: inbound_tx,
            outbound: outbound_rx,
            notifier: slot,
        },
    )
}

/// Host end of the queue pair.
#[derive(Debug)]
pub struct HostQueues {
    inbound: Receiver<Bytes>,
    outbound: Sender<Bytes>,
    notifier: NotifierSlot,
}

impl HostQueues {
    /// Move every ready inbound buffer into `inbound`, and hand everything
    /// in `outbound` to the worker, leaving it empty.
    pub fn handle_host_packets(
        &self,
        inbound: &mut Vec<Bytes>,
        outbound: &mut Vec<Bytes>,
    ) -> Result<(), SocketError> {
        inbound.extend(self.inbound.try_iter());
        for buf in outbound.drain(..) {
            self.outbound.send(buf)?;
        }
        Ok(())
    }

    /// Stop waking the host. Frames keep queuing until the next pump.
    pub fn detach_notifier(&self) {
        if let Ok(mut slot) = self.notifier.lock() {
            slot.take();
        }
    }
}

/// Worker end of the queue pair.
#[derive(Debug)]
pub struct EngineQueues {
    inbound: Sender<Bytes>,
    outbound: Receiver<Bytes>,
    notifier: NotifierSlot,
}

impl EngineQueues {
    /// Publish freshly reassembled frames from `inbound`, leaving it empty,
    /// and collect every ready outbound buffer into `outbound`.
    ///
    /// The host is woken when at least one frame was published.
    pub fn handle_engine_result(
        &self,
        inbound: &mut Vec<Bytes>,
        outbound: &mut Vec<Bytes>,
    ) -> Result<(), SocketError> {
        let added = !inbound.is_empty();
        for frame in inbound.drain(..) {
            self.inbound.send(frame)?;
        }
        if added {
            self.wake();
        }
        outbound.extend(self.outbound.try_iter());
        Ok(())
    }

    pub fn wake(&self) {
        let notifier = self.notifier.lock().ok().and_then(|slot| slot.clone());
        if let Some(notifier) = notifier {
            notifier.wake();
        }
    }
}

impl std::fmt::Debug for dyn WakeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WakeNotifier")
    }
}

// ── NetworkWorker ────────────────────────────────────────────────

/// Handle to the dedicated thread running a [`ConnectionEngine`].
///
/// The thread owns a current-thread tokio runtime and stops once the
/// `running` flag is cleared. A fault in the engine is logged as
/// unrecoverable; the link is then closed and never restarted.
#[derive(Debug)]
pub struct NetworkWorker {
    queues: HostQueues,
    state: watch::Receiver<ConnectionState>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkWorker {
    /// Start the worker thread.
    pub fn spawn<D: Dialer>(
        dialer: D,
        waiting_queue_limit: usize,
        notifier: Option<Arc<dyn WakeNotifier>>,
    ) -> Result<Self, SocketError> {
        let (queues, engine_queues) = queue_pair(notifier);
        let running = Arc::new(AtomicBool::new(true));
        let (publisher, state) = watch::channel(ConnectionState::default());

        let mut engine = ConnectionEngine::new(
            dialer,
            engine_queues,
            publisher,
            Arc::clone(&running),
            waiting_queue_limit,
        );

        let thread = std::thread::Builder::new()
            .name("socket".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "network worker could not start its runtime");
                        engine.stop();
                        return;
                    }
                };

                let outcome = runtime.block_on(std::panic::AssertUnwindSafe(engine.run()).catch_unwind());
                let fault = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e),
                    Err(panic) => Some(SocketError::WorkerFault(panic_message(panic.as_ref()))),
                };

                if let Some(e) = fault {
                    error!(error = %e, "unrecoverable fault in network worker, the link stays down");
                    let closed = runtime.block_on(async {
                        tokio::time::timeout(FAULT_CLOSE_TIMEOUT, engine.disconnect()).await
                    });
                    if closed.is_err() {
                        debug!("graceful close timed out");
                    }
                }

                engine.stop();
                info!("network worker stopped");
            })
            .map_err(|e| SocketError::WorkerFault(format!("cannot spawn network thread: {e}")))?;

        Ok(Self {
            queues,
            state,
            running,
            thread: Some(thread),
        })
    }

    pub fn queues(&self) -> &HostQueues {
        &self.queues
    }

    /// Latest published connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the `running` flag. The engine closes the link on its next
    /// tick and the thread exits.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Shared cancellation flag.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Stop the worker and wait for its thread to finish.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("network thread panicked outside the engine");
            }
        }
    }
}

impl Drop for NetworkWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
