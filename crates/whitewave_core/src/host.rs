//! Player Host Lifecycle
//!
//! The player host is the on-demand execution context that owns the
//! [`AudioEngine`]: a dedicated thread fed by a bounded command channel.
//! At most one host lives in a [`HostSlot`] at a time. A [`Lifecycle`]
//! manager creates the host lazily, tolerates losing a creation race, and
//! tears the host down again once nothing is playing.
//!
//! Every request has a deadline. A command that finishes after its caller
//! gave up is rolled back on the host, so a caller that saw a timeout can
//! rely on the active set being as it was.
//!
//! ```text
//!   Router ──request──▶ HostHandle ──crossbeam──▶ whitewave-host thread
//!      ▲                                               │
//!      └────────────── reply (per-request channel) ◀───┘
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::asset::AssetSource;
use crate::config::EngineConfig;
use crate::engine::AudioEngine;
use crate::error::{EngineError, EngineResult, HostError};
use crate::message::{RawCommand, Reply};
use crate::output::OutputBackend;

/// Builds the engine inside a freshly spawned host thread
pub type EngineFactory = Arc<dyn Fn() -> EngineResult<AudioEngine> + Send + Sync>;

/// Factory for engines sharing one config, asset source and output backend
pub fn engine_factory(
    config: EngineConfig,
    assets: Arc<dyn AssetSource>,
    output: Arc<dyn OutputBackend>,
) -> EngineFactory {
    Arc::new(move || {
        Ok(AudioEngine::new(
            config.clone(),
            Arc::clone(&assets),
            Arc::clone(&output),
        ))
    })
}

/// Depth of the host's command queue
const QUEUE_DEPTH: usize = 32;

/// Decides, exactly once, whether a reply reaches its caller
///
/// The host claims it before sending; a caller that times out claims it to
/// abandon the request. Whoever claims first wins.
#[derive(Default)]
struct Handoff(AtomicBool);

impl Handoff {
    fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum HostMessage {
    Request {
        command: RawCommand,
        reply: Sender<Reply>,
        handoff: Arc<Handoff>,
    },
    Shutdown,
}

/// A running player host
///
/// Dropping the last handle shuts the host down after it has answered
/// every request already queued.
pub struct HostHandle {
    id: u64,
    sender: Sender<HostMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl HostHandle {
    fn spawn(id: u64, factory: EngineFactory, timeout: Duration) -> Result<Self, HostError> {
        let (sender, receiver) = bounded::<HostMessage>(QUEUE_DEPTH);
        let (ready_sender, ready_receiver) = bounded::<EngineResult<()>>(1);

        let thread = thread::Builder::new()
            .name("whitewave-host".into())
            .spawn(move || match factory() {
                Ok(mut engine) => {
                    let _ = ready_sender.send(Ok(()));
                    Self::host_main(id, &mut engine, receiver);
                }
                Err(e) => {
                    let _ = ready_sender.send(Err(e));
                }
            })
            .map_err(|e| HostError::Spawn(e.to_string()))?;

        match ready_receiver.recv() {
            Ok(Ok(())) => Ok(Self {
                id,
                sender,
                thread: Mutex::new(Some(thread)),
                timeout,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(HostError::Engine(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(HostError::Spawn("host thread exited during startup".into()))
            }
        }
    }

    fn host_main(id: u64, engine: &mut AudioEngine, receiver: Receiver<HostMessage>) {
        info!("Player host {} started", id);

        while let Ok(message) = receiver.recv() {
            let HostMessage::Request {
                command,
                reply,
                handoff,
            } = message
            else {
                break;
            };

            if handoff.is_claimed() {
                debug!("Skipping {}, its caller already gave up", command.kind);
                continue;
            }

            let before = engine.get_state();

            // A bug in one command must not take the whole host down
            let response = panic::catch_unwind(AssertUnwindSafe(|| engine.dispatch(&command)))
                .unwrap_or_else(|_| {
                    error!("{} panicked inside player host {}", command.kind, id);
                    Reply::failure(format!("{} failed unexpectedly", command.kind))
                });

            let delivered = handoff.claim() && reply.send(response).is_ok();
            if !delivered && engine.get_state() != before {
                warn!("{} finished after its caller left, rolling back", command.kind);
                engine.restore(&before);
            }
        }

        engine.stop_all();
        info!("Player host {} stopped", id);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once the host thread has exited
    pub fn is_alive(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map_or(false, |thread| !thread.is_finished())
    }

    /// Send one command and wait for its reply
    ///
    /// On [`EngineError::Timeout`] the command has either not run or has
    /// been rolled back.
    pub fn request(&self, command: RawCommand) -> EngineResult<Reply> {
        let kind = command.kind.clone();
        let (reply_sender, reply_receiver) = bounded(1);
        let handoff = Arc::new(Handoff::default());

        self.sender
            .send_timeout(
                HostMessage::Request {
                    command,
                    reply: reply_sender,
                    handoff: Arc::clone(&handoff),
                },
                self.timeout,
            )
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EngineError::Timeout(self.timeout),
                SendTimeoutError::Disconnected(_) => {
                    EngineError::Transport(format!("player host {} has shut down", self.id))
                }
            })?;

        let closed = || EngineError::Transport(format!("reply channel for {} closed", kind));
        match reply_receiver.recv_timeout(self.timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) if handoff.claim() => {
                Err(EngineError::Timeout(self.timeout))
            }
            // The host claimed the reply first and is about to send it
            Err(RecvTimeoutError::Timeout) => reply_receiver.recv().map_err(|_| closed()),
            Err(RecvTimeoutError::Disconnected) => Err(closed()),
        }
    }

    /// Stop the host thread and wait for it to exit
    ///
    /// A host that cannot take the shutdown message within the reply
    /// timeout is detached instead of joined.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };

        if let Err(SendTimeoutError::Timeout(_)) =
            self.sender.send_timeout(HostMessage::Shutdown, self.timeout)
        {
            warn!("Player host {} is unresponsive, detaching it", self.id);
            return;
        }
        if thread.join().is_err() {
            error!("Player host {} thread panicked", self.id);
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Process-wide home of the single player host
///
/// Its lock is the single-resource mutex: creation and idle teardown both
/// run under it.
#[derive(Default)]
pub struct HostSlot {
    current: Mutex<Option<Arc<HostHandle>>>,
    next_id: AtomicU64,
}

impl HostSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live host, if any; a host whose thread died is cleared
    pub fn current(&self) -> Option<Arc<HostHandle>> {
        let mut current = self.current.lock();
        let host = current.as_ref().map(Arc::clone)?;
        if host.is_alive() {
            return Some(host);
        }

        warn!("Player host {} is gone, clearing slot", host.id());
        current.take();
        None
    }

    pub fn exists(&self) -> bool {
        self.current().is_some()
    }

    /// Spawn a host; fails with [`HostError::AlreadyExists`] if one is live
    pub fn create(
        &self,
        factory: &EngineFactory,
        timeout: Duration,
    ) -> Result<Arc<HostHandle>, HostError> {
        let mut current = self.current.lock();
        if current.as_ref().map_or(false, |host| host.is_alive()) {
            return Err(HostError::AlreadyExists);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let host = Arc::new(HostHandle::spawn(id, Arc::clone(factory), timeout)?);
        *current = Some(Arc::clone(&host));
        Ok(host)
    }

    /// Remove the host if nothing is playing and no caller holds it
    ///
    /// The state check and the removal happen under the slot lock, so no
    /// new caller can pick the host up in between. A host some caller
    /// still holds is kept; its next stop checks again.
    pub fn close_if_idle(&self) -> EngineResult<bool> {
        let mut current = self.current.lock();
        let Some(host) = current.as_ref().map(Arc::clone) else {
            return Ok(false);
        };

        if !host.is_alive() {
            current.take();
            return Ok(false);
        }

        // One reference in the slot, one in `host`
        if Arc::strong_count(&host) > 2 {
            debug!("Player host {} has callers in flight, keeping it", host.id());
            return Ok(false);
        }

        let reply = host.request(RawCommand::new("GET_STATE", Value::Null))?;
        let idle = reply
            .state()
            .map_or(false, |state| state.active_sound_ids.is_empty());
        if !idle {
            return Ok(false);
        }

        let closed = current.take();
        drop(current);
        drop(closed);

        info!("Player host {} idle, torn down", host.id());
        // Last reference: joins the thread outside the slot lock
        drop(host);
        Ok(true)
    }
}

/// Creates the player host on demand and tears it down when idle
pub struct Lifecycle {
    slot: Arc<HostSlot>,
    factory: EngineFactory,
    timeout: Duration,
}

impl Lifecycle {
    pub fn new(slot: Arc<HostSlot>, factory: EngineFactory, timeout: Duration) -> Self {
        Self {
            slot,
            factory,
            timeout,
        }
    }

    pub fn slot(&self) -> &Arc<HostSlot> {
        &self.slot
    }

    /// Best-effort check for a live host
    pub fn exists(&self) -> bool {
        self.slot.exists()
    }

    /// Return the live host, creating it if needed
    ///
    /// Losing a creation race to another manager on the same slot is
    /// success: the winner's host is returned.
    pub fn get_or_create(&self) -> Result<Arc<HostHandle>, HostError> {
        if let Some(host) = self.slot.current() {
            return Ok(host);
        }

        match self.slot.create(&self.factory, self.timeout) {
            Ok(host) => {
                info!("Player host {} created", host.id());
                Ok(host)
            }
            Err(HostError::AlreadyExists) => {
                debug!("Player host was created concurrently");
                match self.slot.current() {
                    Some(host) => Ok(host),
                    None => self.slot.create(&self.factory, self.timeout),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Destroy the host if it reports an empty active set
    ///
    /// Returns whether a host was torn down.
    pub fn teardown_if_idle(&self) -> EngineResult<bool> {
        self.slot.close_if_idle()
    }
}
