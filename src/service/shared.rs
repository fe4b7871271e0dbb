//! Reference-counted sharing of one connection among many observers
//!
//! [`SharedMessageStream`] keeps an arena holding the observer set and at
//! most one live session. The first observer to attach spawns the
//! orchestrator session; the last one to detach signals it to tear down.
//! Observers attaching in between join the live session and see only
//! messages published after they attached.

use super::orchestrator::LifecycleOrchestrator;
use crate::error::AdapterError;
use crate::protocol::NormalizedMessage;
use crate::transport::ProtocolClient;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Item delivered to observers; an `Err` is always the last item
pub type StreamItem = Result<NormalizedMessage, AdapterError>;

/// The live session's control block
struct SessionSlot {
    generation: u64,
    detach_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Arena {
    next_observer_id: u64,
    generation: u64,
    observers: HashMap<u64, mpsc::UnboundedSender<StreamItem>>,
    session: Option<SessionSlot>,
    /// Task of the previous session, still running its cleanup
    teardown: Option<JoinHandle<()>>,
}

type SharedArena = Arc<Mutex<Arena>>;

fn lock(arena: &Mutex<Arena>) -> MutexGuard<'_, Arena> {
    // Critical sections never panic while holding the lock, but stay usable if one did
    arena.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Detach the session if the observer set is empty; caller holds the lock
fn release_if_idle(arena: &mut Arena) {
    if !arena.observers.is_empty() {
        return;
    }
    if let Some(slot) = arena.session.take() {
        debug!(generation = slot.generation, "Last observer detached, tearing down session");
        let _ = slot.detach_tx.send(());
        arena.teardown = Some(slot.task);
    }
}

/// Lazily-connected stream shared by any number of observers
///
/// Cloning is cheap and every clone refers to the same connection.
pub struct SharedMessageStream<C: ProtocolClient> {
    orchestrator: Arc<LifecycleOrchestrator<C>>,
    arena: SharedArena,
}

impl<C: ProtocolClient> Clone for SharedMessageStream<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            arena: self.arena.clone(),
        }
    }
}

impl<C: ProtocolClient> SharedMessageStream<C> {
    pub fn new(orchestrator: Arc<LifecycleOrchestrator<C>>) -> Self {
        Self {
            orchestrator,
            arena: Arc::new(Mutex::new(Arena::default())),
        }
    }

    /// Attach a new observer
    ///
    /// The 0→1 transition starts a session, which connects and wires the
    /// client's events. Must be called from within a Tokio runtime.
    pub fn subscribe(&self) -> MessageStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut arena = lock(&self.arena);

        let id = arena.next_observer_id;
        arena.next_observer_id += 1;
        arena.observers.insert(id, tx);

        if arena.session.is_none() {
            arena.generation += 1;
            let generation = arena.generation;
            let (detach_tx, detach_rx) = oneshot::channel();
            let previous = arena.teardown.take();
            let fanout = Fanout {
                arena: self.arena.clone(),
                generation,
            };

            debug!(generation, "First observer attached, starting session");
            let task = tokio::spawn(self.orchestrator.clone().run(fanout, detach_rx, previous));
            arena.session = Some(SessionSlot {
                generation,
                detach_tx,
                task,
            });
        }

        MessageStream {
            id,
            rx,
            arena: self.arena.clone(),
        }
    }

    /// Number of currently attached observers
    pub fn observer_count(&self) -> usize {
        lock(&self.arena).observers.len()
    }

    /// Whether a session is currently live
    pub fn is_active(&self) -> bool {
        lock(&self.arena).session.is_some()
    }

    /// Wait for the most recent session, including its cleanup, to finish
    ///
    /// Returns immediately if a session is still live or none ever ran.
    pub async fn wait_for_teardown(&self) {
        let teardown = {
            let mut arena = lock(&self.arena);
            if arena.session.is_some() {
                return;
            }
            arena.teardown.take()
        };
        if let Some(task) = teardown {
            let _ = task.await;
        }
    }
}

/// Push side of a session, handed to the orchestrator
///
/// Every call is a no-op once the session it belongs to has been detached
/// or terminated.
pub struct Fanout {
    arena: SharedArena,
    generation: u64,
}

impl Fanout {
    fn is_current(&self, arena: &Arena) -> bool {
        arena
            .session
            .as_ref()
            .is_some_and(|slot| slot.generation == self.generation)
    }

    /// Deliver a message to every attached observer, in arrival order
    pub fn next(&self, message: NormalizedMessage) {
        let arena = lock(&self.arena);
        if !self.is_current(&arena) {
            return;
        }
        for tx in arena.observers.values() {
            let _ = tx.send(Ok(message.clone()));
        }
    }

    /// End the stream for every observer, with an error or as completion
    ///
    /// The observers are detached, so a later subscribe starts a new session.
    pub fn terminate(&self, error: Option<AdapterError>) {
        let mut arena = lock(&self.arena);
        if !self.is_current(&arena) {
            return;
        }
        if let Some(slot) = arena.session.take() {
            arena.teardown = Some(slot.task);
        }
        for (_, tx) in arena.observers.drain() {
            if let Some(error) = &error {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }
}

/// One observer's view of a [`SharedMessageStream`]
///
/// Yields messages until the connection completes, or a single `Err` if it
/// fails. Dropping it detaches the observer; dropping the last one
/// disconnects.
pub struct MessageStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<StreamItem>,
    arena: SharedArena,
}

impl MessageStream {
    /// Receive the next item; `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }
}

impl Stream for MessageStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        let mut arena = lock(&self.arena);
        if arena.observers.remove(&self.id).is_some() {
            release_if_idle(&mut arena);
        }
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").field("id", &self.id).finish()
    }
}
