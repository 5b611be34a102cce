//! The live-connection registry: every accepted Stratum connection gets an
//! `extranonce1` and a slot here so the job manager can fan a fresh
//! `mining.notify`/`mining.set_difficulty` out to every subscriber without
//! walking the TCP listener itself.

use pool_async::tokio::sync::Notify;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Pushed to a subscriber's channel whenever the job manager has something
/// for it to relay to its miner.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    NewJob(std::sync::Arc<crate::job::Job>),
    SetDifficulty(f64),
}

pub const NOTIFY_CHANNEL_CAPACITY: usize = 4;

/// A bounded per-subscriber mailbox that drops the oldest queued event
/// (rather than the incoming one) once full. `broadcastJob` must let
/// miners converge on the newest job without blocking the builder; a
/// plain bounded `mpsc` channel gets this backwards under backpressure —
/// `try_send` on a full channel drops the *new* value, leaving a stale
/// job as the next thing a slow subscriber sees. This type inverts that:
/// pushing past capacity evicts the head of the queue first.
struct NotifyQueue {
    events: Mutex<VecDeque<SessionEvent>>,
    notify: Notify,
}

impl NotifyQueue {
    fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(NOTIFY_CHANNEL_CAPACITY)),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: SessionEvent) {
        {
            let mut queue = self.events.lock().expect("notify queue mutex poisoned");
            if queue.len() >= NOTIFY_CHANNEL_CAPACITY {
                queue.pop_front();
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Waits for and returns the oldest queued event. Checking the queue
    /// before awaiting `Notify` (rather than only reacting to a wakeup)
    /// avoids losing events pushed between two `recv` calls.
    async fn recv(&self) -> SessionEvent {
        loop {
            if let Some(event) = self.events.lock().expect("notify queue mutex poisoned").pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

/// Handle a connection task holds to receive events fanned out by the
/// registry; `Registry::unregister` drops the matching `Arc` so a send
/// racing a disconnect just becomes a no-op once the task exits.
pub struct NotifyHandle(Arc<NotifyQueue>);

impl NotifyHandle {
    pub async fn recv(&mut self) -> SessionEvent {
        self.0.recv().await
    }
}

/// Allocates monotonically increasing 32-bit `extranonce1` values (one per
/// connection, never reused) and holds each live connection's notify
/// queue.
#[derive(Default)]
pub struct Registry {
    next_extranonce1: AtomicU32,
    connections: Mutex<HashMap<u32, Arc<NotifyQueue>>>,
}

impl Registry {
    pub fn alloc_extranonce1(&self) -> u32 {
        self.next_extranonce1.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, extranonce1: u32) -> NotifyHandle {
        let queue = Arc::new(NotifyQueue::new());
        self.connections
            .lock()
            .expect("registry mutex poisoned")
            .insert(extranonce1, queue.clone());
        NotifyHandle(queue)
    }

    pub fn unregister(&self, extranonce1: u32) {
        self.connections.lock().expect("registry mutex poisoned").remove(&extranonce1);
    }

    pub fn active_count(&self) -> usize {
        self.connections.lock().expect("registry mutex poisoned").len()
    }

    /// Fans an event out to every live connection's queue, evicting each
    /// subscriber's oldest pending event first if its queue is already at
    /// capacity. Never blocks: a slow subscriber only ever loses stale
    /// queued data, not the fanout itself.
    pub fn broadcast(&self, event: SessionEvent) {
        let connections = self.connections.lock().expect("registry mutex poisoned");
        for queue in connections.values() {
            queue.push(event.clone());
        }
    }
}
