//! Fan-out of compiled snapshots to connected sidecars.
//!
//! The sink set is guarded by a lock held only while adding or removing a
//! sink; broadcasting itself takes a snapshot of the set and releases the
//! lock before sending, so a slow subscriber never blocks registration of a
//! new one. Each sink is a bounded (capacity 1) channel - snapshots are
//! idempotent, so dropping an intermediate one in favor of the newest is
//! always safe. A sink that can't accept a send (full buffer, because the
//! consumer hasn't drained yet) is removed; the sidecar is expected to
//! reconnect under its own backoff policy.

use crate::compiler::Snapshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Broadcaster {
    sinks: Mutex<Vec<(u64, mpsc::Sender<Arc<Snapshot>>)>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster { sinks: Mutex::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    /// Registers a new sink, immediately pushing `initial` (the `full_config`
    /// frame) into its buffer before the caller starts forwarding `update`
    /// frames.
    pub fn register(&self, initial: Arc<Snapshot>) -> (u64, mpsc::Receiver<Arc<Snapshot>>) {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(initial);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks.lock().push((id, tx));
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.sinks.lock().retain(|(sink_id, _)| *sink_id != id);
    }

    /// Best-effort broadcast to every registered sink. Sinks that can't
    /// accept the send are dropped from the set.
    pub fn broadcast(&self, snapshot: Arc<Snapshot>) {
        let sinks: Vec<(u64, mpsc::Sender<Arc<Snapshot>>)> = self.sinks.lock().clone();

        let mut dead = Vec::new();
        for (id, tx) in &sinks {
            if tx.try_send(snapshot.clone()).is_err() {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            self.sinks.lock().retain(|(id, _)| !dead.contains(id));
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
