//! Shared application state and the background recompile loop that keeps
//! the broadcast snapshot in sync with the store.

use crate::broadcaster::Broadcaster;
use crate::compiler::{self, Snapshot};
use crate::store::PolicyStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PolicyStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub snapshot: Arc<RwLock<Arc<Snapshot>>>,
}

impl AppState {
    pub async fn new(store: Arc<dyn PolicyStore>) -> Self {
        let initial = compiler::compile(store.list().await);
        AppState {
            store,
            broadcaster: Arc::new(Broadcaster::new()),
            snapshot: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Recompiles from the store's current contents and broadcasts the
    /// result. Called once at startup and again on every observed store
    /// change.
    pub async fn recompile_and_broadcast(&self) {
        let compiled = Arc::new(compiler::compile(self.store.list().await));
        *self.snapshot.write() = compiled.clone();
        debug!("recompiled policy snapshot, version={}", compiled.version);
        self.broadcaster.broadcast(compiled);
    }
}

/// Subscribes to the store's watch channel and recompiles on every event.
/// If the watch channel lags (the subscriber fell behind the broadcast
/// buffer), it resubscribes and recompiles once to recover - snapshots are
/// idempotent so missing an intermediate event is harmless.
pub async fn run_recompile_loop(state: AppState) {
    let mut rx = state.store.watch();
    info!("recompile loop started");
    loop {
        match rx.recv().await {
            Ok(_event) => state.recompile_and_broadcast().await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                state.recompile_and_broadcast().await;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                info!("store watch channel closed, recompile loop exiting");
                break;
            }
        }
    }
}
