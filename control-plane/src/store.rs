//! Policy store abstraction: create/update/get/delete/list plus a watch
//! stream of put/delete events.
//!
//! Only an in-memory implementation ships here. The trait is written as a
//! plain async interface (not generic over a specific backend) so a
//! coordinated external store (etcd, Consul, ...) could implement it without
//! touching the HTTP layer - no such client is implemented.

use crate::policy::Policy;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put(Policy),
    Delete(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("policy '{0}' already exists")]
    AlreadyExists(String),
    #[error("policy '{0}' not found")]
    NotFound(String),
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn create(&self, policy: Policy) -> Result<(), StoreError>;
    async fn update(&self, policy: Policy) -> Result<(), StoreError>;
    /// Create-or-update: never conflicts, always succeeds.
    async fn put(&self, policy: Policy);
    async fn get(&self, name: &str) -> Option<Policy>;
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Vec<Policy>;
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Concurrent map guarded by a reader/writer lock, with a broadcast channel
/// fanning out put/delete events to every watcher. The lock is held only for
/// the structural mutation itself; the watch send happens after release.
pub struct InMemoryStore {
    policies: RwLock<HashMap<String, Policy>>,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        InMemoryStore { policies: RwLock::new(HashMap::new()), events }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn create(&self, policy: Policy) -> Result<(), StoreError> {
        let name = policy.metadata.name.clone();
        {
            let mut guard = self.policies.write();
            if guard.contains_key(&name) {
                return Err(StoreError::AlreadyExists(name));
            }
            guard.insert(name, policy.clone());
        }
        let _ = self.events.send(WatchEvent::Put(policy));
        Ok(())
    }

    async fn update(&self, policy: Policy) -> Result<(), StoreError> {
        let name = policy.metadata.name.clone();
        {
            let mut guard = self.policies.write();
            if !guard.contains_key(&name) {
                return Err(StoreError::NotFound(name));
            }
            guard.insert(name, policy.clone());
        }
        let _ = self.events.send(WatchEvent::Put(policy));
        Ok(())
    }

    async fn put(&self, policy: Policy) {
        let name = policy.metadata.name.clone();
        {
            let mut guard = self.policies.write();
            guard.insert(name, policy.clone());
        }
        let _ = self.events.send(WatchEvent::Put(policy));
    }

    async fn get(&self, name: &str) -> Option<Policy> {
        self.policies.read().get(name).cloned()
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        {
            let mut guard = self.policies.write();
            if guard.remove(name).is_none() {
                return Err(StoreError::NotFound(name.to_string()));
            }
        }
        let _ = self.events.send(WatchEvent::Delete(name.to_string()));
        Ok(())
    }

    async fn list(&self) -> Vec<Policy> {
        let guard = self.policies.read();
        let mut all: Vec<Policy> = guard.values().cloned().collect();
        all.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        all
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
