//! Compiles the full policy list into a versioned, serialized snapshot.
//!
//! Runs once at startup and again on every observed store change. The
//! version stamp is a hash of the canonical JSON so two control-plane
//! instances holding the same policies agree on the same version without
//! coordinating a counter.

use crate::policy::Policy;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub version: u64,
    pub policies: Vec<Policy>,
}

pub fn compile(mut policies: Vec<Policy>) -> Snapshot {
    policies.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    let canonical = serde_json::to_vec(&policies).unwrap_or_default();
    Snapshot { version: version_stamp(&canonical), policies }
}

pub fn version_stamp(canonical_bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    canonical_bytes.hash(&mut hasher);
    hasher.finish()
}
