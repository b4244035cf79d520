/*!
 * Scope-guarded ephemeral sets
 *
 * Intermediate results of an aggregation (intersections, scanned populations)
 * are materialized as sets named `<ephemeral_prefix><purpose>:<token>`, where
 * the token is unique to the call. The guard deletes the set when it goes out
 * of scope, so every exit path of the call releases it.
 */

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::schema::KeySchema;
use crate::store::Store;
use crate::Result;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Call-scoped token: a random component plus a process-wide sequence number
pub fn call_token() -> String {
    let random: u64 = rand::random();
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{:016x}{:x}", random, sequence)
}

/// Names the ephemeral sets of one aggregation call
#[derive(Debug, Clone)]
pub struct CallScope<'a> {
    schema: &'a KeySchema,
    token: String,
}

impl<'a> CallScope<'a> {
    pub fn new(schema: &'a KeySchema) -> Self {
        Self {
            schema,
            token: call_token(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Reserve an ephemeral set for `purpose` in `store`
    pub fn set<'s, S: Store + ?Sized>(&self, store: &'s S, purpose: &str) -> EphemeralSet<'s, S> {
        EphemeralSet::new(store, self.schema.ephemeral_key(purpose, &self.token))
    }
}

/// An ephemeral set that is deleted when dropped.
///
/// Prefer [`EphemeralSet::release`] on the success path so a failed deletion
/// is reported; the drop fallback can only log it.
pub struct EphemeralSet<'s, S: Store + ?Sized> {
    store: &'s S,
    key: String,
    released: bool,
}

impl<'s, S: Store + ?Sized> EphemeralSet<'s, S> {
    pub fn new(store: &'s S, key: String) -> Self {
        debug!(key = %key, "acquired ephemeral set");
        Self {
            store,
            key,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store `self = sources[0] ∩ sources[1] ∩ ...`, returning the cardinality
    pub fn intersect(&self, sources: &[&str]) -> Result<u64> {
        self.store.intersect_into(&self.key, sources)
    }

    /// Add members, returning how many were new
    pub fn add(&self, members: &[String]) -> Result<u64> {
        self.store.add_members(&self.key, members)
    }

    pub fn cardinality(&self) -> Result<u64> {
        self.store.set_cardinality(&self.key)
    }

    /// Delete the set now and report the outcome
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.delete(&self.key)
    }
}

impl<S: Store + ?Sized> Drop for EphemeralSet<'_, S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.delete(&self.key) {
            warn!(key = %self.key, error = %e, "failed to delete ephemeral set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreOperation;
    use crate::store::{Fault, MemoryStore};

    #[test]
    fn test_tokens_are_unique() {
        let tokens: std::collections::HashSet<String> = (0..1000).map(|_| call_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_two_scopes_never_share_a_key() {
        let schema = KeySchema::default();
        let store = MemoryStore::new();
        let a = CallScope::new(&schema);
        let b = CallScope::new(&schema);
        assert_ne!(a.set(&store, "pregnant").key(), b.set(&store, "pregnant").key());
    }

    #[test]
    fn test_dropped_set_is_deleted() {
        let schema = KeySchema::default();
        let store = MemoryStore::new();
        let scope = CallScope::new(&schema);
        let key = {
            let set = scope.set(&store, "pregnant");
            set.add(&["1".to_string(), "2".to_string()]).unwrap();
            assert!(store.contains_key(set.key()));
            set.key().to_string()
        };
        assert!(!store.contains_key(&key));
    }

    #[test]
    fn test_release_reports_failure() {
        let schema = KeySchema::default();
        let store = MemoryStore::new();
        let set = CallScope::new(&schema).set(&store, "x");
        set.add(&["1".to_string()]).unwrap();
        store.inject(Fault::Operation(StoreOperation::Delete));
        assert!(set.release().is_err());
        assert_eq!(store.calls(StoreOperation::Delete), 1);
    }
}
