/*!
 * Store adapter interface
 *
 * The aggregation engine consumes the store only through [`Store`]. Two
 * adapters ship with the crate: [`RedisStore`] for a live Redis-compatible
 * server and [`MemoryStore`], an in-process store with the same semantics
 * used by tests, benchmarks and demos.
 */

use std::collections::{HashMap, HashSet};

use crate::data_types::ScoreRange;
use crate::Result;

pub mod memory;
pub mod redis_store;

pub use self::memory::{Fault, MemoryStore, PatientSeed};
pub use self::redis_store::RedisStore;

/// Key-value store operations the aggregation engine depends on.
///
/// Every operation is bounded in time by the adapter; absent keys behave as
/// empty collections, never as errors.
pub trait Store: Send + Sync {
    /// Round-trip liveness probe
    fn ping(&self) -> Result<bool>;

    /// All fields of a hash record (empty when the key is absent)
    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>>;

    fn set_cardinality(&self, key: &str) -> Result<u64>;

    fn set_members(&self, key: &str) -> Result<HashSet<String>>;

    fn is_member(&self, key: &str, member: &str) -> Result<bool>;

    /// Add members to a set, returning how many were new
    fn add_members(&self, key: &str, members: &[String]) -> Result<u64>;

    /// Store the intersection of `sources` into `dest`, returning its cardinality
    fn intersect_into(&self, dest: &str, sources: &[&str]) -> Result<u64>;

    /// Delete a key; deleting an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Highest `count` entries by descending score, ties in the store's native order
    fn top_by_score_descending(&self, key: &str, count: usize) -> Result<Vec<(String, f64)>>;

    /// Members whose score lies in `range`, ascending by score
    fn range_by_score(&self, key: &str, range: &ScoreRange) -> Result<Vec<String>>;

    /// Number of entries of a score-ordered sequence
    fn sorted_cardinality(&self, key: &str) -> Result<u64>;

    fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Server counters and strings (`INFO`)
    fn server_info(&self) -> Result<HashMap<String, String>>;

    fn key_count(&self) -> Result<u64>;
}

impl<S: Store + ?Sized> Store for &S {
    fn ping(&self) -> Result<bool> {
        (**self).ping()
    }

    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        (**self).get_hash(key)
    }

    fn set_cardinality(&self, key: &str) -> Result<u64> {
        (**self).set_cardinality(key)
    }

    fn set_members(&self, key: &str) -> Result<HashSet<String>> {
        (**self).set_members(key)
    }

    fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        (**self).is_member(key, member)
    }

    fn add_members(&self, key: &str, members: &[String]) -> Result<u64> {
        (**self).add_members(key, members)
    }

    fn intersect_into(&self, dest: &str, sources: &[&str]) -> Result<u64> {
        (**self).intersect_into(dest, sources)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn top_by_score_descending(&self, key: &str, count: usize) -> Result<Vec<(String, f64)>> {
        (**self).top_by_score_descending(key, count)
    }

    fn range_by_score(&self, key: &str, range: &ScoreRange) -> Result<Vec<String>> {
        (**self).range_by_score(key, range)
    }

    fn sorted_cardinality(&self, key: &str) -> Result<u64> {
        (**self).sorted_cardinality(key)
    }

    fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).keys_by_prefix(prefix)
    }

    fn server_info(&self) -> Result<HashMap<String, String>> {
        (**self).server_info()
    }

    fn key_count(&self) -> Result<u64> {
        (**self).key_count()
    }
}
