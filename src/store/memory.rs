/*!
 * In-process store with Redis semantics
 *
 * Backs tests, benchmarks and demos. Besides the [`Store`] operations it can
 * be seeded with patients and told to fail specific operations, which is how
 * error-path cleanup of ephemeral sets is exercised.
 */

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::data_types::{
    fields, AgeGroup, BmiCategory, GlucoseLevel, Outcome, PatientId, ScoreRange,
};
use crate::error::{AnalyticsError, StoreOperation};
use crate::schema::KeySchema;
use crate::store::Store;
use crate::Result;

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    SortedSet(HashMap<String, f64>),
}

fn hash_field_size(field: &str, value: &str) -> u64 {
    (field.len() + value.len() + 16) as u64
}

fn set_member_size(member: &str) -> u64 {
    (member.len() + 8) as u64
}

fn scored_member_size(member: &str) -> u64 {
    (member.len() + 16) as u64
}

impl Value {
    fn approximate_size(&self) -> u64 {
        match self {
            Value::Hash(h) => h.iter().map(|(k, v)| hash_field_size(k, v)).sum(),
            Value::Set(s) => s.iter().map(|m| set_member_size(m)).sum(),
            Value::SortedSet(z) => z.keys().map(|m| scored_member_size(m)).sum(),
        }
    }
}

/// Approximate footprint of one key and its value
fn entry_size(key: &str, value: &Value) -> u64 {
    key.len() as u64 + value.approximate_size()
}

/// Injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every call of the operation fails
    Operation(StoreOperation),
    /// The operation succeeds `skip` times, then every further call fails
    OperationAfter(StoreOperation, u64),
    /// Every operation times out, the liveness probe included
    Timeout,
    /// The operation succeeds `skip` times, then every further call times out
    TimeoutAfter(StoreOperation, u64),
    /// The liveness probe fails
    Unreachable,
}

/// One patient with all of its derived index memberships
#[derive(Debug, Clone, PartialEq)]
pub struct PatientSeed {
    pub id: String,
    pub pregnancies: i64,
    pub glucose: f64,
    pub bmi: f64,
    pub age: f64,
    pub diabetic: bool,
    pub age_group: AgeGroup,
    pub bmi_category: BmiCategory,
    pub glucose_level: GlucoseLevel,
}

/// In-memory [`Store`]
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<StoreOperation, u64>>,
    commands: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    used_memory: AtomicU64,
    peak_memory: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a primary record and every derived index for one patient
    pub fn load_patient(&self, schema: &KeySchema, seed: &PatientSeed) {
        let id = PatientId::new(seed.id.clone());
        let patient_key = schema.patient_key(&id);
        let record = [
            (fields::PREGNANCIES, seed.pregnancies.to_string()),
            (fields::GLUCOSE, seed.glucose.to_string()),
            (fields::BMI, seed.bmi.to_string()),
            (fields::AGE, seed.age.to_string()),
            (
                fields::OUTCOME,
                Outcome::from_membership(seed.diabetic).to_code().to_string(),
            ),
        ];
        for (field, value) in record {
            self.set_hash_field(&patient_key, field, &value);
        }

        self.zadd(&schema.glucose_index, &seed.id, seed.glucose);
        self.zadd(&schema.bmi_index, &seed.id, seed.bmi);
        self.sadd(&schema.category_key(seed.age_group), &seed.id);
        self.sadd(&schema.category_key(seed.bmi_category), &seed.id);
        self.sadd(&schema.category_key(seed.glucose_level), &seed.id);
        if seed.diabetic {
            self.sadd(&schema.diabetes_set, &seed.id);
        }
    }

    /// Set one hash field directly, bypassing counters and faults
    pub fn set_hash_field(&self, key: &str, field: &str, value: &str) {
        let mut data = self.data.write();
        let (mut added, mut removed) = (0, 0);
        let entry = data.entry(key.to_string()).or_insert_with(|| {
            added += key.len() as u64;
            Value::Hash(HashMap::new())
        });
        if !matches!(entry, Value::Hash(_)) {
            removed += entry.approximate_size();
            *entry = Value::Hash(HashMap::new());
        }
        if let Value::Hash(hash) = entry {
            added += hash_field_size(field, value);
            if let Some(old) = hash.insert(field.to_string(), value.to_string()) {
                removed += hash_field_size(field, &old);
            }
        }
        self.adjust_memory(added, removed);
    }

    /// Add a set member directly, bypassing counters and faults
    pub fn sadd(&self, key: &str, member: &str) {
        let mut data = self.data.write();
        let (mut added, mut removed) = (0, 0);
        let entry = data.entry(key.to_string()).or_insert_with(|| {
            added += key.len() as u64;
            Value::Set(HashSet::new())
        });
        if !matches!(entry, Value::Set(_)) {
            removed += entry.approximate_size();
            *entry = Value::Set(HashSet::new());
        }
        if let Value::Set(set) = entry {
            if set.insert(member.to_string()) {
                added += set_member_size(member);
            }
        }
        self.adjust_memory(added, removed);
    }

    /// Add a scored member directly, bypassing counters and faults
    pub fn zadd(&self, key: &str, member: &str, score: f64) {
        let mut data = self.data.write();
        let (mut added, mut removed) = (0, 0);
        let entry = data.entry(key.to_string()).or_insert_with(|| {
            added += key.len() as u64;
            Value::SortedSet(HashMap::new())
        });
        if !matches!(entry, Value::SortedSet(_)) {
            removed += entry.approximate_size();
            *entry = Value::SortedSet(HashMap::new());
        }
        if let Value::SortedSet(zset) = entry {
            if zset.insert(member.to_string(), score).is_none() {
                added += scored_member_size(member);
            }
        }
        self.adjust_memory(added, removed);
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Number of times an operation has been invoked
    pub fn calls(&self, operation: StoreOperation) -> u64 {
        self.calls.lock().get(&operation).copied().unwrap_or(0)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn enter(&self, operation: StoreOperation) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for fault in self.faults.lock().iter() {
            match *fault {
                Fault::Operation(op) if op == operation => {
                    return Err(AnalyticsError::store(operation, "injected failure"));
                }
                Fault::OperationAfter(op, skip) if op == operation && call > skip => {
                    return Err(AnalyticsError::store(operation, "injected failure"));
                }
                Fault::Timeout => {
                    return Err(AnalyticsError::timeout(operation, "injected timeout"));
                }
                Fault::TimeoutAfter(op, skip) if op == operation && call > skip => {
                    return Err(AnalyticsError::timeout(operation, "injected timeout"));
                }
                Fault::Unreachable if operation == StoreOperation::Ping => {
                    return Err(AnalyticsError::store(operation, "connection refused"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn record_lookup(&self, found: bool) {
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Apply a size change; callers hold the data write lock
    fn adjust_memory(&self, added: u64, removed: u64) {
        let used = if added >= removed {
            self.used_memory.fetch_add(added - removed, Ordering::Relaxed) + (added - removed)
        } else {
            self.used_memory.fetch_sub(removed - added, Ordering::Relaxed) - (removed - added)
        };
        self.peak_memory.fetch_max(used, Ordering::Relaxed);
    }

    /// Read a set, treating an absent key as empty
    fn with_set<T>(
        &self,
        operation: StoreOperation,
        key: &str,
        read: impl FnOnce(&HashSet<String>) -> T,
    ) -> Result<T> {
        let data = self.data.read();
        match data.get(key) {
            Some(Value::Set(set)) => {
                self.record_lookup(true);
                Ok(read(set))
            }
            Some(_) => Err(wrong_type(operation)),
            None => {
                self.record_lookup(false);
                Ok(read(&HashSet::new()))
            }
        }
    }

    /// Read a sorted set, treating an absent key as empty
    fn with_sorted_set<T>(
        &self,
        operation: StoreOperation,
        key: &str,
        read: impl FnOnce(&HashMap<String, f64>) -> T,
    ) -> Result<T> {
        let data = self.data.read();
        match data.get(key) {
            Some(Value::SortedSet(zset)) => {
                self.record_lookup(true);
                Ok(read(zset))
            }
            Some(_) => Err(wrong_type(operation)),
            None => {
                self.record_lookup(false);
                Ok(read(&HashMap::new()))
            }
        }
    }
}

fn wrong_type(operation: StoreOperation) -> AnalyticsError {
    AnalyticsError::store(
        operation,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

/// Redis-style human readable byte count (`512B`, `1.50K`, `2.00M`)
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["K", "M", "G", "T"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", size, UNITS[unit])
}

impl Store for MemoryStore {
    fn ping(&self) -> Result<bool> {
        self.enter(StoreOperation::Ping)?;
        Ok(true)
    }

    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        self.enter(StoreOperation::GetHash)?;
        let data = self.data.read();
        match data.get(key) {
            Some(Value::Hash(hash)) => {
                self.record_lookup(true);
                Ok(hash.clone())
            }
            Some(_) => Err(wrong_type(StoreOperation::GetHash)),
            None => {
                self.record_lookup(false);
                Ok(HashMap::new())
            }
        }
    }

    fn set_cardinality(&self, key: &str) -> Result<u64> {
        self.enter(StoreOperation::SetCardinality)?;
        self.with_set(StoreOperation::SetCardinality, key, |set| set.len() as u64)
    }

    fn set_members(&self, key: &str) -> Result<HashSet<String>> {
        self.enter(StoreOperation::SetMembers)?;
        self.with_set(StoreOperation::SetMembers, key, HashSet::clone)
    }

    fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        self.enter(StoreOperation::IsMember)?;
        self.with_set(StoreOperation::IsMember, key, |set| set.contains(member))
    }

    fn add_members(&self, key: &str, members: &[String]) -> Result<u64> {
        self.enter(StoreOperation::AddMembers)?;
        if members.is_empty() {
            return Ok(0);
        }
        let mut data = self.data.write();
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(HashSet::new()));
        let Value::Set(set) = entry else {
            return Err(wrong_type(StoreOperation::AddMembers));
        };
        let was_empty = set.is_empty();
        let mut added = 0u64;
        let mut size = if was_empty { key.len() as u64 } else { 0 };
        for member in members {
            if set.insert(member.clone()) {
                added += 1;
                size += set_member_size(member);
            }
        }
        self.adjust_memory(size, 0);
        Ok(added)
    }

    fn intersect_into(&self, dest: &str, sources: &[&str]) -> Result<u64> {
        self.enter(StoreOperation::IntersectInto)?;
        let mut data = self.data.write();
        let mut result: Option<HashSet<String>> = None;
        for source in sources {
            let members = match data.get(*source) {
                Some(Value::Set(set)) => set,
                Some(_) => return Err(wrong_type(StoreOperation::IntersectInto)),
                None => {
                    result = Some(HashSet::new());
                    break;
                }
            };
            result = Some(match result {
                None => members.clone(),
                Some(acc) => acc.into_iter().filter(|m| members.contains(m)).collect(),
            });
        }
        let result = result.unwrap_or_default();
        let cardinality = result.len() as u64;
        // SINTERSTORE removes the destination when the intersection is empty
        let (added, previous) = if result.is_empty() {
            (0, data.remove(dest))
        } else {
            let value = Value::Set(result);
            (entry_size(dest, &value), data.insert(dest.to_string(), value))
        };
        let removed = previous.map_or(0, |value| entry_size(dest, &value));
        self.adjust_memory(added, removed);
        Ok(cardinality)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.enter(StoreOperation::Delete)?;
        let mut data = self.data.write();
        if let Some(value) = data.remove(key) {
            self.adjust_memory(0, entry_size(key, &value));
        }
        Ok(())
    }

    fn top_by_score_descending(&self, key: &str, count: usize) -> Result<Vec<(String, f64)>> {
        self.enter(StoreOperation::TopByScore)?;
        self.with_sorted_set(StoreOperation::TopByScore, key, |zset| {
            let mut entries: Vec<(String, f64)> =
                zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
            // Reverse of (score, member) ascending, as ZREVRANGE orders ties
            entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
            entries.truncate(count);
            entries
        })
    }

    fn range_by_score(&self, key: &str, range: &ScoreRange) -> Result<Vec<String>> {
        self.enter(StoreOperation::RangeByScore)?;
        self.with_sorted_set(StoreOperation::RangeByScore, key, |zset| {
            let mut entries: Vec<(&String, f64)> = zset
                .iter()
                .filter(|(_, score)| range.contains(**score))
                .map(|(m, s)| (m, *s))
                .collect();
            entries.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
            entries.into_iter().map(|(m, _)| m.clone()).collect()
        })
    }

    fn sorted_cardinality(&self, key: &str) -> Result<u64> {
        self.enter(StoreOperation::SortedCardinality)?;
        self.with_sorted_set(StoreOperation::SortedCardinality, key, |zset| zset.len() as u64)
    }

    fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.enter(StoreOperation::KeysByPrefix)?;
        let mut keys: Vec<String> = self
            .data
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn server_info(&self) -> Result<HashMap<String, String>> {
        self.enter(StoreOperation::ServerInfo)?;
        let used = self.used_memory.load(Ordering::Relaxed);
        let peak = self.peak_memory.load(Ordering::Relaxed).max(used);
        let info = [
            ("redis_version", "memory".to_string()),
            ("connected_clients", "1".to_string()),
            (
                "total_commands_processed",
                self.commands.load(Ordering::Relaxed).to_string(),
            ),
            ("keyspace_hits", self.hits.load(Ordering::Relaxed).to_string()),
            ("keyspace_misses", self.misses.load(Ordering::Relaxed).to_string()),
            ("used_memory", used.to_string()),
            ("used_memory_human", human_bytes(used)),
            ("used_memory_peak", peak.to_string()),
            ("used_memory_peak_human", human_bytes(peak)),
        ];
        Ok(info
            .into_iter()
            .map(|(field, value)| (field.to_string(), value))
            .collect())
    }

    fn key_count(&self) -> Result<u64> {
        self.enter(StoreOperation::KeyCount)?;
        Ok(self.data.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::ScoreBound;

    #[test]
    fn test_intersect_into_and_delete() {
        let store = MemoryStore::new();
        for id in ["1", "2", "3"] {
            store.sadd("a", id);
        }
        for id in ["2", "3", "4"] {
            store.sadd("b", id);
        }
        assert_eq!(store.intersect_into("dest", &["a", "b"]).unwrap(), 2);
        assert_eq!(store.set_cardinality("dest").unwrap(), 2);

        store.delete("dest").unwrap();
        store.delete("dest").unwrap();
        assert!(!store.contains_key("dest"));
    }

    #[test]
    fn test_empty_intersection_leaves_no_key() {
        let store = MemoryStore::new();
        store.sadd("a", "1");
        assert_eq!(store.intersect_into("dest", &["a", "missing"]).unwrap(), 0);
        assert!(!store.contains_key("dest"));
    }

    #[test]
    fn test_absent_keys_are_empty() {
        let store = MemoryStore::new();
        assert!(store.get_hash("patient:404").unwrap().is_empty());
        assert_eq!(store.set_cardinality("nothing").unwrap(), 0);
        assert!(!store.is_member("nothing", "1").unwrap());
        assert!(store.top_by_score_descending("nothing", 10).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_type() {
        let store = MemoryStore::new();
        store.zadd("z", "1", 1.0);
        assert!(store.set_cardinality("z").is_err());
    }

    #[test]
    fn test_sorted_set_native_tie_order() {
        let store = MemoryStore::new();
        store.zadd("z", "p1", 180.0);
        store.zadd("z", "p2", 150.0);
        store.zadd("z", "p3", 150.0);
        let top = store.top_by_score_descending("z", 3).unwrap();
        let ids: Vec<&str> = top.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3", "p2"]);

        let range = ScoreRange::new(ScoreBound::Exclusive(100.0), ScoreBound::Inclusive(150.0));
        assert_eq!(store.range_by_score("z", &range).unwrap(), vec!["p2", "p3"]);
    }

    #[test]
    fn test_fault_after_skip() {
        let store = MemoryStore::new();
        store.inject(Fault::OperationAfter(StoreOperation::SetCardinality, 1));
        assert!(store.set_cardinality("a").is_ok());
        assert!(store.set_cardinality("a").is_err());
        assert_eq!(store.calls(StoreOperation::SetCardinality), 2);
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let store = MemoryStore::new();
        store.sadd("a", "1");
        store.is_member("a", "1").unwrap();
        store.is_member("b", "1").unwrap();
        let info = store.server_info().unwrap();
        assert_eq!(info["keyspace_hits"], "1");
        assert_eq!(info["keyspace_misses"], "1");
    }

    fn recomputed_memory(store: &MemoryStore) -> u64 {
        store
            .data
            .read()
            .iter()
            .map(|(key, value)| entry_size(key, value))
            .sum()
    }

    fn reported_memory(store: &MemoryStore) -> (u64, u64) {
        let info = store.server_info().unwrap();
        (
            info["used_memory"].parse().unwrap(),
            info["used_memory_peak"].parse().unwrap(),
        )
    }

    #[test]
    fn test_memory_accounting_follows_writes_and_deletes() {
        let store = MemoryStore::new();
        store.set_hash_field("patient:1", "Glucose", "148");
        store.set_hash_field("patient:1", "Glucose", "85.5");
        store.sadd("a", "1");
        store.sadd("a", "1");
        store.sadd("a", "2");
        store.sadd("b", "2");
        store.zadd("z", "1", 148.0);
        store.zadd("z", "1", 150.0);
        store
            .add_members("tmp", &["1".to_string(), "2".to_string(), "1".to_string()])
            .unwrap();
        store.intersect_into("dest", &["a", "b"]).unwrap();
        store.intersect_into("dest", &["a", "tmp"]).unwrap();
        assert_eq!(reported_memory(&store).0, recomputed_memory(&store));

        let (_, peak_before) = reported_memory(&store);
        store.delete("tmp").unwrap();
        store.intersect_into("dest", &["a", "missing"]).unwrap();
        // Overwriting a key of another type replaces its value
        store.sadd("z", "9");
        let (used, peak) = reported_memory(&store);
        assert_eq!(used, recomputed_memory(&store));
        assert!(used < peak_before);
        assert_eq!(peak, peak_before);
    }

    #[test]
    fn test_memory_accounting_empty_store() {
        let store = MemoryStore::new();
        store.sadd("a", "1");
        store.delete("a").unwrap();
        let (used, peak) = reported_memory(&store);
        assert_eq!(used, 0);
        assert!(peak > 0);
    }

    #[test]
    fn test_timeout_after_skip_spares_other_operations() {
        let store = MemoryStore::new();
        store.inject(Fault::TimeoutAfter(StoreOperation::GetHash, 1));
        assert!(store.ping().unwrap());
        assert!(store.get_hash("patient:1").is_ok());
        let err = store.get_hash("patient:1").unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.is_connectivity());
        assert!(store.set_cardinality("a").is_ok());
        assert_eq!(store.calls(StoreOperation::GetHash), 2);
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512B");
        assert_eq!(human_bytes(1536), "1.50K");
        assert_eq!(human_bytes(2 * 1024 * 1024), "2.00M");
    }
}
