/*!
 * Store health summary
 */

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::round_to;

/// Health counters of the store itself (no patient data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub total_keys: u64,
    pub used_memory_human: String,
    pub used_memory_peak_human: String,
    pub connected_clients: u64,
    pub total_commands_processed: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub redis_version: String,
    /// `hits / (hits + misses) * 100`, two decimals, 0 without lookups
    pub hit_ratio: f64,
    pub collected_at: DateTime<Utc>,
}

impl TelemetrySnapshot {
    /// Summarize an `INFO` field map and key count
    pub fn from_info(info: &HashMap<String, String>, total_keys: u64) -> Self {
        let text = |field: &str, default: &str| {
            info.get(field)
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| default.to_string())
        };
        let counter = |field: &str| {
            info.get(field)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };

        let keyspace_hits = counter("keyspace_hits");
        let keyspace_misses = counter("keyspace_misses");

        Self {
            total_keys,
            used_memory_human: text("used_memory_human", "0B"),
            used_memory_peak_human: text("used_memory_peak_human", "0B"),
            connected_clients: counter("connected_clients"),
            total_commands_processed: counter("total_commands_processed"),
            keyspace_hits,
            keyspace_misses,
            redis_version: text("redis_version", "Unknown"),
            hit_ratio: hit_ratio(keyspace_hits, keyspace_misses),
            collected_at: Utc::now(),
        }
    }

    /// Print formatted statistics
    pub fn print_summary(&self) {
        println!("=== Store Telemetry ===");
        println!("Version: {}", self.redis_version);
        println!("Total Keys: {}", self.total_keys);
        println!("Memory: {} (peak {})", self.used_memory_human, self.used_memory_peak_human);
        println!("Connected Clients: {}", self.connected_clients);
        println!("Commands Processed: {}", self.total_commands_processed);
        println!(
            "Keyspace Hits/Misses: {}/{} ({:.2}%)",
            self.keyspace_hits, self.keyspace_misses, self.hit_ratio
        );
    }
}

/// Cache hit ratio in percent, two decimals
pub fn hit_ratio(hits: u64, misses: u64) -> f64 {
    let lookups = hits + misses;
    if lookups == 0 {
        return 0.0;
    }
    round_to(hits as f64 / lookups as f64 * 100.0, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_hit_ratio() {
        assert_eq!(hit_ratio(80, 20), 80.0);
        assert_eq!(hit_ratio(0, 0), 0.0);
        assert_eq!(hit_ratio(2, 1), 66.67);
    }

    #[test]
    fn test_snapshot_defaults_for_missing_fields() {
        let snapshot = TelemetrySnapshot::from_info(&info(&[("keyspace_hits", "oops")]), 7);
        assert_eq!(snapshot.total_keys, 7);
        assert_eq!(snapshot.keyspace_hits, 0);
        assert_eq!(snapshot.used_memory_human, "0B");
        assert_eq!(snapshot.redis_version, "Unknown");
        assert_eq!(snapshot.hit_ratio, 0.0);
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let snapshot = TelemetrySnapshot::from_info(
            &info(&[
                ("keyspace_hits", "80"),
                ("keyspace_misses", "20"),
                ("connected_clients", "3"),
                ("used_memory_human", "1.05M"),
                ("redis_version", "7.2.4"),
            ]),
            100,
        );
        assert_eq!(snapshot.hit_ratio, 80.0);
        assert_eq!(snapshot.connected_clients, 3);
        assert_eq!(snapshot.used_memory_human, "1.05M");
    }
}
