/*!
 * Redis adapter for the [`Store`] interface
 */

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{global_config, AnalyticsConfig};
use crate::data_types::ScoreRange;
use crate::error::{AnalyticsError, StoreOperation};
use crate::store::Store;
use crate::Result;

/// Store adapter backed by a single Redis connection.
///
/// Connect, read and write timeouts are all bounded; a command that exceeds
/// its timeout fails the call instead of being retried.
pub struct RedisStore {
    url: String,
    connection: Mutex<redis::Connection>,
    scan_batch_size: usize,
}

impl RedisStore {
    /// Connect using the URL, timeouts and batch size of `config`
    pub fn connect(config: &AnalyticsConfig) -> Result<Self> {
        Self::connect_with(
            &config.redis_url,
            config.connect_timeout(),
            config.command_timeout(),
            config.scan_batch_size,
        )
    }

    /// Connect using the process-wide configuration
    pub fn connect_global() -> Result<Self> {
        Self::connect(&global_config())
    }

    pub fn connect_with(
        url: &str,
        connect_timeout: Duration,
        command_timeout: Duration,
        scan_batch_size: usize,
    ) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AnalyticsError::unreachable(url, e.to_string()))?;
        let connection = client
            .get_connection_with_timeout(connect_timeout)
            .map_err(|e| AnalyticsError::unreachable(url, e.to_string()))?;
        connection
            .set_read_timeout(Some(command_timeout))
            .and_then(|_| connection.set_write_timeout(Some(command_timeout)))
            .map_err(|e| AnalyticsError::unreachable(url, e.to_string()))?;

        info!(url, ?command_timeout, "connected to store");
        Ok(Self {
            url: url.to_string(),
            connection: Mutex::new(connection),
            scan_batch_size: scan_batch_size.max(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn run<T: redis::FromRedisValue>(&self, operation: StoreOperation, cmd: &redis::Cmd) -> Result<T> {
        let mut connection = self.connection.lock();
        cmd.query(&mut *connection)
            .map_err(|e| AnalyticsError::from_redis(operation, e))
    }
}

impl Store for RedisStore {
    fn ping(&self) -> Result<bool> {
        let reply: String = self.run(StoreOperation::Ping, &redis::cmd("PING"))?;
        Ok(reply.eq_ignore_ascii_case("PONG"))
    }

    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>> {
        self.run(StoreOperation::GetHash, redis::cmd("HGETALL").arg(key))
    }

    fn set_cardinality(&self, key: &str) -> Result<u64> {
        self.run(StoreOperation::SetCardinality, redis::cmd("SCARD").arg(key))
    }

    fn set_members(&self, key: &str) -> Result<HashSet<String>> {
        self.run(StoreOperation::SetMembers, redis::cmd("SMEMBERS").arg(key))
    }

    fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        self.run(StoreOperation::IsMember, redis::cmd("SISMEMBER").arg(key).arg(member))
    }

    fn add_members(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.run(StoreOperation::AddMembers, redis::cmd("SADD").arg(key).arg(members))
    }

    fn intersect_into(&self, dest: &str, sources: &[&str]) -> Result<u64> {
        if sources.is_empty() {
            return Err(AnalyticsError::store(
                StoreOperation::IntersectInto,
                "at least one source set is required",
            ));
        }
        self.run(
            StoreOperation::IntersectInto,
            redis::cmd("SINTERSTORE").arg(dest).arg(sources),
        )
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _removed: u64 = self.run(StoreOperation::Delete, redis::cmd("DEL").arg(key))?;
        Ok(())
    }

    fn top_by_score_descending(&self, key: &str, count: usize) -> Result<Vec<(String, f64)>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.run(
            StoreOperation::TopByScore,
            redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(0)
                .arg(count as i64 - 1)
                .arg("WITHSCORES"),
        )
    }

    fn range_by_score(&self, key: &str, range: &ScoreRange) -> Result<Vec<String>> {
        self.run(
            StoreOperation::RangeByScore,
            redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(range.min.to_redis_arg(true))
                .arg(range.max.to_redis_arg(false)),
        )
    }

    fn sorted_cardinality(&self, key: &str) -> Result<u64> {
        self.run(StoreOperation::SortedCardinality, redis::cmd("ZCARD").arg(key))
    }

    fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = self.run(
                StoreOperation::KeysByPrefix,
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(self.scan_batch_size),
            )?;
            // SCAN may return a key more than once across pages
            for key in page {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(prefix, found = keys.len(), "scanned keys");
        Ok(keys)
    }

    fn server_info(&self) -> Result<HashMap<String, String>> {
        let raw: String = self.run(StoreOperation::ServerInfo, redis::cmd("INFO").arg("all"))?;
        Ok(parse_info(&raw))
    }

    fn key_count(&self) -> Result<u64> {
        self.run(StoreOperation::KeyCount, &redis::cmd("DBSIZE"))
    }
}

/// Parse the `field:value` lines of an `INFO` reply
pub fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .collect()
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
