//! # Queue configuration
//!
//! A flat string key/value store addressed with dotted keys, the same shape
//! the rest of the application uses for its settings:
//!
//! ```rust
//! use tether_queue::QueueConfig;
//!
//! let mut config = QueueConfig::new();
//! config.set("queue.default", "redis");
//! config.set("queue.connections.redis.driver", "redis");
//! config.set("queue.connections.redis.connection", "default");
//!
//! assert_eq!(config.default_connection(), "redis");
//! assert_eq!(config.default_queue("redis"), "default");
//! ```
//!
//! ## Keys
//!
//! | key | default |
//! |-----|---------|
//! | `app.name` | `tether` |
//! | `app.debug` | `false` |
//! | `queue.default` | `sync` |
//! | `queue.connections.<c>.driver` | required |
//! | `queue.connections.<c>.connection` | `default` |
//! | `queue.connections.<c>.queue` | `default` |
//! | `queue.connections.<c>.concurrent` | `1` |
//! | `queue.connections.<c>.retry_after` | `60` (seconds) |
//! | `queue.connections.<c>.table` | `jobs` |
//! | `queue.connections.<c>.via` | none |
//! | `queue.connections.<c>.block_for` | `0` (block forever), `none` disables |
//! | `queue.failed.database` | none (failed jobs are only logged) |
//! | `queue.failed.table` | `failed_jobs` |
//! | `redis.<name>.url` | none |
//!
//! ## Environment overrides
//!
//! [`QueueConfig::load_env`] maps `PREFIX__QUEUE__DEFAULT=redis` onto
//! `queue.default`.

use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    values: HashMap<String, String>,
}

impl QueueConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of [`QueueConfig::set`]
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse::<bool>().ok())
    }

    /// Copy environment variables starting with `prefix` into the store.
    ///
    /// `TETHER__QUEUE__CONNECTIONS__REDIS__DRIVER` with prefix `TETHER__`
    /// becomes `queue.connections.redis.driver`.
    pub fn load_env(&mut self, prefix: &str) {
        self.load_vars(prefix, std::env::vars());
    }

    fn load_vars(&mut self, prefix: &str, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
            }
        }
    }

    fn connection_key(connection: &str, field: &str) -> String {
        format!("queue.connections.{connection}.{field}")
    }

    pub fn app_name(&self) -> String {
        self.get_string("app.name").unwrap_or_else(|| "tether".to_string())
    }

    pub fn app_debug(&self) -> bool {
        self.get_bool("app.debug").unwrap_or(false)
    }

    /// Name of the connection used when none is given
    pub fn default_connection(&self) -> String {
        self.get_string("queue.default").unwrap_or_else(|| "sync".to_string())
    }

    /// Names of every configured queue connection, sorted
    pub fn connections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .values
            .keys()
            .filter_map(|key| {
                key.strip_prefix("queue.connections.")?
                    .strip_suffix(".driver")
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }

    pub fn has_connection(&self, connection: &str) -> bool {
        self.has(&Self::connection_key(connection, "driver"))
    }

    pub fn driver(&self, connection: &str) -> Option<String> {
        self.get_string(&Self::connection_key(connection, "driver"))
    }

    /// Database or Redis connection the queue connection stores jobs in
    pub fn storage_connection(&self, connection: &str) -> String {
        self.get_string(&Self::connection_key(connection, "connection"))
            .unwrap_or_else(|| "default".to_string())
    }

    /// Queue name used when none is given
    pub fn default_queue(&self, connection: &str) -> String {
        self.get_string(&Self::connection_key(connection, "queue"))
            .unwrap_or_else(|| "default".to_string())
    }

    /// Number of poll loops a worker runs; at least one
    pub fn concurrent(&self, connection: &str) -> usize {
        self.get_usize(&Self::connection_key(connection, "concurrent"))
            .unwrap_or(1)
            .max(1)
    }

    /// How long a reservation is honoured before the job may be handed out again
    pub fn retry_after(&self, connection: &str) -> Duration {
        self.get_u64(&Self::connection_key(connection, "retry_after"))
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER)
    }

    pub fn table(&self, connection: &str) -> String {
        self.get_string(&Self::connection_key(connection, "table"))
            .unwrap_or_else(|| "jobs".to_string())
    }

    /// Name of the registered custom driver for this connection
    pub fn via(&self, connection: &str) -> Option<String> {
        self.get_string(&Self::connection_key(connection, "via"))
    }

    /// Redis blocking pop timeout. `Some(0)` blocks forever, `None` never blocks.
    pub fn block_for(&self, connection: &str) -> Option<Duration> {
        match self.get(&Self::connection_key(connection, "block_for")).map(str::trim) {
            None => Some(Duration::ZERO),
            Some("none") | Some("null") | Some("-1") => None,
            Some(value) => value.parse::<u64>().ok().map(Duration::from_secs),
        }
    }

    /// Database connection holding the failed jobs table
    pub fn failed_database(&self) -> Option<String> {
        self.get_string("queue.failed.database")
    }

    pub fn failed_table(&self) -> String {
        self.get_string("queue.failed.table")
            .unwrap_or_else(|| "failed_jobs".to_string())
    }

    pub fn redis_url(&self, name: &str) -> Option<String> {
        self.get_string(&format!("redis.{name}.url"))
    }
}
