use std::collections::HashMap;
use std::sync::Arc;

use ::redis::aio::ConnectionManager;
use ::redis::Client;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DatabaseDriver, DatabaseHandle, Driver, QueueDriver, RedisDriver, SyncDriver};
use crate::{JobRegistry, QueueConfig, QueueError, QueueResult};

type DriverFactory = dyn Fn(&str) -> QueueResult<Arc<dyn QueueDriver>> + Send + Sync;

/// A user-supplied driver, looked up through a connection's `via` key
#[derive(Clone)]
pub enum CustomDriver {
    /// One shared instance for every connection using it
    Instance(Arc<dyn QueueDriver>),
    /// Called with the connection name each time a driver is created
    Factory(Arc<DriverFactory>),
}

impl CustomDriver {
    pub fn instance(driver: impl QueueDriver + 'static) -> Self {
        Self::Instance(Arc::new(driver))
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&str) -> QueueResult<Arc<dyn QueueDriver>> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(factory))
    }
}

#[derive(Clone)]
struct RedisHandle {
    client: Client,
    manager: ConnectionManager,
}

/// Resolves queue connection names to drivers.
///
/// Database pools and Redis clients are registered by name; a queue
/// connection points at one of them through its `connection` key. Redis
/// connection managers are created on first use and shared afterwards.
pub struct DriverCreator {
    config: Arc<QueueConfig>,
    registry: JobRegistry,
    databases: DashMap<String, DatabaseHandle>,
    redis_clients: DashMap<String, Client>,
    redis_handles: Mutex<HashMap<String, RedisHandle>>,
    custom: DashMap<String, CustomDriver>,
}

impl DriverCreator {
    pub fn new(config: Arc<QueueConfig>, registry: JobRegistry) -> Self {
        Self {
            config,
            registry,
            databases: DashMap::new(),
            redis_clients: DashMap::new(),
            redis_handles: Mutex::new(HashMap::new()),
            custom: DashMap::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Register a database under a storage connection name
    pub fn add_database(&self, name: impl Into<String>, handle: DatabaseHandle) {
        self.databases.insert(name.into(), handle);
    }

    pub fn database(&self, name: &str) -> Option<DatabaseHandle> {
        self.databases.get(name).map(|h| h.value().clone())
    }

    /// Register a Redis client under a storage connection name, taking
    /// precedence over `redis.<name>.url`
    pub fn add_redis(&self, name: impl Into<String>, client: Client) {
        self.redis_clients.insert(name.into(), client);
    }

    /// Register a custom driver under the name connections refer to with `via`
    pub fn add_custom_driver(&self, name: impl Into<String>, driver: CustomDriver) {
        self.custom.insert(name.into(), driver);
    }

    /// Build the driver for a queue connection
    pub async fn create(&self, connection: &str) -> QueueResult<Driver> {
        let driver = self
            .config
            .driver(connection)
            .ok_or_else(|| QueueError::ConnectionNotConfigured(connection.to_string()))?;

        debug!("Creating {} driver for queue connection {}", driver, connection);

        match driver.as_str() {
            "sync" => Ok(Driver::Sync(SyncDriver::new(connection))),
            "database" => self.create_database(connection).map(Driver::Database),
            "redis" | "machinery" => self.create_redis(connection).await.map(Driver::Redis),
            "custom" => self.create_custom(connection).map(Driver::Custom),
            other => Err(QueueError::DriverNotSupported(other.to_string())),
        }
    }

    fn create_database(&self, connection: &str) -> QueueResult<DatabaseDriver> {
        let storage = self.config.storage_connection(connection);
        let handle = self
            .database(&storage)
            .ok_or_else(|| QueueError::InvalidDatabaseConnection(connection.to_string()))?;

        DatabaseDriver::new(
            connection,
            handle,
            self.config.table(connection),
            self.config.retry_after(connection),
            self.registry.clone(),
        )
    }

    async fn create_redis(&self, connection: &str) -> QueueResult<RedisDriver> {
        let storage = self.config.storage_connection(connection);
        let handle = self.redis_handle(connection, &storage).await?;

        Ok(RedisDriver::new(
            connection,
            handle.client,
            handle.manager,
            self.config.retry_after(connection),
            self.config.block_for(connection),
            self.registry.clone(),
        ))
    }

    async fn redis_handle(&self, connection: &str, storage: &str) -> QueueResult<RedisHandle> {
        let mut handles = self.redis_handles.lock().await;
        if let Some(handle) = handles.get(storage) {
            return Ok(handle.clone());
        }

        let client = match self.redis_clients.get(storage) {
            Some(client) => client.value().clone(),
            None => {
                let url = self
                    .config
                    .redis_url(storage)
                    .ok_or_else(|| QueueError::InvalidRedisConnection(connection.to_string()))?;
                Client::open(url.as_str())
                    .map_err(|e| QueueError::InvalidRedisConnection(format!("{connection}: {e}")))?
            }
        };

        let manager = ConnectionManager::new(client.clone()).await?;
        info!("Connected to redis connection {} for queue connection {}", storage, connection);

        let handle = RedisHandle { client, manager };
        handles.insert(storage.to_string(), handle.clone());
        Ok(handle)
    }

    fn create_custom(&self, connection: &str) -> QueueResult<Arc<dyn QueueDriver>> {
        let via = self
            .config
            .via(connection)
            .ok_or_else(|| QueueError::DriverInvalid(connection.to_string()))?;

        let custom = self
            .custom
            .get(&via)
            .map(|c| c.value().clone())
            .ok_or_else(|| QueueError::DriverInvalid(via.clone()))?;

        match custom {
            CustomDriver::Instance(driver) => Ok(driver),
            CustomDriver::Factory(factory) => factory(connection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReservedJob, Task};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullDriver(String);

    #[async_trait]
    impl QueueDriver for NullDriver {
        fn connection(&self) -> &str {
            &self.0
        }

        fn driver_name(&self) -> &'static str {
            "null"
        }

        async fn push(&self, _task: &Task, _queue: &str) -> QueueResult<()> {
            Ok(())
        }

        async fn pop(&self, queue: &str) -> QueueResult<ReservedJob> {
            Err(QueueError::DriverNoJobFound(queue.to_string()))
        }

        async fn delete(&self, _queue: &str, _job: &ReservedJob) -> QueueResult<()> {
            Ok(())
        }

        async fn release(&self, _queue: &str, _job: &ReservedJob, _delay: Duration) -> QueueResult<()> {
            Ok(())
        }

        async fn size(&self, _queue: &str) -> QueueResult<u64> {
            Ok(0)
        }

        async fn clear(&self, _queue: &str) -> QueueResult<u64> {
            Ok(0)
        }
    }

    fn creator(config: QueueConfig) -> DriverCreator {
        DriverCreator::new(Arc::new(config), JobRegistry::new())
    }

    #[tokio::test]
    async fn test_sync_driver() {
        let creator = creator(QueueConfig::new().with("queue.connections.sync.driver", "sync"));
        let driver = creator.create("sync").await.unwrap();
        assert!(driver.is_sync());
        assert_eq!(driver.connection(), "sync");
    }

    #[tokio::test]
    async fn test_unconfigured_connection() {
        let creator = creator(QueueConfig::new());
        let err = creator.create("missing").await.err().unwrap();
        assert!(matches!(err, QueueError::ConnectionNotConfigured(ref c) if c == "missing"));
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let creator = creator(QueueConfig::new().with("queue.connections.x.driver", "beanstalkd"));
        let err = creator.create("x").await.err().unwrap();
        assert!(matches!(err, QueueError::DriverNotSupported(ref d) if d == "beanstalkd"));
    }

    #[tokio::test]
    async fn test_database_without_handle() {
        let creator = creator(QueueConfig::new().with("queue.connections.db.driver", "database"));
        let err = creator.create("db").await.err().unwrap();
        assert!(matches!(err, QueueError::InvalidDatabaseConnection(ref c) if c == "db"));
    }

    #[tokio::test]
    async fn test_redis_without_client() {
        let creator = creator(QueueConfig::new().with("queue.connections.r.driver", "redis"));
        let err = creator.create("r").await.err().unwrap();
        assert!(matches!(err, QueueError::InvalidRedisConnection(ref c) if c == "r"));
    }

    #[tokio::test]
    async fn test_custom_instance_and_factory() {
        let creator = creator(
            QueueConfig::new()
                .with("queue.connections.a.driver", "custom")
                .with("queue.connections.a.via", "shared")
                .with("queue.connections.b.driver", "custom")
                .with("queue.connections.b.via", "per_connection"),
        );
        creator.add_custom_driver("shared", CustomDriver::instance(NullDriver("shared".into())));
        creator.add_custom_driver(
            "per_connection",
            CustomDriver::factory(|connection| {
                Ok(Arc::new(NullDriver(connection.to_string())) as Arc<dyn QueueDriver>)
            }),
        );

        let a = creator.create("a").await.unwrap();
        assert_eq!(a.driver_name(), "null");
        assert_eq!(a.connection(), "shared");

        let b = creator.create("b").await.unwrap();
        assert_eq!(b.connection(), "b");
    }

    #[tokio::test]
    async fn test_custom_via_unregistered() {
        let creator = creator(
            QueueConfig::new()
                .with("queue.connections.a.driver", "custom")
                .with("queue.connections.a.via", "nope"),
        );
        let err = creator.create("a").await.err().unwrap();
        assert!(matches!(err, QueueError::DriverInvalid(ref v) if v == "nope"));

        let creator = creator_without_via();
        let err = creator.create("a").await.err().unwrap();
        assert!(matches!(err, QueueError::DriverInvalid(_)));
    }

    fn creator_without_via() -> DriverCreator {
        creator(QueueConfig::new().with("queue.connections.a.driver", "custom"))
    }
}
