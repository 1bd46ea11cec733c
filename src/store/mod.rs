// ============================================================================
// Storage Backends
// ============================================================================
//
// Backends are registered by URI scheme and opened through the bounded
// retrier. An unknown scheme is a configuration error and fails on the first
// attempt; driver failures are treated as transient.
//
// ============================================================================

pub mod mock;

use crate::config::SessionConfig;
use crate::core::{DbError, Result};
use crate::util::{Attempt, RetryPolicy, run_with_retry};
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

pub use mock::{MockStore, MockStoreDriver};

/// Scheme the in-memory mock backend is registered under
pub const MEMORY_SCHEME: &str = "memory";

/// Default number of attempts when opening a store
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 3;

/// Default base interval between store open attempts
pub const DEFAULT_OPEN_INTERVAL: Duration = Duration::from_millis(500);

/// Handle to an opened storage backend.
///
/// Shared by every session built on it; only the component that opened it
/// may close it.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stable identifier of this store instance
    fn uuid(&self) -> &str;

    /// Issues a new global timestamp, strictly greater than every earlier one
    async fn current_timestamp(&self) -> Result<u64>;

    async fn close(&self) -> Result<()>;
}

/// Opens storage backends for one URI scheme
#[async_trait]
pub trait StoreDriver: Send + Sync {
    async fn open(&self, path: &str) -> Result<Arc<dyn Storage>>;
}

lazy_static! {
    static ref STORES: RwLock<HashMap<String, Arc<dyn StoreDriver>>> = {
        let mut drivers: HashMap<String, Arc<dyn StoreDriver>> = HashMap::new();
        drivers.insert(MEMORY_SCHEME.to_string(), Arc::new(MockStoreDriver));
        RwLock::new(drivers)
    };
}

/// Registers `driver` for `scheme`. Schemes are case-insensitive.
pub fn register_store(scheme: &str, driver: Arc<dyn StoreDriver>) -> Result<()> {
    let scheme = scheme.to_lowercase();
    let mut stores = STORES.write()?;
    if stores.contains_key(&scheme) {
        return Err(DbError::ExecutionError(format!(
            "store '{}' is already registered",
            scheme
        )));
    }
    debug!(%scheme, "registered store driver");
    stores.insert(scheme, driver);
    Ok(())
}

/// Removes the driver for `scheme`, returning whether one was registered
pub fn unregister_store(scheme: &str) -> bool {
    match STORES.write() {
        Ok(mut stores) => stores.remove(&scheme.to_lowercase()).is_some(),
        Err(_) => false,
    }
}

/// Registers `driver` until the returned guard is dropped
pub fn register_store_scoped(scheme: &str, driver: Arc<dyn StoreDriver>) -> Result<StoreRegistration> {
    register_store(scheme, driver)?;
    Ok(StoreRegistration {
        scheme: scheme.to_lowercase(),
    })
}

/// Keeps a scheme registered for the guard's lifetime
#[derive(Debug)]
pub struct StoreRegistration {
    scheme: String,
}

impl StoreRegistration {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl Drop for StoreRegistration {
    fn drop(&mut self) {
        unregister_store(&self.scheme);
    }
}

/// Splits `scheme://path` into its parts
pub fn parse_store_uri(uri: &str) -> Result<(String, &str)> {
    let (scheme, path) = uri
        .split_once("://")
        .ok_or_else(|| DbError::ParseError(format!("invalid store uri '{}': missing scheme", uri)))?;
    if scheme.is_empty() {
        return Err(DbError::ParseError(format!("invalid store uri '{}': empty scheme", uri)));
    }
    Ok((scheme.to_lowercase(), path))
}

fn lookup_driver(scheme: &str) -> Result<Arc<dyn StoreDriver>> {
    let stores = STORES.read()?;
    stores
        .get(scheme)
        .cloned()
        .ok_or_else(|| DbError::UnknownBackend(scheme.to_string()))
}

/// Opens `uri` with the default retry policy
pub async fn new_store(uri: &str) -> Result<Arc<dyn Storage>> {
    new_store_with_config(uri, &SessionConfig::default()).await
}

/// Opens `uri` with the store retry policy of `config`
pub async fn new_store_with_config(uri: &str, config: &SessionConfig) -> Result<Arc<dyn Storage>> {
    new_store_with_retry(uri, &config.store_retry).await
}

/// Opens `uri`, retrying transient driver failures according to `policy`
pub async fn new_store_with_retry(uri: &str, policy: &RetryPolicy) -> Result<Arc<dyn Storage>> {
    policy.validate()?;
    let (scheme, path) = parse_store_uri(uri)?;
    let driver = lookup_driver(&scheme)?;

    let store = run_with_retry(policy, || {
        let driver = Arc::clone(&driver);
        async move {
            driver.open(path).await.map_err(|err| {
                if err.is_retryable() {
                    Attempt::Retry(err)
                } else {
                    Attempt::Stop(err)
                }
            })
        }
    })
    .await?;

    info!(%scheme, uuid = store.uuid(), "store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingBrokenDriver {
        calls: AtomicU32,
    }

    #[async_trait]
    impl StoreDriver for CountingBrokenDriver {
        async fn open(&self, _path: &str) -> Result<Arc<dyn Storage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Backend("try again later".into()))
        }
    }

    #[test]
    fn test_parse_store_uri() {
        let (scheme, path) = parse_store_uri("Memory://test/db").unwrap();
        assert_eq!(scheme, "memory");
        assert_eq!(path, "test/db");

        assert!(parse_store_uri("no-scheme").is_err());
        assert!(parse_store_uri("://path").is_err());
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = new_store("memory://unit").await.unwrap();
        assert!(!store.uuid().is_empty());
        let a = store.current_timestamp().await.unwrap();
        let b = store.current_timestamp().await.unwrap();
        assert!(b > a);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_scheme_fails_fast() {
        let policy = RetryPolicy::linear(5, Duration::from_secs(10));
        let result = new_store_with_retry("nosuchstore://x", &policy).await;
        assert!(matches!(result, Err(DbError::UnknownBackend(s)) if s == "nosuchstore"));
    }

    #[tokio::test]
    async fn test_driver_error_is_retried() {
        let driver = Arc::new(CountingBrokenDriver {
            calls: AtomicU32::new(0),
        });
        let _guard = register_store_scoped("countingbroken", driver.clone()).unwrap();

        let policy = RetryPolicy::constant(4, Duration::from_millis(1));
        let err = new_store_with_retry("countingbroken://x", &policy).await.err().unwrap();

        assert_eq!(err.to_string(), "try again later");
        assert_eq!(driver.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_config_store_retry_sets_attempts() {
        let driver = Arc::new(CountingBrokenDriver {
            calls: AtomicU32::new(0),
        });
        let _guard = register_store_scoped("configbroken", driver.clone()).unwrap();

        let config = SessionConfig::new().store_retry(RetryPolicy::constant(2, Duration::from_millis(1)));
        let err = new_store_with_config("configbroken://x", &config).await.err().unwrap();

        assert_eq!(err.to_string(), "try again later");
        assert_eq!(driver.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_scoped_registration_unregisters() {
        {
            let guard = register_store_scoped("ScopedOnly", Arc::new(MockStoreDriver)).unwrap();
            assert_eq!(guard.scheme(), "scopedonly");
            assert!(register_store("scopedonly", Arc::new(MockStoreDriver)).is_err());
        }
        assert!(!unregister_store("scopedonly"));
    }
}
