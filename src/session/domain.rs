use super::{Session, SessionShared, SysSessionPool, WorkerGauge, SYSTEM_SCHEMA};
use crate::config::SessionConfig;
use crate::core::{Result, Value};
use crate::engine::{Catalog, Engine};
use crate::privilege::{AuthManager, PrivilegeStore};
use crate::store::Storage;
use std::sync::Arc;
use tracing::info;

/// Database created for ad-hoc use at bootstrap
pub const TEST_DATABASE: &str = "test";

/// Per-store context: catalog, privileges, config and the system session pool.
///
/// The domain never closes the store; whoever opened it does.
pub struct Domain {
    shared: Arc<SessionShared>,
    sys_pool: Arc<SysSessionPool>,
}

impl Domain {
    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.shared.store
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.shared.engine.catalog()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Creates an unauthenticated user session. Must be called inside a tokio runtime.
    pub fn create_session(&self) -> Session {
        Session::new(Arc::clone(&self.shared), false, Arc::downgrade(&self.sys_pool))
    }

    pub fn sys_session_pool(&self) -> &Arc<SysSessionPool> {
        &self.sys_pool
    }

    /// Timestamp workers of this domain that are still running
    pub fn live_timestamp_workers(&self) -> usize {
        self.shared.gauge.live()
    }

    /// Closes the system session pool
    pub async fn close(&self) {
        self.sys_pool.close().await;
    }
}

/// Builds a domain over `store` with the default configuration and the
/// in-memory privilege store (`root@%`, no password).
pub async fn bootstrap_session(store: Arc<dyn Storage>) -> Result<Domain> {
    bootstrap_session_with(store, Arc::new(AuthManager::new()), SessionConfig::default()).await
}

/// Builds a domain and seeds the system schema and the `test` database
pub async fn bootstrap_session_with(
    store: Arc<dyn Storage>,
    privileges: Arc<dyn PrivilegeStore>,
    config: SessionConfig,
) -> Result<Domain> {
    config.validate()?;

    let catalog = Arc::new(Catalog::new());
    seed_catalog(&catalog).await?;

    let shared = Arc::new(SessionShared {
        store,
        engine: Engine::new(catalog),
        privileges,
        config,
        gauge: WorkerGauge::new(),
    });
    let sys_pool = SysSessionPool::new(Arc::clone(&shared));

    info!(store = shared.store.uuid(), "domain bootstrapped");
    Ok(Domain { shared, sys_pool })
}

async fn seed_catalog(catalog: &Catalog) -> Result<()> {
    catalog.create_database(SYSTEM_SCHEMA, true).await?;
    catalog
        .create_table(
            SYSTEM_SCHEMA,
            "user",
            vec![
                "Host".into(),
                "User".into(),
                "Select_priv".into(),
                "Super_priv".into(),
            ],
        )
        .await?;
    catalog
        .insert_rows(
            SYSTEM_SCHEMA,
            "user",
            vec![vec![
                Value::from("%"),
                Value::from(AuthManager::ROOT_USERNAME),
                Value::from("Y"),
                Value::from("Y"),
            ]],
        )
        .await?;
    catalog.create_database(TEST_DATABASE, true).await?;
    Ok(())
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("store", &self.shared.store.uuid())
            .field("live_timestamp_workers", &self.live_timestamp_workers())
            .finish()
    }
}
