use super::{Session, SessionShared, TsoWorker};
use crate::core::{ConnectionId, DbError, Result};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Bookkeeping for a session that is currently handed out
struct Tracked {
    worker: Arc<TsoWorker>,
    closed: Arc<AtomicBool>,
}

impl Tracked {
    fn of(session: &Session) -> Self {
        Self {
            worker: Arc::clone(session.worker()),
            closed: Arc::clone(session.closed_flag()),
        }
    }
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Session>,
    closed: bool,
    created: u64,
}

/// Pool of restricted sessions for the engine's own SQL.
///
/// Every session handed out is tracked until it comes back or is dropped, so
/// `close` can stop the timestamp worker of each one, idle or not. The locks
/// only guard membership; SQL runs and sessions close outside of them.
///
/// Lock order is `state` then `in_use`. `in_use` is a sync mutex because a
/// dropped session untracks itself from `Drop`.
pub struct SysSessionPool {
    shared: Arc<SessionShared>,
    state: Mutex<PoolState>,
    in_use: SyncMutex<HashMap<ConnectionId, Tracked>>,
    closed: AtomicBool,
    capacity: usize,
    self_ref: Weak<SysSessionPool>,
}

impl SysSessionPool {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Arc<Self> {
        let capacity = shared.config.sys_pool_capacity;
        Arc::new_cyclic(|self_ref| Self {
            shared,
            state: Mutex::new(PoolState::default()),
            in_use: SyncMutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            capacity,
            self_ref: self_ref.clone(),
        })
    }

    /// Borrows an idle session or creates a new one
    pub async fn get(&self) -> Result<Session> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(DbError::PoolClosed);
            }
            if let Some(session) = state.idle.pop_front() {
                self.in_use.lock()?.insert(session.conn_id(), Tracked::of(&session));
                return Ok(session);
            }
        }

        let mut session = Session::new(Arc::clone(&self.shared), true, self.self_ref.clone());

        let mut state = self.state.lock().await;
        if state.closed {
            drop(state);
            session.close().await?;
            return Err(DbError::PoolClosed);
        }
        state.created += 1;
        self.in_use.lock()?.insert(session.conn_id(), Tracked::of(&session));
        Ok(session)
    }

    /// Returns a session borrowed from this pool.
    ///
    /// Sessions that are closed, arrive after `close`, or overflow the idle
    /// set are closed instead of kept.
    pub async fn put(&self, mut session: Session) -> Result<()> {
        if !session.belongs_to(&self.self_ref) {
            return Err(DbError::ExecutionError(format!(
                "session {} does not belong to this pool",
                session.conn_id()
            )));
        }

        session.reset();

        let mut state = self.state.lock().await;
        let tracked = self.in_use.lock()?.remove(&session.conn_id()).is_some();
        let keep = tracked && !state.closed && !session.is_closed() && state.idle.len() < self.capacity;
        if keep {
            state.idle.push_back(session);
            return Ok(());
        }
        drop(state);

        debug!(conn_id = %session.conn_id(), "retiring pooled session");
        session.close().await
    }

    /// Forgets a borrowed session that was dropped instead of returned
    pub(crate) fn untrack(&self, conn_id: ConnectionId) {
        if let Ok(mut in_use) = self.in_use.lock()
            && in_use.remove(&conn_id).is_some()
        {
            debug!(%conn_id, "pooled session dropped without being returned");
        }
    }

    /// Closes every idle session and stops the worker of every session still
    /// handed out. Idempotent.
    pub async fn close(&self) {
        let (idle, in_use) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            self.closed.store(true, Ordering::SeqCst);
            let in_use = match self.in_use.lock() {
                Ok(mut in_use) => std::mem::take(&mut *in_use),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            (std::mem::take(&mut state.idle), in_use)
        };

        let idle_count = idle.len();
        let in_use_count = in_use.len();

        let idle_closes = idle.into_iter().map(|mut session| async move {
            if let Err(err) = session.close().await {
                warn!(conn_id = %session.conn_id(), error = %err, "failed to close pooled session");
            }
        });
        join_all(idle_closes).await;

        let in_use_stops = in_use.into_iter().map(|(conn_id, tracked)| async move {
            tracked.closed.store(true, Ordering::SeqCst);
            if let Err(err) = tracked.worker.stop().await {
                warn!(%conn_id, error = %err, "failed to stop timestamp worker");
            }
        });
        join_all(in_use_stops).await;

        info!(idle = idle_count, in_use = in_use_count, "system session pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let in_use = self.in_use.lock().map(|in_use| in_use.len()).unwrap_or(0);
        PoolStats {
            idle: state.idle.len(),
            in_use,
            created: state.created,
            capacity: self.capacity,
        }
    }
}

/// System session pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub capacity: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {} in use, {} idle, {} created, capacity {}",
            self.in_use, self.idle, self.created, self.capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SessionConfig;
    use crate::core::DbError;
    use crate::privilege::AuthManager;
    use crate::session::{Domain, bootstrap_session_with};
    use crate::store::MockStore;
    use std::sync::Arc;

    async fn domain(capacity: usize) -> Domain {
        let config = SessionConfig::new().sys_pool_capacity(capacity);
        bootstrap_session_with(Arc::new(MockStore::new()), Arc::new(AuthManager::with_cost(4)), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_put_reuses_sessions() {
        let domain = domain(4).await;
        let pool = domain.sys_session_pool();

        let se = pool.get().await.unwrap();
        let conn_id = se.conn_id();
        assert!(se.is_restricted());
        assert_eq!(pool.stats().await.in_use, 1);

        pool.put(se).await.unwrap();
        let stats = pool.stats().await;
        assert_eq!((stats.idle, stats.in_use, stats.created), (1, 0, 1));

        let se = pool.get().await.unwrap();
        assert_eq!(se.conn_id(), conn_id);
        pool.put(se).await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_put_beyond_capacity_closes_session() {
        let domain = domain(1).await;
        let pool = domain.sys_session_pool();

        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        pool.put(a).await.unwrap();
        pool.put(b).await.unwrap();

        assert_eq!(pool.stats().await.idle, 1);
        pool.close().await;
        assert_eq!(domain.live_timestamp_workers(), 0);
    }

    #[tokio::test]
    async fn test_foreign_session_is_rejected() {
        let domain = domain(4).await;
        let user_session = domain.create_session();
        let err = domain.sys_session_pool().put(user_session).await.unwrap_err();
        assert!(matches!(err, DbError::ExecutionError(_)));
        domain.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_in_use_sessions() {
        let domain = domain(4).await;
        let pool = domain.sys_session_pool();

        let mut borrowed = pool.get().await.unwrap();
        pool.close().await;

        assert!(borrowed.is_closed());
        assert!(matches!(borrowed.execute("select 1").await, Err(DbError::SessionClosed)));
        assert!(matches!(pool.get().await, Err(DbError::PoolClosed)));
        assert_eq!(domain.live_timestamp_workers(), 0);

        pool.put(borrowed).await.unwrap();
        pool.close().await;
        assert!(pool.is_closed());
    }
}
