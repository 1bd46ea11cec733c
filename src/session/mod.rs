// ============================================================================
// Sessions
// ============================================================================
//
// A session is the unit of SQL execution state. It owns exactly one
// timestamp worker for its whole life and must stop it on close; sessions
// borrowed from the system pool are "restricted" and skip privilege checks.
//
// Mutating calls take `&mut self`: a session is used by one caller at a
// time. `exec_restricted_sql` only needs `&self` because the work happens
// on a pooled session, so many tasks may share one session for it.
//
// ============================================================================

pub mod args;
pub mod domain;
pub mod pool;
pub mod router;
pub mod tso;

use crate::config::SessionConfig;
use crate::core::{ConnectionId, DbError, Field, Result, Row, Value};
use crate::engine::{Engine, Statement};
use crate::privilege::{Permission, PrivilegeStore, UserIdentity};
use crate::result::RecordSet;
use crate::store::Storage;
use crate::util::{is_query, trim_sql};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub use args::check_args;
pub use domain::{Domain, bootstrap_session, bootstrap_session_with};
pub use pool::{PoolStats, SysSessionPool};
pub use tso::{TsoSettings, TsoWorker, WorkerGauge};

/// Name of the system schema; touching it requires `Admin`
pub const SYSTEM_SCHEMA: &str = "mysql";

/// State shared by every session of a domain
pub(crate) struct SessionShared {
    pub store: Arc<dyn Storage>,
    pub engine: Engine,
    pub privileges: Arc<dyn PrivilegeStore>,
    pub config: SessionConfig,
    pub gauge: WorkerGauge,
}

impl SessionShared {
    fn tso_settings(&self) -> TsoSettings {
        TsoSettings {
            refresh_interval: self.config.tso_refresh_interval,
            failure_threshold: self.config.tso_failure_threshold,
            stop_timeout: self.config.worker_stop_timeout,
        }
    }
}

struct PreparedStmt {
    stmt: Statement,
    param_count: usize,
}

/// Handle returned by [`Session::prepare_stmt`]
#[derive(Debug, Clone)]
pub struct PreparedStmtInfo {
    pub id: u32,
    pub fields: Vec<Field>,
    pub param_count: usize,
}

pub struct Session {
    conn_id: ConnectionId,
    shared: Arc<SessionShared>,
    identity: Option<UserIdentity>,
    permissions: Vec<Permission>,
    restricted: bool,
    worker: Arc<TsoWorker>,
    closed: Arc<AtomicBool>,
    /// Start timestamp of the explicit transaction, if one is open
    txn_start_ts: Option<u64>,
    prepared: HashMap<u32, PreparedStmt>,
    next_stmt_id: u32,
    current_db: Option<String>,
    warnings: Vec<String>,
    sys_pool: Weak<SysSessionPool>,
}

impl Session {
    /// Creates a session and starts its timestamp worker
    pub(crate) fn new(shared: Arc<SessionShared>, restricted: bool, sys_pool: Weak<SysSessionPool>) -> Self {
        let conn_id = ConnectionId::next();
        let worker = TsoWorker::spawn(
            conn_id,
            Arc::clone(&shared.store),
            shared.tso_settings(),
            &shared.gauge,
        );
        debug!(%conn_id, restricted, "session created");

        Self {
            conn_id,
            shared,
            identity: None,
            permissions: Vec::new(),
            restricted,
            worker: Arc::new(worker),
            closed: Arc::new(AtomicBool::new(false)),
            txn_start_ts: None,
            prepared: HashMap::new(),
            next_stmt_id: 1,
            current_db: None,
            warnings: Vec::new(),
            sys_pool,
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn_start_ts.is_some()
    }

    /// Start timestamp of the open explicit transaction
    pub fn txn_start_ts(&self) -> Option<u64> {
        self.txn_start_ts
    }

    /// Warnings raised by the last `execute`/`execute_prepared_stmt` call
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.len()
    }

    /// The system session pool of this session's domain, while it is alive
    pub fn sys_session_pool(&self) -> Option<Arc<SysSessionPool>> {
        self.sys_pool.upgrade()
    }

    pub(crate) fn worker(&self) -> &Arc<TsoWorker> {
        &self.worker
    }

    pub(crate) fn closed_flag(&self) -> &Arc<AtomicBool> {
        &self.closed
    }

    pub(crate) fn belongs_to(&self, pool: &Weak<SysSessionPool>) -> bool {
        self.restricted && Weak::ptr_eq(&self.sys_pool, pool)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DbError::SessionClosed);
        }
        Ok(())
    }

    /// Verifies `identity` against the privilege store.
    ///
    /// On failure the session keeps no identity at all.
    pub async fn auth(&mut self, identity: UserIdentity, salt: &[u8], auth_response: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.identity = None;
        self.permissions.clear();

        if !self.shared.privileges.verify(&identity, salt, auth_response).await {
            warn!(conn_id = %self.conn_id, user = %identity, "authentication failed");
            return Err(DbError::AuthFailed(identity.to_string()));
        }

        self.permissions = self.shared.privileges.privileges(&identity).await;
        debug!(conn_id = %self.conn_id, user = %identity, "authenticated");
        self.identity = Some(identity);
        Ok(())
    }

    /// Runs every statement in `sql`; each query yields one record set, in order
    pub async fn execute(&mut self, sql: &str) -> Result<Vec<RecordSet>> {
        self.ensure_open()?;
        self.warnings.clear();
        debug!(conn_id = %self.conn_id, sql = trim_sql(sql), query = is_query(sql), "execute");

        let parsed = self.shared.engine.parse(sql)?;
        let mut record_sets = Vec::new();
        for stmt in parsed {
            if stmt.param_count > 0 {
                return Err(DbError::ArgCountMismatch {
                    expected: stmt.param_count,
                    got: 0,
                });
            }
            if let Some(rs) = self.run_statement(&stmt.stmt, &[]).await? {
                record_sets.push(rs);
            }
        }
        Ok(record_sets)
    }

    /// Compiles a single statement with `?` placeholders
    pub async fn prepare_stmt(&mut self, sql: &str) -> Result<PreparedStmtInfo> {
        self.ensure_open()?;

        let parsed = self.shared.engine.parse_one(sql)?;
        self.check_privilege(&parsed.stmt)?;

        let fields = match &parsed.stmt {
            Statement::Query(query) => {
                self.shared
                    .engine
                    .describe(query, self.current_db.as_deref())
                    .await?
            }
            _ => Vec::new(),
        };

        let id = self.next_stmt_id;
        self.next_stmt_id = self.next_stmt_id.wrapping_add(1).max(1);
        self.prepared.insert(
            id,
            PreparedStmt {
                stmt: parsed.stmt,
                param_count: parsed.param_count,
            },
        );

        Ok(PreparedStmtInfo {
            id,
            fields,
            param_count: parsed.param_count,
        })
    }

    /// Runs a prepared statement with positional arguments.
    ///
    /// Non-query statements return an empty record set.
    pub async fn execute_prepared_stmt(&mut self, id: u32, args: &[Value]) -> Result<RecordSet> {
        self.ensure_open()?;
        self.warnings.clear();

        let (stmt, param_count) = self
            .prepared
            .get(&id)
            .map(|p| (p.stmt.clone(), p.param_count))
            .ok_or(DbError::UnknownStatement(id))?;

        if args.len() != param_count {
            return Err(DbError::ArgCountMismatch {
                expected: param_count,
                got: args.len(),
            });
        }

        Ok(self
            .run_statement(&stmt, args)
            .await?
            .unwrap_or_else(RecordSet::empty))
    }

    pub fn drop_prepared_stmt(&mut self, id: u32) -> Result<()> {
        self.ensure_open()?;
        self.prepared
            .remove(&id)
            .map(|_| ())
            .ok_or(DbError::UnknownStatement(id))
    }

    /// Runs internal SQL on a session borrowed from the system pool, bypassing
    /// privilege checks. Returns the rows and fields of the first result.
    ///
    /// Never pass user input here.
    pub async fn exec_restricted_sql(&self, sql: &str) -> Result<(Vec<Row>, Vec<Field>)> {
        self.ensure_open()?;
        let pool = self.sys_pool.upgrade().ok_or(DbError::PoolClosed)?;

        let mut se = pool.get().await?;
        let result = se.execute(sql).await;
        pool.put(se).await?;

        Ok(result?
            .into_iter()
            .next()
            .map(RecordSet::into_parts)
            .unwrap_or_default())
    }

    /// Rolls back, drops prepared statements and stops the timestamp worker.
    ///
    /// Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        let was_closed = self.closed.swap(true, Ordering::SeqCst);
        if self.txn_start_ts.take().is_some() {
            debug!(conn_id = %self.conn_id, "rolled back open transaction on close");
        }
        self.prepared.clear();
        self.worker.stop().await?;

        if !was_closed {
            debug!(conn_id = %self.conn_id, "session closed");
        }
        Ok(())
    }

    /// Clears per-use state before the session goes back to the idle set
    pub(crate) fn reset(&mut self) {
        if self.txn_start_ts.take().is_some() {
            debug!(conn_id = %self.conn_id, "rolled back transaction of returned session");
        }
        self.prepared.clear();
        self.current_db = None;
        self.warnings.clear();
    }

    async fn run_statement(&mut self, stmt: &Statement, params: &[Value]) -> Result<Option<RecordSet>> {
        self.check_privilege(stmt)?;

        match stmt {
            Statement::Query(query) => {
                // Autocommit queries run in an implicit transaction of their own
                if self.txn_start_ts.is_none() {
                    self.acquire_timestamp().await?;
                }
                let rs = self
                    .shared
                    .engine
                    .run_query(query, self.current_db.as_deref(), params)
                    .await?;
                Ok(Some(rs))
            }
            Statement::CreateDatabase { name, if_not_exists } => {
                self.shared.engine.create_database(name, *if_not_exists).await?;
                Ok(None)
            }
            Statement::Use(name) => {
                if !self.shared.engine.catalog().database_exists(name).await {
                    return Err(DbError::DatabaseNotFound(name.clone()));
                }
                self.current_db = Some(name.clone());
                Ok(None)
            }
            Statement::Begin => {
                // BEGIN inside a transaction starts a new one with a fresh start timestamp
                let start_ts = self.acquire_timestamp().await?;
                self.txn_start_ts = Some(start_ts);
                debug!(conn_id = %self.conn_id, start_ts, "transaction started");
                Ok(None)
            }
            Statement::Commit | Statement::Rollback => {
                self.txn_start_ts = None;
                Ok(None)
            }
        }
    }

    /// Takes the prefetched timestamp, or fetches one directly within the
    /// configured timeout. A degraded worker is reported as a warning.
    async fn acquire_timestamp(&mut self) -> Result<u64> {
        if self.worker.is_degraded() {
            let cause = self.worker.last_error().unwrap_or_else(|| "unknown error".into());
            let warning = format!("timestamp prefetch degraded: {}", cause);
            if !self.warnings.contains(&warning) {
                warn!(conn_id = %self.conn_id, %cause, "timestamp prefetch degraded");
                self.warnings.push(warning);
            }
        }

        if let Some(ts) = self.worker.take() {
            return Ok(ts);
        }

        let timeout = self.shared.config.tso_fetch_timeout;
        tokio::time::timeout(timeout, self.shared.store.current_timestamp())
            .await
            .map_err(|_| DbError::Backend(format!("timestamp fetch timed out after {:?}", timeout)))?
    }

    fn check_privilege(&self, stmt: &Statement) -> Result<()> {
        if self.restricted {
            return Ok(());
        }

        let Some(identity) = &self.identity else {
            return Err(DbError::AccessDenied("session is not authenticated".into()));
        };

        let required = match stmt {
            Statement::Query(_) => Some(Permission::Select),
            Statement::CreateDatabase { .. } => Some(Permission::Create),
            _ => None,
        };

        let database = match stmt {
            Statement::Query(q) if q.from.is_some() => {
                stmt.explicit_database().or(self.current_db.as_deref())
            }
            _ => stmt.explicit_database(),
        };
        let touches_system = database.is_some_and(|db| db.eq_ignore_ascii_case(SYSTEM_SCHEMA));

        let is_admin = self.permissions.contains(&Permission::Admin);
        let allowed = is_admin
            || (!touches_system && required.is_none_or(|p| self.permissions.contains(&p)));

        if !allowed {
            return Err(DbError::AccessDenied(format!(
                "user '{}' lacks privilege for this statement",
                identity
            )));
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.worker.shutdown_now();
        if self.restricted
            && let Some(pool) = self.sys_pool.upgrade()
        {
            pool.untrack(self.conn_id);
        }
    }
}
