// ============================================================================
// sqlsession Library
// ============================================================================
//
// Session-management core of a distributed SQL engine: backend connection
// with bounded retry, per-session timestamp prefetching, the system session
// pool and the execute / prepare + execute-prepared router.
//
// ============================================================================

pub mod binlog;
pub mod config;
pub mod core;
pub mod engine;
pub mod privilege;
pub mod result;
pub mod session;
pub mod store;
pub mod util;

// Re-export main types for convenience
pub use core::{ConnectionId, DbError, Field, Result, Row, Value};
pub use result::RecordSet;

pub use binlog::{PumpClient, PumpDialer, PumpTransport, TcpPumpDialer, dial_pump_client, dial_pump_client_with_retry};
pub use config::SessionConfig;
pub use privilege::{AuthManager, Permission, PrivilegeStore, User, UserIdentity};
pub use session::{
    Domain, PoolStats, PreparedStmtInfo, Session, SysSessionPool, bootstrap_session, bootstrap_session_with,
    check_args, router,
};
pub use store::{
    MockStore, Storage, StoreDriver, new_store, new_store_with_config, new_store_with_retry, register_store, register_store_scoped,
    unregister_store,
};
pub use util::{Attempt, Backoff, RetryPolicy, is_query, run_with_retry, trim_sql};
