// ============================================================================
// Execution router
// ============================================================================
//
// Single entry point for running SQL on a session. Calls without arguments
// go straight to `execute`; calls with arguments are marshaled and run
// through prepare + execute-prepared so the compiled statement is reusable.
//
// ============================================================================

use super::{PreparedStmtInfo, Session, check_args};
use crate::core::Result;
use crate::result::RecordSet;
use std::any::Any;
use tracing::debug;

/// Runs `sql` on `se`, returning the first record set.
///
/// With arguments the statement is prepared, executed once and dropped again.
pub async fn exec(se: &mut Session, sql: &str, args: &[&dyn Any]) -> Result<Option<RecordSet>> {
    if args.is_empty() {
        return Ok(se.execute(sql).await?.into_iter().next());
    }

    let values = check_args(args)?;
    let info = se.prepare_stmt(sql).await?;
    debug!(conn_id = %se.conn_id(), stmt_id = info.id, "routing through prepared path");

    let result = se.execute_prepared_stmt(info.id, &values).await;
    se.drop_prepared_stmt(info.id)?;
    result.map(Some)
}

/// Compiles `sql` for repeated execution
pub async fn prepare(se: &mut Session, sql: &str) -> Result<PreparedStmtInfo> {
    se.prepare_stmt(sql).await
}

/// Runs a statement prepared on `se`, marshaling `args` first
pub async fn execute_prepared(se: &mut Session, stmt_id: u32, args: &[&dyn Any]) -> Result<RecordSet> {
    let values = check_args(args)?;
    se.execute_prepared_stmt(stmt_id, &values).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::core::{DbError, Value};
    use crate::privilege::{AuthManager, UserIdentity};
    use crate::session::bootstrap_session_with;
    use crate::store::MockStore;
    use std::sync::Arc;

    async fn session() -> (crate::session::Domain, Session) {
        let domain = bootstrap_session_with(
            Arc::new(MockStore::new()),
            Arc::new(AuthManager::with_cost(4)),
            SessionConfig::default(),
        )
        .await
        .unwrap();
        let mut se = domain.create_session();
        se.auth(UserIdentity::new("root", "%"), &[], &[]).await.unwrap();
        (domain, se)
    }

    #[tokio::test]
    async fn test_exec_without_args() {
        let (_domain, mut se) = session().await;
        let rs = exec(&mut se, "select 1 + 1", &[]).await.unwrap().unwrap();
        assert_eq!(rs.scalar(), Some(&Value::Integer(2)));

        assert!(exec(&mut se, "use test", &[]).await.unwrap().is_none());
        se.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_with_args_drops_statement() {
        let (_domain, mut se) = session().await;
        let rs = exec(&mut se, "select ? * 2", &[&21i32]).await.unwrap().unwrap();
        assert_eq!(rs.scalar(), Some(&Value::Integer(42)));
        assert_eq!(se.prepared_count(), 0);
        se.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_prepared_statement_is_reusable() {
        let (_domain, mut se) = session().await;
        let info = prepare(&mut se, "select ? + 1").await.unwrap();
        assert_eq!(info.param_count, 1);

        for n in [1i64, 41, -5] {
            let rs = execute_prepared(&mut se, info.id, &[&n]).await.unwrap();
            assert_eq!(rs.scalar(), Some(&Value::Integer(n + 1)));
        }

        let err = execute_prepared(&mut se, info.id, &[&vec![1u32]]).await.unwrap_err();
        assert!(matches!(err, DbError::UnsupportedArgType { position: 0 }));
        se.close().await.unwrap();
    }
}
