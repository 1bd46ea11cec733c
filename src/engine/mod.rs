// ============================================================================
// In-memory SQL engine
// ============================================================================
//
// The execution backend sessions run statements against: a catalog of
// databases and tables plus a single-table SELECT evaluator. Transaction and
// database-selection statements are interpreted by the session itself.
//
// ============================================================================

pub mod ast;
pub mod catalog;
pub mod eval;
pub mod parser;

use crate::core::{DbError, Field, Result, Row, Value};
use crate::result::RecordSet;
use std::sync::Arc;

pub use ast::{ParsedStatement, Query, SelectItem, Statement, TableRef};
pub use catalog::{Catalog, Table};
pub use eval::EvalContext;
pub use parser::SqlParserAdapter;

pub struct Engine {
    catalog: Arc<Catalog>,
    parser: SqlParserAdapter,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            parser: SqlParserAdapter::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn parse(&self, sql: &str) -> Result<Vec<ParsedStatement>> {
        self.parser.parse(sql)
    }

    pub fn parse_one(&self, sql: &str) -> Result<ParsedStatement> {
        self.parser.parse_one(sql)
    }

    pub async fn create_database(&self, name: &str, if_not_exists: bool) -> Result<()> {
        self.catalog.create_database(name, if_not_exists).await?;
        Ok(())
    }

    /// Result columns a query will produce, without running it
    pub async fn describe(&self, query: &Query, current_db: Option<&str>) -> Result<Vec<Field>> {
        let columns = match &query.from {
            Some(table_ref) => {
                let database = resolve_database(table_ref, current_db)?;
                Some((table_ref, self.catalog.columns(database, &table_ref.table).await?))
            }
            None => None,
        };

        let mut fields = Vec::new();
        for item in &query.projection {
            match (item, &columns) {
                (SelectItem::Wildcard, Some((table_ref, cols))) => {
                    fields.extend(cols.iter().map(|c| Field::new(c.clone()).with_table(&table_ref.table)));
                }
                (SelectItem::Wildcard, None) => {
                    return Err(DbError::ExecutionError("No tables used".into()));
                }
                (SelectItem::Expr { expr, alias }, _) => fields.push(expr_field(expr, alias.as_deref(), query)),
            }
        }
        Ok(fields)
    }

    pub async fn run_query(&self, query: &Query, current_db: Option<&str>, params: &[Value]) -> Result<RecordSet> {
        let fields = self.describe(query, current_db).await?;

        let Some(table_ref) = &query.from else {
            let ctx = EvalContext::params_only(params);
            if let Some(selection) = &query.selection {
                if !eval::matches(selection, &ctx)? {
                    return Ok(RecordSet::new(fields, Vec::new()));
                }
            }
            let row = project(&query.projection, &ctx)?;
            let rows = apply_limit(vec![row], query.offset, query.limit);
            return Ok(RecordSet::new(fields, rows));
        };

        let database = resolve_database(table_ref, current_db)?;
        let table = self.catalog.snapshot(database, &table_ref.table).await?;

        let mut rows = Vec::new();
        for row in table.rows() {
            let ctx = EvalContext {
                table: Some(table.name()),
                columns: table.columns(),
                row,
                params,
            };
            if let Some(selection) = &query.selection {
                if !eval::matches(selection, &ctx)? {
                    continue;
                }
            }
            rows.push(project(&query.projection, &ctx)?);
        }

        Ok(RecordSet::new(fields, apply_limit(rows, query.offset, query.limit)))
    }
}

fn resolve_database<'a>(table_ref: &'a TableRef, current_db: Option<&'a str>) -> Result<&'a str> {
    table_ref
        .database
        .as_deref()
        .or(current_db)
        .ok_or_else(|| DbError::ExecutionError("No database selected".into()))
}

fn expr_field(expr: &ast::Expr, alias: Option<&str>, query: &Query) -> Field {
    match (alias, expr) {
        (Some(alias), _) => Field::new(alias),
        (None, ast::Expr::Column { name, .. }) => match &query.from {
            Some(table_ref) => Field::new(name.clone()).with_table(&table_ref.table),
            None => Field::new(name.clone()),
        },
        (None, expr) => Field::new(expr.to_string()),
    }
}

fn project(items: &[SelectItem], ctx: &EvalContext<'_>) -> Result<Row> {
    let mut row = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::Wildcard => row.extend(ctx.row.iter().cloned()),
            SelectItem::Expr { expr, .. } => row.push(eval::evaluate(expr, ctx)?),
        }
    }
    Ok(row)
}

fn apply_limit(rows: Vec<Row>, offset: Option<usize>, limit: Option<usize>) -> Vec<Row> {
    rows.into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_with_users() -> Engine {
        let catalog = Arc::new(Catalog::new());
        catalog.create_database("mysql", false).await.unwrap();
        catalog
            .create_table("mysql", "user", vec!["Host".into(), "User".into()])
            .await
            .unwrap();
        catalog
            .insert_rows(
                "mysql",
                "user",
                vec![
                    vec![Value::from("%"), Value::from("root")],
                    vec![Value::from("localhost"), Value::from("app")],
                ],
            )
            .await
            .unwrap();
        Engine::new(catalog)
    }

    fn query(engine: &Engine, sql: &str) -> Query {
        match engine.parse_one(sql).unwrap().stmt {
            Statement::Query(q) => q,
            other => panic!("expected query, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_select_without_from() {
        let engine = engine_with_users().await;
        let q = query(&engine, "select ? + 1, 'x' as name");
        let rs = engine.run_query(&q, None, &[Value::Integer(41)]).await.unwrap();

        assert_eq!(rs.column_names(), vec!["? + 1", "name"]);
        assert_eq!(rs.rows(), &[vec![Value::Integer(42), Value::from("x")]]);
    }

    #[tokio::test]
    async fn test_select_from_table_with_where_and_limit() {
        let engine = engine_with_users().await;

        let q = query(&engine, "select * from mysql.user limit 1");
        let rs = engine.run_query(&q, None, &[]).await.unwrap();
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.column_names(), vec!["Host", "User"]);

        let q = query(&engine, "select User from user where Host = 'localhost'");
        let rs = engine.run_query(&q, Some("mysql"), &[]).await.unwrap();
        assert_eq!(rs.scalar(), Some(&Value::from("app")));
    }

    #[tokio::test]
    async fn test_no_database_selected() {
        let engine = engine_with_users().await;
        let q = query(&engine, "select * from user");
        assert!(engine.run_query(&q, None, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_describe_wildcard_requires_table() {
        let engine = engine_with_users().await;
        let q = query(&engine, "select *");
        assert!(engine.describe(&q, None).await.is_err());
    }
}
