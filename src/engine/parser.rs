// ============================================================================
// sqlparser adapter
// ============================================================================
//
// Converts the MySQL dialect AST into the engine's own statement tree.
// Placeholders are numbered left to right as they are converted, so the
// conversion order below follows the textual order of a SELECT.
//
// ============================================================================

use super::ast::*;
use crate::core::{DbError, Result, Value};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

pub struct SqlParserAdapter {
    dialect: MySqlDialect,
}

impl SqlParserAdapter {
    pub fn new() -> Self {
        Self {
            dialect: MySqlDialect {},
        }
    }

    /// Parses zero or more `;`-separated statements
    pub fn parse(&self, sql: &str) -> Result<Vec<ParsedStatement>> {
        let external_stmts =
            Parser::parse_sql(&self.dialect, sql).map_err(|e| DbError::ParseError(e.to_string()))?;

        external_stmts
            .into_iter()
            .map(|stmt| {
                let mut params = 0;
                let stmt = self.convert_statement(stmt, &mut params)?;
                Ok(ParsedStatement {
                    stmt,
                    param_count: params,
                })
            })
            .collect()
    }

    /// Parses exactly one statement
    pub fn parse_one(&self, sql: &str) -> Result<ParsedStatement> {
        let mut stmts = self.parse(sql)?;
        if stmts.len() != 1 {
            return Err(DbError::ParseError(format!(
                "expected exactly one statement, got {}",
                stmts.len()
            )));
        }
        Ok(stmts.remove(0))
    }

    fn convert_statement(&self, stmt: sql_ast::Statement, params: &mut usize) -> Result<Statement> {
        match stmt {
            sql_ast::Statement::Query(query) => Ok(Statement::Query(self.convert_query(*query, params)?)),
            sql_ast::Statement::CreateDatabase {
                db_name,
                if_not_exists,
                ..
            } => Ok(Statement::CreateDatabase {
                name: object_name(&db_name)?,
                if_not_exists,
            }),
            sql_ast::Statement::Use(use_stmt) => match use_stmt {
                sql_ast::Use::Object(name) | sql_ast::Use::Database(name) | sql_ast::Use::Schema(name) => {
                    Ok(Statement::Use(object_name(&name)?))
                }
                other => Err(DbError::UnsupportedOperation(format!(
                    "Unsupported USE form: {:?}",
                    other
                ))),
            },
            sql_ast::Statement::StartTransaction { .. } => Ok(Statement::Begin),
            sql_ast::Statement::Commit { .. } => Ok(Statement::Commit),
            sql_ast::Statement::Rollback { .. } => Ok(Statement::Rollback),
            _ => Err(DbError::UnsupportedOperation(format!(
                "Statement type not supported: {}",
                stmt
            ))),
        }
    }

    fn convert_query(&self, query: sql_ast::Query, params: &mut usize) -> Result<Query> {
        if query.order_by.is_some() {
            return Err(DbError::UnsupportedOperation("ORDER BY is not supported".into()));
        }

        let select = match *query.body {
            sql_ast::SetExpr::Select(select) => select,
            _ => {
                return Err(DbError::UnsupportedOperation(
                    "Only simple SELECT queries are supported".into(),
                ));
            }
        };

        let grouped = !matches!(&select.group_by, sql_ast::GroupByExpr::Expressions(exprs, _) if exprs.is_empty());
        if grouped {
            return Err(DbError::UnsupportedOperation("GROUP BY is not supported".into()));
        }

        if select.having.is_some() || select.distinct.is_some() {
            return Err(DbError::UnsupportedOperation(
                "DISTINCT and HAVING are not supported".into(),
            ));
        }

        let projection = select
            .projection
            .into_iter()
            .map(|item| self.convert_select_item(item, params))
            .collect::<Result<Vec<_>>>()?;

        let from = match select.from.len() {
            0 => None,
            1 => {
                let table = select.from.into_iter().next().map(|t| (t.relation, t.joins));
                match table {
                    Some((relation, joins)) if joins.is_empty() => Some(self.convert_table_factor(relation)?),
                    _ => return Err(DbError::UnsupportedOperation("JOIN is not supported".into())),
                }
            }
            _ => return Err(DbError::UnsupportedOperation("Only a single table is supported".into())),
        };

        let selection = select
            .selection
            .map(|expr| self.convert_expr(expr, params))
            .transpose()?;

        let (limit, offset) = self.convert_limit_clause(query.limit_clause)?;

        Ok(Query {
            projection,
            from,
            selection,
            limit,
            offset,
        })
    }

    fn convert_select_item(&self, item: sql_ast::SelectItem, params: &mut usize) -> Result<SelectItem> {
        match item {
            sql_ast::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
            sql_ast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
                expr: self.convert_expr(expr, params)?,
                alias: None,
            }),
            sql_ast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
                expr: self.convert_expr(expr, params)?,
                alias: Some(alias.value),
            }),
            _ => Err(DbError::UnsupportedOperation(
                "Qualified wildcards are not supported".into(),
            )),
        }
    }

    fn convert_table_factor(&self, factor: sql_ast::TableFactor) -> Result<TableRef> {
        match factor {
            sql_ast::TableFactor::Table { name, .. } => {
                let parts = name
                    .0
                    .iter()
                    .map(|part| unquote(&part.to_string()))
                    .collect::<Vec<_>>();
                match parts.as_slice() {
                    [table] => Ok(TableRef {
                        database: None,
                        table: table.clone(),
                    }),
                    [database, table] => Ok(TableRef {
                        database: Some(database.clone()),
                        table: table.clone(),
                    }),
                    _ => Err(DbError::ParseError(format!("Invalid table name: {}", name))),
                }
            }
            _ => Err(DbError::UnsupportedOperation(
                "Complex table references not supported".into(),
            )),
        }
    }

    fn convert_expr(&self, expr: sql_ast::Expr, params: &mut usize) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Identifier(ident) => Ok(Expr::Column {
                table: None,
                name: ident.value,
            }),
            sql_ast::Expr::CompoundIdentifier(idents) => {
                let mut parts: Vec<String> = idents.into_iter().map(|i| i.value).collect();
                let name = parts
                    .pop()
                    .ok_or_else(|| DbError::ParseError("Empty identifier".into()))?;
                Ok(Expr::Column {
                    table: parts.pop(),
                    name,
                })
            }
            sql_ast::Expr::Value(val) => match val.value {
                sql_ast::Value::Placeholder(_) => {
                    let index = *params;
                    *params += 1;
                    Ok(Expr::Param(index))
                }
                other => Ok(Expr::Literal(convert_value(&other)?)),
            },
            sql_ast::Expr::Nested(inner) => self.convert_expr(*inner, params),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let inner = self.convert_expr(*expr, params)?;
                match op {
                    sql_ast::UnaryOperator::Minus => Ok(Expr::Negate(Box::new(inner))),
                    sql_ast::UnaryOperator::Plus => Ok(inner),
                    sql_ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(inner))),
                    other => Err(DbError::UnsupportedOperation(format!(
                        "Unsupported unary operator: {}",
                        other
                    ))),
                }
            }
            sql_ast::Expr::BinaryOp { left, op, right } => {
                let left = self.convert_expr(*left, params)?;
                let op = convert_binary_op(&op)?;
                let right = self.convert_expr(*right, params)?;
                Ok(Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                })
            }
            sql_ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner, params)?),
                negated: false,
            }),
            sql_ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert_expr(*inner, params)?),
                negated: true,
            }),
            other => Err(DbError::UnsupportedOperation(format!(
                "Unsupported expression: {}",
                other
            ))),
        }
    }

    fn convert_limit_clause(
        &self,
        limit_clause: Option<sql_ast::LimitClause>,
    ) -> Result<(Option<usize>, Option<usize>)> {
        let Some(clause) = limit_clause else {
            return Ok((None, None));
        };

        match clause {
            sql_ast::LimitClause::LimitOffset { limit, offset, .. } => {
                let limit = limit.as_ref().map(extract_number).transpose()?;
                let offset = offset.as_ref().map(|o| extract_number(&o.value)).transpose()?;
                Ok((limit, offset))
            }
            // MySQL style: LIMIT offset, limit
            sql_ast::LimitClause::OffsetCommaLimit { offset, limit } => {
                Ok((Some(extract_number(&limit)?), Some(extract_number(&offset)?)))
            }
        }
    }
}

impl Default for SqlParserAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_number(expr: &sql_ast::Expr) -> Result<usize> {
    match expr {
        sql_ast::Expr::Value(v) => match &v.value {
            sql_ast::Value::Number(n, _) => n
                .parse::<usize>()
                .map_err(|_| DbError::ParseError(format!("Invalid LIMIT value: {}", n))),
            other => Err(DbError::UnsupportedOperation(format!(
                "Only numeric LIMIT supported, got: {}",
                other
            ))),
        },
        other => Err(DbError::UnsupportedOperation(format!(
            "Only numeric LIMIT supported, got: {}",
            other
        ))),
    }
}

fn convert_value(val: &sql_ast::Value) -> Result<Value> {
    match val {
        sql_ast::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Integer(i))
            } else if let Ok(u) = n.parse::<u64>() {
                Ok(Value::Unsigned(u))
            } else if let Ok(f) = n.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(DbError::TypeMismatch(format!("Invalid number: {}", n)))
            }
        }
        sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
            Ok(Value::Text(s.clone()))
        }
        sql_ast::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        sql_ast::Value::Null => Ok(Value::Null),
        _ => Err(DbError::UnsupportedOperation(format!(
            "Unsupported value: {}",
            val
        ))),
    }
}

fn convert_binary_op(op: &sql_ast::BinaryOperator) -> Result<BinaryOp> {
    use sql_ast::BinaryOperator as SqlOp;

    match op {
        SqlOp::Plus => Ok(BinaryOp::Add),
        SqlOp::Minus => Ok(BinaryOp::Subtract),
        SqlOp::Multiply => Ok(BinaryOp::Multiply),
        SqlOp::Divide => Ok(BinaryOp::Divide),
        SqlOp::Modulo => Ok(BinaryOp::Modulo),

        SqlOp::Eq => Ok(BinaryOp::Eq),
        SqlOp::NotEq => Ok(BinaryOp::NotEq),
        SqlOp::Lt => Ok(BinaryOp::Lt),
        SqlOp::LtEq => Ok(BinaryOp::LtEq),
        SqlOp::Gt => Ok(BinaryOp::Gt),
        SqlOp::GtEq => Ok(BinaryOp::GtEq),

        SqlOp::And => Ok(BinaryOp::And),
        SqlOp::Or => Ok(BinaryOp::Or),

        _ => Err(DbError::UnsupportedOperation(format!(
            "Unsupported binary operator: {}",
            op
        ))),
    }
}

fn object_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|part| unquote(&part.to_string()))
        .ok_or_else(|| DbError::ParseError("Invalid object name".into()))
}

fn unquote(ident: &str) -> String {
    ident.trim_matches(|c| c == '`' || c == '"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_numbered_left_to_right() {
        let adapter = SqlParserAdapter::new();
        let parsed = adapter
            .parse_one("SELECT ? + 1, ? FROM t WHERE a = ? LIMIT 5")
            .unwrap();
        assert_eq!(parsed.param_count, 3);

        let Statement::Query(query) = parsed.stmt else {
            panic!("expected query");
        };
        let Some(Expr::Binary { op, .. }) = &query.selection else {
            panic!("expected binary where clause");
        };
        assert_eq!(*op, BinaryOp::Eq);
        assert!(matches!(
            &query.projection[1],
            SelectItem::Expr { expr: Expr::Param(1), .. }
        ));
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_qualified_table_and_comma_limit() {
        let adapter = SqlParserAdapter::new();
        let parsed = adapter.parse_one("select * from mysql.user limit 2, 1").unwrap();
        let Statement::Query(query) = parsed.stmt else {
            panic!("expected query");
        };
        assert_eq!(
            query.from,
            Some(TableRef {
                database: Some("mysql".into()),
                table: "user".into(),
            })
        );
        assert_eq!((query.limit, query.offset), (Some(1), Some(2)));
    }

    #[test]
    fn test_multi_statement_and_control() {
        let adapter = SqlParserAdapter::new();
        let stmts = adapter
            .parse("create database if not exists d1; use d1; begin; select 1; commit; rollback")
            .unwrap();
        assert_eq!(stmts.len(), 6);
        assert!(matches!(
            &stmts[0].stmt,
            Statement::CreateDatabase { name, if_not_exists: true } if name == "d1"
        ));
        assert!(matches!(&stmts[1].stmt, Statement::Use(db) if db == "d1"));
        assert!(matches!(stmts[2].stmt, Statement::Begin));
        assert!(stmts[3].stmt.is_query());
        assert!(matches!(stmts[4].stmt, Statement::Commit));
        assert!(matches!(stmts[5].stmt, Statement::Rollback));
    }

    #[test]
    fn test_parse_one_rejects_many() {
        let adapter = SqlParserAdapter::new();
        assert!(adapter.parse_one("select 1; select 2").is_err());
        assert!(adapter.parse_one("").is_err());
    }

    #[test]
    fn test_unsupported_statement() {
        let adapter = SqlParserAdapter::new();
        let err = adapter.parse("DROP TABLE t").unwrap_err();
        assert!(matches!(err, DbError::UnsupportedOperation(_)));
    }
}
