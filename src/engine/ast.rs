use crate::core::Value;
use std::fmt;

/// Root statement type
#[derive(Debug, Clone)]
pub enum Statement {
    Query(Query),
    CreateDatabase { name: String, if_not_exists: bool },
    Use(String),
    Begin,
    Commit,
    Rollback,
}

impl Statement {
    pub fn is_query(&self) -> bool {
        matches!(self, Statement::Query(_))
    }

    /// Database named explicitly by the statement, if any
    pub fn explicit_database(&self) -> Option<&str> {
        match self {
            Statement::Query(q) => q.from.as_ref().and_then(|t| t.database.as_deref()),
            Statement::CreateDatabase { name, .. } => Some(name),
            Statement::Use(name) => Some(name),
            _ => None,
        }
    }
}

/// Parsed statement together with the number of `?` placeholders it holds
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub stmt: Statement,
    pub param_count: usize,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub projection: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub selection: Option<Expr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum SelectItem {
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
}

/// `[database.]table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub database: Option<String>,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{}.{}", db, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// Positional placeholder, 0-based
    Param(usize),
    Column { table: Option<String>, name: String },
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    Negate(Box<Expr>),
    Not(Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        };
        f.write_str(s)
    }
}

/// Renders the expression the way it is used as a column heading
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Text(s)) => write!(f, "'{}'", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Param(_) => f.write_str("?"),
            Expr::Column { table: Some(t), name } => write!(f, "{}.{}", t, name),
            Expr::Column { table: None, name } => f.write_str(name),
            Expr::Binary { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Negate(e) => write!(f, "-{}", e),
            Expr::Not(e) => write!(f, "NOT {}", e),
            Expr::IsNull { expr, negated: false } => write!(f, "{} IS NULL", expr),
            Expr::IsNull { expr, negated: true } => write!(f, "{} IS NOT NULL", expr),
        }
    }
}
