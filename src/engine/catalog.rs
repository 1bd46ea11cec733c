use crate::core::{DbError, Result, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Column names and rows of one table
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Position of `column`, matched case-insensitively
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))
    }

    fn insert(&mut self, row: Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' expects {} values, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Database {
    tables: HashMap<String, Table>,
}

/// Databases and their tables. Names are case-insensitive.
#[derive(Debug, Default)]
pub struct Catalog {
    databases: RwLock<HashMap<String, Database>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `name`; returns false when it already existed and `if_not_exists` is set
    pub async fn create_database(&self, name: &str, if_not_exists: bool) -> Result<bool> {
        let key = name.to_lowercase();
        let mut databases = self.databases.write().await;
        if databases.contains_key(&key) {
            if if_not_exists {
                return Ok(false);
            }
            return Err(DbError::DatabaseExists(name.to_string()));
        }
        databases.insert(key, Database::default());
        debug!(database = %name, "database created");
        Ok(true)
    }

    pub async fn database_exists(&self, name: &str) -> bool {
        self.databases.read().await.contains_key(&name.to_lowercase())
    }

    pub async fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn create_table(&self, database: &str, table: &str, columns: Vec<String>) -> Result<()> {
        let mut databases = self.databases.write().await;
        let db = databases
            .get_mut(&database.to_lowercase())
            .ok_or_else(|| DbError::DatabaseNotFound(database.to_string()))?;

        let key = table.to_lowercase();
        if db.tables.contains_key(&key) {
            return Err(DbError::ExecutionError(format!(
                "Table '{}.{}' already exists",
                database, table
            )));
        }
        db.tables.insert(key, Table::new(table, columns));
        Ok(())
    }

    pub async fn insert_rows(&self, database: &str, table: &str, rows: Vec<Row>) -> Result<usize> {
        let mut databases = self.databases.write().await;
        let tbl = databases
            .get_mut(&database.to_lowercase())
            .ok_or_else(|| DbError::DatabaseNotFound(database.to_string()))?
            .tables
            .get_mut(&table.to_lowercase())
            .ok_or_else(|| DbError::TableNotFound(format!("{}.{}", database, table)))?;

        let count = rows.len();
        for row in rows {
            tbl.insert(row)?;
        }
        Ok(count)
    }

    /// Copy of the table's current contents
    pub async fn snapshot(&self, database: &str, table: &str) -> Result<Table> {
        let databases = self.databases.read().await;
        databases
            .get(&database.to_lowercase())
            .ok_or_else(|| DbError::DatabaseNotFound(database.to_string()))?
            .tables
            .get(&table.to_lowercase())
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(format!("{}.{}", database, table)))
    }

    /// Column names of a table
    pub async fn columns(&self, database: &str, table: &str) -> Result<Vec<String>> {
        let databases = self.databases.read().await;
        databases
            .get(&database.to_lowercase())
            .ok_or_else(|| DbError::DatabaseNotFound(database.to_string()))?
            .tables
            .get(&table.to_lowercase())
            .map(|t| t.columns.clone())
            .ok_or_else(|| DbError::TableNotFound(format!("{}.{}", database, table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    #[tokio::test]
    async fn test_create_database() {
        let catalog = Catalog::new();
        assert!(catalog.create_database("Shop", false).await.unwrap());
        assert!(catalog.database_exists("shop").await);
        assert!(!catalog.create_database("shop", true).await.unwrap());
        assert!(matches!(
            catalog.create_database("SHOP", false).await,
            Err(DbError::DatabaseExists(_))
        ));
    }

    #[tokio::test]
    async fn test_tables_and_rows() {
        let catalog = Catalog::new();
        catalog.create_database("mysql", false).await.unwrap();
        catalog
            .create_table("mysql", "user", vec!["Host".into(), "User".into()])
            .await
            .unwrap();
        catalog
            .insert_rows("mysql", "user", vec![vec![Value::from("%"), Value::from("root")]])
            .await
            .unwrap();

        let table = catalog.snapshot("mysql", "USER").await.unwrap();
        assert_eq!(table.rows().len(), 1);
        assert_eq!(table.column_index("user"), Some(1));

        let bad_row = catalog
            .insert_rows("mysql", "user", vec![vec![Value::Null]])
            .await;
        assert!(bad_row.is_err());
        assert!(matches!(
            catalog.snapshot("mysql", "missing").await,
            Err(DbError::TableNotFound(_))
        ));
    }
}
