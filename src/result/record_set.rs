use crate::core::{Field, Row, Value};
use std::fmt;

/// Rows produced by one query statement, in statement order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    fields: Vec<Field>,
    rows: Vec<Row>,
}

impl RecordSet {
    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn new(fields: Vec<Field>, rows: Vec<Row>) -> Self {
        Self { fields, rows }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn first_row(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// First column of the first row, the common shape of scalar queries
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Row>, Vec<Field>) {
        (self.rows, self.fields)
    }
}

impl fmt::Display for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return writeln!(f, "Empty result set");
        }

        let mut widths: Vec<usize> = self.fields.iter().map(|c| c.name.len()).collect();
        for row in &self.rows {
            for (i, value) in row.iter().enumerate().take(widths.len()) {
                widths[i] = widths[i].max(value.to_string().len());
            }
        }

        let header: Vec<String> = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{:width$}", col.name, width = widths[i]))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;

        let separator: String = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-");
        writeln!(f, "{}", separator)?;

        for row in &self.rows {
            let row_str: Vec<String> = row
                .iter()
                .enumerate()
                .take(widths.len())
                .map(|(i, val)| format!("{:width$}", val.to_string(), width = widths[i]))
                .collect();
            writeln!(f, "{}", row_str.join(" | "))?;
        }

        write!(f, "\n{} row(s)", self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_and_display() {
        let rs = RecordSet::new(vec![Field::new("? + 1")], vec![vec![Value::Integer(42)]]);
        assert_eq!(rs.scalar(), Some(&Value::Integer(42)));
        assert_eq!(rs.column_names(), vec!["? + 1"]);

        let rendered = rs.to_string();
        assert!(rendered.starts_with("? + 1"));
        assert!(rendered.ends_with("1 row(s)"));
    }

    #[test]
    fn test_empty() {
        let rs = RecordSet::empty();
        assert!(rs.is_empty());
        assert_eq!(rs.scalar(), None);
        assert_eq!(rs.to_string(), "Empty result set\n");
    }
}
