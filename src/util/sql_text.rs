use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref QUERY_PREFIX: Regex =
        Regex::new(r"^(?i)(explain|select|show|execute|describe|desc|admin)\b").unwrap();
}

/// Strips surrounding whitespace and any leading `/* ... */` comments.
///
/// An unterminated comment is left as is.
pub fn trim_sql(sql: &str) -> &str {
    let mut sql = sql.trim();
    while sql.starts_with("/*") {
        match sql.find("*/") {
            Some(end) => sql = sql[end + 2..].trim_start(),
            None => break,
        }
    }
    sql
}

/// Whether `sql` is a statement that returns rows.
///
/// Leading comments and opening parentheses are skipped, so
/// `/*hint*/ (select 1)` counts as a query.
pub fn is_query(sql: &str) -> bool {
    let text = trim_sql(sql).trim_start_matches(|c: char| c == '(' || c.is_whitespace());
    QUERY_PREFIX.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_sql() {
        let cases = [
            ("/*comment*/ select 1; ", "select 1;"),
            ("/*comment*/ /*comment*/ select 1;", "select 1;"),
            ("select /*comment*/ 1 /*comment*/;", "select /*comment*/ 1 /*comment*/;"),
            ("/*comment select 1; ", "/*comment select 1;"),
        ];
        for (sql, expected) in cases {
            assert_eq!(trim_sql(sql), expected, "{}", sql);
        }
    }

    #[test]
    fn test_is_query() {
        let cases = [
            ("/*comment*/ select 1;", true),
            ("/*comment*/ /*comment*/ select 1;", true),
            ("select /*comment*/ 1 /*comment*/;", true),
            ("(select /*comment*/ 1 /*comment*/);", true),
            ("SHOW databases", true),
            ("insert into t values (1)", false),
            ("selection", false),
            ("begin", false),
        ];
        for (sql, expected) in cases {
            assert_eq!(is_query(sql), expected, "{}", sql);
        }
    }
}
