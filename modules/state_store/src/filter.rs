//! Composable WHERE-clause builder emitting named parameters only
//!
//! Columns are validated against a strict identifier grammar and values are
//! always bound as parameters, so caller-supplied filters cannot inject SQL.

use crate::error::{StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::ToSql;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Cmp {
    fn sql(&self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::Ne => "<>",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
        }
    }
}

fn valid_column(name: &str) -> bool {
    !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A conjunction of column comparisons
#[derive(Debug, Default)]
pub struct Filter {
    clauses: Vec<(String, Cmp, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        mut self,
        column: impl Into<String>,
        cmp: Cmp,
        value: impl Into<Value>,
    ) -> StoreResult<Self> {
        let column = column.into();
        if !valid_column(&column) {
            return Err(StoreError::BadFilterColumn(column));
        }
        self.clauses.push((column, cmp, value.into()));
        Ok(self)
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> StoreResult<Self> {
        self.push(column, Cmp::Eq, value)
    }

    pub fn ge(self, column: impl Into<String>, value: impl Into<Value>) -> StoreResult<Self> {
        self.push(column, Cmp::Ge, value)
    }

    pub fn le(self, column: impl Into<String>, value: impl Into<Value>) -> StoreResult<Self> {
        self.push(column, Cmp::Le, value)
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render to `WHERE ...` text plus its named parameters
    pub fn render(&self) -> (String, Vec<(String, Value)>) {
        if self.clauses.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut sql = String::from(" WHERE ");
        let mut params = Vec::with_capacity(self.clauses.len());
        for (i, (column, cmp, value)) in self.clauses.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            let name = format!(":f{i}");
            sql.push_str(&format!("{column} {} {name}", cmp.sql()));
            params.push((name, value.clone()));
        }
        (sql, params)
    }

    /// Bindable view of rendered parameters
    pub fn bindings<'a>(params: &'a [(String, Value)]) -> Vec<(&'a str, &'a dyn ToSql)> {
        params.iter().map(|(n, v)| (n.as_str(), v as &dyn ToSql)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_conjunction_with_named_params() {
        let f = Filter::new().eq("level", 5i64).unwrap().ge("sender_id", 7i64).unwrap();
        let (sql, params) = f.render();
        assert_eq!(sql, " WHERE level = :f0 AND sender_id >= :f1");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0, ":f0");
        assert_eq!(params[0].1, Value::Integer(5));
    }

    #[test]
    fn empty_filter_renders_nothing() {
        let (sql, params) = Filter::new().render();
        assert!(sql.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn rejects_injection_in_column_names() {
        assert!(Filter::new().eq("level; DROP TABLE blocks", 1i64).is_err());
        assert!(Filter::new().eq("1=1 OR level", 1i64).is_err());
        assert!(Filter::new().eq("", 1i64).is_err());
    }

    #[test]
    fn values_are_parameters_not_text() {
        let f = Filter::new().eq("hash", "x' OR '1'='1".to_string()).unwrap();
        let (sql, params) = f.render();
        assert!(!sql.contains("OR '1'"));
        assert_eq!(params[0].1, Value::Text("x' OR '1'='1".into()));
    }
}
