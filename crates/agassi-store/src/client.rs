//! The query/execute/transact seam every store backend implements.

use std::future::Future;

use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::Value;

use crate::error::StoreResult;

/// Read consistency level, as understood by rqlite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// Read from the local node without any leader check. May be stale.
    None,
    /// Read through the node the local store believes is leader.
    #[default]
    Weak,
    /// Read through the Raft log. Always up to date, slowest.
    Strong,
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::None => "none",
            Consistency::Weak => "weak",
            Consistency::Strong => "strong",
        }
    }
}

/// A SQL statement with positional `?` parameters.
///
/// Serializes to rqlite's parameterized form: `["SELECT ... ?", p1, p2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

impl Serialize for Statement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.params.len()))?;
        seq.serialize_element(&self.sql)?;
        for param in &self.params {
            seq.serialize_element(param)?;
        }
        seq.end()
    }
}

/// One result row, column name → value.
pub type Row = serde_json::Map<String, Value>;

/// Rows returned by a query, plus the store-reported duration in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub time: Option<f64>,
}

/// Outcome of a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    pub time: Option<f64>,
}

/// Access to the replicated store.
///
/// Implementations must be cheap to clone and safe to share across tasks.
pub trait StoreClient: Clone + Send + Sync + 'static {
    /// Run a read-only statement at the given consistency level.
    fn query(
        &self,
        statement: Statement,
        consistency: Consistency,
    ) -> impl Future<Output = StoreResult<QueryResult>> + Send;

    /// Run a single write statement.
    fn execute(&self, statement: Statement) -> impl Future<Output = StoreResult<ExecuteResult>> + Send;

    /// Run several write statements atomically.
    fn transact(
        &self,
        statements: Vec<Statement>,
    ) -> impl Future<Output = StoreResult<ExecuteResult>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_serializes_as_parameterized_array() {
        let stmt = Statement::new("SELECT * FROM services WHERE id = ? AND port = ?")
            .bind("svc-1")
            .bind(Some(8443u16));
        let json = serde_json::to_string(&stmt).unwrap();
        assert_eq!(
            json,
            r#"["SELECT * FROM services WHERE id = ? AND port = ?","svc-1",8443]"#
        );
    }

    #[test]
    fn absent_parameters_bind_as_null() {
        let stmt = Statement::new("UPDATE services SET auth = ?").bind(None::<String>);
        assert_eq!(stmt.params(), &[Value::Null]);
    }

    #[test]
    fn default_consistency_is_weak() {
        assert_eq!(Consistency::default().as_str(), "weak");
    }
}
