//! In-process SQLite backend behind the `StoreClient` seam.
//!
//! rqlite is SQLite underneath, so the same statements run unchanged.
//! Used for tests and single-node development; consistency levels are
//! meaningless here and ignored.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use serde_json::Value;

use crate::client::{Consistency, ExecuteResult, QueryResult, Row, Statement, StoreClient};
use crate::error::{StoreError, StoreResult};

/// Convert any `Display` error into a `StoreError::Statement`.
macro_rules! stmt_err {
    () => {
        |e| StoreError::Statement(e.to_string())
    };
}

/// SQLite-backed store client.
#[derive(Clone)]
pub struct SqliteClient {
    conn: Arc<Mutex<Connection>>,
    writes: Arc<AtomicUsize>,
}

impl SqliteClient {
    /// Open an ephemeral in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            writes: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of write calls (`execute` + `transact`) served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection poisoned".to_string()))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

fn run(conn: &Connection, statement: &Statement) -> StoreResult<u64> {
    let params = statement.params().iter().map(to_sql);
    let affected = conn
        .execute(statement.sql(), params_from_iter(params))
        .map_err(stmt_err!())?;
    Ok(affected as u64)
}

impl StoreClient for SqliteClient {
    async fn query(&self, statement: Statement, _consistency: Consistency) -> StoreResult<QueryResult> {
        let started = Instant::now();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(statement.sql()).map_err(stmt_err!())?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let params = statement.params().iter().map(to_sql);
        let mut rows = stmt.query(params_from_iter(params)).map_err(stmt_err!())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(stmt_err!())? {
            let mut map = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                map.insert(column.clone(), from_sql(row.get_ref(idx).map_err(stmt_err!())?));
            }
            out.push(map);
        }

        Ok(QueryResult {
            rows: out,
            time: Some(started.elapsed().as_secs_f64()),
        })
    }

    async fn execute(&self, statement: Statement) -> StoreResult<ExecuteResult> {
        let started = Instant::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        let conn = self.lock()?;
        let rows_affected = run(&conn, &statement)?;
        Ok(ExecuteResult {
            rows_affected,
            time: Some(started.elapsed().as_secs_f64()),
        })
    }

    async fn transact(&self, statements: Vec<Statement>) -> StoreResult<ExecuteResult> {
        let started = Instant::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut conn = self.lock()?;
        let txn = conn.transaction().map_err(stmt_err!())?;
        let mut rows_affected = 0;
        for statement in &statements {
            rows_affected += run(&txn, statement)?;
        }
        txn.commit().map_err(stmt_err!())?;
        Ok(ExecuteResult {
            rows_affected,
            time: Some(started.elapsed().as_secs_f64()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let client = SqliteClient::open_in_memory().unwrap();
        client
            .execute(Statement::new("CREATE TABLE t (id TEXT PRIMARY KEY)"))
            .await
            .unwrap();

        let err = client
            .transact(vec![
                Statement::new("INSERT INTO t (id) VALUES (?)").bind("a"),
                Statement::new("INSERT INTO t (id) VALUES (?)").bind("a"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Statement(_)));

        let rows = client
            .query(Statement::new("SELECT id FROM t"), Consistency::Strong)
            .await
            .unwrap()
            .rows;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn blobs_come_back_as_hex() {
        let client = SqliteClient::open_in_memory().unwrap();
        let rows = client
            .query(Statement::new("SELECT X'00ff10' AS b"), Consistency::None)
            .await
            .unwrap()
            .rows;
        assert_eq!(rows[0]["b"], "00ff10");
    }

    #[tokio::test]
    async fn counts_writes_not_reads() {
        let client = SqliteClient::open_in_memory().unwrap();
        client
            .execute(Statement::new("CREATE TABLE t (n INTEGER)"))
            .await
            .unwrap();
        client
            .query(Statement::new("SELECT n FROM t"), Consistency::None)
            .await
            .unwrap();
        assert_eq!(client.writes(), 1);
    }
}
