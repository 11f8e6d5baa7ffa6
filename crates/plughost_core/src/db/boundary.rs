//! Parameterized database surface exposed to extensions.
//!
//! # Responsibility
//! - Define the future-returning `query/get/run` contract.
//! - Bind JSON parameters positionally and return rows as JSON objects.
//!
//! # Invariants
//! - SQL failures surface as `Err`, never as empty results.
//! - Statements are always parameterized; values are never spliced into SQL.

use super::{DbError, DbResult, SharedConnection};
use futures::future::{self, BoxFuture, FutureExt};
use log::{debug, warn};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use std::sync::PoisonError;

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

pub type DbFuture<T> = BoxFuture<'static, DbResult<T>>;

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub changes: usize,
    pub last_insert_rowid: Option<i64>,
}

/// Database boundary handed unmodified to every extension context.
pub trait Database: Send + Sync {
    fn query(&self, sql: &str, params: &[Value]) -> DbFuture<Vec<Row>>;
    fn get(&self, sql: &str, params: &[Value]) -> DbFuture<Option<Row>>;
    fn run(&self, sql: &str, params: &[Value]) -> DbFuture<RunResult>;
}

/// SQLite-backed database boundary.
pub struct SqliteDatabase {
    conn: SharedConnection,
}

impl SqliteDatabase {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        op(&conn)
    }
}

impl Database for SqliteDatabase {
    fn query(&self, sql: &str, params: &[Value]) -> DbFuture<Vec<Row>> {
        let result = self.with_conn(|conn| read_rows(conn, sql, params, None));
        log_outcome("db_query", &result.as_ref().map(Vec::len));
        future::ready(result).boxed()
    }

    fn get(&self, sql: &str, params: &[Value]) -> DbFuture<Option<Row>> {
        let result = self
            .with_conn(|conn| read_rows(conn, sql, params, Some(1)))
            .map(|rows| rows.into_iter().next());
        log_outcome("db_get", &result.as_ref().map(|row| usize::from(row.is_some())));
        future::ready(result).boxed()
    }

    fn run(&self, sql: &str, params: &[Value]) -> DbFuture<RunResult> {
        let result = self.with_conn(|conn| {
            let changes = conn.execute(sql, params_from_iter(params.iter().map(to_sql_value)))?;
            let rowid = conn.last_insert_rowid();
            Ok(RunResult {
                changes,
                last_insert_rowid: (rowid != 0).then_some(rowid),
            })
        });
        log_outcome("db_run", &result.as_ref().map(|run| run.changes));
        future::ready(result).boxed()
    }
}

fn read_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    limit: Option<usize>,
) -> DbResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql_value)))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, name) in names.iter().enumerate() {
            record.insert(name.clone(), from_value_ref(row.get_ref(index)?)?);
        }
        out.push(record);
        if limit.is_some_and(|max| out.len() >= max) {
            break;
        }
    }
    Ok(out)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(int), _) => SqlValue::Integer(int),
            (None, Some(real)) => SqlValue::Real(real),
            (None, None) => SqlValue::Text(number.to_string()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> DbResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real)
            .map(Value::Number)
            .ok_or_else(|| DbError::InvalidData(format!("non-finite real value `{real}`")))?,
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
    })
}

fn log_outcome(event: &str, result: &Result<usize, &DbError>) {
    match result {
        Ok(count) => debug!("event={event} module=db status=ok count={count}"),
        Err(err) => warn!("event={event} module=db status=error error={err}"),
    }
}
