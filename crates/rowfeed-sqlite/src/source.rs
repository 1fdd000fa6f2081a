//! [`RecordSource`] over a SQLite message table.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use tracing::debug;

use rowfeed_core::{OrderBy, Predicate, RawRecord, RecordFilter, RecordSource, SourceError};

use crate::error::Error;
use crate::time::{from_store_time, to_store_time};

/// Default table name.
pub const DEFAULT_TABLE: &str = "message";

/// Default busy timeout while the writer holds the database lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const COLUMNS: &str =
    "ROWID, date, date_edited, date_retracted, date_delivered, date_read, is_from_me";

/// Record source reading a table with the message-store layout.
///
/// Expected columns: `ROWID`, `date`, `date_edited`, `date_retracted`,
/// `date_delivered`, `date_read` (all [store time](crate::time)) and
/// `is_from_me` (0/1). The table is never written.
#[derive(Clone)]
pub struct SqliteRecordSource {
    conn: Arc<Mutex<Connection>>,
    table: Arc<str>,
}

impl SqliteRecordSource {
    /// Open a database file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            table: Arc::from(DEFAULT_TABLE),
        }
    }

    /// Read from a different table.
    pub fn with_table(mut self, table: &str) -> Result<Self, Error> {
        if table.is_empty()
            || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            || table.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(Error::InvalidTable(table.to_string()));
        }
        self.table = Arc::from(table);
        Ok(self)
    }

    /// Get the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, Error> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&*conn.lock())).await?
    }
}

/// Build the arrival query for a filter.
pub fn arrival_query(table: &str, filter: &RecordFilter) -> (String, Vec<i64>) {
    let (mut clauses, mut params) = predicate_clauses(filter);

    if let Some(after) = filter.after {
        clauses.push("date >= ?".to_string());
        params.push(to_store_time(after));
    }

    let order = match filter.order_by {
        OrderBy::RowIdDesc => "ROWID DESC",
        OrderBy::CreatedAtDesc => "date DESC, ROWID DESC",
    };

    (select(table, &clauses, order), params)
}

/// Build the mutation query for a filter.
///
/// Matches rows whose edit, retraction, delivery or read timestamp falls
/// inside the window. Delivery and read changes are included because the
/// store touches them on the same rows; the classifier drops those rows.
pub fn mutation_query(table: &str, filter: &RecordFilter) -> (String, Vec<i64>) {
    let (mut clauses, mut params) = predicate_clauses(filter);

    if let Some(after) = filter.after {
        let at = to_store_time(after);
        clauses.push(
            "(date_edited >= ? OR date_retracted >= ? OR date_delivered >= ? OR date_read >= ?)"
                .to_string(),
        );
        params.extend([at; 4]);
    }

    (select(table, &clauses, "date DESC, ROWID DESC"), params)
}

fn predicate_clauses(filter: &RecordFilter) -> (Vec<String>, Vec<i64>) {
    let mut clauses = Vec::with_capacity(filter.predicates.len() + 1);
    let mut params = Vec::with_capacity(filter.predicates.len() + 4);

    for predicate in &filter.predicates {
        match predicate {
            Predicate::IsFromMe(value) => {
                clauses.push("is_from_me = ?".to_string());
                params.push(i64::from(*value));
            }
            Predicate::RowIdGreaterThan(id) => {
                clauses.push("ROWID > ?".to_string());
                params.push(i64::try_from(*id).unwrap_or(i64::MAX));
            }
        }
    }

    (clauses, params)
}

fn select(table: &str, clauses: &[String], order: &str) -> String {
    let mut sql = format!("SELECT {COLUMNS} FROM {table}");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(order);
    sql
}

fn query_records(conn: &Connection, sql: &str, params: Vec<i64>) -> Result<Vec<RawRecord>, Error> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params_from_iter(params), read_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row??);
    }
    Ok(records)
}

/// Map a row, deferring value errors so they surface as [`Error::InvalidRow`].
fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<RawRecord, Error>> {
    let rowid: i64 = row.get(0)?;
    let date: Option<i64> = row.get(1)?;
    let edited: Option<i64> = row.get(2)?;
    let retracted: Option<i64> = row.get(3)?;
    let delivered: Option<i64> = row.get(4)?;
    let read: Option<i64> = row.get(5)?;
    let is_from_me: i64 = row.get(6)?;

    let Ok(id) = u64::try_from(rowid) else {
        return Ok(Err(Error::InvalidRow(format!("negative ROWID {rowid}"))));
    };
    let Some(created_at) = from_store_time(date) else {
        return Ok(Err(Error::InvalidRow(format!("row {id} has no creation date"))));
    };

    Ok(Ok(RawRecord {
        id,
        created_at,
        edited_at: from_store_time(edited),
        retracted_at: from_store_time(retracted),
        delivered_at: from_store_time(delivered),
        read_at: from_store_time(read),
        is_from_me: is_from_me != 0,
    }))
}

#[async_trait]
impl RecordSource for SqliteRecordSource {
    async fn fetch_since(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError> {
        let (sql, params) = arrival_query(&self.table, filter);
        debug!(sql = %sql, params = ?params, "querying arrivals");
        Ok(self
            .with_conn(move |conn| query_records(conn, &sql, params))
            .await?)
    }

    async fn fetch_mutated(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError> {
        let (sql, params) = mutation_query(&self.table, filter);
        debug!(sql = %sql, params = ?params, "querying mutations");
        Ok(self
            .with_conn(move |conn| query_records(conn, &sql, params))
            .await?)
    }
}
