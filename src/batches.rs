use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::timestamp;
use crate::error::{ImportError, Result};
use crate::pool::Pool;

/// What every audit row says about the attempt, whatever its outcome.
#[derive(Debug, Clone)]
pub struct BatchInfo<'a> {
    pub file_name: &'a str,
    pub checksum: Option<&'a str>,
    pub period_id: Option<i64>,
    pub pay_date: NaiveDate,
    pub sign_policy_applied: bool,
    pub imported_by: &'a str,
}

/// Records a successful import. Runs inside the import transaction.
pub fn record_success(conn: &Connection, info: &BatchInfo<'_>, rows_count: usize, now: NaiveDateTime) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_batches (file_name, checksum, period_id, pay_date, rows_count, status, sign_policy_applied, imported_by, imported_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'success', ?6, ?7, ?8)",
        rusqlite::params![
            info.file_name,
            info.checksum,
            info.period_id,
            info.pay_date.format("%Y-%m-%d").to_string(),
            rows_count as i64,
            info.sign_policy_applied,
            info.imported_by,
            timestamp(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_failure(conn: &Connection, info: &BatchInfo<'_>, err: &ImportError, now: NaiveDateTime) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_batches (file_name, checksum, period_id, pay_date, rows_count, status, error_code, error_message, sign_policy_applied, imported_by, imported_at)
         VALUES (?1, ?2, ?3, ?4, 0, 'error', ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            info.file_name,
            info.checksum,
            info.period_id,
            info.pay_date.format("%Y-%m-%d").to_string(),
            err.code(),
            err.audit_text(),
            info.sign_policy_applied,
            info.imported_by,
            timestamp(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Records a failed attempt on its own connection, outside any import
/// transaction. Never fails: a recording error is logged and dropped.
pub fn record_failure(pool: &Pool, info: &BatchInfo<'_>, err: &ImportError, now: NaiveDateTime) -> Option<i64> {
    let result = pool.get().and_then(|conn| insert_failure(&conn, info, err, now));
    match result {
        Ok(batch_id) => {
            tracing::info!(batch_id, code = err.code(), file = info.file_name, "failed import recorded");
            Some(batch_id)
        }
        Err(e) => {
            tracing::error!(code = err.code(), error = %e, "could not record failed import");
            None
        }
    }
}

/// Error code stored on a batch replaced by a re-import of the same file.
pub const REIMPORTED: &str = "REIMPORTED";

/// Retires a successful batch before the same file is imported again: the
/// fact rows it owns are removed and the batch is turned into an error row,
/// so at most one success per (period, checksum) remains. Facts of other
/// batches are untouched, even when they share the file name. Returns the
/// facts removed.
pub fn supersede(conn: &Connection, batch_id: i64) -> Result<usize> {
    let period_id: i64 = conn.query_row(
        "SELECT period_id FROM import_batches WHERE batch_id = ?1 AND status = 'success'",
        [batch_id],
        |r| r.get(0),
    )?;
    let removed = conn.execute("DELETE FROM payroll_transactions WHERE batch_id = ?1", [batch_id])?;
    conn.execute(
        "UPDATE import_batches SET status = 'error', error_code = ?1, error_message = ?2 WHERE batch_id = ?3",
        rusqlite::params![
            REIMPORTED,
            format!("[{REIMPORTED}] Lot remplacé par un nouvel import du même fichier ({removed} lignes retirées)."),
            batch_id
        ],
    )?;
    tracing::info!(batch_id, period_id, removed, "previous batch superseded");
    Ok(removed)
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: i64,
    pub file_name: String,
    pub pay_date: Option<String>,
    pub rows_count: i64,
    pub status: String,
    pub error_code: Option<String>,
    pub imported_by: String,
    pub imported_at: String,
}

/// Most recent attempts first.
pub fn recent_batches(conn: &Connection, limit: usize) -> Result<Vec<BatchSummary>> {
    let mut stmt = conn.prepare(
        "SELECT batch_id, file_name, pay_date, rows_count, status, error_code, imported_by, imported_at
         FROM import_batches ORDER BY batch_id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| {
            Ok(BatchSummary {
                batch_id: r.get(0)?,
                file_name: r.get(1)?,
                pay_date: r.get(2)?,
                rows_count: r.get(3)?,
                status: r.get(4)?,
                error_code: r.get(5)?,
                imported_by: r.get(6)?,
                imported_at: r.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
