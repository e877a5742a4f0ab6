//! Administrative operations on periods and employees. None of this runs
//! inside the import pipeline.

use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::error::{PaieError, Result};
use crate::periods::{self, PayPeriod, PeriodStatus};
use crate::views::ViewRefresher;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub period_id: i64,
    pub pay_date: String,
    pub period_seq_in_year: i64,
    pub status: PeriodStatus,
    pub transaction_count: i64,
    pub batch_count: i64,
}

/// Newest pay date first.
pub fn list_periods(conn: &Connection) -> Result<Vec<PeriodSummary>> {
    let mut stmt = conn.prepare(
        "SELECT p.period_id, p.pay_date, p.period_seq_in_year, p.status,
                (SELECT count(*) FROM payroll_transactions t WHERE t.period_id = p.period_id),
                (SELECT count(*) FROM import_batches b WHERE b.period_id = p.period_id)
         FROM pay_periods p
         ORDER BY p.pay_date DESC",
    )?;
    let rows: Vec<(i64, String, i64, String, i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(period_id, pay_date, seq, status, transactions, batches)| {
            Ok(PeriodSummary {
                period_id,
                pay_date,
                period_seq_in_year: seq,
                status: PeriodStatus::parse(&status)?,
                transaction_count: transactions,
                batch_count: batches,
            })
        })
        .collect()
}

pub fn close_period(conn: &Connection, pay_date: NaiveDate) -> Result<PayPeriod> {
    periods::transition(conn, pay_date, PeriodStatus::Closed)
}

pub fn archive_period(conn: &Connection, pay_date: NaiveDate) -> Result<PayPeriod> {
    periods::transition(conn, pay_date, PeriodStatus::Archived)
}

fn refuse_in_production(production: bool, operation: &str) -> Result<()> {
    if production {
        tracing::warn!(operation, "destructive operation refused in production");
        return Err(PaieError::RefusedInProduction(operation.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletedPeriod {
    pub period_id: i64,
    pub transactions: usize,
    pub batches: usize,
    pub snapshots: usize,
}

/// Removes a period with its facts, its audit rows and its KPI snapshot,
/// then rebuilds the reporting views.
pub fn delete_period(
    conn: &mut Connection,
    pay_date: NaiveDate,
    production: bool,
    views: &ViewRefresher,
) -> Result<DeletedPeriod> {
    refuse_in_production(production, "delete_period")?;
    let period = periods::find_period(conn, pay_date)?
        .ok_or_else(|| PaieError::UnknownPeriod(pay_date.to_string()))?;
    let key = pay_date.format("%Y-%m-%d").to_string();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let transactions = tx.execute("DELETE FROM payroll_transactions WHERE period_id = ?1", [period.period_id])?;
    let batches = tx.execute("DELETE FROM import_batches WHERE period_id = ?1", [period.period_id])?;
    let snapshots = tx.execute("DELETE FROM kpi_snapshot WHERE period = ?1", [&key])?;
    tx.execute("DELETE FROM pay_periods WHERE period_id = ?1", [period.period_id])?;
    tx.commit()?;

    tracing::info!(period_id = period.period_id, period = %key, transactions, batches, "period deleted");
    views.refresh_all(conn);

    Ok(DeletedPeriod {
        period_id: period.period_id,
        transactions,
        batches,
        snapshots,
    })
}

/// Deletes employees that no fact row references. Returns how many went.
pub fn delete_orphan_employees(conn: &Connection, production: bool, views: &ViewRefresher) -> Result<usize> {
    refuse_in_production(production, "delete_orphan_employees")?;
    let removed = conn.execute(
        "DELETE FROM employees
         WHERE NOT EXISTS (SELECT 1 FROM payroll_transactions t WHERE t.employee_id = employees.employee_id)",
        [],
    )?;
    tracing::info!(removed, "orphan employees deleted");
    if removed > 0 {
        views.refresh_all(conn);
    }
    Ok(removed)
}
