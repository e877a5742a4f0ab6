use std::fmt;

use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::db::timestamp;
use crate::error::{ImportError, PaieError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodStatus {
    Open,
    Closed,
    Archived,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "archived" => Ok(Self::Archived),
            other => Err(PaieError::Other(format!("unknown period status {other:?}"))),
        }
    }

    /// The lifecycle only moves forward, one step at a time.
    pub fn can_become(&self, next: PeriodStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Closed) | (Self::Closed, Self::Archived)
        )
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayPeriod {
    pub period_id: i64,
    pub pay_date: NaiveDate,
    pub pay_year: i32,
    pub pay_month: u32,
    pub period_seq_in_year: i64,
    pub status: PeriodStatus,
}

impl PayPeriod {
    /// `YYYY-MM`, the label carried by completion signals.
    pub fn month_label(&self) -> String {
        self.pay_date.format("%Y-%m").to_string()
    }
}

/// Integer key of the per-date lock.
pub fn lock_key(pay_date: NaiveDate) -> i64 {
    pay_date.year() as i64 * 10_000 + pay_date.month() as i64 * 100 + pay_date.day() as i64
}

pub fn find_period(conn: &Connection, pay_date: NaiveDate) -> Result<Option<PayPeriod>> {
    let row = conn
        .query_row(
            "SELECT period_id, pay_year, pay_month, period_seq_in_year, status FROM pay_periods WHERE pay_date = ?1",
            [pay_date.format("%Y-%m-%d").to_string()],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i32>(1)?,
                    r.get::<_, u32>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(period_id, pay_year, pay_month, seq, status)| {
        Ok(PayPeriod {
            period_id,
            pay_date,
            pay_year,
            pay_month,
            period_seq_in_year: seq,
            status: PeriodStatus::parse(&status)?,
        })
    })
    .transpose()
}

/// Why the gate refused, kept apart from technical failures.
#[derive(Debug)]
pub enum GateError {
    Closed(PayPeriod),
    Technical(PaieError),
}

impl From<PaieError> for GateError {
    fn from(e: PaieError) -> Self {
        GateError::Technical(e)
    }
}

impl From<rusqlite::Error> for GateError {
    fn from(e: rusqlite::Error) -> Self {
        GateError::Technical(e.into())
    }
}

impl GateError {
    pub fn into_import_error(self) -> ImportError {
        match self {
            GateError::Closed(p) => {
                ImportError::period_closed(&p.pay_date.format("%Y-%m-%d").to_string(), p.status.as_str())
            }
            GateError::Technical(e) => ImportError::from_technical(&e),
        }
    }
}

/// Returns the open period for `pay_date`, creating it when absent.
///
/// Runs in its own `BEGIN IMMEDIATE` transaction: the write lock it takes
/// serializes concurrent creations for the same date and is released on
/// commit or rollback. The sequence number is derived inside that section.
pub fn obtain(conn: &mut Connection, pay_date: NaiveDate, now: chrono::NaiveDateTime) -> std::result::Result<PayPeriod, GateError> {
    let key = lock_key(pay_date);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tracing::debug!(lock_key = key, "period lock acquired");

    if let Some(period) = find_period(&tx, pay_date)? {
        tx.commit()?;
        if period.status != PeriodStatus::Open {
            return Err(GateError::Closed(period));
        }
        return Ok(period);
    }

    let year = pay_date.year();
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(period_seq_in_year), 0) + 1 FROM pay_periods WHERE pay_year = ?1",
        [year],
        |r| r.get(0),
    )?;
    tx.execute(
        "INSERT INTO pay_periods (pay_date, pay_year, pay_month, period_seq_in_year, status, created_at) VALUES (?1, ?2, ?3, ?4, 'open', ?5)",
        rusqlite::params![
            pay_date.format("%Y-%m-%d").to_string(),
            year,
            pay_date.month(),
            seq,
            timestamp(now)
        ],
    )?;
    let period_id = tx.last_insert_rowid();
    tx.commit()?;
    tracing::info!(period_id, pay_date = %pay_date, seq, lock_key = key, "pay period created");

    Ok(PayPeriod {
        period_id,
        pay_date,
        pay_year: year,
        pay_month: pay_date.month(),
        period_seq_in_year: seq,
        status: PeriodStatus::Open,
    })
}

/// Moves a period one step along open → closed → archived.
pub fn transition(conn: &Connection, pay_date: NaiveDate, next: PeriodStatus) -> Result<PayPeriod> {
    let period = find_period(conn, pay_date)?
        .ok_or_else(|| PaieError::UnknownPeriod(pay_date.to_string()))?;
    if !period.status.can_become(next) {
        return Err(PaieError::InvalidTransition {
            pay_date: pay_date.to_string(),
            from: period.status.to_string(),
            to: next.to_string(),
        });
    }
    conn.execute(
        "UPDATE pay_periods SET status = ?1 WHERE period_id = ?2",
        rusqlite::params![next.as_str(), period.period_id],
    )?;
    tracing::info!(period_id = period.period_id, from = %period.status, to = %next, "period status changed");
    Ok(PayPeriod { status: next, ..period })
}
