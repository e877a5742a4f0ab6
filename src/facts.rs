use std::collections::HashMap;

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::db::timestamp;
use crate::error::{PaieError, Result};
use crate::mapper::CanonicalRecord;
use crate::periods::PayPeriod;

const COLUMNS: &[&str] = &[
    "batch_id",
    "pay_date",
    "employee_id",
    "period_id",
    "pay_code",
    "budget_post_id",
    "amount_employee_norm_cents",
    "amount_employer_norm_cents",
    "source_file",
    "source_row_no",
    "created_at",
];

/// Rows per multi-row INSERT; stays well under SQLite's bound-variable limit.
const CHUNK_ROWS: usize = 500;

fn insert_sql(rows: usize) -> String {
    let tuple = format!("({})", vec!["?"; COLUMNS.len()].join(", "));
    format!(
        "INSERT INTO payroll_transactions ({}) VALUES {}",
        COLUMNS.join(", "),
        vec![tuple.as_str(); rows].join(", ")
    )
}

/// Where a set of facts comes from: the batch that owns them and its period.
#[derive(Debug, Clone, Copy)]
pub struct FactSource<'a> {
    pub batch_id: i64,
    pub period: &'a PayPeriod,
    pub source_file: &'a str,
}

/// Inserts every record as a fact row owned by `source.batch_id`, in
/// ascending source row order. Every fact carries the period's pay date.
pub fn insert_facts(
    conn: &Connection,
    records: &[CanonicalRecord],
    source: FactSource<'_>,
    employee_ids: &HashMap<String, i64>,
    budget_post_ids: &HashMap<String, i64>,
    now: NaiveDateTime,
) -> Result<usize> {
    let period = source.period;
    let pay_date = period.pay_date.format("%Y-%m-%d").to_string();
    let ts = timestamp(now);

    let mut ordered: Vec<&CanonicalRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.source_row_no);

    let mut inserted = 0;
    for chunk in ordered.chunks(CHUNK_ROWS) {
        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * COLUMNS.len());
        for r in chunk {
            let employee_id = employee_ids
                .get(&r.matricule)
                .ok_or_else(|| PaieError::Other(format!("no employee id for matricule {}", r.matricule)))?;
            let budget_post_id = budget_post_ids
                .get(r.budget_post_code())
                .ok_or_else(|| PaieError::Other(format!("no budget post id for {}", r.budget_post_code())))?;
            values.extend([
                Value::Integer(source.batch_id),
                Value::Text(pay_date.clone()),
                Value::Integer(*employee_id),
                Value::Integer(period.period_id),
                Value::Text(r.pay_code.clone()),
                Value::Integer(*budget_post_id),
                Value::Integer(r.amount_employee_norm_cents),
                Value::Integer(r.amount_employer_norm_cents),
                Value::Text(source.source_file.to_string()),
                Value::Integer(r.source_row_no as i64),
                Value::Text(ts.clone()),
            ]);
        }
        let mut stmt = conn.prepare_cached(&insert_sql(chunk.len()))?;
        inserted += stmt.execute(rusqlite::params_from_iter(values))?;
    }
    tracing::debug!(batch_id = source.batch_id, period_id = period.period_id, rows = inserted, "facts inserted");
    Ok(inserted)
}
