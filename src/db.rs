use std::cell::Cell;
use std::path::Path;
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::error::{PaieError, Result};
use crate::settings::Timeouts;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employees (
    employee_id INTEGER PRIMARY KEY,
    matricule TEXT NOT NULL UNIQUE,
    nom TEXT NOT NULL,
    prenom TEXT,
    nom_norm TEXT NOT NULL,
    prenom_norm TEXT,
    statut TEXT NOT NULL DEFAULT 'actif',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pay_codes (
    pay_code TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    category TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS budget_posts (
    budget_post_id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    description TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sign_policies (
    pay_code TEXT PRIMARY KEY,
    employee_sign INTEGER NOT NULL CHECK (employee_sign IN (-1, 1)),
    employer_sign INTEGER NOT NULL CHECK (employer_sign IN (-1, 1))
);

CREATE TABLE IF NOT EXISTS pay_periods (
    period_id INTEGER PRIMARY KEY,
    pay_date TEXT NOT NULL UNIQUE,
    pay_year INTEGER NOT NULL,
    pay_month INTEGER NOT NULL,
    period_seq_in_year INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('open', 'closed', 'archived')),
    created_at TEXT NOT NULL,
    UNIQUE (pay_year, period_seq_in_year)
);

CREATE TABLE IF NOT EXISTS payroll_transactions (
    transaction_id INTEGER PRIMARY KEY,
    batch_id INTEGER NOT NULL,
    pay_date TEXT NOT NULL,
    employee_id INTEGER NOT NULL,
    period_id INTEGER NOT NULL,
    pay_code TEXT NOT NULL,
    budget_post_id INTEGER NOT NULL,
    amount_employee_norm_cents INTEGER NOT NULL,
    amount_employer_norm_cents INTEGER NOT NULL,
    source_file TEXT NOT NULL,
    source_row_no INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (transaction_id, pay_date),
    FOREIGN KEY (batch_id) REFERENCES import_batches(batch_id),
    FOREIGN KEY (employee_id) REFERENCES employees(employee_id),
    FOREIGN KEY (period_id) REFERENCES pay_periods(period_id),
    FOREIGN KEY (pay_code) REFERENCES pay_codes(pay_code),
    FOREIGN KEY (budget_post_id) REFERENCES budget_posts(budget_post_id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_pay_date ON payroll_transactions(pay_date);
CREATE INDEX IF NOT EXISTS idx_transactions_period ON payroll_transactions(period_id);
CREATE INDEX IF NOT EXISTS idx_transactions_employee ON payroll_transactions(employee_id);
CREATE INDEX IF NOT EXISTS idx_transactions_batch ON payroll_transactions(batch_id);

CREATE TRIGGER IF NOT EXISTS trg_transactions_pay_date
BEFORE INSERT ON payroll_transactions
WHEN NEW.pay_date <> (SELECT pay_date FROM pay_periods WHERE period_id = NEW.period_id)
BEGIN
    SELECT RAISE(ABORT, 'pay_date does not match the pay period');
END;

CREATE TABLE IF NOT EXISTS import_batches (
    batch_id INTEGER PRIMARY KEY,
    file_name TEXT NOT NULL,
    checksum TEXT,
    period_id INTEGER,
    pay_date TEXT,
    rows_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK (status IN ('success', 'error', 'failed')),
    error_code TEXT,
    error_message TEXT,
    sign_policy_applied INTEGER NOT NULL DEFAULT 1,
    imported_by TEXT NOT NULL,
    imported_at TEXT NOT NULL,
    FOREIGN KEY (period_id) REFERENCES pay_periods(period_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_import_batches_success
    ON import_batches(period_id, checksum) WHERE status = 'success';

CREATE TABLE IF NOT EXISTS kpi_snapshot (
    period TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    calculated_at TEXT NOT NULL,
    row_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS v_monthly_payroll_summary (
    pay_date TEXT NOT NULL,
    employee_id INTEGER NOT NULL,
    matricule TEXT NOT NULL,
    nom TEXT NOT NULL,
    prenom TEXT,
    total_employee_cents INTEGER NOT NULL,
    total_employer_cents INTEGER NOT NULL,
    total_combined_cents INTEGER NOT NULL,
    transaction_count INTEGER NOT NULL,
    PRIMARY KEY (pay_date, employee_id)
);

CREATE TABLE IF NOT EXISTS v_employee_current_salary (
    employee_id INTEGER PRIMARY KEY,
    matricule TEXT NOT NULL,
    nom TEXT NOT NULL,
    prenom TEXT,
    statut TEXT NOT NULL,
    last_pay_date TEXT,
    last_net_cents INTEGER
);

CREATE TABLE IF NOT EXISTS v_employee_annual_history (
    year INTEGER NOT NULL,
    employee_id INTEGER NOT NULL,
    matricule TEXT NOT NULL,
    nom TEXT NOT NULL,
    prenom TEXT,
    annual_employee_cents INTEGER NOT NULL,
    annual_employer_cents INTEGER NOT NULL,
    annual_combined_cents INTEGER NOT NULL,
    pay_periods_count INTEGER NOT NULL,
    PRIMARY KEY (year, employee_id)
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// True when the schema has been applied to this database.
pub fn has_schema(conn: &Connection) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN ('pay_periods', 'payroll_transactions', 'import_batches')",
        [],
        |r| r.get(0),
    )?;
    Ok(n == 3)
}

// ---------------------------------------------------------------------------
// Session limits
// ---------------------------------------------------------------------------

thread_local! {
    static STATEMENT_STARTED: Cell<Option<Instant>> = const { Cell::new(None) };
    static LAST_ACTIVITY: Cell<Option<Instant>> = const { Cell::new(None) };
}

fn on_statement(_sql: &str) {
    let now = Instant::now();
    STATEMENT_STARTED.with(|c| c.set(Some(now)));
    LAST_ACTIVITY.with(|c| c.set(Some(now)));
}

fn statement_elapsed() -> Option<Duration> {
    STATEMENT_STARTED.with(|c| c.get()).map(|t| t.elapsed())
}

/// Progress handler granularity, in virtual machine instructions.
const PROGRESS_OPS: i32 = 1000;

/// Opens a connection with the lock and statement limits installed.
/// A statement running past `timeouts.statement` is interrupted and
/// surfaces as `PaieError::Timeout`.
pub fn open_session(db_path: &Path, timeouts: &Timeouts) -> Result<Connection> {
    let mut conn = get_connection(db_path)?;
    conn.busy_timeout(timeouts.lock)?;
    conn.trace(Some(on_statement));
    let limit = timeouts.statement;
    conn.progress_handler(
        PROGRESS_OPS,
        Some(move || statement_elapsed().map_or(false, |elapsed| elapsed > limit)),
    );
    Ok(conn)
}

/// Resets the idle clock; called when a transaction opens.
pub fn mark_activity() {
    LAST_ACTIVITY.with(|c| c.set(Some(Instant::now())));
}

/// Fails when more than `limit` elapsed since the last statement on this
/// thread. Called between the writer steps of an open transaction.
pub fn check_idle(limit: Duration) -> Result<()> {
    let idle = LAST_ACTIVITY.with(|c| c.get()).map(|t| t.elapsed());
    match idle {
        Some(idle) if idle > limit => Err(PaieError::Timeout(format!(
            "idle in transaction for {} ms (limit {} ms)",
            idle.as_millis(),
            limit.as_millis()
        ))),
        _ => Ok(()),
    }
}

/// Naive timestamp used for every `*_at` column.
pub fn timestamp(dt: chrono::NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
