//! The import orchestrator: one payroll file, one pay date, one atomic
//! write. Everything before the transaction only reads; everything after
//! the commit is best-effort.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::TransactionBehavior;
use serde::Serialize;

use crate::batches::{self, BatchInfo};
use crate::db;
use crate::dates::DateSystem;
use crate::dimensions;
use crate::error::{ErrorKind, ImportError, PaieError, Result};
use crate::facts::{self, FactSource};
use crate::guard;
use crate::headers::{self, Field};
use crate::kpi::{self, KpiData};
use crate::mapper::{self, CanonicalRecord, RowDefect};
use crate::periods::{self, GateError, PayPeriod, PeriodStatus};
use crate::runtime::Runtime;
use crate::sign_policy::{self, PolicyMap};
use crate::signal::ImportFinished;
use crate::workbook::{self, FileFormat};

#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub path: &'a Path,
    pub pay_date: NaiveDate,
    pub user_id: &'a str,
    pub apply_sign_policy: bool,
    /// Forces a spreadsheet epoch instead of detecting it.
    pub date_system: Option<DateSystem>,
}

impl<'a> ImportRequest<'a> {
    pub fn new(path: &'a Path, pay_date: NaiveDate, user_id: &'a str) -> Self {
        Self {
            path,
            pay_date,
            user_id,
            apply_sign_policy: true,
            date_system: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub status: ImportStatus,
    pub batch_id: i64,
    pub rows_count: usize,
    /// `YYYY-MM`
    pub period: String,
    pub pay_date: String,
    pub period_id: i64,
    pub period_seq_in_year: i64,
    /// `None` when the post-commit recompute failed.
    pub kpi: Option<KpiData>,
    pub message: String,
    pub sheet: String,
    pub date_system: DateSystem,
    /// Header mappings accepted with low confidence.
    pub review_fields: Vec<Field>,
    /// Non-blocking row defects; those rows were imported with defaults.
    pub defects: Vec<RowDefect>,
    pub date_mismatches: usize,
}

/// What the audit row needs to know about the attempt so far.
#[derive(Debug, Default)]
struct Attempt {
    checksum: Option<String>,
    period_id: Option<i64>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn technical(e: PaieError) -> ImportError {
    ImportError::from_technical(&e)
}

/// Imports one payroll file for `pay_date`.
///
/// Any failure leaves at most an error audit row behind; duplicates leave
/// nothing. KPI and view refresh failures after the commit are logged and
/// do not fail the import.
pub fn import_payroll_file(rt: &Runtime, req: &ImportRequest<'_>) -> std::result::Result<ImportOutcome, ImportError> {
    let mut attempt = Attempt::default();
    tracing::info!(file = %req.path.display(), pay_date = %req.pay_date, user = req.user_id, "import started");
    match run(rt, req, &mut attempt) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            if err.kind != ErrorKind::DuplicateImport {
                let name = file_name(req.path);
                let info = BatchInfo {
                    file_name: &name,
                    checksum: attempt.checksum.as_deref(),
                    period_id: attempt.period_id,
                    pay_date: req.pay_date,
                    sign_policy_applied: req.apply_sign_policy,
                    imported_by: req.user_id,
                };
                batches::record_failure(&rt.pool, &info, &err, rt.now());
            }
            tracing::warn!(code = err.code(), file = %req.path.display(), "import failed");
            Err(err)
        }
    }
}

fn run(rt: &Runtime, req: &ImportRequest<'_>, attempt: &mut Attempt) -> std::result::Result<ImportOutcome, ImportError> {
    if !req.path.is_file() {
        return Err(ImportError::new(ErrorKind::FileNotFound));
    }
    let format = FileFormat::from_path(req.path).ok_or_else(|| ImportError::new(ErrorKind::FormatUnsupported))?;

    let period = obtain_period(rt, req, attempt)?;

    let checksum = guard::compute_checksum(req.path).map_err(technical)?;
    attempt.checksum = Some(checksum.clone());
    {
        let conn = rt.pool.get().map_err(technical)?;
        guard::assert_unique(&conn, period.period_id, &checksum, rt.settings.allow_reimport)?;
    }

    let sheets = workbook::read_sheets(req.path, format).map_err(|e| match e {
        PaieError::Xlsx(_) => {
            tracing::error!(error = %e, "workbook unreadable");
            ImportError::new(ErrorKind::FormatUnsupported)
        }
        other => technical(other),
    })?;
    let table = workbook::choose_table(sheets)
        .filter(|t| t.headers.iter().any(|h| !h.is_empty()))
        .ok_or_else(ImportError::empty_file)?;
    let mapping = headers::map_headers(&table.headers)?;

    let mut mapped = mapper::map_rows(&table, &mapping, req.pay_date, req.date_system);

    let policies = if req.apply_sign_policy {
        let conn = rt.pool.get().map_err(technical)?;
        rt.sign_policies.load(&conn).map_err(technical)?
    } else {
        PolicyMap::new()
    };
    sign_policy::apply(&mut mapped.records, &policies, req.apply_sign_policy);

    mapper::validate(&mapped)?;

    let (batch_id, rows_count) = write(rt, req, &period, &checksum, &mapped.records).map_err(|e| match e {
        PaieError::Db(ref inner) if guard::is_duplicate_violation(inner) => {
            tracing::info!(period_id = period.period_id, "concurrent import of the same file committed first");
            ImportError::new(ErrorKind::DuplicateImport)
        }
        other => technical(other),
    })?;
    tracing::info!(batch_id, rows = rows_count, period = %period.pay_date, "import committed");

    let kpi = refresh_after_commit(rt, req.pay_date);

    let event = ImportFinished {
        period: period.month_label(),
        batch_id,
        row_count: rows_count,
    };
    if catch_unwind(AssertUnwindSafe(|| rt.signal.emit(&event))).is_err() {
        tracing::warn!(batch_id, "completion signal panicked");
    }

    let defects: Vec<RowDefect> = mapped.defects.into_iter().filter(|d| !d.is_hard()).collect();
    Ok(ImportOutcome {
        status: ImportStatus::Success,
        batch_id,
        rows_count,
        period: period.month_label(),
        pay_date: period.pay_date.format("%Y-%m-%d").to_string(),
        period_id: period.period_id,
        period_seq_in_year: period.period_seq_in_year,
        kpi,
        message: format!(
            "Import réussi : {rows_count} ligne(s) importée(s) pour la paie du {}.",
            period.pay_date.format("%Y-%m-%d")
        ),
        sheet: table.sheet,
        date_system: mapped.date_system,
        review_fields: mapping.review,
        defects,
        date_mismatches: mapped.date_mismatches,
    })
}

fn obtain_period(rt: &Runtime, req: &ImportRequest<'_>, attempt: &mut Attempt) -> std::result::Result<PayPeriod, ImportError> {
    let mut conn = rt.pool.get().map_err(technical)?;
    if !db::has_schema(&conn).map_err(technical)? {
        tracing::error!(path = %rt.pool.path().display(), "database has no payroll schema");
        let mut err = ImportError::new(ErrorKind::DbUnavailable);
        err.details.note = Some("schéma absent".to_string());
        return Err(err);
    }
    match periods::obtain(&mut conn, req.pay_date, rt.now()) {
        Ok(period) => {
            attempt.period_id = Some(period.period_id);
            Ok(period)
        }
        Err(GateError::Closed(period)) => {
            attempt.period_id = Some(period.period_id);
            Err(GateError::Closed(period).into_import_error())
        }
        Err(other) => Err(other.into_import_error()),
    }
}

/// The transactional part: dimensions, facts and the success audit row
/// commit together or not at all.
fn write(
    rt: &Runtime,
    req: &ImportRequest<'_>,
    period: &PayPeriod,
    checksum: &str,
    records: &[CanonicalRecord],
) -> Result<(i64, usize)> {
    let mut conn = rt.pool.get()?;
    let idle = rt.pool.timeouts().idle_in_tx;
    let now = rt.now();
    let name = file_name(req.path);

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    db::mark_activity();

    // The period may have been closed since the gate let us through.
    let status: String = tx.query_row(
        "SELECT status FROM pay_periods WHERE period_id = ?1",
        [period.period_id],
        |r| r.get(0),
    )?;
    if PeriodStatus::parse(&status)? != PeriodStatus::Open {
        return Err(ImportError::period_closed(&period.pay_date.to_string(), &status).into());
    }

    let employee_ids = dimensions::upsert_employees(&tx, records, now)?;
    db::check_idle(idle)?;
    let budget_post_ids = dimensions::upsert_budget_posts(&tx, records, now)?;
    db::check_idle(idle)?;
    dimensions::upsert_pay_codes(&tx, records, now)?;
    db::check_idle(idle)?;

    if rt.settings.allow_reimport {
        if let Some(previous) = guard::find_success(&tx, period.period_id, checksum)? {
            batches::supersede(&tx, previous)?;
            db::check_idle(idle)?;
        }
    }

    let info = BatchInfo {
        file_name: &name,
        checksum: Some(checksum),
        period_id: Some(period.period_id),
        pay_date: period.pay_date,
        sign_policy_applied: req.apply_sign_policy,
        imported_by: req.user_id,
    };
    // The batch row comes first so every fact can point at its owner.
    let batch_id = batches::record_success(&tx, &info, records.len(), now)?;
    db::check_idle(idle)?;

    let source = FactSource {
        batch_id,
        period,
        source_file: &name,
    };
    let rows = facts::insert_facts(&tx, records, source, &employee_ids, &budget_post_ids, now)?;
    db::check_idle(idle)?;

    tx.commit()?;
    Ok((batch_id, rows))
}

/// KPI snapshot then reporting views. Failures are logged, never returned.
fn refresh_after_commit(rt: &Runtime, pay_date: NaiveDate) -> Option<KpiData> {
    let kpi = match rt.pool.get().and_then(|conn| kpi::recompute(&conn, pay_date, rt.now())) {
        Ok(data) => Some(data),
        Err(e) => {
            tracing::warn!(code = ErrorKind::KpiFailed.code(), period = %pay_date, error = %e, "kpi recompute failed");
            None
        }
    };
    match rt.pool.get() {
        Ok(conn) => {
            rt.views.refresh_all(&conn);
        }
        Err(e) => {
            tracing::warn!(code = ErrorKind::ViewRefreshFailed.code(), error = %e, "views not refreshed");
        }
    }
    kpi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::kpi::KpiSource;
    use crate::pool::Pool;
    use crate::runtime::{FixedClock, SignPolicySource, StaticPolicies};
    use crate::settings::Timeouts;
    use crate::sign_policy::{set_sign_policy, Signs};
    use crate::signal::{CallbackSignal, NoopSignal};
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const HEADER: &str = "Matricule,Employé,Date de paie,Code de paie,Montant,Part employeur";

    struct Fixture {
        dir: tempfile::TempDir,
        db_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db_path = dir.path().join("paie.db");
            init_db(&get_connection(&db_path).unwrap()).unwrap();
            Self { dir, db_path }
        }

        fn conn(&self) -> Connection {
            get_connection(&self.db_path).unwrap()
        }

        fn runtime(&self) -> Runtime {
            self.runtime_with(Timeouts::default())
        }

        fn runtime_with(&self, timeouts: Timeouts) -> Runtime {
            Runtime::new(Pool::new(&self.db_path, timeouts, 2))
                .with_clock(FixedClock(now()))
                .with_signal(NoopSignal)
        }

        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        }

        fn count(&self, sql: &str) -> i64 {
            self.conn().query_row(sql, [], |r| r.get(0)).unwrap()
        }
    }

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn pay_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 28).unwrap()
    }

    fn s1_csv() -> String {
        format!(
            "{HEADER}\n\
             2093,Tremblay Marie,2025-08-28,101,1500.00,\n\
             2094,Roy Luc,2025-08-28,101,-250.00,\n\
             2095,Côté Ana,2025-08-28,101,3000.00,\n"
        )
    }

    fn s1(fx: &Fixture) -> PathBuf {
        set_sign_policy(&fx.conn(), "101", Signs::IDENTITY).unwrap();
        fx.write("paie_2025-08-28.csv", &s1_csv())
    }

    // ---- S1 ----

    #[test]
    fn test_happy_path() {
        let fx = Fixture::new();
        let path = s1(&fx);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let rt = fx
            .runtime()
            .with_signal(CallbackSignal(move |e: &ImportFinished| sink.lock().unwrap().push(e.clone())));

        let out = import_payroll_file(&rt, &ImportRequest::new(&path, pay_date(), "tester")).unwrap();
        assert_eq!(out.status, ImportStatus::Success);
        assert_eq!(out.rows_count, 3);
        assert_eq!(out.period, "2025-08");
        assert_eq!(out.period_seq_in_year, 1);
        assert!(out.defects.is_empty());

        let kpi = out.kpi.unwrap();
        assert_eq!(kpi.cards.salaire_net_total, 4250.0);
        assert_eq!(kpi.cards.nb_employes, 3);
        assert_eq!(kpi.cards.net_moyen, 1416.67);

        assert_eq!(fx.count("SELECT count(*) FROM employees"), 3);
        assert_eq!(fx.count("SELECT count(*) FROM pay_periods"), 1);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 3);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE status = 'success' AND rows_count = 3"), 1);
        assert_eq!(fx.count("SELECT count(*) FROM kpi_snapshot WHERE period = '2025-08-28'"), 1);
        assert_eq!(fx.count("SELECT count(*) FROM v_monthly_payroll_summary"), 3);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].period, "2025-08");
        assert_eq!(events[0].batch_id, out.batch_id);
        assert_eq!(events[0].row_count, 3);
    }

    // ---- S2 / idempotent import ----

    #[test]
    fn test_duplicate_rejected_without_audit_row() {
        let fx = Fixture::new();
        let path = s1(&fx);
        let rt = fx.runtime();
        let req = ImportRequest::new(&path, pay_date(), "tester");
        import_payroll_file(&rt, &req).unwrap();
        let err = import_payroll_file(&rt, &req).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateImport);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 3);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches"), 1);
    }

    #[test]
    fn test_reimport_replaces_previous_batch() {
        let fx = Fixture::new();
        let path = s1(&fx);
        let mut rt = fx.runtime();
        rt.settings.allow_reimport = true;
        let req = ImportRequest::new(&path, pay_date(), "tester");
        let first = import_payroll_file(&rt, &req).unwrap();
        let second = import_payroll_file(&rt, &req).unwrap();
        assert_ne!(first.batch_id, second.batch_id);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 3);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE status = 'success'"), 1);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE error_code = 'REIMPORTED'"), 1);
    }

    #[test]
    fn test_reimport_only_removes_the_superseded_batch() {
        let fx = Fixture::new();
        let mut rt = fx.runtime();
        rt.settings.allow_reimport = true;
        let a = format!("{HEADER}\n2093,Tremblay Marie,2025-08-28,101,1500.00,\n");
        let b = format!("{HEADER}\n2094,Roy Luc,2025-08-28,101,-250.00,\n2095,Côté Ana,2025-08-28,101,3000.00,\n");

        let path = fx.write("paie.csv", &a);
        let req = ImportRequest::new(&path, pay_date(), "tester");
        import_payroll_file(&rt, &req).unwrap();
        fx.write("paie.csv", &b);
        let kept = import_payroll_file(&rt, &req).unwrap();
        fx.write("paie.csv", &a);
        import_payroll_file(&rt, &req).unwrap();

        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 3);
        assert_eq!(
            fx.count("SELECT sum(rows_count) FROM import_batches WHERE status = 'success'"),
            fx.count("SELECT count(*) FROM payroll_transactions")
        );
        assert_eq!(
            fx.count(&format!("SELECT count(*) FROM payroll_transactions WHERE batch_id = {}", kept.batch_id)),
            2
        );
        assert_eq!(
            fx.count("SELECT count(*) FROM payroll_transactions t JOIN import_batches b USING (batch_id) WHERE b.status <> 'success'"),
            0
        );
    }

    /// Commits a success row for the file while the import sits between the
    /// uniqueness pre-check and its transaction.
    struct CommitsFirst {
        path: PathBuf,
    }

    impl SignPolicySource for CommitsFirst {
        fn load(&self, conn: &Connection) -> crate::error::Result<PolicyMap> {
            let checksum = guard::compute_checksum(&self.path)?;
            let period = periods::find_period(conn, pay_date())?.expect("period exists");
            conn.execute(
                "INSERT INTO import_batches (file_name, checksum, period_id, pay_date, rows_count, status, imported_by, imported_at)
                 VALUES ('paie_2025-08-28.csv', ?1, ?2, '2025-08-28', 0, 'success', 'other', 'now')",
                rusqlite::params![checksum, period.period_id],
            )?;
            Ok(PolicyMap::new())
        }
    }

    #[test]
    fn test_concurrent_commit_maps_to_duplicate() {
        let fx = Fixture::new();
        let path = s1(&fx);
        let rt = fx.runtime().with_sign_policies(CommitsFirst { path: path.clone() });
        let err = import_payroll_file(&rt, &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateImport);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 0);
        assert_eq!(fx.count("SELECT count(*) FROM employees"), 0);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE status = 'success'"), 1);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE status = 'error'"), 0);
    }

    #[test]
    fn test_parallel_imports_of_same_file() {
        let fx = Fixture::new();
        let path = s1(&fx);
        let rt = fx.runtime();
        let barrier = std::sync::Barrier::new(2);
        let (rt, path, barrier) = (&rt, &path, &barrier);
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        import_payroll_file(rt, &ImportRequest::new(path, pay_date(), "tester"))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let failed: Vec<ErrorKind> = results.iter().filter_map(|r| r.as_ref().err()).map(|e| e.kind).collect();
        assert_eq!(failed, vec![ErrorKind::DuplicateImport]);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 3);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches"), 1);
    }

    // ---- S3 ----

    #[test]
    fn test_closed_period_refused() {
        let fx = Fixture::new();
        let path = s1(&fx);
        {
            let mut conn = fx.conn();
            periods::obtain(&mut conn, pay_date(), now()).unwrap();
            periods::transition(&conn, pay_date(), PeriodStatus::Closed).unwrap();
        }
        let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PeriodClosed);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 0);
        assert_eq!(
            fx.count("SELECT count(*) FROM import_batches WHERE status = 'error' AND error_code = 'PERIOD_CLOSED' AND period_id IS NOT NULL"),
            1
        );
    }

    // ---- S4 ----

    #[test]
    fn test_accounting_negative_with_nbsp() {
        let fx = Fixture::new();
        let path = fx.write("s4.csv", "Matricule;Code de paie;Montant\n2093;101;(1\u{00A0}234,56)\n");
        import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap();
        assert_eq!(fx.count("SELECT amount_employee_norm_cents FROM payroll_transactions"), -123456);
    }

    // ---- S5 ----

    #[test]
    fn test_mixed_serials_pick_1904_epoch() {
        let fx = Fixture::new();
        let mut csv = String::from("Matricule,Date de paie,Code de paie,Montant\n");
        let serials = (0..70)
            .map(|i| 31412 + i)
            .chain((0..28).map(|i| 40000 + i))
            .chain([72000, 73000]);
        for (i, serial) in serials.enumerate() {
            csv.push_str(&format!("{},{serial},101,10.00\n", 3000 + i));
        }
        let path = fx.write("s5.csv", &csv);
        let out = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap();
        assert_eq!(out.date_system, DateSystem::Excel1904);
        assert_eq!(out.rows_count, 100);
        let invalid: Vec<usize> = out
            .defects
            .iter()
            .filter(|d| d.kind == mapper::DefectKind::DateInvalid)
            .map(|d| d.row_no)
            .collect();
        assert_eq!(invalid, vec![100, 101]);
        // Facts carry the period's date whatever the row said.
        assert_eq!(fx.count("SELECT count(DISTINCT pay_date) FROM payroll_transactions"), 1);
    }

    // ---- S6 ----

    #[test]
    fn test_blank_matricules_fail_whole_file() {
        let fx = Fixture::new();
        let mut csv = format!("{HEADER}\n");
        for i in 0..200 {
            let matricule = if [10, 50, 150].contains(&i) { String::new() } else { format!("{}", 5000 + i) };
            csv.push_str(&format!("{matricule},Nom Prénom,2025-08-28,101,100.00,\n"));
        }
        let path = fx.write("s6.csv", &csv);
        let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert_eq!(err.details.rows, vec![12, 52, 152]);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 0);
        assert_eq!(fx.count("SELECT count(*) FROM employees"), 0);
        let message: String = fx
            .conn()
            .query_row("SELECT error_message FROM import_batches WHERE status = 'error'", [], |r| r.get(0))
            .unwrap();
        assert!(message.contains("12, 52, 152"), "{message}");
    }

    #[test]
    fn test_xlsx_import() {
        let fx = Fixture::new();
        let path = fx.dir.path().join("paie_2025-08-28.xlsx");
        crate::workbook::testing::write_payroll_xlsx(&path);
        let out = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap();
        assert_eq!(out.sheet, "Paie");
        assert_eq!(out.rows_count, 2);
        assert_eq!(out.date_mismatches, 0);
        assert!(out.defects.is_empty());
        assert_eq!(fx.count("SELECT min(source_row_no) FROM payroll_transactions"), 4);
        assert_eq!(fx.count("SELECT count(*) FROM employees WHERE matricule = '2093'"), 1);
    }

    #[test]
    fn test_amount_out_of_range_fails_validation() {
        let fx = Fixture::new();
        let path = fx.write("big.csv", &format!("{HEADER}\n2093,Roy Luc,2025-08-28,101,79228162514264337593543950335,\n"));
        let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert_eq!(err.details.rows, vec![2]);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 0);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE error_code = 'VALIDATION_FAILED'"), 1);
    }

    // ---- Pre-transaction failures ----

    #[test]
    fn test_missing_file_is_audited() {
        let fx = Fixture::new();
        let path = fx.dir.path().join("absent.csv");
        let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileNotFound);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE error_code = 'FILE_NOT_FOUND'"), 1);
        assert_eq!(fx.count("SELECT count(*) FROM pay_periods"), 0);
    }

    #[test]
    fn test_unsupported_extension() {
        let fx = Fixture::new();
        let path = fx.write("paie.pdf", "%PDF-1.4");
        let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FormatUnsupported);
    }

    #[test]
    fn test_missing_headers_listed() {
        let fx = Fixture::new();
        let path = fx.write("h.csv", "Employé,Date de paie,Montant\nRoy Luc,2025-08-28,10.00\n");
        let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HeadersMissing);
        assert_eq!(err.details.missing_fields, vec!["matricule", "pay_code"]);
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE error_code = 'HEADERS_MISSING'"), 1);
    }

    #[test]
    fn test_empty_file() {
        let fx = Fixture::new();
        let path = fx.write("vide.csv", "");
        let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert_eq!(err.details.note.as_deref(), Some("fichier vide"));
    }

    #[test]
    fn test_database_without_schema_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paie.csv");
        std::fs::write(&path, s1_csv()).unwrap();
        let rt = Runtime::new(Pool::new(&dir.path().join("empty.db"), Timeouts::default(), 1));
        let err = import_payroll_file(&rt, &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DbUnavailable);
    }

    // ---- Sign policy ----

    #[test]
    fn test_sign_policy_flag_recorded() {
        let fx = Fixture::new();
        let path = fx.write("sp.csv", &format!("{HEADER}\n2093,Roy Luc,2025-08-28,610,25.00,10.00\n"));
        let mut map = PolicyMap::new();
        map.insert("610".into(), Signs::new(-1, -1).unwrap());
        let rt = fx.runtime().with_sign_policies(StaticPolicies(map));

        import_payroll_file(&rt, &ImportRequest::new(&path, pay_date(), "tester")).unwrap();
        let (employee, employer): (i64, i64) = fx
            .conn()
            .query_row(
                "SELECT amount_employee_norm_cents, amount_employer_norm_cents FROM payroll_transactions",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((employee, employer), (-2500, -1000));

        let other = NaiveDate::from_ymd_opt(2025, 9, 11).unwrap();
        let mut req = ImportRequest::new(&path, other, "tester");
        req.apply_sign_policy = false;
        import_payroll_file(&rt, &req).unwrap();
        assert_eq!(
            fx.count("SELECT amount_employee_norm_cents FROM payroll_transactions WHERE pay_date = '2025-09-11'"),
            2500
        );
        assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE sign_policy_applied = 0"), 1);
    }

    // ---- Atomicity under injected failure ----

    #[test]
    fn test_injected_failure_leaves_no_partial_writes() {
        let targets = [
            ("employees", ""),
            ("budget_posts", ""),
            ("pay_codes", ""),
            ("payroll_transactions", ""),
            ("import_batches", "WHEN NEW.status = 'success'"),
        ];
        for (table, when) in targets {
            let fx = Fixture::new();
            let path = s1(&fx);
            fx.conn()
                .execute_batch(&format!(
                    "CREATE TRIGGER fail_{table} BEFORE INSERT ON {table} {when} BEGIN SELECT RAISE(ABORT, 'injected'); END;"
                ))
                .unwrap();
            let err = import_payroll_file(&fx.runtime(), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Internal, "{table}");
            assert!(!err.to_string().contains("injected"));
            for counted in ["employees", "budget_posts", "pay_codes", "payroll_transactions", "kpi_snapshot"] {
                assert_eq!(fx.count(&format!("SELECT count(*) FROM {counted}")), 0, "{table}: {counted}");
            }
            assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE status = 'success'"), 0, "{table}");
            if table != "import_batches" {
                assert_eq!(fx.count("SELECT count(*) FROM import_batches WHERE status = 'error'"), 1, "{table}");
            }
        }
    }

    #[test]
    fn test_idle_transaction_aborts() {
        let fx = Fixture::new();
        let path = s1(&fx);
        let timeouts = Timeouts {
            idle_in_tx: Duration::ZERO,
            ..Timeouts::default()
        };
        let err = import_payroll_file(&fx.runtime_with(timeouts), &ImportRequest::new(&path, pay_date(), "tester")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(fx.count("SELECT count(*) FROM employees"), 0);
        assert_eq!(fx.count("SELECT count(*) FROM payroll_transactions"), 0);
    }

    // ---- Period sequence and snapshots ----

    #[test]
    fn test_period_seq_follows_commit_order() {
        let fx = Fixture::new();
        let rt = fx.runtime();
        let mut seqs = Vec::new();
        for (i, day) in ["2025-01-09", "2025-01-23", "2025-02-06", "2025-02-20"].iter().enumerate() {
            let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap();
            let path = fx.write(&format!("p{i}.csv"), &format!("{HEADER}\n2093,Roy Luc,{day},101,{i}.00,\n"));
            seqs.push(import_payroll_file(&rt, &ImportRequest::new(&path, date, "tester")).unwrap().period_seq_in_year);
        }
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
    }

    #[test]
    fn test_snapshot_matches_recompute() {
        let fx = Fixture::new();
        let rt = fx.runtime();
        let a = fx.write("a.csv", &s1_csv());
        let b = fx.write("b.csv", &format!("{HEADER}\n2096,Gagnon Léa,2025-08-28,610,-1500.00,\n"));
        import_payroll_file(&rt, &ImportRequest::new(&a, pay_date(), "tester")).unwrap();
        import_payroll_file(&rt, &ImportRequest::new(&b, pay_date(), "tester")).unwrap();

        let conn = fx.conn();
        let stored = kpi::get_kpi(&conn, pay_date()).unwrap();
        assert_eq!(stored.source, KpiSource::Snapshot);
        assert_eq!(stored.data, kpi::compute(&conn, pay_date()).unwrap());
        assert_eq!(stored.data.cards.nb_transactions, 4);
        assert_eq!(stored.data.tables.anomalies.len(), 1);
    }
}
