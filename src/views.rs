use rusqlite::Connection;

use crate::error::{ErrorKind, Result};

/// A reporting table rebuilt from the fact table after each import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportView {
    pub name: &'static str,
    pub select: &'static str,
}

pub const MONTHLY_PAYROLL_SUMMARY: ReportView = ReportView {
    name: "v_monthly_payroll_summary",
    select: "SELECT t.pay_date, e.employee_id, e.matricule, e.nom, e.prenom,
                    SUM(t.amount_employee_norm_cents),
                    SUM(t.amount_employer_norm_cents),
                    SUM(t.amount_employee_norm_cents + t.amount_employer_norm_cents),
                    COUNT(*)
             FROM payroll_transactions t
             JOIN employees e ON e.employee_id = t.employee_id
             GROUP BY t.pay_date, e.employee_id",
};

pub const EMPLOYEE_CURRENT_SALARY: ReportView = ReportView {
    name: "v_employee_current_salary",
    select: "SELECT e.employee_id, e.matricule, e.nom, e.prenom, e.statut, l.pay_date,
                    (SELECT SUM(t.amount_employee_norm_cents) FROM payroll_transactions t
                     WHERE t.employee_id = e.employee_id AND t.pay_date = l.pay_date)
             FROM employees e
             LEFT JOIN (
                 SELECT employee_id, MAX(pay_date) AS pay_date FROM payroll_transactions GROUP BY employee_id
             ) l ON l.employee_id = e.employee_id
             WHERE e.statut = 'actif'",
};

pub const EMPLOYEE_ANNUAL_HISTORY: ReportView = ReportView {
    name: "v_employee_annual_history",
    select: "SELECT CAST(substr(t.pay_date, 1, 4) AS INTEGER), e.employee_id, e.matricule, e.nom, e.prenom,
                    SUM(t.amount_employee_norm_cents),
                    SUM(t.amount_employer_norm_cents),
                    SUM(t.amount_employee_norm_cents + t.amount_employer_norm_cents),
                    COUNT(DISTINCT t.pay_date)
             FROM payroll_transactions t
             JOIN employees e ON e.employee_id = t.employee_id
             GROUP BY substr(t.pay_date, 1, 4), e.employee_id",
};

pub const DEFAULT_VIEWS: [ReportView; 3] = [
    MONTHLY_PAYROLL_SUMMARY,
    EMPLOYEE_CURRENT_SALARY,
    EMPLOYEE_ANNUAL_HISTORY,
];

/// Rebuilds one view in its own transaction; readers keep the previous
/// content until the commit.
pub fn refresh_view(conn: &Connection, view: &ReportView) -> Result<usize> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let rebuilt = conn
        .execute(&format!("DELETE FROM {}", view.name), [])
        .and_then(|_| conn.execute(&format!("INSERT INTO {} {}", view.name, view.select), []));
    match rebuilt {
        Ok(rows) => {
            conn.execute_batch("COMMIT")?;
            Ok(rows)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e.into())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewRefresher {
    views: Vec<ReportView>,
}

impl Default for ViewRefresher {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWS.to_vec())
    }
}

impl ViewRefresher {
    pub fn new(views: Vec<ReportView>) -> Self {
        Self { views }
    }

    /// Refreshes every view. A failing view is logged and skipped; returns
    /// the names of the views that refreshed.
    pub fn refresh_all(&self, conn: &Connection) -> Vec<&'static str> {
        let mut done = Vec::with_capacity(self.views.len());
        for view in &self.views {
            match refresh_view(conn, view) {
                Ok(rows) => {
                    tracing::debug!(view = view.name, rows, "view refreshed");
                    done.push(view.name);
                }
                Err(e) => {
                    tracing::warn!(
                        code = ErrorKind::ViewRefreshFailed.code(),
                        view = view.name,
                        error = %e,
                        "view refresh failed"
                    );
                }
            }
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO pay_periods (period_id, pay_date, pay_year, pay_month, period_seq_in_year, created_at) VALUES
                (1, '2025-08-14', 2025, 8, 1, 'now'), (2, '2025-08-28', 2025, 8, 2, 'now');
             INSERT INTO employees (employee_id, matricule, nom, nom_norm, created_at, updated_at) VALUES
                (1, '2093', 'Tremblay', 'tremblay', 'now', 'now'),
                (2, '2094', 'Roy', 'roy', 'now', 'now');
             INSERT INTO pay_codes (pay_code, label, category, created_at, updated_at) VALUES ('101', 'Salaire', 'Gains', 'now', 'now');
             INSERT INTO budget_posts (budget_post_id, code, created_at, updated_at) VALUES (1, 'N/A', 'now', 'now');
             INSERT INTO import_batches (batch_id, file_name, checksum, period_id, pay_date, rows_count, status, imported_by, imported_at) VALUES
                (1, 'a.csv', 'aaa', 1, '2025-08-14', 1, 'success', 'u', 'now'),
                (2, 'b.csv', 'bbb', 2, '2025-08-28', 2, 'success', 'u', 'now');
             INSERT INTO payroll_transactions (batch_id, pay_date, employee_id, period_id, pay_code, budget_post_id, amount_employee_norm_cents, amount_employer_norm_cents, source_file, source_row_no, created_at) VALUES
                (1, '2025-08-14', 1, 1, '101', 1, 100000, 1000, 'a.csv', 2, 'now'),
                (2, '2025-08-28', 1, 2, '101', 1, 120000, 1200, 'b.csv', 2, 'now'),
                (2, '2025-08-28', 1, 2, '101', 1, -20000, 0, 'b.csv', 3, 'now');",
        )
        .unwrap();
    }

    #[test]
    fn test_refresh_all_builds_views() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let done = ViewRefresher::default().refresh_all(&conn);
        assert_eq!(done.len(), 3);

        let monthly: i64 = conn.query_row("SELECT count(*) FROM v_monthly_payroll_summary", [], |r| r.get(0)).unwrap();
        assert_eq!(monthly, 2);

        let (last_date, last_net): (Option<String>, Option<i64>) = conn
            .query_row(
                "SELECT last_pay_date, last_net_cents FROM v_employee_current_salary WHERE matricule = '2093'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(last_date.as_deref(), Some("2025-08-28"));
        assert_eq!(last_net, Some(100000));

        let never_paid: Option<String> = conn
            .query_row("SELECT last_pay_date FROM v_employee_current_salary WHERE matricule = '2094'", [], |r| r.get(0))
            .unwrap();
        assert!(never_paid.is_none());

        let (year, periods, total): (i64, i64, i64) = conn
            .query_row(
                "SELECT year, pay_periods_count, annual_employee_cents FROM v_employee_annual_history",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!((year, periods, total), (2025, 2, 200000));
    }

    #[test]
    fn test_refresh_is_repeatable() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let refresher = ViewRefresher::default();
        refresher.refresh_all(&conn);
        refresher.refresh_all(&conn);
        let monthly: i64 = conn.query_row("SELECT count(*) FROM v_monthly_payroll_summary", [], |r| r.get(0)).unwrap();
        assert_eq!(monthly, 2);
    }

    #[test]
    fn test_failing_view_is_skipped() {
        let (_dir, conn) = test_db();
        seed(&conn);
        let broken = ReportView {
            name: "v_missing",
            select: "SELECT 1",
        };
        let refresher = ViewRefresher::new(vec![broken, MONTHLY_PAYROLL_SUMMARY]);
        assert_eq!(refresher.refresh_all(&conn), vec!["v_monthly_payroll_summary"]);
        assert!(conn.is_autocommit());
    }
}
