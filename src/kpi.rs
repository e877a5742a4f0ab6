use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::timestamp;
use crate::error::Result;

/// Bumped whenever the snapshot document changes shape.
pub const KPI_VERSION: u32 = 1;

/// Employee amounts below this many cents are reported as anomalies.
pub const ANOMALY_THRESHOLD_CENTS: i64 = -100_000;
const ANOMALY_LIMIT: i64 = 20;
const TOP_LIMIT: i64 = 10;

fn dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

// ---------------------------------------------------------------------------
// Snapshot document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cards {
    pub salaire_net_total: f64,
    pub masse_salariale: f64,
    pub deductions: f64,
    pub masse_employeur: f64,
    pub net_moyen: f64,
    pub nb_employes: i64,
    pub nb_transactions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub matricule: String,
    pub nom: String,
    pub code: String,
    pub montant: f64,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeTotal {
    pub code: String,
    pub label: String,
    pub category: String,
    pub nb_transactions: i64,
    pub total_montant: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTotal {
    pub code: String,
    pub description: String,
    pub nb_transactions: i64,
    pub total_montant: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    pub anomalies: Vec<Anomaly>,
    pub codes_top: Vec<CodeTotal>,
    pub postes_top: Vec<PostTotal>,
    /// Not computed yet; always empty.
    pub nouveaux_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiData {
    pub version: u32,
    pub pay_date: String,
    pub cards: Cards,
    pub tables: Tables,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiSource {
    Snapshot,
    OnTheFly,
}

/// What readers get: the document plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpi {
    #[serde(flatten)]
    pub data: KpiData,
    pub source: KpiSource,
    pub calculated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub pay_date: String,
    pub calculated_at: String,
    pub row_count: i64,
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

fn date_key(pay_date: NaiveDate) -> String {
    pay_date.format("%Y-%m-%d").to_string()
}

fn compute_cards(conn: &Connection, key: &str) -> Result<Cards> {
    let (net, positive, negative, employer, employees, rows): (i64, i64, i64, i64, i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(amount_employee_norm_cents), 0),
            COALESCE(SUM(MAX(amount_employee_norm_cents, 0)), 0),
            COALESCE(SUM(MIN(amount_employee_norm_cents, 0)), 0),
            COALESCE(SUM(amount_employer_norm_cents), 0),
            COUNT(DISTINCT employee_id),
            COUNT(*)
         FROM payroll_transactions WHERE pay_date = ?1",
        [key],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
    )?;
    let net_moyen = if employees == 0 {
        0.0
    } else {
        (net as f64 / employees as f64).round() / 100.0
    };
    Ok(Cards {
        salaire_net_total: dollars(net),
        masse_salariale: dollars(positive),
        deductions: dollars(negative),
        masse_employeur: dollars(employer),
        net_moyen,
        nb_employes: employees,
        nb_transactions: rows,
    })
}

fn anomalies(conn: &Connection, key: &str) -> Result<Vec<Anomaly>> {
    let mut stmt = conn.prepare(
        "SELECT e.matricule, TRIM(e.nom || ' ' || COALESCE(e.prenom, '')), COALESCE(pc.label, t.pay_code),
                t.amount_employee_norm_cents, t.pay_date
         FROM payroll_transactions t
         JOIN employees e ON e.employee_id = t.employee_id
         LEFT JOIN pay_codes pc ON pc.pay_code = t.pay_code
         WHERE t.pay_date = ?1 AND t.amount_employee_norm_cents < ?2
         ORDER BY t.amount_employee_norm_cents ASC, t.transaction_id ASC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![key, ANOMALY_THRESHOLD_CENTS, ANOMALY_LIMIT], |r| {
            Ok(Anomaly {
                matricule: r.get(0)?,
                nom: r.get(1)?,
                code: r.get(2)?,
                montant: dollars(r.get(3)?),
                date: r.get(4)?,
                kind: "Net négatif".to_string(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn codes_top(conn: &Connection, key: &str) -> Result<Vec<CodeTotal>> {
    let mut stmt = conn.prepare(
        "SELECT t.pay_code, COALESCE(pc.label, t.pay_code), COALESCE(pc.category, 'Inconnu'),
                COUNT(*), SUM(t.amount_employee_norm_cents) AS total
         FROM payroll_transactions t
         LEFT JOIN pay_codes pc ON pc.pay_code = t.pay_code
         WHERE t.pay_date = ?1
         GROUP BY t.pay_code
         ORDER BY ABS(total) DESC, t.pay_code ASC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![key, TOP_LIMIT], |r| {
            Ok(CodeTotal {
                code: r.get(0)?,
                label: r.get(1)?,
                category: r.get(2)?,
                nb_transactions: r.get(3)?,
                total_montant: dollars(r.get(4)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn postes_top(conn: &Connection, key: &str) -> Result<Vec<PostTotal>> {
    let mut stmt = conn.prepare(
        "SELECT bp.code, COALESCE(bp.description, bp.code), COUNT(*), SUM(t.amount_employee_norm_cents) AS total
         FROM payroll_transactions t
         JOIN budget_posts bp ON bp.budget_post_id = t.budget_post_id
         WHERE t.pay_date = ?1
         GROUP BY bp.budget_post_id
         ORDER BY ABS(total) DESC, bp.code ASC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![key, TOP_LIMIT], |r| {
            Ok(PostTotal {
                code: r.get(0)?,
                description: r.get(1)?,
                nb_transactions: r.get(2)?,
                total_montant: dollars(r.get(3)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Computes the period's KPI document from the current fact table.
pub fn compute(conn: &Connection, pay_date: NaiveDate) -> Result<KpiData> {
    let key = date_key(pay_date);
    Ok(KpiData {
        version: KPI_VERSION,
        cards: compute_cards(conn, &key)?,
        tables: Tables {
            anomalies: anomalies(conn, &key)?,
            codes_top: codes_top(conn, &key)?,
            postes_top: postes_top(conn, &key)?,
            nouveaux_codes: Vec::new(),
        },
        pay_date: key,
    })
}

/// Recomputes and upserts the snapshot for `pay_date`.
pub fn recompute(conn: &Connection, pay_date: NaiveDate, now: NaiveDateTime) -> Result<KpiData> {
    let data = compute(conn, pay_date)?;
    conn.execute(
        "INSERT INTO kpi_snapshot (period, data, calculated_at, row_count) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(period) DO UPDATE SET data = excluded.data, calculated_at = excluded.calculated_at, row_count = excluded.row_count",
        rusqlite::params![
            data.pay_date,
            serde_json::to_string(&data)?,
            timestamp(now),
            data.cards.nb_transactions
        ],
    )?;
    tracing::info!(
        period = %data.pay_date,
        employees = data.cards.nb_employes,
        rows = data.cards.nb_transactions,
        "kpi snapshot recomputed"
    );
    Ok(data)
}

pub fn load_snapshot(conn: &Connection, pay_date: NaiveDate) -> Result<Option<(KpiData, String)>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT data, calculated_at FROM kpi_snapshot WHERE period = ?1",
            [date_key(pay_date)],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match row {
        Some((json, calculated_at)) => Ok(Some((serde_json::from_str(&json)?, calculated_at))),
        None => Ok(None),
    }
}

/// Stored snapshot when there is one, otherwise computed on the fly.
pub fn get_kpi(conn: &Connection, pay_date: NaiveDate) -> Result<Kpi> {
    if let Some((data, calculated_at)) = load_snapshot(conn, pay_date)? {
        return Ok(Kpi {
            data,
            source: KpiSource::Snapshot,
            calculated_at: Some(calculated_at),
        });
    }
    tracing::debug!(period = %pay_date, "no kpi snapshot, computing on the fly");
    Ok(Kpi {
        data: compute(conn, pay_date)?,
        source: KpiSource::OnTheFly,
        calculated_at: None,
    })
}

/// Newest pay date first.
pub fn list_snapshots(conn: &Connection) -> Result<Vec<SnapshotInfo>> {
    let mut stmt = conn.prepare("SELECT period, calculated_at, row_count FROM kpi_snapshot ORDER BY period DESC")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SnapshotInfo {
                pay_date: r.get(0)?,
                calculated_at: r.get(1)?,
                row_count: r.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
