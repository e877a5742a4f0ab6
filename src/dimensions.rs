use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::timestamp;
use crate::error::Result;
use crate::headers::strip_accents;
use crate::mapper::CanonicalRecord;

pub const UNCATEGORIZED: &str = "Non catégorisé";

/// `nom` and `prenom` as split from a raw employee name.
#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeName {
    pub nom: String,
    pub prenom: Option<String>,
}

impl EmployeeName {
    /// First whitespace token is the family name, the rest the given names.
    /// An empty name falls back to the matricule.
    pub fn split(raw: Option<&str>, matricule: &str) -> Self {
        let mut tokens = raw.unwrap_or("").split_whitespace();
        match tokens.next() {
            Some(nom) => {
                let rest: Vec<&str> = tokens.collect();
                Self {
                    nom: nom.to_string(),
                    prenom: (!rest.is_empty()).then(|| rest.join(" ")),
                }
            }
            None => Self {
                nom: matricule.to_string(),
                prenom: None,
            },
        }
    }
}

/// Accent-free lowercase form stored next to the raw name.
pub fn normalize_name(s: &str) -> String {
    strip_accents(s).to_lowercase()
}

/// First record per natural key, in file order.
fn distinct_by<'a, K: Ord>(
    records: &'a [CanonicalRecord],
    key: impl Fn(&'a CanonicalRecord) -> K,
) -> BTreeMap<K, &'a CanonicalRecord> {
    let mut out = BTreeMap::new();
    for r in records {
        out.entry(key(r)).or_insert(r);
    }
    out
}

pub fn upsert_employees(
    conn: &Connection,
    records: &[CanonicalRecord],
    now: NaiveDateTime,
) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO employees (matricule, nom, prenom, nom_norm, prenom_norm, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(matricule) DO UPDATE SET
            nom = excluded.nom,
            prenom = excluded.prenom,
            nom_norm = excluded.nom_norm,
            prenom_norm = excluded.prenom_norm,
            updated_at = excluded.updated_at
         RETURNING employee_id",
    )?;
    let ts = timestamp(now);
    // First non-empty name per matricule; a later row may carry the name the first lacked.
    let mut named: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for r in records {
        let slot = named.entry(r.matricule.as_str()).or_insert(None);
        if slot.is_none() {
            *slot = r.employee_name.as_deref();
        }
    }
    let mut ids = HashMap::with_capacity(named.len());
    for (matricule, raw_name) in named {
        let name = EmployeeName::split(raw_name, matricule);
        let id: i64 = stmt.query_row(
            rusqlite::params![
                matricule,
                name.nom,
                name.prenom,
                normalize_name(&name.nom),
                name.prenom.as_deref().map(normalize_name),
                ts
            ],
            |r| r.get(0),
        )?;
        ids.insert(matricule.to_string(), id);
    }
    tracing::debug!(employees = ids.len(), "employees upserted");
    Ok(ids)
}

/// Label and category come from the file when present; a known code keeps
/// its stored values otherwise.
pub fn upsert_pay_codes(conn: &Connection, records: &[CanonicalRecord], now: NaiveDateTime) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO pay_codes (pay_code, label, category, created_at, updated_at)
         VALUES (?1, COALESCE(?2, 'Code ' || ?1), COALESCE(?3, ?4), ?5, ?5)
         ON CONFLICT(pay_code) DO UPDATE SET
            label = COALESCE(?2, pay_codes.label),
            category = COALESCE(?3, pay_codes.category),
            updated_at = excluded.updated_at",
    )?;
    let ts = timestamp(now);
    let codes = distinct_by(records, |r| r.pay_code.as_str());
    for (code, record) in &codes {
        stmt.execute(rusqlite::params![
            code,
            record.pay_code_description,
            record.pay_category,
            UNCATEGORIZED,
            ts
        ])?;
    }
    tracing::debug!(pay_codes = codes.len(), "pay codes upserted");
    Ok(codes.len())
}

pub fn upsert_budget_posts(
    conn: &Connection,
    records: &[CanonicalRecord],
    now: NaiveDateTime,
) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO budget_posts (code, description, created_at, updated_at)
         VALUES (?1, COALESCE(?2, ?1), ?3, ?3)
         ON CONFLICT(code) DO UPDATE SET
            description = COALESCE(?2, budget_posts.description),
            updated_at = excluded.updated_at
         RETURNING budget_post_id",
    )?;
    let ts = timestamp(now);
    let posts = distinct_by(records, |r| r.budget_post_code());
    let mut ids = HashMap::with_capacity(posts.len());
    for (code, record) in posts {
        let id: i64 = stmt.query_row(
            rusqlite::params![code, record.budget_post_description, ts],
            |r| r.get(0),
        )?;
        ids.insert(code.to_string(), id);
    }
    tracing::debug!(budget_posts = ids.len(), "budget posts upserted");
    Ok(ids)
}
