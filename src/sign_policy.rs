use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::{PaieError, Result};
use crate::mapper::CanonicalRecord;

/// (employee_sign, employer_sign), each -1 or +1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Signs {
    pub employee: i64,
    pub employer: i64,
}

impl Signs {
    pub const IDENTITY: Signs = Signs { employee: 1, employer: 1 };

    pub fn new(employee: i64, employer: i64) -> Result<Self> {
        for (name, sign) in [("employee", employee), ("employer", employer)] {
            if sign != 1 && sign != -1 {
                return Err(PaieError::Other(format!("{name} sign must be -1 or +1, got {sign}")));
            }
        }
        Ok(Self { employee, employer })
    }
}

pub type PolicyMap = HashMap<String, Signs>;

pub fn load_policies(conn: &Connection) -> Result<PolicyMap> {
    let mut stmt = conn.prepare("SELECT pay_code, employee_sign, employer_sign FROM sign_policies")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(code, employee, employer)| Ok((code, Signs::new(employee, employer)?)))
        .collect()
}

/// Derives the normalized cents of every record from its raw cents.
/// Disabled means (+1, +1) for every code, whatever the table says.
/// Recomputing from the raw amounts makes a second application a no-op.
pub fn apply(records: &mut [CanonicalRecord], policies: &PolicyMap, enabled: bool) -> usize {
    let mut flipped = 0;
    for record in records.iter_mut() {
        let signs = if enabled {
            policies.get(&record.pay_code).copied().unwrap_or(Signs::IDENTITY)
        } else {
            Signs::IDENTITY
        };
        if signs != Signs::IDENTITY {
            flipped += 1;
        }
        record.amount_employee_norm_cents = record.amount_employee_cents * signs.employee;
        record.amount_employer_norm_cents = record.amount_employer_cents * signs.employer;
    }
    tracing::debug!(records = records.len(), flipped, enabled, "sign policy applied");
    flipped
}

// ---------------------------------------------------------------------------
// Reference table maintenance
// ---------------------------------------------------------------------------

pub fn set_sign_policy(conn: &Connection, pay_code: &str, signs: Signs) -> Result<()> {
    conn.execute(
        "INSERT INTO sign_policies (pay_code, employee_sign, employer_sign) VALUES (?1, ?2, ?3)
         ON CONFLICT(pay_code) DO UPDATE SET employee_sign = excluded.employee_sign, employer_sign = excluded.employer_sign",
        rusqlite::params![pay_code.trim(), signs.employee, signs.employer],
    )?;
    Ok(())
}

pub fn list_sign_policies(conn: &Connection) -> Result<Vec<(String, Signs)>> {
    let mut list: Vec<(String, Signs)> = load_policies(conn)?.into_iter().collect();
    list.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;
    use proptest::prelude::*;

    fn record(code: &str, employee: i64, employer: i64) -> CanonicalRecord {
        CanonicalRecord {
            source_row_no: 2,
            line_no: None,
            job_category: None,
            job_code: None,
            job_title: None,
            pay_date: None,
            matricule: "2093".into(),
            employee_name: None,
            pay_category: None,
            pay_code: code.into(),
            pay_code_description: None,
            budget_post: None,
            budget_post_description: None,
            amount_employee_cents: employee,
            amount_employer_cents: employer,
            amount_combined_cents: 0,
            amount_employee_norm_cents: employee,
            amount_employer_norm_cents: employer,
        }
    }

    #[test]
    fn test_apply_uses_table_and_defaults() {
        let mut policies = PolicyMap::new();
        policies.insert("610".into(), Signs::new(-1, 1).unwrap());
        let mut records = vec![record("610", 2500, 900), record("101", 150000, 0)];
        assert_eq!(apply(&mut records, &policies, true), 1);
        assert_eq!(records[0].amount_employee_norm_cents, -2500);
        assert_eq!(records[0].amount_employer_norm_cents, 900);
        assert_eq!(records[1].amount_employee_norm_cents, 150000);
    }

    #[test]
    fn test_disabled_policy_keeps_signs() {
        let mut policies = PolicyMap::new();
        policies.insert("610".into(), Signs::new(-1, -1).unwrap());
        let mut records = vec![record("610", 2500, -900)];
        assert_eq!(apply(&mut records, &policies, false), 0);
        assert_eq!(records[0].amount_employee_norm_cents, 2500);
        assert_eq!(records[0].amount_employer_norm_cents, -900);
    }

    #[test]
    fn test_signs_must_be_unit() {
        assert!(Signs::new(0, 1).is_err());
        assert!(Signs::new(1, 2).is_err());
    }

    #[test]
    fn test_set_and_list_policies() {
        let (_dir, conn) = test_db();
        set_sign_policy(&conn, "610", Signs::new(-1, 1).unwrap()).unwrap();
        set_sign_policy(&conn, "101", Signs::IDENTITY).unwrap();
        set_sign_policy(&conn, "610", Signs::new(-1, -1).unwrap()).unwrap();
        let list = list_sign_policies(&conn).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].0, "101");
        assert_eq!(list[1].1, Signs::new(-1, -1).unwrap());
    }

    proptest! {
        #[test]
        fn prop_apply_is_idempotent(
            amounts in proptest::collection::vec((-10_000_000i64..10_000_000, -10_000_000i64..10_000_000, 0usize..3), 0..30),
            employee_sign in prop_oneof![Just(-1i64), Just(1i64)],
            employer_sign in prop_oneof![Just(-1i64), Just(1i64)],
            enabled in any::<bool>(),
        ) {
            let codes = ["101", "610", "999"];
            let mut policies = PolicyMap::new();
            policies.insert("610".into(), Signs::new(employee_sign, employer_sign).unwrap());
            let mut once: Vec<CanonicalRecord> =
                amounts.iter().map(|(e, r, c)| record(codes[*c], *e, *r)).collect();
            apply(&mut once, &policies, enabled);
            let mut twice = once.clone();
            apply(&mut twice, &policies, enabled);
            prop_assert_eq!(once, twice);
        }
    }
}
