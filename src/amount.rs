//! Locale-aware amount parsing for fr-CA payroll exports.
//!
//! Cents conversion (`to_cents`) is the single place where precision is
//! dropped: values are rounded half away from zero to whole cents.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::workbook::Cell;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("AMOUNT_INVALID: {0:?}")]
pub struct AmountInvalid(pub String);

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("valid regex"))
}

fn grouped_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?\d{1,3}(\.\d{3})+$").expect("valid regex"))
}

const SPACES: &[char] = &[' ', '\u{00A0}', '\u{202F}', '\u{2009}', '\t'];

/// Parses a textual amount. Blank input is the caller's business and is
/// reported as invalid here.
pub fn parse_amount(raw: &str) -> Result<Decimal, AmountInvalid> {
    let invalid = || AmountInvalid(raw.to_string());

    let mut s: String = raw.chars().filter(|c| !SPACES.contains(c)).collect();
    s = s.replace('$', "");
    for token in ["CAD", "cad", "CA", "ca"] {
        s = s.replace(token, "");
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        if inner.contains(['+', '-', '(', ')']) {
            return Err(invalid());
        }
        negative = true;
        s = inner.to_string();
    } else if s.contains(['(', ')']) {
        return Err(invalid());
    }

    let commas = s.matches(',').count();
    let dots = s.matches('.').count();
    let normalized = match (commas, dots) {
        (0, 0) | (0, 1) => s,
        (0, _) => return Err(invalid()),
        (1, 0) => s.replace(',', "."),
        (1, _) => {
            let (int_part, frac) = s.split_once(',').ok_or_else(invalid)?;
            if frac.contains('.') || !grouped_re().is_match(int_part) {
                return Err(invalid());
            }
            format!("{}.{}", int_part.replace('.', ""), frac)
        }
        _ => return Err(invalid()),
    };

    if !number_re().is_match(&normalized) {
        return Err(invalid());
    }
    let normalized = normalized.replace("-.", "-0.").replace("+.", "0.");
    let normalized = normalized.strip_prefix('+').unwrap_or(&normalized);
    let normalized = if normalized.starts_with('.') {
        format!("0{normalized}")
    } else {
        normalized.to_string()
    };
    let value = Decimal::from_str(normalized.trim_end_matches('.')).map_err(|_| invalid())?;
    Ok(if negative { -value } else { value })
}

/// Parses a spreadsheet cell. `Ok(None)` means the cell was empty.
pub fn parse_cell(cell: &Cell) -> Result<Option<Decimal>, AmountInvalid> {
    match cell {
        Cell::Empty => Ok(None),
        Cell::Int(i) => Ok(Some(Decimal::from(*i))),
        Cell::Number(f) => Decimal::from_f64(*f)
            .map(Some)
            .ok_or_else(|| AmountInvalid(f.to_string())),
        Cell::Text(s) if s.trim().is_empty() => Ok(None),
        Cell::Text(s) => parse_amount(s).map(Some),
        other => Err(AmountInvalid(other.to_string())),
    }
}

/// Dollars to signed integer cents, half away from zero.
pub fn to_cents(value: Decimal) -> Result<i64, AmountInvalid> {
    value
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| AmountInvalid(value.to_string()))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AmountInvalid(value.to_string()))
}

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
