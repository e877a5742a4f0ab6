//! Pay-date parsing: spreadsheet serials under either epoch, and free text.
//!
//! Nothing here fails. Anything unparseable or outside the plausible window
//! comes back as `None`.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::workbook::Cell;

const SERIAL_MIN: f64 = 1.0;
const SERIAL_MAX: f64 = 100_000.0;

pub fn plausible_min() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default()
}

pub fn plausible_max() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 12, 31).unwrap_or_default()
}

pub fn is_plausible(date: NaiveDate) -> bool {
    date >= plausible_min() && date <= plausible_max()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateSystem {
    /// Serial 1 = 1900-01-01, counted from 1899-12-30 to absorb the leap-year bug.
    Excel1900,
    Excel1904,
}

impl DateSystem {
    pub fn epoch(&self) -> NaiveDate {
        match self {
            Self::Excel1900 => NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default(),
            Self::Excel1904 => NaiveDate::from_ymd_opt(1904, 1, 1).unwrap_or_default(),
        }
    }

    /// Converts a serial, ignoring any time-of-day fraction. No window check.
    pub fn from_serial(&self, serial: f64) -> Option<NaiveDate> {
        if !serial.is_finite() || !(SERIAL_MIN..=SERIAL_MAX).contains(&serial) {
            return None;
        }
        self.epoch().checked_add_signed(Duration::days(serial.floor() as i64))
    }

    fn plausible_count(&self, serials: &[f64]) -> usize {
        serials
            .iter()
            .filter_map(|s| self.from_serial(*s))
            .filter(|d| is_plausible(*d))
            .count()
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1900" => Some(Self::Excel1900),
            "1904" => Some(Self::Excel1904),
            _ => None,
        }
    }
}

/// Chooses the epoch under which more of the series lands in the plausible
/// window. Ties go to the 1900 system.
pub fn detect_date_system(serials: &[f64]) -> DateSystem {
    let score_1900 = DateSystem::Excel1900.plausible_count(serials);
    let score_1904 = DateSystem::Excel1904.plausible_count(serials);
    if score_1904 > score_1900 {
        DateSystem::Excel1904
    } else {
        DateSystem::Excel1900
    }
}

/// Serial value carried by a cell, numeric or numeric text.
pub fn serial_value(cell: &Cell) -> Option<f64> {
    let v = match cell {
        Cell::Number(f) => *f,
        Cell::Int(i) => *i as f64,
        Cell::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (SERIAL_MIN..=SERIAL_MAX).contains(&v).then_some(v)
}

pub fn parse_cell_date(cell: &Cell, system: DateSystem) -> Option<NaiveDate> {
    let date = match cell {
        Cell::Date(d) => Some(*d),
        Cell::Number(_) | Cell::Int(_) => serial_value(cell).and_then(|s| system.from_serial(s)),
        Cell::Text(s) => match serial_value(cell) {
            Some(serial) => system.from_serial(serial),
            None => parse_text_date(s),
        },
        _ => None,
    };
    date.filter(|d| is_plausible(*d))
}

/// Text date, day-first. `YYYY-DD-MM` with an impossible month is swapped
/// back; a `DD-MM-YYYY` with month > 12 is read month-first.
pub fn parse_text_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim().replace('/', "-").replace('.', "-");
    let s = s.split(['T', ' ']).next().unwrap_or_default();
    if s.is_empty() {
        return None;
    }

    if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) {
        let y: i32 = s[0..4].parse().ok()?;
        let m: u32 = s[4..6].parse().ok()?;
        let d: u32 = s[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d).filter(|d| is_plausible(*d));
    }

    let parts: Vec<&str> = s.split('-').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let nums: Vec<u32> = parts.iter().map(|p| p.parse().ok()).collect::<Option<Vec<_>>>()?;

    let date = if parts[0].len() == 4 {
        let (y, a, b) = (nums[0] as i32, nums[1], nums[2]);
        if a > 12 && b <= 12 {
            NaiveDate::from_ymd_opt(y, b, a)
        } else {
            NaiveDate::from_ymd_opt(y, a, b)
        }
    } else if parts[2].len() == 4 {
        let (a, b, y) = (nums[0], nums[1], nums[2] as i32);
        NaiveDate::from_ymd_opt(y, b, a).or_else(|| NaiveDate::from_ymd_opt(y, a, b))
    } else {
        None
    };
    date.filter(|d| is_plausible(*d))
}

/// Strict `YYYY-MM-DD`, as accepted for a requested pay date.
pub fn parse_iso(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_serial_epochs() {
        assert_eq!(DateSystem::Excel1900.from_serial(45667.0), Some(ymd(2025, 1, 10)));
        assert_eq!(DateSystem::Excel1904.from_serial(45667.0), Some(ymd(2029, 1, 11)));
        assert_eq!(DateSystem::Excel1900.from_serial(45667.75), Some(ymd(2025, 1, 10)));
        assert_eq!(DateSystem::Excel1900.from_serial(0.0), None);
        assert_eq!(DateSystem::Excel1900.from_serial(100_001.0), None);
    }

    #[test]
    fn test_detect_prefers_majority() {
        // Only plausible under 1904.
        let early = [31_500.0, 32_000.0, 32_800.0];
        assert_eq!(detect_date_system(&early), DateSystem::Excel1904);
        // Plausible under both: tie goes to 1900.
        let both = [45_000.0, 45_897.0];
        assert_eq!(detect_date_system(&both), DateSystem::Excel1900);
        assert_eq!(detect_date_system(&[]), DateSystem::Excel1900);
    }

    #[test]
    fn test_parse_text_dates() {
        assert_eq!(parse_text_date("2025-08-28"), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_text_date("2025/08/28"), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_text_date("28/08/2025"), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_text_date("05/08/2025"), Some(ymd(2025, 8, 5)));
        assert_eq!(parse_text_date("08/28/2025"), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_text_date("2025-08-28 00:00:00"), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_text_date("20250828"), Some(ymd(2025, 8, 28)));
    }

    #[test]
    fn test_parse_text_swapped_day_month() {
        assert_eq!(parse_text_date("2025-28-08"), Some(ymd(2025, 8, 28)));
    }

    #[test]
    fn test_parse_iso_is_strict() {
        assert_eq!(parse_iso(" 2025-08-28 "), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_iso("28/08/2025"), None);
        assert_eq!(parse_iso("2025-02-30"), None);
    }

    #[test]
    fn test_out_of_window_is_none() {
        assert_eq!(parse_text_date("1985-01-01"), None);
        assert_eq!(parse_text_date("2101-01-01"), None);
        assert_eq!(parse_text_date("pas une date"), None);
        assert_eq!(parse_cell_date(&Cell::Number(100.0), DateSystem::Excel1900), None);
    }

    #[test]
    fn test_parse_cell_date() {
        let sys = DateSystem::Excel1900;
        assert_eq!(parse_cell_date(&Cell::Date(ymd(2025, 8, 28)), sys), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_cell_date(&Cell::Number(45897.0), sys), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_cell_date(&Cell::Text("45897".into()), sys), Some(ymd(2025, 8, 28)));
        assert_eq!(parse_cell_date(&Cell::Empty, sys), None);
    }

    proptest! {
        #[test]
        fn prop_detection_stable_when_adding_agreeing_row(
            serials in proptest::collection::vec(1.0f64..80_000.0, 0..60),
            extra in 1.0f64..80_000.0,
        ) {
            let chosen = detect_date_system(&serials);
            let agrees = chosen.from_serial(extra).map_or(false, is_plausible);
            let mut grown = serials.clone();
            grown.push(extra);
            if agrees {
                prop_assert_eq!(detect_date_system(&grown), chosen);
            }
            prop_assert_eq!(detect_date_system(&serials), chosen);
        }
    }
}
