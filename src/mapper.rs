use chrono::NaiveDate;
use serde::Serialize;

use crate::amount::{parse_cell, to_cents};
use crate::dates::{detect_date_system, parse_cell_date, serial_value, DateSystem};
use crate::error::ImportError;
use crate::headers::{normalize_header, Field, HeaderMapping};
use crate::workbook::{Cell, Table};

/// Budget post code used when a row carries none.
pub const NO_BUDGET_POST: &str = "N/A";

/// Block labels some exports interleave between data rows.
const CATEGORY_MARKERS: &[&str] = &["gains", "syndicats", "assurances", "deductions legales"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefectKind {
    AmountInvalid,
    DateInvalid,
    MatriculeMissing,
    PayCodeMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowDefect {
    pub row_no: usize,
    pub field: Field,
    pub kind: DefectKind,
    pub value: Option<String>,
}

impl RowDefect {
    /// Hard defects abort the import.
    pub fn is_hard(&self) -> bool {
        self.field.is_critical()
    }
}

/// One payroll line, typed. Amounts are integer cents as read from the file;
/// the `*_norm_cents` pair is what the sign policy derives from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub source_row_no: usize,
    pub line_no: Option<String>,
    pub job_category: Option<String>,
    pub job_code: Option<String>,
    pub job_title: Option<String>,
    pub pay_date: Option<NaiveDate>,
    pub matricule: String,
    pub employee_name: Option<String>,
    pub pay_category: Option<String>,
    pub pay_code: String,
    pub pay_code_description: Option<String>,
    pub budget_post: Option<String>,
    pub budget_post_description: Option<String>,
    pub amount_employee_cents: i64,
    pub amount_employer_cents: i64,
    pub amount_combined_cents: i64,
    pub amount_employee_norm_cents: i64,
    pub amount_employer_norm_cents: i64,
}

impl CanonicalRecord {
    pub fn budget_post_code(&self) -> &str {
        self.budget_post.as_deref().unwrap_or(NO_BUDGET_POST)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapOutput {
    pub records: Vec<CanonicalRecord>,
    pub defects: Vec<RowDefect>,
    pub date_system: DateSystem,
    /// Rows whose own pay date differs from the requested one.
    pub date_mismatches: usize,
    pub dropped_markers: usize,
}

impl MapOutput {
    pub fn hard_defect_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.defects.iter().filter(|d| d.is_hard()).map(|d| d.row_no).collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

static EMPTY: Cell = Cell::Empty;

struct RowView<'a> {
    cells: &'a [Cell],
    mapping: &'a HeaderMapping,
}

impl<'a> RowView<'a> {
    fn cell(&self, field: Field) -> &'a Cell {
        self.mapping
            .column(field)
            .and_then(|c| self.cells.get(c))
            .unwrap_or(&EMPTY)
    }

    fn text(&self, field: Field) -> Option<String> {
        self.cell(field).as_trimmed()
    }
}

fn is_category_marker(view: &RowView<'_>) -> bool {
    if view.text(Field::Matricule).is_some() || view.text(Field::PayCode).is_some() {
        return false;
    }
    view.cells
        .iter()
        .filter_map(Cell::as_trimmed)
        .any(|v| CATEGORY_MARKERS.contains(&normalize_header(&v).as_str()))
}

/// Builds canonical records from a table. `date_system` forces an epoch;
/// otherwise it is detected over the whole pay-date column.
pub fn map_rows(
    table: &Table,
    mapping: &HeaderMapping,
    requested: NaiveDate,
    date_system: Option<DateSystem>,
) -> MapOutput {
    let views: Vec<(usize, RowView<'_>)> = table
        .rows
        .iter()
        .map(|(no, cells)| (*no, RowView { cells, mapping }))
        .collect();

    let date_system = date_system.unwrap_or_else(|| {
        let serials: Vec<f64> = views
            .iter()
            .filter_map(|(_, v)| serial_value(v.cell(Field::PayDate)))
            .collect();
        detect_date_system(&serials)
    });

    let mut out = MapOutput {
        records: Vec::new(),
        defects: Vec::new(),
        date_system,
        date_mismatches: 0,
        dropped_markers: 0,
    };

    for (row_no, view) in &views {
        if is_category_marker(view) {
            out.dropped_markers += 1;
            continue;
        }
        let row_no = *row_no;
        let mut defect = |field: Field, kind: DefectKind, cell: &Cell| {
            out.defects.push(RowDefect {
                row_no,
                field,
                kind,
                value: cell.as_trimmed(),
            });
        };

        let matricule = view.text(Field::Matricule);
        if matricule.is_none() {
            defect(Field::Matricule, DefectKind::MatriculeMissing, &Cell::Empty);
        }
        let pay_code = view.text(Field::PayCode);
        if pay_code.is_none() {
            defect(Field::PayCode, DefectKind::PayCodeMissing, &Cell::Empty);
        }

        let employee_cell = view.cell(Field::AmountEmployee);
        let amount_employee = match parse_cell(employee_cell).map(|v| v.map(to_cents)) {
            Ok(Some(Ok(cents))) => Some(cents),
            _ => {
                defect(Field::AmountEmployee, DefectKind::AmountInvalid, employee_cell);
                None
            }
        };
        let mut soft_amount = |field: Field| -> i64 {
            let cell = view.cell(field);
            match parse_cell(cell).map(|v| v.map(to_cents)) {
                Ok(None) => 0,
                Ok(Some(Ok(cents))) => cents,
                _ => {
                    defect(field, DefectKind::AmountInvalid, cell);
                    0
                }
            }
        };
        let amount_employer = soft_amount(Field::AmountEmployer);
        let amount_combined = soft_amount(Field::AmountCombined);

        let date_cell = view.cell(Field::PayDate);
        let pay_date = parse_cell_date(date_cell, date_system);
        if pay_date.is_none() && !date_cell.is_empty() {
            defect(Field::PayDate, DefectKind::DateInvalid, date_cell);
        }
        if pay_date.map_or(false, |d| d != requested) {
            out.date_mismatches += 1;
        }

        let (Some(matricule), Some(pay_code), Some(amount_employee)) = (matricule, pay_code, amount_employee)
        else {
            continue;
        };
        out.records.push(CanonicalRecord {
            source_row_no: row_no,
            line_no: view.text(Field::LineNo),
            job_category: view.text(Field::JobCategory),
            job_code: view.text(Field::JobCode),
            job_title: view.text(Field::JobTitle),
            pay_date,
            matricule,
            employee_name: view.text(Field::EmployeeName),
            pay_category: view.text(Field::PayCategory),
            pay_code,
            pay_code_description: view.text(Field::PayCodeDescription),
            budget_post: view.text(Field::BudgetPost),
            budget_post_description: view.text(Field::BudgetPostDescription),
            amount_employee_cents: amount_employee,
            amount_employer_cents: amount_employer,
            amount_combined_cents: amount_combined,
            amount_employee_norm_cents: amount_employee,
            amount_employer_norm_cents: amount_employer,
        });
    }

    if out.date_mismatches > 0 {
        tracing::warn!(
            rows = out.date_mismatches,
            pay_date = %requested,
            "rows carry a pay date different from the requested one"
        );
    }
    if out.dropped_markers > 0 {
        tracing::debug!(rows = out.dropped_markers, "category marker rows dropped");
    }
    out
}

/// Rejects the batch when any row misses a hard-required field, or when
/// nothing is left to import.
pub fn validate(out: &MapOutput) -> Result<(), ImportError> {
    let bad_rows = out.hard_defect_rows();
    if !bad_rows.is_empty() {
        return Err(ImportError::validation_failed(&bad_rows));
    }
    if out.records.is_empty() {
        return Err(ImportError::empty_file());
    }
    Ok(())
}
