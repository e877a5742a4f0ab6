//! Reading payroll files into a cell grid, choosing the best sheet, and
//! locating the header row.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;

use crate::amount::parse_amount;
use crate::dates::parse_text_date;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Int(i64),
    Bool(bool),
    Date(NaiveDate),
    Error(String),
}

impl Cell {
    pub fn text(s: &str) -> Self {
        if s.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed string form; whole floats lose their `.0` (`2093.0` → `2093`).
    pub fn as_trimmed(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Cell::Number(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
            other => Some(other.to_string()),
        }
    }

    fn looks_like_data(&self) -> bool {
        match self {
            Cell::Empty => false,
            Cell::Number(_) | Cell::Int(_) | Cell::Date(_) | Cell::Bool(_) => true,
            Cell::Error(_) => false,
            Cell::Text(s) => looks_like_data_value(s),
        }
    }

    fn is_numeric(&self) -> bool {
        match self {
            Cell::Number(_) | Cell::Int(_) | Cell::Date(_) => true,
            Cell::Text(s) => parse_amount(s).is_ok(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::Error(e) => write!(f, "#{e}"),
        }
    }
}

/// Numbers, dates, `Nom, Prénom` names, dashed codes and long descriptions
/// read as data rather than header labels.
pub fn looks_like_data_value(raw: &str) -> bool {
    let v = raw.trim();
    if v.is_empty() {
        return false;
    }
    if parse_amount(v).is_ok() || parse_text_date(v).is_some() {
        return true;
    }
    if v.contains(',') && v.contains(' ') && v.split_whitespace().count() >= 2 {
        return true;
    }
    if v.split('-').count() >= 3 {
        return true;
    }
    v.chars().count() > 30
}

// ---------------------------------------------------------------------------
// Sheets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    /// Spreadsheet row number (1-based) of `rows[0]`.
    pub first_row_no: usize,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Excel,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "txt" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xls" | "xlsb" => Some(Self::Excel),
            _ => None,
        }
    }
}

pub fn read_sheets(path: &Path, format: FileFormat) -> Result<Vec<Sheet>> {
    match format {
        FileFormat::Csv => Ok(vec![read_csv(path)?]),
        FileFormat::Excel => read_excel(path),
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// UTF-8 (with or without BOM), falling back to Latin-1.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|b| *b as char).collect(),
    }
}

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Picks the delimiter whose per-line count is most consistent over the
/// first lines; a higher count breaks ties.
pub fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).take(10).collect();
    if lines.is_empty() {
        return b',';
    }
    let mut best = (b',', 0.0f64, 0usize);
    for delim in DELIMITERS {
        let counts: Vec<usize> = lines
            .iter()
            .map(|l| l.bytes().filter(|b| *b == delim).count())
            .collect();
        let mut freq: std::collections::BTreeMap<usize, usize> = std::collections::BTreeMap::new();
        for c in counts.iter().filter(|c| **c > 0) {
            *freq.entry(*c).or_default() += 1;
        }
        let Some((mode, hits)) = freq.iter().max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0))) else {
            continue;
        };
        let consistency = *hits as f64 / lines.len() as f64;
        if consistency > best.1 || (consistency == best.1 && *mode > best.2) {
            best = (delim, consistency, *mode);
        }
    }
    best.0
}

fn read_csv(path: &Path) -> Result<Sheet> {
    let text = decode_text(&std::fs::read(path)?);
    let delimiter = sniff_delimiter(&text);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(Cell::text).collect());
    }
    tracing::debug!(delimiter = %(delimiter as char), rows = rows.len(), "read csv");
    Ok(Sheet {
        name: path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("csv")
            .to_string(),
        first_row_no: 1,
        rows,
    })
}

// ---------------------------------------------------------------------------
// Excel
// ---------------------------------------------------------------------------

fn read_excel(path: &Path) -> Result<Vec<Sheet>> {
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto(path)?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        let first_row_no = range.start().map_or(1, |(r, _)| r as usize + 1);
        let rows = range
            .rows()
            .map(|row| row.iter().map(excel_cell).collect())
            .collect();
        sheets.push(Sheet {
            name,
            first_row_no,
            rows,
        });
    }
    Ok(sheets)
}

fn excel_cell(data: &calamine::Data) -> Cell {
    use calamine::Data;
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::text(s),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Int(*i),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(d) => Cell::Date(d.date()),
            None => Cell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => parse_text_date(s).map_or_else(|| Cell::text(s), Cell::Date),
        Data::DurationIso(s) => Cell::text(s),
        Data::Error(e) => Cell::Error(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Sheet picker and header detection
// ---------------------------------------------------------------------------

/// 0.6 × min(non-empty columns / 10, 1) + 0.4 × cell density.
pub fn tabularity_score(sheet: &Sheet) -> f64 {
    let width = sheet.width();
    if sheet.rows.is_empty() || width == 0 {
        return 0.0;
    }
    let non_empty_cols = (0..width)
        .filter(|c| sheet.rows.iter().any(|r| r.get(*c).map_or(false, |cell| !cell.is_empty())))
        .count();
    let filled: usize = sheet
        .rows
        .iter()
        .map(|r| r.iter().filter(|c| !c.is_empty()).count())
        .sum();
    let total = sheet.rows.len() * width;
    let col_score = (non_empty_cols as f64 / 10.0).min(1.0);
    col_score * 0.6 + (filled as f64 / total as f64) * 0.4
}

/// Index and score of the most tabular sheet; the first one wins ties.
pub fn pick_sheet(sheets: &[Sheet]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, sheet) in sheets.iter().enumerate() {
        let score = tabularity_score(sheet);
        tracing::debug!(sheet = %sheet.name, score, "sheet tabularity");
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best
}

pub const HEADER_SCAN_ROWS: usize = 10;

pub fn header_row_score(rows: &[Vec<Cell>], idx: usize) -> f64 {
    let values: Vec<&Cell> = rows[idx].iter().filter(|c| !c.is_empty()).collect();
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;

    let unique: HashSet<String> = values.iter().map(|c| c.to_string().trim().to_string()).collect();
    let unique_ratio = unique.len() as f64 / n;

    let textual = values
        .iter()
        .filter(|c| match c {
            Cell::Text(s) => s.chars().any(char::is_alphabetic) && !c.looks_like_data(),
            _ => false,
        })
        .count() as f64
        / n;

    let next_numeric = rows
        .get(idx + 1)
        .map(|next| {
            let filled: Vec<&Cell> = next.iter().filter(|c| !c.is_empty()).collect();
            if filled.is_empty() {
                0.0
            } else {
                filled.iter().filter(|c| c.is_numeric()).count() as f64 / filled.len() as f64
            }
        })
        .unwrap_or(0.0);

    let avg_len = values.iter().map(|c| c.to_string().trim().chars().count()).sum::<usize>() as f64 / n;
    let length_score = 1.0 - (avg_len / 20.0).min(1.0);

    unique_ratio * 0.3 + textual * 0.4 + next_numeric * 0.2 + length_score * 0.1
}

/// Highest-scoring row among the first ten; earlier rows win ties.
pub fn detect_header_row(rows: &[Vec<Cell>]) -> usize {
    let mut best_row = 0;
    let mut best_score = 0.0;
    for idx in 0..rows.len().min(HEADER_SCAN_ROWS) {
        let score = header_row_score(rows, idx);
        if score > best_score {
            best_score = score;
            best_row = idx;
        }
    }
    tracing::debug!(row = best_row, score = best_score, "header row detected");
    best_row
}

/// A sheet cut at its header row.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub sheet: String,
    pub sheet_score: f64,
    pub header_row_no: usize,
    pub headers: Vec<String>,
    /// (source row number, cells), blank rows dropped.
    pub rows: Vec<(usize, Vec<Cell>)>,
}

pub fn choose_table(sheets: Vec<Sheet>) -> Option<Table> {
    let (idx, sheet_score) = pick_sheet(&sheets)?;
    let sheet = sheets.into_iter().nth(idx)?;
    let header_idx = detect_header_row(&sheet.rows);
    let headers = sheet
        .rows
        .get(header_idx)
        .map(|r| r.iter().map(|c| c.to_string().trim().to_string()).collect())
        .unwrap_or_default();
    let first_row_no = sheet.first_row_no;
    let rows = sheet
        .rows
        .into_iter()
        .enumerate()
        .skip(header_idx + 1)
        .filter(|(_, r)| r.iter().any(|c| !c.is_empty()))
        .map(|(i, r)| (first_row_no + i, r))
        .collect();
    tracing::info!(sheet = %sheet.name, score = sheet_score, header_row = first_row_no + header_idx, "table selected");
    Some(Table {
        sheet: sheet.name,
        sheet_score,
        header_row_no: first_row_no + header_idx,
        headers,
        rows,
    })
}
