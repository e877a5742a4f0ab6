use std::collections::BTreeMap;

use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::ImportError;

pub const ACCEPT_CONFIDENCE: f64 = 0.75;
pub const REVIEW_CONFIDENCE: f64 = 0.50;

/// The 15 logical columns of a payroll export, in positional order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    LineNo,
    JobCategory,
    JobCode,
    JobTitle,
    PayDate,
    Matricule,
    EmployeeName,
    PayCategory,
    PayCode,
    PayCodeDescription,
    BudgetPost,
    BudgetPostDescription,
    AmountEmployee,
    AmountEmployer,
    AmountCombined,
}

impl Field {
    pub const ALL: [Field; 15] = [
        Field::LineNo,
        Field::JobCategory,
        Field::JobCode,
        Field::JobTitle,
        Field::PayDate,
        Field::Matricule,
        Field::EmployeeName,
        Field::PayCategory,
        Field::PayCode,
        Field::PayCodeDescription,
        Field::BudgetPost,
        Field::BudgetPostDescription,
        Field::AmountEmployee,
        Field::AmountEmployer,
        Field::AmountCombined,
    ];

    pub const CRITICAL: [Field; 3] = [Field::Matricule, Field::PayCode, Field::AmountEmployee];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LineNo => "line_no",
            Self::JobCategory => "job_category",
            Self::JobCode => "job_code",
            Self::JobTitle => "job_title",
            Self::PayDate => "pay_date",
            Self::Matricule => "matricule",
            Self::EmployeeName => "employee_name",
            Self::PayCategory => "pay_category",
            Self::PayCode => "pay_code",
            Self::PayCodeDescription => "pay_code_description",
            Self::BudgetPost => "budget_post",
            Self::BudgetPostDescription => "budget_post_description",
            Self::AmountEmployee => "amount_employee",
            Self::AmountEmployer => "amount_employer",
            Self::AmountCombined => "amount_combined",
        }
    }

    pub fn is_critical(&self) -> bool {
        Self::CRITICAL.contains(self)
    }

    /// Accepted header spellings, already in normalized form.
    fn synonyms(&self) -> &'static [&'static str] {
        match self {
            Self::LineNo => &["n de ligne", "no de ligne", "n° de ligne", "numero de ligne", "ligne", "line no"],
            Self::JobCategory => &["categorie demploi", "categorie d emploi", "categorie emploi", "job category"],
            Self::JobCode => &["code emploi", "code demploi", "job code"],
            Self::JobTitle => &["titre demploi", "titre d emploi", "titre emploi", "job title"],
            Self::PayDate => &["date de paie", "date paie", "date de paye", "pay date", "date"],
            Self::Matricule => &["matricule", "matricule employe", "no employe", "numero employe", "employee id"],
            Self::EmployeeName => &["employe", "nom employe", "nom de lemploye", "nom", "nom et prenom", "employee name"],
            Self::PayCategory => &["categorie de paie", "categorie paie", "pay category"],
            Self::PayCode => &["code de paie", "code paie", "code de paye", "pay code", "code"],
            Self::PayCodeDescription => &[
                "description du code de paie",
                "description code de paie",
                "desc code de paie",
                "description",
                "pay code description",
            ],
            Self::BudgetPost => &["poste budgetaire", "poste budget", "budget post"],
            Self::BudgetPostDescription => &[
                "desc poste budgetaire",
                "description poste budgetaire",
                "description du poste budgetaire",
            ],
            Self::AmountEmployee => &["montant", "montant employe", "montant net", "amount", "amount employee"],
            Self::AmountEmployer => &["part employeur", "montant employeur", "employer share", "amount employer"],
            Self::AmountCombined => &["mnt cmb", "mntcmb", "montant combine", "amount combined"],
        }
    }
}

const PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '\'', '"'];

/// trim, unify spaces, strip accents, lowercase, drop punctuation, turn
/// `/ - _` into spaces, collapse whitespace.
pub fn normalize_header(raw: &str) -> String {
    let spaced: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '\u{00A0}' | '\u{202F}' | '\t' => ' ',
            c => c,
        })
        .collect();
    let folded = strip_accents(&spaced).to_lowercase();
    let cleaned: String = folded
        .chars()
        .filter(|c| !PUNCTUATION.contains(c))
        .map(|c| if matches!(c, '/' | '-' | '_') { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

/// Best confidence that a normalized header means `field`.
pub fn field_confidence(normalized: &str, field: Field) -> f64 {
    if normalized.is_empty() {
        return 0.0;
    }
    field
        .synonyms()
        .iter()
        .map(|syn| {
            if *syn == normalized {
                1.0
            } else {
                strsim::normalized_levenshtein(normalized, syn)
            }
        })
        .fold(0.0, f64::max)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderMapping {
    /// Field → zero-based column index.
    pub columns: BTreeMap<Field, usize>,
    pub confidence: BTreeMap<Field, f64>,
    /// Accepted with confidence in [0.50, 0.75).
    pub review: Vec<Field>,
    pub positional: bool,
}

impl HeaderMapping {
    pub fn column(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    fn positional(width: usize) -> Self {
        let columns: BTreeMap<Field, usize> =
            Field::ALL.iter().take(width).enumerate().map(|(i, f)| (*f, i)).collect();
        let confidence = columns.keys().map(|f| (*f, 1.0)).collect();
        Self {
            columns,
            confidence,
            review: Vec::new(),
            positional: true,
        }
    }
}

/// Maps raw header cells to canonical fields. Exact synonym matches win,
/// then the closest fuzzy matches, one column per field.
pub fn map_headers(headers: &[String]) -> Result<HeaderMapping, ImportError> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

    let mut candidates: Vec<(f64, usize, Field)> = Vec::new();
    for (col, norm) in normalized.iter().enumerate() {
        for field in Field::ALL {
            let score = field_confidence(norm, field);
            if score >= REVIEW_CONFIDENCE {
                candidates.push((score, col, field));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut columns = BTreeMap::new();
    let mut confidence = BTreeMap::new();
    let mut used = vec![false; headers.len()];
    for (score, col, field) in candidates {
        if used[col] || columns.contains_key(&field) {
            continue;
        }
        used[col] = true;
        columns.insert(field, col);
        confidence.insert(field, score);
    }

    let missing: Vec<&str> = Field::CRITICAL
        .iter()
        .filter(|f| !columns.contains_key(f))
        .map(|f| f.name())
        .collect();
    if !missing.is_empty() {
        let width = normalized.iter().rposition(|n| !n.is_empty()).map_or(0, |i| i + 1);
        if width == Field::ALL.len() {
            tracing::info!(missing = ?missing, "header names unrecognized, using positional mapping");
            return Ok(HeaderMapping::positional(width));
        }
        return Err(ImportError::headers_missing(&missing));
    }

    let review: Vec<Field> = confidence
        .iter()
        .filter(|(_, c)| **c < ACCEPT_CONFIDENCE)
        .map(|(f, _)| *f)
        .collect();
    for field in &review {
        tracing::info!(field = field.name(), confidence = confidence[field], "header mapping needs review");
    }

    Ok(HeaderMapping {
        columns,
        confidence,
        review,
        positional: false,
    })
}
