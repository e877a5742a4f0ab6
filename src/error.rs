use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaieError {
    #[error("Database error: {0}")]
    Db(#[source] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] calamine::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection pool: {0}")]
    Pool(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown period: {0}")]
    UnknownPeriod(String),

    #[error("Invalid period transition for {pay_date}: {from} -> {to}")]
    InvalidTransition {
        pay_date: String,
        from: String,
        to: String,
    },

    #[error("Refused while APP_ENV=production: {0}")]
    RefusedInProduction(String),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for PaieError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match e.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => {
                PaieError::Timeout("statement timeout exceeded".to_string())
            }
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                PaieError::Timeout("lock timeout exceeded".to_string())
            }
            _ => PaieError::Db(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, PaieError>;

// ---------------------------------------------------------------------------
// User-facing import errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    FileNotFound,
    FormatUnsupported,
    HeadersMissing,
    PeriodClosed,
    DuplicateImport,
    ValidationFailed,
    DbUnavailable,
    /// Post-commit only; logged, never returned.
    KpiFailed,
    /// Post-commit only; logged, never returned.
    ViewRefreshFailed,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::FormatUnsupported => "FORMAT_UNSUPPORTED",
            Self::HeadersMissing => "HEADERS_MISSING",
            Self::PeriodClosed => "PERIOD_CLOSED",
            Self::DuplicateImport => "DUPLICATE_IMPORT",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::DbUnavailable => "DB_UNAVAILABLE",
            Self::KpiFailed => "KPI_FAILED",
            Self::ViewRefreshFailed => "VIEW_REFRESH_FAILED",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::FileNotFound => {
                "Le fichier sélectionné n'existe plus. Vérifiez que le fichier n'a pas été déplacé ou supprimé."
            }
            Self::FormatUnsupported => {
                "Ce type de fichier n'est pas supporté. Utilisez un fichier Excel (.xlsx, .xlsm, .xls) ou CSV."
            }
            Self::HeadersMissing => {
                "Le fichier ne contient pas toutes les colonnes obligatoires (Matricule, Code de paie, Montant)."
            }
            Self::PeriodClosed => {
                "Cette période de paie est déjà fermée. Vous ne pouvez pas importer de nouvelles données pour cette période."
            }
            Self::DuplicateImport => {
                "Ce fichier a déjà été importé pour cette période."
            }
            Self::ValidationFailed => {
                "Certaines lignes du fichier sont invalides. Aucune donnée n'a été importée."
            }
            Self::DbUnavailable => {
                "Impossible de se connecter à la base de données."
            }
            Self::KpiFailed => "Le calcul des indicateurs a échoué.",
            Self::ViewRefreshFailed => "Le rafraîchissement d'une vue de rapport a échoué.",
            Self::Internal => {
                "L'import a échoué à cause d'une erreur interne. Aucune donnée n'a été importée."
            }
        }
    }

    pub fn solution(&self) -> Option<&'static str> {
        match self {
            Self::FileNotFound => Some("Vérifier le chemin du fichier et réessayer."),
            Self::FormatUnsupported => {
                Some("Convertir le fichier au format Excel (.xlsx) ou CSV et réessayer.")
            }
            Self::HeadersMissing => {
                Some("Vérifier les en-têtes du fichier et ajouter les colonnes manquantes.")
            }
            Self::PeriodClosed => Some(
                "Contacter l'administrateur pour ouvrir la période ou utiliser une autre date.",
            ),
            Self::DuplicateImport => Some(
                "Vérifier l'historique des imports et supprimer l'import précédent si nécessaire.",
            ),
            Self::ValidationFailed => {
                Some("Corriger les lignes indiquées dans le fichier et réessayer.")
            }
            Self::DbUnavailable => Some(
                "Vérifier le chemin de la base de données et réessayer. Si le problème persiste, contacter le support.",
            ),
            Self::Internal => {
                Some("Réessayer. Si le problème persiste, consulter le journal technique.")
            }
            Self::KpiFailed | Self::ViewRefreshFailed => None,
        }
    }
}

/// Structured context attached to an [`ImportError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    /// Source row numbers (1-based, as seen in the spreadsheet), first 10 only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The only error the import orchestrator returns. Its `Display` is the
/// French user message; technical causes go to the log.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ImportError {
    pub kind: ErrorKind,
    pub message: String,
    pub solution: Option<String>,
    pub details: ErrorDetails,
}

pub const MAX_LISTED_ROWS: usize = 10;

impl ImportError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            solution: kind.solution().map(str::to_string),
            details: ErrorDetails::default(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn headers_missing(fields: &[&str]) -> Self {
        let mut err = Self::new(ErrorKind::HeadersMissing);
        err.message = format!("{} Colonnes manquantes : {}.", err.message, fields.join(", "));
        err.details.missing_fields = fields.iter().map(|f| f.to_string()).collect();
        err
    }

    pub fn validation_failed(rows: &[usize]) -> Self {
        let mut err = Self::new(ErrorKind::ValidationFailed);
        let listed: Vec<usize> = rows.iter().take(MAX_LISTED_ROWS).copied().collect();
        let joined = listed.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ");
        err.message = format!(
            "{} {} ligne(s) invalide(s) : {}{}.",
            err.message,
            rows.len(),
            joined,
            if rows.len() > MAX_LISTED_ROWS { ", ..." } else { "" }
        );
        err.details.rows = listed;
        err.details.invalid_row_count = Some(rows.len());
        err
    }

    pub fn empty_file() -> Self {
        let mut err = Self::new(ErrorKind::ValidationFailed);
        err.message = "Le fichier est vide ou ne contient pas de données valides.".to_string();
        err.solution =
            Some("Vérifier que le fichier contient des données et réessayer.".to_string());
        err.details.note = Some("fichier vide".to_string());
        err
    }

    pub fn period_closed(pay_date: &str, status: &str) -> Self {
        let mut err = Self::new(ErrorKind::PeriodClosed);
        err.details.note = Some(format!("période {pay_date} : statut {status}"));
        err
    }

    /// Wraps a technical failure. The raw text is logged here and never
    /// becomes part of the user-facing message.
    pub fn from_technical(err: &PaieError) -> Self {
        let kind = match err {
            PaieError::Pool(_) => ErrorKind::DbUnavailable,
            PaieError::Db(e) if is_cannot_open(e) => ErrorKind::DbUnavailable,
            PaieError::Import(inner) => return inner.clone(),
            _ => ErrorKind::Internal,
        };
        tracing::error!(code = kind.code(), error = %err, "import failed on a technical error");
        Self::new(kind)
    }

    /// Text stored in `import_batches.error_message`.
    pub fn audit_text(&self) -> String {
        let mut text = format!("[{}] {}", self.code(), self.message);
        if let Some(note) = &self.details.note {
            text.push_str(&format!(" ({note})"));
        }
        text
    }
}

fn is_cannot_open(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::CannotOpen) | Some(rusqlite::ErrorCode::NotADatabase)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorKind::DuplicateImport.code(), "DUPLICATE_IMPORT");
        assert_eq!(ErrorKind::HeadersMissing.code(), "HEADERS_MISSING");
        assert_eq!(ErrorKind::DbUnavailable.code(), "DB_UNAVAILABLE");
    }

    #[test]
    fn test_validation_failed_lists_first_ten_rows() {
        let rows: Vec<usize> = (2..20).collect();
        let err = ImportError::validation_failed(&rows);
        assert_eq!(err.details.rows.len(), MAX_LISTED_ROWS);
        assert_eq!(err.details.invalid_row_count, Some(18));
        assert!(err.message.contains("18 ligne(s)"));
        assert!(err.message.ends_with(", ...."));
    }

    #[test]
    fn test_headers_missing_names_fields() {
        let err = ImportError::headers_missing(&["matricule", "pay_code"]);
        assert_eq!(err.kind, ErrorKind::HeadersMissing);
        assert!(err.to_string().contains("matricule, pay_code"));
    }

    #[test]
    fn test_technical_error_text_is_not_displayed() {
        let raw = PaieError::Other("near \"SELEC\": syntax error".to_string());
        let err = ImportError::from_technical(&raw);
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(!err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_pool_error_maps_to_db_unavailable() {
        let err = ImportError::from_technical(&PaieError::Pool("checkout timed out".into()));
        assert_eq!(err.kind, ErrorKind::DbUnavailable);
    }

    #[test]
    fn test_interrupt_maps_to_timeout() {
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert!(matches!(PaieError::from(e), PaieError::Timeout(_)));
    }
}
