use std::io::Read;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{ErrorKind, ImportError, Result};

/// SHA-256 of the file content, lowercase hex.
pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(file_path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Id of the successful batch that already carries this checksum for the period.
pub fn find_success(conn: &Connection, period_id: i64, checksum: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT batch_id FROM import_batches WHERE period_id = ?1 AND checksum = ?2 AND status = 'success'",
            rusqlite::params![period_id, checksum],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Fails with `DUPLICATE_IMPORT` when the (period, checksum) pair already
/// succeeded, unless re-import is explicitly allowed.
pub fn assert_unique(
    conn: &Connection,
    period_id: i64,
    checksum: &str,
    allow_reimport: bool,
) -> std::result::Result<(), ImportError> {
    let existing = find_success(conn, period_id, checksum).map_err(|e| ImportError::from_technical(&e))?;
    match existing {
        Some(batch_id) if !allow_reimport => {
            tracing::info!(period_id, batch_id, checksum, "duplicate import refused");
            let mut err = ImportError::new(ErrorKind::DuplicateImport);
            err.details.note = Some(format!("lot {batch_id}"));
            Err(err)
        }
        Some(batch_id) => {
            tracing::warn!(period_id, batch_id, checksum, "re-import allowed over an existing batch");
            Ok(())
        }
        None => Ok(()),
    }
}

/// True when a constraint failure is the partial unique index on successes,
/// i.e. a concurrent import of the same file won the race.
pub fn is_duplicate_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("import_batches.period_id")
        }
        _ => false,
    }
}
