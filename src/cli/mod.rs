pub mod employees;
pub mod import;
pub mod init;
pub mod kpi;
pub mod periods;
pub mod sign_policy;
pub mod status;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::dates::parse_iso;
use crate::db::{get_connection, has_schema};
use crate::error::{PaieError, Result};
use crate::settings::Settings;

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    parse_iso(raw).ok_or_else(|| PaieError::Other(format!("Invalid date {raw:?}, expected YYYY-MM-DD")))
}

/// Opens the configured database, refusing one that was never initialized.
pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    let path = settings.database_path();
    if !path.exists() {
        return Err(PaieError::Other(format!(
            "Database not found at {}. Run `paie init` first.",
            path.display()
        )));
    }
    let conn = get_connection(&path)?;
    if !has_schema(&conn)? {
        return Err(PaieError::Other(format!(
            "{} has no payroll schema. Run `paie init` first.",
            path.display()
        )));
    }
    Ok(conn)
}

#[derive(Parser)]
#[command(name = "paie", about = "Payroll import and KPI snapshots.")]
pub struct Cli {
    /// Database file (overrides PAYROLL_DSN and the settings file)
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database file and schema.
    Init,
    /// Import a payroll file (Excel or CSV) for one pay date.
    Import {
        /// Path to the .xlsx/.xls/.csv file
        file: String,
        /// Pay date: YYYY-MM-DD
        #[arg(long = "pay-date")]
        pay_date: String,
        /// Who runs the import (stored on the audit row)
        #[arg(long)]
        user: String,
        /// Keep every amount's sign as read from the file
        #[arg(long = "no-sign-policy")]
        no_sign_policy: bool,
        /// Import even if this file already succeeded for the period
        #[arg(long = "allow-reimport")]
        allow_reimport: bool,
        /// Spreadsheet epoch: 1900 or 1904 (detected when omitted)
        #[arg(long = "date-system")]
        date_system: Option<String>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// KPI snapshots.
    Kpi {
        #[command(subcommand)]
        command: KpiCommands,
    },
    /// Pay periods.
    Periods {
        #[command(subcommand)]
        command: PeriodsCommands,
    },
    /// Employee maintenance.
    Employees {
        #[command(subcommand)]
        command: EmployeesCommands,
    },
    /// Per-code sign rules.
    #[command(name = "sign-policy")]
    SignPolicy {
        #[command(subcommand)]
        command: SignPolicyCommands,
    },
    /// Show database path, environment and counts.
    Status,
}

#[derive(Subcommand)]
pub enum KpiCommands {
    /// Show the KPI for a pay date (snapshot, or computed when absent).
    Show {
        /// Pay date: YYYY-MM-DD
        pay_date: String,
        #[arg(long)]
        json: bool,
    },
    /// List stored snapshots, newest first.
    List,
    /// Recompute and store the snapshot for a pay date.
    Recompute {
        /// Pay date: YYYY-MM-DD
        pay_date: String,
    },
}

#[derive(Subcommand)]
pub enum PeriodsCommands {
    /// List pay periods with their counts.
    List,
    /// Close an open period.
    Close {
        /// Pay date: YYYY-MM-DD
        pay_date: String,
    },
    /// Archive a closed period.
    Archive {
        /// Pay date: YYYY-MM-DD
        pay_date: String,
    },
    /// Delete a period with its transactions, batches and snapshot.
    Delete {
        /// Pay date: YYYY-MM-DD
        pay_date: String,
    },
}

#[derive(Subcommand)]
pub enum EmployeesCommands {
    /// Delete employees with no transaction in any period.
    #[command(name = "prune-orphans")]
    PruneOrphans,
}

#[derive(Subcommand)]
pub enum SignPolicyCommands {
    /// List sign rules.
    List,
    /// Set the sign rule of a pay code.
    Set {
        /// Pay code
        code: String,
        /// Employee portion sign: 1 or -1
        #[arg(long, allow_negative_numbers = true)]
        employee: i64,
        /// Employer portion sign: 1 or -1
        #[arg(long, allow_negative_numbers = true)]
        employer: i64,
    },
}
