//! Payroll import pipeline: reads a payroll export (Excel or CSV), loads it
//! atomically into an SQLite star schema for one pay date, and keeps a KPI
//! snapshot and reporting tables current.

pub mod admin;
pub mod amount;
pub mod batches;
pub mod cli;
pub mod dates;
pub mod db;
pub mod dimensions;
pub mod error;
pub mod facts;
pub mod fmt;
pub mod guard;
pub mod headers;
pub mod importer;
pub mod kpi;
pub mod mapper;
pub mod periods;
pub mod pool;
pub mod runtime;
pub mod settings;
pub mod sign_policy;
pub mod signal;
pub mod views;
pub mod workbook;

pub use error::{ErrorKind, ImportError, PaieError, Result};
pub use importer::{import_payroll_file, ImportOutcome, ImportRequest};
pub use runtime::Runtime;
