use comfy_table::{Cell, Table};

use crate::batches::recent_batches;
use crate::db::{get_connection, has_schema};
use crate::error::Result;
use crate::settings::Settings;

fn count(conn: &rusqlite::Connection, table: &str) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?)
}

pub fn run(settings: &Settings) -> Result<()> {
    let db_path = settings.database_path();

    println!("Database:     {}", db_path.display());
    println!("Environment:  {}", settings.app_env);
    println!("Reimport:     {}", if settings.allow_reimport { "allowed" } else { "refused" });

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `paie init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:      {size} bytes");

    let conn = get_connection(&db_path)?;
    if !has_schema(&conn)? {
        println!();
        println!("Schema missing. Run `paie init` to set up.");
        return Ok(());
    }

    let failed: i64 = conn.query_row(
        "SELECT count(*) FROM import_batches WHERE status <> 'success'",
        [],
        |r| r.get(0),
    )?;

    println!();
    println!("Employees:     {}", count(&conn, "employees")?);
    println!("Pay codes:     {}", count(&conn, "pay_codes")?);
    println!("Periods:       {}", count(&conn, "pay_periods")?);
    println!("Transactions:  {}", count(&conn, "payroll_transactions")?);
    println!("Batches:       {}", count(&conn, "import_batches")?);
    println!("Failed:        {failed}");
    println!("Snapshots:     {}", count(&conn, "kpi_snapshot")?);

    let batches = recent_batches(&conn, 5)?;
    if !batches.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Batch", "File", "Pay date", "Rows", "Status", "By", "At"]);
        for b in batches {
            let status = match b.error_code {
                Some(code) => format!("{} ({code})", b.status),
                None => b.status,
            };
            table.add_row(vec![
                Cell::new(b.batch_id),
                Cell::new(b.file_name),
                Cell::new(b.pay_date.unwrap_or_default()),
                Cell::new(b.rows_count),
                Cell::new(status),
                Cell::new(b.imported_by),
                Cell::new(b.imported_at),
            ]);
        }
        println!();
        println!("Recent imports\n{table}");
    }
    Ok(())
}
