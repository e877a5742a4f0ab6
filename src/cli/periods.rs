use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::admin;
use crate::cli::{open_db, parse_date};
use crate::error::Result;
use crate::periods::PeriodStatus;
use crate::settings::Settings;
use crate::views::ViewRefresher;

pub fn list(settings: &Settings) -> Result<()> {
    let conn = open_db(settings)?;
    let periods = admin::list_periods(&conn)?;
    if periods.is_empty() {
        println!("No pay period yet.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Pay date", "Seq", "Status", "Transactions", "Batches"]);
    for p in periods {
        let status = match p.status {
            PeriodStatus::Open => p.status.as_str().green().to_string(),
            PeriodStatus::Closed => p.status.as_str().yellow().to_string(),
            PeriodStatus::Archived => p.status.as_str().dimmed().to_string(),
        };
        table.add_row(vec![
            Cell::new(p.pay_date),
            Cell::new(p.period_seq_in_year),
            Cell::new(status),
            Cell::new(p.transaction_count),
            Cell::new(p.batch_count),
        ]);
    }
    println!("Pay periods\n{table}");
    Ok(())
}

pub fn close(settings: &Settings, pay_date: &str) -> Result<()> {
    let conn = open_db(settings)?;
    let period = admin::close_period(&conn, parse_date(pay_date)?)?;
    println!("Period {} is now {}", period.pay_date, period.status);
    Ok(())
}

pub fn archive(settings: &Settings, pay_date: &str) -> Result<()> {
    let conn = open_db(settings)?;
    let period = admin::archive_period(&conn, parse_date(pay_date)?)?;
    println!("Period {} is now {}", period.pay_date, period.status);
    Ok(())
}

pub fn delete(settings: &Settings, pay_date: &str) -> Result<()> {
    let date = parse_date(pay_date)?;
    let mut conn = open_db(settings)?;
    let deleted = admin::delete_period(&mut conn, date, settings.is_production(), &ViewRefresher::default())?;
    println!(
        "Deleted period {date}: {} transactions, {} batches, {} snapshot",
        deleted.transactions, deleted.batches, deleted.snapshots
    );
    Ok(())
}
