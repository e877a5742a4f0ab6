use std::path::PathBuf;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::parse_date;
use crate::dates::DateSystem;
use crate::error::{PaieError, Result};
use crate::fmt::money_fr_f64;
use crate::importer::{import_payroll_file, ImportOutcome, ImportRequest};
use crate::runtime::Runtime;
use crate::settings::Settings;

pub struct ImportArgs<'a> {
    pub file: &'a str,
    pub pay_date: &'a str,
    pub user: &'a str,
    pub no_sign_policy: bool,
    pub allow_reimport: bool,
    pub date_system: Option<&'a str>,
    pub json: bool,
}

pub fn run(settings: &Settings, args: &ImportArgs<'_>) -> Result<()> {
    let pay_date = parse_date(args.pay_date)?;
    let date_system = match args.date_system {
        Some(raw) => Some(
            DateSystem::parse(raw)
                .ok_or_else(|| PaieError::Other(format!("Unknown date system {raw:?}, expected 1900 or 1904")))?,
        ),
        None => None,
    };

    let mut settings = settings.clone();
    settings.allow_reimport |= args.allow_reimport;
    let rt = Runtime::from_settings(&settings);

    let file_path = PathBuf::from(args.file);
    let mut req = ImportRequest::new(&file_path, pay_date, args.user);
    req.apply_sign_policy = !args.no_sign_policy;
    req.date_system = date_system;

    let outcome = import_payroll_file(&rt, &req)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &ImportOutcome) {
    println!("{}", outcome.message.green().bold());

    let mut table = Table::new();
    table.set_header(vec!["", ""]);
    table.add_row(vec![Cell::new("Lot"), Cell::new(outcome.batch_id)]);
    table.add_row(vec![Cell::new("Période"), Cell::new(&outcome.period)]);
    table.add_row(vec![Cell::new("Séquence"), Cell::new(outcome.period_seq_in_year)]);
    table.add_row(vec![Cell::new("Feuille"), Cell::new(&outcome.sheet)]);
    table.add_row(vec![Cell::new("Lignes"), Cell::new(outcome.rows_count)]);
    if let Some(kpi) = &outcome.kpi {
        table.add_row(vec![Cell::new("Salaire net total"), Cell::new(money_fr_f64(kpi.cards.salaire_net_total))]);
        table.add_row(vec![Cell::new("Employés"), Cell::new(kpi.cards.nb_employes)]);
        table.add_row(vec![Cell::new("Net moyen"), Cell::new(money_fr_f64(kpi.cards.net_moyen))]);
    }
    println!("{table}");

    if !outcome.review_fields.is_empty() {
        let names: Vec<&str> = outcome.review_fields.iter().map(|f| f.name()).collect();
        println!("{} {}", "Colonnes à vérifier :".yellow(), names.join(", "));
    }
    if !outcome.defects.is_empty() {
        println!(
            "{}",
            format!("{} ligne(s) importée(s) avec une valeur par défaut :", outcome.defects.len()).yellow()
        );
        for d in outcome.defects.iter().take(10) {
            println!(
                "  ligne {} ({}) : {}",
                d.row_no,
                d.field.name(),
                d.value.as_deref().unwrap_or("")
            );
        }
    }
    if outcome.date_mismatches > 0 {
        println!(
            "{}",
            format!(
                "{} ligne(s) portent une date différente de la date de paie.",
                outcome.date_mismatches
            )
            .yellow()
        );
    }
    if outcome.kpi.is_none() {
        println!("{}", "Les indicateurs n'ont pas pu être recalculés.".yellow());
    }
}
