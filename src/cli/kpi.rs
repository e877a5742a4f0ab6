use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{open_db, parse_date};
use crate::error::Result;
use crate::fmt::money_fr_f64;
use crate::kpi::{self, KpiSource};
use crate::runtime::{Clock, SystemClock};
use crate::settings::Settings;

pub fn show(settings: &Settings, pay_date: &str, json: bool) -> Result<()> {
    let date = parse_date(pay_date)?;
    let conn = open_db(settings)?;
    let kpi = kpi::get_kpi(&conn, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&kpi)?);
        return Ok(());
    }

    let cards = &kpi.data.cards;
    let mut table = Table::new();
    table.set_header(vec!["Indicateur", "Valeur"]);
    table.add_row(vec![Cell::new("Salaire net total"), Cell::new(money_fr_f64(cards.salaire_net_total))]);
    table.add_row(vec![Cell::new("Masse salariale"), Cell::new(money_fr_f64(cards.masse_salariale))]);
    table.add_row(vec![Cell::new("Déductions"), Cell::new(money_fr_f64(cards.deductions))]);
    table.add_row(vec![Cell::new("Part employeur"), Cell::new(money_fr_f64(cards.masse_employeur))]);
    table.add_row(vec![Cell::new("Net moyen"), Cell::new(money_fr_f64(cards.net_moyen))]);
    table.add_row(vec![Cell::new("Employés"), Cell::new(cards.nb_employes)]);
    table.add_row(vec![Cell::new("Transactions"), Cell::new(cards.nb_transactions)]);
    let source = match kpi.source {
        KpiSource::Snapshot => format!("snapshot du {}", kpi.calculated_at.as_deref().unwrap_or("?")),
        KpiSource::OnTheFly => "calculé à la volée".to_string(),
    };
    println!("KPI {} ({source})\n{table}", kpi.data.pay_date);

    if !kpi.data.tables.codes_top.is_empty() {
        let mut codes = Table::new();
        codes.set_header(vec!["Code", "Libellé", "Catégorie", "Lignes", "Total"]);
        for c in &kpi.data.tables.codes_top {
            codes.add_row(vec![
                Cell::new(&c.code),
                Cell::new(&c.label),
                Cell::new(&c.category),
                Cell::new(c.nb_transactions),
                Cell::new(money_fr_f64(c.total_montant)),
            ]);
        }
        println!("Codes de paie\n{codes}");
    }

    if !kpi.data.tables.anomalies.is_empty() {
        let mut anomalies = Table::new();
        anomalies.set_header(vec!["Matricule", "Nom", "Code", "Montant"]);
        for a in &kpi.data.tables.anomalies {
            anomalies.add_row(vec![
                Cell::new(&a.matricule),
                Cell::new(&a.nom),
                Cell::new(&a.code),
                Cell::new(money_fr_f64(a.montant).red().to_string()),
            ]);
        }
        println!("Anomalies\n{anomalies}");
    }
    Ok(())
}

pub fn list(settings: &Settings) -> Result<()> {
    let conn = open_db(settings)?;
    let snapshots = kpi::list_snapshots(&conn)?;
    if snapshots.is_empty() {
        println!("No KPI snapshot yet.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Pay date", "Calculated at", "Rows"]);
    for s in snapshots {
        table.add_row(vec![Cell::new(s.pay_date), Cell::new(s.calculated_at), Cell::new(s.row_count)]);
    }
    println!("KPI snapshots\n{table}");
    Ok(())
}

pub fn recompute(settings: &Settings, pay_date: &str) -> Result<()> {
    let date = parse_date(pay_date)?;
    let conn = open_db(settings)?;
    let data = kpi::recompute(&conn, date, SystemClock.now())?;
    println!(
        "{} {} ({} transactions)",
        "Snapshot recalculé :".green(),
        data.pay_date,
        data.cards.nb_transactions
    );
    Ok(())
}
