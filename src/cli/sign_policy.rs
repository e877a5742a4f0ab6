use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::settings::Settings;
use crate::sign_policy::{list_sign_policies, set_sign_policy, Signs};

pub fn list(settings: &Settings) -> Result<()> {
    let conn = open_db(settings)?;
    let policies = list_sign_policies(&conn)?;
    if policies.is_empty() {
        println!("No sign rule. Every code keeps the sign read from the file.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Code", "Employee", "Employer"]);
    for (code, signs) in policies {
        table.add_row(vec![
            Cell::new(code),
            Cell::new(format!("{:+}", signs.employee)),
            Cell::new(format!("{:+}", signs.employer)),
        ]);
    }
    println!("Sign rules\n{table}");
    Ok(())
}

pub fn set(settings: &Settings, code: &str, employee: i64, employer: i64) -> Result<()> {
    let signs = Signs::new(employee, employer)?;
    let conn = open_db(settings)?;
    set_sign_policy(&conn, code, signs)?;
    println!("Sign rule for {code}: employee {:+}, employer {:+}", signs.employee, signs.employer);
    Ok(())
}
