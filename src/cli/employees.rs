use crate::admin;
use crate::cli::open_db;
use crate::error::Result;
use crate::settings::Settings;
use crate::views::ViewRefresher;

pub fn prune_orphans(settings: &Settings) -> Result<()> {
    let conn = open_db(settings)?;
    let removed = admin::delete_orphan_employees(&conn, settings.is_production(), &ViewRefresher::default())?;
    println!("{removed} orphan employee(s) deleted");
    Ok(())
}
