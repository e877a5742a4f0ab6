use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::Settings;

pub fn run(settings: &Settings) -> Result<()> {
    let path = settings.database_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = get_connection(&path)?;
    init_db(&conn)?;
    println!("Database ready at {}", path.display());
    Ok(())
}
