use clap::Parser;
use tracing_subscriber::EnvFilter;

use paie::cli::{
    self, Cli, Commands, EmployeesCommands, KpiCommands, PeriodsCommands, SignPolicyCommands,
};
use paie::error::{PaieError, Result};
use paie::settings::resolve;

fn init_logging() {
    let filter = std::env::var("PAIE_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let settings = resolve(cli.db.as_deref())?;

    match cli.command {
        Commands::Init => cli::init::run(&settings),
        Commands::Import {
            file,
            pay_date,
            user,
            no_sign_policy,
            allow_reimport,
            date_system,
            json,
        } => cli::import::run(
            &settings,
            &cli::import::ImportArgs {
                file: &file,
                pay_date: &pay_date,
                user: &user,
                no_sign_policy,
                allow_reimport,
                date_system: date_system.as_deref(),
                json,
            },
        ),
        Commands::Kpi { command } => match command {
            KpiCommands::Show { pay_date, json } => cli::kpi::show(&settings, &pay_date, json),
            KpiCommands::List => cli::kpi::list(&settings),
            KpiCommands::Recompute { pay_date } => cli::kpi::recompute(&settings, &pay_date),
        },
        Commands::Periods { command } => match command {
            PeriodsCommands::List => cli::periods::list(&settings),
            PeriodsCommands::Close { pay_date } => cli::periods::close(&settings, &pay_date),
            PeriodsCommands::Archive { pay_date } => cli::periods::archive(&settings, &pay_date),
            PeriodsCommands::Delete { pay_date } => cli::periods::delete(&settings, &pay_date),
        },
        Commands::Employees { command } => match command {
            EmployeesCommands::PruneOrphans => cli::employees::prune_orphans(&settings),
        },
        Commands::SignPolicy { command } => match command {
            SignPolicyCommands::List => cli::sign_policy::list(&settings),
            SignPolicyCommands::Set {
                code,
                employee,
                employer,
            } => cli::sign_policy::set(&settings, &code, employee, employer),
        },
        Commands::Status => cli::status::run(&settings),
    }
}

fn main() {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        if let PaieError::Import(err) = &e {
            if let Some(solution) = &err.solution {
                eprintln!("Solution: {solution}");
            }
        }
        std::process::exit(1);
    }
}
