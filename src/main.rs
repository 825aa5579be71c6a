use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use student_bazaar::config::Config;
use student_bazaar::hub::Hub;
use student_bazaar::services::Marketplace;
use student_bazaar::storage::{SqliteStorage, Storage};
use student_bazaar::web::{self, AppState};
use student_bazaar::{logging, metrics};

#[derive(Parser)]
#[command(name = "student_bazaar")]
#[command(about = "StudentBazaar campus marketplace")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file; missing file means defaults
    #[arg(long, default_value = "bazaar.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web server (default)
    Serve {
        /// Override the listen address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
    /// Create or upgrade the database schema and exit
    Migrate,
    /// Make sure the configured admin account exists
    SeedAdmin,
    /// Write every user to a CSV file
    ExportUsers {
        #[arg(long, default_value = "users.csv")]
        out: PathBuf,
    },
}

fn build_market(config: &Config) -> anyhow::Result<Marketplace> {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_from_config(&config.database.path)?);
    Ok(Marketplace::new(storage, Hub::default(), config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    let _log_guard = logging::init_logging(&config.logging);

    match cli.command.unwrap_or(Commands::Serve { addr: None }) {
        Commands::Serve { addr } => {
            if let Some(addr) = addr {
                config.server.addr = addr;
            }
            if config.metrics.enabled {
                metrics::init_metrics(config.metrics.port);
            }
            let market = build_market(&config)?;
            let admin = market.ensure_admin(&config.admin).await?;
            info!(admin_id = admin.id, "Admin account ready");

            let addr = config.socket_addr()?;
            web::serve(AppState::new(market, config), addr).await?;
        }
        Commands::Migrate => {
            build_market(&config)?;
            info!(path = %config.database.path, "Database schema is up to date");
        }
        Commands::SeedAdmin => {
            let market = build_market(&config)?;
            let admin = market.ensure_admin(&config.admin).await?;
            println!("Admin account: {} (id {})", admin.email, admin.id);
        }
        Commands::ExportUsers { out } => {
            let market = build_market(&config)?;
            let csv = market.export_users_csv().await?;
            tokio::fs::write(&out, csv).await?;
            println!("Users written to {}", out.display());
        }
    }
    Ok(())
}
