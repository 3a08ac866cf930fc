use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vault_club_service::config::{Config, LogFormat};
use vault_club_service::db::VaultDb;
use vault_club_service::scheduler::run_harvest_pass;

#[derive(Parser)]
#[command(name = "vault-club-service")]
#[command(about = "The Vault Club epoch accounting service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Harvest every closed epoch once and exit.
    Harvest {
        #[arg(long, default_value = "system:cli")]
        executed_by: String,
    },
    /// Apply the database schema and exit.
    Migrate,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => vault_club_service::serve(config).await,
        Command::Harvest { executed_by } => {
            let (service, _idempotency) = vault_club_service::build_vault(&config).await?;
            let executed = run_harvest_pass(&service, executed_by.as_str())
                .await
                .context("harvest pass")?;
            for harvest in &executed {
                tracing::info!(
                    epoch_number = harvest.epoch_number,
                    yield_amount = %harvest.yield_amount,
                    deposits_total = %harvest.deposits_total,
                    next_epoch_number = harvest.next_epoch_number,
                    "vault epoch harvested"
                );
            }
            tracing::info!(harvested = executed.len(), "vault harvest pass complete");
            Ok(())
        }
        Command::Migrate => {
            let Some(url) = config.db_url.as_deref() else {
                bail!("DB_URL or DATABASE_URL must be set to migrate");
            };
            VaultDb::connect(url).await?.migrate().await
        }
    }
}
