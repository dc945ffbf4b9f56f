mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::migrate;
use tern_core::{AppConfigTrait, LoggingConfig};

#[derive(Parser)]
#[command(name = "tern")]
#[command(version, about = "Apply versioned SQL migrations to a PostgreSQL database")]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Database credential (overrides DATABASE_AUTH_TOKEN)
    #[arg(long, global = true)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migration management
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply pending migrations
    Run {
        /// Drop every table in the current schema first. Destroys all data.
        #[arg(long)]
        force_reset: bool,

        /// Directory holding <name>/migration.sql entries (overrides MIGRATIONS_DIR)
        #[arg(long)]
        migrations_dir: Option<PathBuf>,

        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show applied, pending and missing migrations
    Status {
        /// Directory holding <name>/migration.sql entries (overrides MIGRATIONS_DIR)
        #[arg(long)]
        migrations_dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    init_logging()?;

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Run {
                force_reset,
                migrations_dir,
                json,
            } => {
                let config =
                    migrate::load_config(cli.database_url, cli.auth_token, migrations_dir)?;
                migrate::run(&config, force_reset, json).await?;
            }
            MigrateCommands::Status {
                migrations_dir,
                json,
            } => {
                let config =
                    migrate::load_config(cli.database_url, cli.auth_token, migrations_dir)?;
                migrate::status(&config, json).await?;
            }
        },
    }

    Ok(())
}

fn init_logging() -> anyhow::Result<()> {
    let config = LoggingConfig::from_env()?;
    config.validate()?;
    tern_core::init_logging(&config)?;
    Ok(())
}
