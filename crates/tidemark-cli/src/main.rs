mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{ArgGroup, Parser, Subcommand};
use tidemark::{DownTarget, MigrationConfig, MigrationId, Migrator};

use commands::{migrate, CommandOutcome, EXIT_PREFLIGHT};
use logging::{LogFormat, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "tidemark")]
#[command(about = "Versioned, reversible schema migrations", version)]
struct Cli {
    /// Database URL (postgres:// or sqlite:); defaults to TIDEMARK_DATABASE_URL or DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory holding the migration files
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Name of the ledger table
    #[arg(long, global = true)]
    table: Option<String>,

    /// Per-migration timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    Up {
        /// Apply at most this many migrations
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Roll back applied migrations (the most recent one by default)
    #[command(group(ArgGroup::new("target").args(["steps", "all", "to", "batch", "target_batch"])))]
    Down {
        /// Roll back this many migrations
        #[arg(long)]
        steps: Option<usize>,

        /// Roll back every applied migration
        #[arg(long)]
        all: bool,

        /// Roll back every migration applied after this id
        #[arg(long)]
        to: Option<String>,

        /// Roll back the most recent batch
        #[arg(long)]
        batch: bool,

        /// Roll back the given batch
        #[arg(long)]
        target_batch: Option<i64>,
    },

    /// Show applied and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    Create {
        /// Migration name
        name: String,
    },
}

impl Cli {
    /// Environment configuration with command line overrides applied
    fn migration_config(&self) -> Result<MigrationConfig> {
        let mut config = MigrationConfig::from_env()?;

        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(dir) = &self.dir {
            config.migrations_dir = dir.clone();
        }
        if let Some(table) = &self.table {
            config.migrations_table = table.clone();
        }
        if let Some(secs) = self.timeout {
            config.unit_timeout = Some(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }
}

fn down_target(
    steps: Option<usize>,
    all: bool,
    to: Option<String>,
    batch: bool,
    target_batch: Option<i64>,
) -> Result<DownTarget> {
    let target = if all {
        DownTarget::All
    } else if batch {
        DownTarget::LastBatch
    } else if let Some(b) = target_batch {
        DownTarget::Batch(b)
    } else if let Some(id) = to {
        DownTarget::To(MigrationId::new(id)?)
    } else {
        match steps {
            Some(0) => bail!("--steps must be at least 1"),
            Some(n) => DownTarget::Steps(n),
            None => DownTarget::default(),
        }
    };
    Ok(target)
}

async fn run(cli: Cli) -> Result<CommandOutcome> {
    let config = cli.migration_config()?;

    match cli.command {
        Commands::Create { name } => migrate::create(&config.migrations_dir, &name).await,
        command => {
            let migrator = Migrator::from_config(&config).await?;
            let outcome = dispatch(&migrator, command).await;
            migrator.close().await;
            outcome
        }
    }
}

async fn dispatch(migrator: &Migrator, command: Commands) -> Result<CommandOutcome> {
    match command {
        Commands::Up { limit } => migrate::up(migrator, limit).await,
        Commands::Down {
            steps,
            all,
            to,
            batch,
            target_batch,
        } => {
            let target = down_target(steps, all, to, batch, target_batch)?;
            migrate::down(migrator, &target).await
        }
        Commands::Status { json } => migrate::status(migrator, json).await,
        Commands::Create { name } => bail!("'create {}' does not use a database connection", name),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig::from_verbosity(cli.verbose, cli.log_format);
    if let Err(e) = logging::init_logging(&logging) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_PREFLIGHT)
        }
    }
}
