use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use configuration::OnInvalidSecret;
use configuration::settings::Settings;
use database::{MigrationRunner, PgDriver, PgManager, RetryPolicy};
use scripts::{ScriptClassifier, ScriptPriorityComparer};
use secrets::{FileSecretsRepository, SecretsRepository};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// The main entry point for pgsteward.
#[tokio::main]
async fn main() -> Result<()> {
    // A .env file is optional; DATABASE_URL may come from the real environment.
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    let settings = configuration::load_settings(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling.");
            on_ctrl_c.cancel();
        }
    });

    let manager = build_manager(&settings, cli.on_invalid_secret)?;

    match cli.command {
        Commands::CreateDb => handle_create_db(&manager, &cancel).await?,
        Commands::DropDb => {
            manager.drop_db(&cancel).await?;
            println!("Database '{}' dropped.", settings.database_name);
        }
        Commands::Deprovision => {
            manager.deprovision(&cancel).await?;
            println!(
                "Database '{}' and its roles dropped.",
                settings.database_name
            );
        }
        Commands::Upgrade(args) => handle_upgrade(&manager, &settings, args, &cancel).await?,
        Commands::Verify => {
            manager
                .verify_roles(manager.secrets().as_ref(), &cancel)
                .await?;
            println!("All role credentials are valid.");
        }
    }

    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Provisions, migrates and tears down a Postgres database and its login roles.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML settings file. Missing files are allowed.
    #[arg(long, short, default_value = "pgsteward.toml")]
    config: PathBuf,

    /// Overrides `on_invalid_secret` from the settings.
    #[arg(long, value_enum)]
    on_invalid_secret: Option<OnInvalidSecret>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and issue credentials for every configured role.
    CreateDb,
    /// Terminate sessions on the database and drop it. Roles are kept.
    DropDb,
    /// Drop the database, its owner role and every login role.
    Deprovision,
    /// Apply migration and setup scripts.
    Upgrade(UpgradeArgs),
    /// Check that every role's stored connection string still works.
    Verify,
}

#[derive(Parser)]
struct UpgradeArgs {
    /// Directory to discover `.sql` scripts in. Defaults to `scripts_dir` from the settings.
    #[arg(long)]
    scripts_dir: Option<PathBuf>,

    /// Verify role credentials once the upgrade commits.
    #[arg(long)]
    verify: bool,
}

fn build_manager(
    settings: &Settings,
    on_invalid_secret: Option<OnInvalidSecret>,
) -> Result<PgManager<PgDriver>> {
    let config = settings.manager_config()?;
    let connection_string = settings.resolve_connection_string()?;
    let secrets: Arc<dyn SecretsRepository> =
        Arc::new(FileSecretsRepository::new(&settings.secrets_file));

    let manager = PgManager::new(PgDriver::default(), connection_string, config, secrets)?
        .with_retry_policy(RetryPolicy::from(&settings.retry))
        .with_invalid_secret_policy(on_invalid_secret.unwrap_or(settings.on_invalid_secret));
    Ok(manager)
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_create_db(manager: &PgManager<PgDriver>, cancel: &CancellationToken) -> Result<()> {
    let report = manager.create_db(cancel).await?;

    if report.database_created {
        println!("Database '{}' created.", manager.config().database_name());
    } else {
        println!("Database '{}' already exists.", manager.config().database_name());
    }
    for (role, outcome) in &report.roles {
        println!("  {role}: {outcome:?}");
    }
    Ok(())
}

async fn handle_upgrade(
    manager: &PgManager<PgDriver>,
    settings: &Settings,
    args: UpgradeArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let root = args.scripts_dir.unwrap_or_else(|| settings.scripts_dir.clone());
    let scripts = {
        let root = root.clone();
        tokio::task::spawn_blocking(move || scripts::discover(&root)).await?
    }
    .with_context(|| format!("Failed to discover scripts under {}", root.display()))?;

    let comparer =
        ScriptPriorityComparer::new(ScriptClassifier::default(), &settings.setup_priority_patterns)?;
    let report = MigrationRunner::new(manager, comparer)
        .with_schemas(settings.schemas.clone())
        .with_verification(args.verify || settings.verify_after_upgrade)
        .upgrade(scripts, cancel)
        .await?;

    println!(
        "Upgrade complete: {} applied, {} already deployed, {} empty.",
        report.applied.len(),
        report.skipped.len(),
        report.empty.len()
    );
    Ok(())
}
