use clap::Parser;
use ludora::{jobs, seed, settings, storage, tokens, web};
use migration::{Migrator, MigratorTrait};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "ludora",
    version,
    about = "Educational content marketplace backend"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Seed users, plans, and products from a JSON file before serving
    #[arg(long)]
    seed: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage and bring the schema up to date
    let db = storage::init(&settings.database).await?;
    Migrator::up(&db, None).await.into_diagnostic()?;

    // a fresh install must have a way in
    seed::ensure_default_admin(&db).await?;

    if let Some(seed_path) = &cli.seed {
        seed::seed_from_file(&db, seed_path).await?;
    }

    // init signing keys (generate if missing)
    let token_mgr = tokens::TokenManager::new(settings.keys.clone()).await?;

    // background jobs
    let _scheduler = jobs::init_scheduler(db.clone()).await?;

    // start web server
    let state = web::AppState::new(settings, db, token_mgr);
    web::serve(state).await?;
    Ok(())
}
