use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crewshift_core::{
    build_run,
    clock::{Clock, SystemClock},
    config::Config,
    memory_store::InMemoryStore,
    model::TeamId,
    run::{RunParams, RunTrigger},
    scheduler::Scheduler,
    server::{router, AppState},
};

#[derive(Parser)]
#[command(name = "crewshift")]
#[command(about = "Reconciles planned crew rosters against field shift openings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP trigger and run the cron scheduler (default)
    Serve,
    /// Run one reconciliation and print the report as JSON
    RunOnce {
        /// First day to reconcile (YYYY-MM-DD); defaults to today in the reference timezone
        #[arg(long)]
        reference_date: Option<NaiveDate>,

        /// Only reconcile this team
        #[arg(long)]
        team_id: Option<TeamId>,

        /// Number of days starting at the reference date
        #[arg(long, default_value_t = 1)]
        days: u32,

        /// Classify everything but write nothing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = match &config.seed_file {
        Some(path) => InMemoryStore::from_seed_file(path)
            .with_context(|| format!("Failed to load seed file {}", path.display()))?,
        None => {
            warn!("SEED_FILE not set; starting with an empty in-memory store");
            InMemoryStore::new()
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let run = Arc::new(build_run(Arc::new(store), clock.clone(), &config)?);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::RunOnce {
            reference_date,
            team_id,
            days,
            dry_run,
        } => {
            let params = RunParams {
                reference_date,
                team_id,
                day_count: days,
                dry_run,
            };
            let report = run.execute(params, RunTrigger::Cli).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve => serve(config, run, clock).await?,
    }
    Ok(())
}

async fn serve(
    config: Config,
    run: Arc<crewshift_core::run::ReconciliationRun>,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    if config.reconciliation_scheduler_enabled {
        let scheduler = Scheduler::new(
            run.clone(),
            clock.clone(),
            config.schedule()?,
            config.reconciliation_history_days,
            config.today_grace(),
        );
        tokio::spawn(scheduler.run_forever());
    } else {
        info!("Reconciliation scheduler disabled");
    }

    let app = router(AppState { run, clock });
    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr()))?;

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config =
                RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
                    .await
                    .context("Failed to load TLS cert/key")?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("Listening on http://{}", addr);
            axum::serve(listener, app).await.context("HTTP server failed")?;
        }
    }
    Ok(())
}
