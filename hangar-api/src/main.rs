use anyhow::{Context, Result};
use hangar_api::{create_app, start_reaper_task, AppState, Config};
use hangar_logging::{init_subscriber, LoggingConfig};
use hangar_orchestrator::db::{backup_database, create_pool, run_migrations};
use hangar_orchestrator::{BuildOrchestrator, EchoProvisioner, ProvisionerDaemon, RoleGate, SystemClock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_subscriber(&LoggingConfig::from_env());

    info!("Starting hangar-api service...");

    // Load configuration
    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if db_path.exists() {
        let backup_path = backup_database(db_path).context("Failed to back up database")?;
        info!("Database backed up to: {}", backup_path.display());
    }

    // Create pool and run migrations
    let pool = create_pool(db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Running database migrations...");
    run_migrations(&pool).await.context("Failed to run migrations")?;
    info!("Migrations complete");

    let orchestrator = BuildOrchestrator::with_config(
        pool,
        Arc::new(RoleGate),
        Arc::new(SystemClock),
        config.orchestrator_config(),
    );

    // Start reaper task
    tokio::spawn(start_reaper_task(
        orchestrator.scheduler().clone(),
        config.reaper_interval_secs,
    ));
    info!(
        "Reaper task started (interval: {}s)",
        config.reaper_interval_secs
    );

    // In-process echo workers, mostly for local development
    let _daemons: Vec<_> = (0..config.echo_provisioners)
        .map(|i| {
            ProvisionerDaemon::new(
                orchestrator.scheduler().clone(),
                Arc::new(EchoProvisioner::new()),
                format!("echo-{}", i),
                BTreeSet::new(),
            )
            .spawn()
        })
        .collect();
    if config.echo_provisioners > 0 {
        info!("Started {} echo provisioner(s)", config.echo_provisioners);
    }

    // Create app
    let app = create_app(AppState::new(orchestrator));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
