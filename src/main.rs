use anyhow::Context;
use partner_payouts::orchestration::{Scheduler, Settlement};
use partner_payouts::{api, config::Config, db::init_db, Repository, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));

    let settlement = Settlement::from_config(repo, &config);
    if config.user_directory_url.is_none() {
        tracing::warn!("USER_DIRECTORY_URL not set, the sweep will only expire stale clicks");
    }

    // Catch up on anything missed while the service was down before taking traffic.
    let scheduler = Scheduler::new(
        settlement.clone(),
        Arc::new(SystemClock),
        config.scheduler_interval,
        config.sweep_interval,
    );
    let tick = scheduler
        .run_period_tick()
        .await
        .context("Initial period catch-up failed")?;
    tracing::info!(closed = tick.closed, resumed = tick.resumed, "Period catch-up done");
    let _jobs = scheduler.spawn();

    let app = api::create_router(api::AppState::new(settlement));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
