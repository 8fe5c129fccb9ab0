//! botfleet - Entry Point
//!
//! Boots the store, restores the bot fleet, and serves the admin API until a
//! termination signal arrives. Exits 0 on graceful shutdown, 1 on fatal init
//! failure.

use botfleet::admin::{self, AdminState};
use botfleet::logbuf::LogCategory;
use botfleet::{AppContext, Config, Store, Supervisor};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("botfleet v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let store = Store::open(&config.db_path)?;
    let admin_hash = admin::auth::hash_password(&config.admin_password)?;
    store.seed(&config.admin_email, &admin_hash)?;

    let ctx = AppContext::new(store);
    ctx.logs
        .success(LogCategory::Server, "control plane starting");

    let sup = Supervisor::new(ctx.clone());
    sup.restore_active_bots().await;
    let reconciler = sup.spawn_reconciler();

    let state = AdminState::new(ctx.clone(), sup.clone());
    admin::server::serve(state, config.admin_addr).await?;

    // Signal received: wind everything down before the process exits.
    reconciler.abort();
    sup.shutdown().await;
    ctx.logs.info(LogCategory::Server, "shutdown complete");
    info!("goodbye");

    Ok(())
}
