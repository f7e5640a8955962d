use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use callmeter::{logging, redis_client, Instrumented, JobRunner, Meter, MetricsConfig};

mod handlers;
mod load_generator;
mod server;
mod store;

use store::{RedisUserStore, UserStore};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Instrumented user store backed by Redis.
    pub users: Arc<dyn UserStore>,

    pub meter: Arc<Meter>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init_logging(&config.log_level)?;

    // ── 1. Metrics ───────────────────────────────────────────────
    let meter = Arc::new(Meter::from_config(&config).await?);
    meter
        .instrumentation()
        .instrument_scope::<RedisUserStore>()?;
    let sampler = config
        .enabled
        .then(|| meter.sampler(config.sample_interval()).start());

    // ── 2. Connect to Redis ──────────────────────────────────────
    let conn = redis_client::tracked_connect(&config.server.redis_url, &meter, None).await?;
    let users: Arc<dyn UserStore> = Arc::new(Instrumented::new(
        RedisUserStore::new(conn),
        meter.instrumentation().clone(),
    ));

    // ── 3. Demo jobs ─────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let workers = load_generator::spawn(
        config.server.demo_workers,
        JobRunner::new(meter.clone()),
        users.clone(),
        running.clone(),
    );

    // ── 4. Bind & serve ──────────────────────────────────────────
    let state = Arc::new(AppState {
        users,
        meter: meter.clone(),
    });
    let app = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        metrics = meter.is_enabled(),
        sink = ?config.sink.kind,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 5. Drain ─────────────────────────────────────────────────
    running.store(false, Ordering::SeqCst);
    for worker in workers {
        let _ = worker.await;
    }
    if let Some(sampler) = sampler {
        sampler.stop().await;
    }
    redis_client::release(&meter);
    meter.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// `CALLMETER_CONFIG` or the first argument names a TOML file; without
/// one, defaults plus environment overrides.
fn load_config() -> Result<MetricsConfig, callmeter::ConfigError> {
    let path = std::env::var("CALLMETER_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .map(PathBuf::from);

    match path {
        Some(path) => MetricsConfig::load(&path),
        None => {
            let mut config = MetricsConfig::default();
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
