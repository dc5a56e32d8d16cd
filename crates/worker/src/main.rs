use std::sync::Arc;

use anyhow::Context;
use cadence_core::job_type::JobFamily;
use cadence_db::{JobStore, MemoryJobStore, PgJobStore};
use cadence_events::EventBus;
use cadence_worker::config::{ExecutorEndpoints, OrchestratorConfig};
use cadence_worker::executors::http::ProviderClient;
use cadence_worker::executors::{ExecutorRegistry, ImageExecutor, SocialPostExecutor, VideoExecutor};
use cadence_worker::feed::{NoopRecommendationFeed, RecommendationFeed, WebhookRecommendationFeed};
use cadence_worker::Orchestrator;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = OrchestratorConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        tick_interval_secs = config.tick_interval.as_secs(),
        providers = config.providers.len(),
        "Loaded orchestrator configuration",
    );

    let store = build_store(&config).await?;
    let registry = build_registry(&config.executors)?;
    let feed = build_feed(config.recommendation_callback_url.as_deref())?;

    let orchestrator = Arc::new(
        Orchestrator::new(store, registry, config.providers.clone())
            .with_feed(feed)
            .with_events(Arc::new(EventBus::default())),
    );

    let cancel = CancellationToken::new();
    let loop_handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        let interval = config.tick_interval;
        tokio::spawn(async move { orchestrator.run(interval, cancel).await })
    };

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = loop_handle.await {
        tracing::error!(error = %e, "Dispatcher loop ended abnormally");
    }

    if orchestrator.shutdown(config.shutdown_timeout).await {
        tracing::info!("Graceful shutdown complete");
    } else {
        tracing::warn!("Shutdown finished with jobs still processing; they will be reaped on restart");
    }
    Ok(())
}

/// Install the global subscriber. `LOG_FORMAT=json` selects JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cadence_worker=debug,cadence_db=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_store(config: &OrchestratorConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory job store; jobs will not survive a restart");
        return Ok(Arc::new(MemoryJobStore::new()));
    };

    let pool = cadence_db::create_pool(database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    cadence_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database connection established");

    cadence_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(PgJobStore::new(pool)))
}

fn build_registry(endpoints: &ExecutorEndpoints) -> anyhow::Result<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();

    if let Some(url) = &endpoints.video_engine_url {
        let client = ProviderClient::new(url.as_str(), endpoints.request_timeout)?;
        registry.register_family(
            JobFamily::Video,
            Arc::new(VideoExecutor::new(client, endpoints.video_poll_interval)),
        );
    }
    if let Some(url) = &endpoints.image_engine_url {
        let client = ProviderClient::new(url.as_str(), endpoints.request_timeout)?;
        registry.register_family(JobFamily::Image, Arc::new(ImageExecutor::new(client)));
    }
    if let Some(url) = &endpoints.social_publisher_url {
        let client = ProviderClient::new(url.as_str(), endpoints.request_timeout)?;
        registry.register_family(JobFamily::Social, Arc::new(SocialPostExecutor::new(client)));
    }

    if registry.is_empty() {
        tracing::warn!("No executor endpoints configured; every enqueue will be rejected");
    } else {
        tracing::info!(families = ?registry.families(), "Executors registered");
    }
    Ok(registry)
}

fn build_feed(callback_url: Option<&str>) -> anyhow::Result<Arc<dyn RecommendationFeed>> {
    match callback_url {
        Some(url) => {
            tracing::info!(url, "Reporting to recommendation feed");
            Ok(Arc::new(WebhookRecommendationFeed::new(url)?))
        }
        None => Ok(Arc::new(NoopRecommendationFeed)),
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
