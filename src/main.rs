//! TradeDesk API server.

use anyhow::{Context, Result};
use axum::middleware as axum_middleware;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use tradedesk_backend::{
    api::{self, AppState},
    config::AppConfig,
    market_data::YahooChartClient,
    middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer},
    portfolio::PortfolioStore,
    research::{JobQueue, JobRunner, PrimoAgentClient, ResearchStore, TradingAgentsClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    tradedesk_backend::init_tracing("tradedesk_backend=debug,tower_http=info");

    info!("🚀 TradeDesk backend starting");

    let config = Arc::new(AppConfig::from_env().context("Failed to load configuration")?);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let portfolio = PortfolioStore::new(&config.db_path)?;
    let research_store = ResearchStore::new(&config.db_path)?;
    info!("📊 Database at {}", config.db_path);

    let primo = Arc::new(PrimoAgentClient::new(
        http_client.clone(),
        config.primo_agent_url.clone(),
    ));
    let trading = Arc::new(TradingAgentsClient::new(
        http_client.clone(),
        config.trading_agents_url.clone(),
        config.max_debate_rounds,
    ));
    info!(
        "🤖 Research agents: primo={} trading={}",
        config.primo_agent_url, config.trading_agents_url
    );

    let runner = Arc::new(JobRunner::new(
        research_store,
        primo,
        trading,
        config.high_confidence_threshold,
    ));
    let queue = JobQueue::spawn(runner.clone(), config.job_workers, config.job_max_attempts);

    let prices = Arc::new(YahooChartClient::new(
        http_client.clone(),
        config.yahoo_base_url.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        prices,
        portfolio,
        runner,
        queue,
    };

    let limiter = RateLimitLayer::new(RateLimitConfig::from(config.rate_limit.clone()));
    spawn_rate_limit_cleanup(limiter.clone());

    let app = api::router(state)
        .layer(axum_middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn spawn_rate_limit_cleanup(limiter: RateLimitLayer) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.cleanup();
            tracing::debug!(clients = limiter.tracked_clients(), "rate limiter cleanup");
        }
    });
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root.
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
