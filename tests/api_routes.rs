//! Router tests driven through `tower::ServiceExt::oneshot` with in-process
//! fakes for the price source and the analyst agents.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware::from_fn_with_state,
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use tradedesk_backend::api::{router, AppState};
use tradedesk_backend::config::AppConfig;
use tradedesk_backend::market_data::{PriceSeries, PriceSource};
use tradedesk_backend::middleware::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
use tradedesk_backend::portfolio::PortfolioStore;
use tradedesk_backend::research::{
    AgentAnalysis, AnalysisAgent, AnalysisSource, JobQueue, JobRunner, ResearchStore, Verdict,
};

struct FakePrices;

#[async_trait]
impl PriceSource for FakePrices {
    async fn daily_bars(&self, symbol: &str, start: NaiveDate, _end: NaiveDate) -> Result<PriceSeries> {
        match symbol {
            "EMPTY" => Ok(PriceSeries::new(symbol, Vec::new())),
            "DOWN" => Err(anyhow!("connection refused")),
            _ => {
                let closes: Vec<f64> = (0..60)
                    .map(|i| 100.0 + i as f64 * 0.5 + (i as f64 * 0.7).sin() * 3.0)
                    .collect();
                Ok(PriceSeries::from_closes(symbol, start, &closes))
            }
        }
    }
}

struct FakeAgent {
    source: AnalysisSource,
    verdict: Verdict,
    confidence: f64,
}

#[async_trait]
impl AnalysisAgent for FakeAgent {
    fn source(&self) -> AnalysisSource {
        self.source
    }

    async fn analyze(&self, symbol: &str, date: &str) -> Result<AgentAnalysis> {
        if symbol == "FAIL" {
            return Err(anyhow!("API timeout"));
        }
        Ok(AgentAnalysis {
            source: self.source,
            symbol: symbol.to_string(),
            date: date.to_string(),
            recommendation: self.verdict,
            confidence: self.confidence,
            price_target: None,
            risk_level: Some("moderate".into()),
            raw: json!({}),
        })
    }
}

struct TestApp {
    app: Router,
    _db: NamedTempFile,
}

fn test_app() -> TestApp {
    let db = NamedTempFile::new().unwrap();
    let path = db.path().to_str().unwrap().to_string();
    let config = AppConfig {
        db_path: path.clone(),
        ..AppConfig::default()
    };

    let runner = Arc::new(JobRunner::new(
        ResearchStore::new(&path).unwrap(),
        Arc::new(FakeAgent {
            source: AnalysisSource::Primo,
            verdict: Verdict::Buy,
            confidence: 0.85,
        }),
        Arc::new(FakeAgent {
            source: AnalysisSource::Trading,
            verdict: Verdict::Buy,
            confidence: 0.82,
        }),
        config.high_confidence_threshold,
    ));
    let queue = JobQueue::spawn(runner.clone(), 1, 1);

    let state = AppState {
        config: Arc::new(config),
        prices: Arc::new(FakePrices),
        portfolio: PortfolioStore::new(&path).unwrap(),
        runner,
        queue,
    };

    TestApp {
        app: router(state),
        _db: db,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let t = test_app();
    let (status, body) = send(&t.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_backtest_requires_parameters() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/backtest/technical",
        Some(json!({ "symbol": "AAPL" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "Missing required parameters: symbol, startDate, endDate"
    );
}

#[tokio::test]
async fn test_rejects_malformed_symbols() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/backtest/technical",
        Some(json!({ "symbol": "AAPL/../v7", "startDate": "2024-01-01", "endDate": "2024-02-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid symbol: AAPL/../v7");

    let (status, body) = send(&t.app, Method::GET, "/api/stocks/historical/BRK%2FB", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid symbol: BRK/B");
}

#[tokio::test]
async fn test_backtest_ranks_results() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/backtest/technical",
        Some(json!({
            "symbol": "aapl",
            "startDate": "2024-01-01",
            "endDate": "2024-03-31",
            "strategyIds": ["buy-hold", "rsi-2", "macd", "no-such-strategy"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let data = &body["data"];
    assert_eq!(data["symbol"], "AAPL");
    assert_eq!(data["initialCapital"], 100_000.0);
    assert_eq!(data["ignoredStrategyIds"], json!(["no-such-strategy"]));

    let results = data["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let returns: Vec<f64> = results
        .iter()
        .map(|r| r["totalReturnPercent"].as_f64().unwrap())
        .collect();
    assert!(returns.windows(2).all(|w| w[0] >= w[1]));
    for r in results {
        assert_eq!(
            r["totalTrades"].as_u64().unwrap(),
            r["winningTrades"].as_u64().unwrap() + r["losingTrades"].as_u64().unwrap()
        );
    }
}

#[tokio::test]
async fn test_backtest_upstream_failures() {
    let t = test_app();
    for symbol in ["EMPTY", "DOWN"] {
        let (status, body) = send(
            &t.app,
            Method::POST,
            "/api/backtest/technical",
            Some(json!({ "symbol": symbol, "startDate": "2024-01-01", "endDate": "2024-02-01" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            format!("Failed to fetch historical data for {}", symbol)
        );
    }
}

#[tokio::test]
async fn test_strategy_catalog() {
    let t = test_app();
    let (status, body) = send(&t.app, Method::GET, "/api/backtest/strategies", None).await;
    assert_eq!(status, StatusCode::OK);
    let list = body["data"].as_array().unwrap();
    assert_eq!(list.len(), 24);
    assert_eq!(list[0]["id"], "buy-hold");
}

#[tokio::test]
async fn test_historical_prices() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Method::GET,
        "/api/stocks/historical/msft?start=2024-01-01&end=2024-03-01",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbol"], "MSFT");
    assert_eq!(body["data"]["dataPoints"], 60);

    let (status, _) = send(&t.app, Method::GET, "/api/stocks/historical/EMPTY", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_portfolio_trading_flow() {
    let t = test_app();
    let base = "/api/users/alice";

    let (status, _) = send(&t.app, Method::GET, &format!("{}/portfolio", base), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &t.app,
        Method::POST,
        &format!("{}/portfolio/initialize", base),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created"], true);
    assert_eq!(body["data"]["portfolio"]["cash"], 100_000.0);

    let trade = |action: &str, shares: f64, price: f64| {
        json!({ "symbol": "aapl", "action": action, "shares": shares, "price": price })
    };

    let (status, body) = send(
        &t.app,
        Method::POST,
        &format!("{}/trades", base),
        Some(trade("buy", 1_000.0, 150.0)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Insufficient funds");

    let (status, body) = send(
        &t.app,
        Method::POST,
        &format!("{}/trades", base),
        Some(trade("buy", 100.0, 150.0)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbol"], "AAPL");
    assert_eq!(body["data"]["cashAfter"], 85_000.0);

    let (status, _) = send(
        &t.app,
        Method::POST,
        &format!("{}/trades", base),
        Some(trade("sell", 0.0, 150.0)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        Method::POST,
        &format!("{}/trades", base),
        Some(trade("sell", 40.0, 160.0)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["realizedPnl"], 400.0);

    let (_, body) = send(&t.app, Method::GET, &format!("{}/positions", base), None).await;
    let positions = body["data"].as_array().unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0]["size"], 60.0);

    let (_, body) = send(&t.app, Method::GET, &format!("{}/trades", base), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = send(&t.app, Method::GET, &format!("{}/portfolio", base), None).await;
    let p = &body["data"];
    assert_eq!(p["cash"], 91_400.0);
    assert_eq!(p["totalEquity"], 91_400.0 + 60.0 * 160.0);

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/users/nobody/trades",
        Some(trade("buy", 1.0, 1.0)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Portfolio not found");
}

#[tokio::test]
async fn test_watchlist_routes() {
    let t = test_app();
    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/users/bob/watchlist",
        Some(json!({ "symbol": "nvda", "name": "NVIDIA" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&t.app, Method::GET, "/api/users/bob/watchlist", None).await;
    assert_eq!(body["data"][0]["symbol"], "NVDA");

    let (status, _) = send(&t.app, Method::DELETE, "/api/users/bob/watchlist/NVDA", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, Method::DELETE, "/api/users/bob/watchlist/NVDA", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_research_analyze_consensus() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/research/analyze",
        Some(json!({ "symbol": "aapl", "jobType": "consensus", "date": "2024-12-04" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let consensus = &body["data"]["consensus"];
    assert_eq!(consensus["decision"], "BUY");
    assert_eq!(consensus["agreement"], true);
    assert!(consensus["strength"].as_f64().unwrap() > 0.8);

    let (_, body) = send(&t.app, Method::GET, "/api/research/results/AAPL", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (_, body) = send(
        &t.app,
        Method::GET,
        "/api/research/results/AAPL?source=consensus",
        None,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(&t.app, Method::GET, "/api/research/alerts?symbol=AAPL", None).await;
    let alerts = body["data"].as_array().unwrap();
    assert!(alerts
        .iter()
        .any(|a| a["alertType"] == "consensus_agreement"));
    assert_eq!(
        alerts
            .iter()
            .filter(|a| a["alertType"] == "high_confidence")
            .count(),
        2
    );

    let (_, body) = send(&t.app, Method::GET, "/api/research/stocks", None).await;
    assert_eq!(body["data"][0]["symbol"], "AAPL");
    assert_eq!(body["data"][0]["successCount"], 1);
}

#[tokio::test]
async fn test_research_validation_and_failure() {
    let t = test_app();
    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/research/analyze",
        Some(json!({ "symbol": "AAPL", "jobType": "astrology" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/research/analyze",
        Some(json!({ "symbol": "FAIL", "jobType": "primo" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("API timeout"));
}

#[tokio::test]
async fn test_enqueued_job_is_pollable() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/research/jobs",
        Some(json!({ "symbol": "MSFT", "jobType": "trading" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["data"]["jobId"].as_str().unwrap().to_string();

    let uri = format!("/api/research/jobs/{}", job_id);
    let mut final_status = Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&t.app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        final_status = body["data"]["status"].clone();
        if final_status == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(final_status, "completed");

    let (_, body) = send(&t.app, Method::GET, "/api/research/stocks/msft/jobs", None).await;
    let jobs = body["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["jobId"], job_id.as_str());

    let (status, _) = send(&t.app, Method::GET, "/api/research/jobs/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_rejects_with_retry_after() {
    let t = test_app();
    let limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: 1,
        window: Duration::from_secs(60),
        burst: 0,
    });
    let app = t
        .app
        .clone()
        .layer(from_fn_with_state(limiter, rate_limit_middleware));

    let first = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
}
