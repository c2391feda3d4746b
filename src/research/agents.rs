//! Upstream analyst agents.
//!
//! Two HTTP services produce verdicts: the Primo agent (multi-symbol
//! analyze endpoint) and the TradingAgents debate service. Both sit behind
//! [`AnalysisAgent`] so the job runner and tests can swap them out.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::debug;

use super::models::{AgentAnalysis, AnalysisSource, Verdict};

#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    fn source(&self) -> AnalysisSource;

    async fn analyze(&self, symbol: &str, date: &str) -> Result<AgentAnalysis>;
}

/// Agents report confidence either as a fraction or as a percent.
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        0.0
    } else if raw <= 1.0 {
        raw
    } else if raw <= 100.0 {
        raw / 100.0
    } else {
        1.0
    }
}

/// Numbers sometimes arrive as strings.
fn de_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if !s.trim().is_empty() => {
            s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
        }
        _ => Ok(None),
    }
}

fn check_upstream_success(body: &Value, service: &str) -> Result<()> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let msg = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("{} reported failure: {}", service, msg);
    }
    Ok(())
}

async fn post_json(http: &reqwest::Client, url: &str, payload: &Value, service: &str) -> Result<Value> {
    let resp = http
        .post(url)
        .json(payload)
        .send()
        .await
        .with_context(|| format!("{} request failed", service))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{} returned {}: {}", service, status, body);
    }

    resp.json::<Value>()
        .await
        .with_context(|| format!("{} returned invalid JSON", service))
}

// ---------------------------------------------------------------------------
// Primo agent
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PrimoSymbolAnalysis {
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default, deserialize_with = "de_f64_opt")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "de_f64_opt")]
    price_target: Option<f64>,
}

pub struct PrimoAgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl PrimoAgentClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

pub(crate) fn parse_primo(symbol: &str, date: &str, body: Value) -> Result<AgentAnalysis> {
    check_upstream_success(&body, "primo agent")?;

    let entry = body
        .pointer("/result/analyses")
        .and_then(|a| a.get(symbol))
        .cloned()
        .ok_or_else(|| anyhow!("primo agent returned no analysis for {}", symbol))?;
    let parsed: PrimoSymbolAnalysis =
        serde_json::from_value(entry.clone()).context("malformed primo analysis")?;

    Ok(AgentAnalysis {
        source: AnalysisSource::Primo,
        symbol: symbol.to_string(),
        date: date.to_string(),
        recommendation: parsed
            .recommendation
            .as_deref()
            .map(Verdict::parse)
            .unwrap_or(Verdict::Hold),
        confidence: normalize_confidence(parsed.confidence.unwrap_or(0.0)),
        price_target: parsed.price_target,
        risk_level: None,
        raw: entry,
    })
}

#[async_trait]
impl AnalysisAgent for PrimoAgentClient {
    fn source(&self) -> AnalysisSource {
        AnalysisSource::Primo
    }

    async fn analyze(&self, symbol: &str, date: &str) -> Result<AgentAnalysis> {
        let url = format!("{}/analyze", self.base_url);
        debug!(symbol, date, url = %url, "primo analyze");
        let body = post_json(
            &self.http,
            &url,
            &json!({ "symbols": [symbol], "date": date }),
            "primo agent",
        )
        .await?;
        parse_primo(symbol, date, body)
    }
}

// ---------------------------------------------------------------------------
// TradingAgents
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TradingDecision {
    #[serde(default)]
    action: Option<String>,
    #[serde(default, deserialize_with = "de_f64_opt")]
    confidence: Option<f64>,
    #[serde(default)]
    risk_assessment: Option<RiskAssessment>,
    #[serde(default)]
    recommendation: Option<TradingRecommendation>,
}

#[derive(Debug, Deserialize)]
struct RiskAssessment {
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradingRecommendation {
    #[serde(default, deserialize_with = "de_f64_opt")]
    take_profit: Option<f64>,
}

pub struct TradingAgentsClient {
    http: reqwest::Client,
    base_url: String,
    max_debate_rounds: u32,
}

impl TradingAgentsClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, max_debate_rounds: u32) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_debate_rounds,
        }
    }
}

pub(crate) fn parse_trading(symbol: &str, date: &str, body: Value) -> Result<AgentAnalysis> {
    check_upstream_success(&body, "trading agents")?;

    let decision_value = body
        .get("decision")
        .cloned()
        .ok_or_else(|| anyhow!("trading agents returned no decision for {}", symbol))?;
    let decision: TradingDecision =
        serde_json::from_value(decision_value.clone()).context("malformed trading decision")?;

    Ok(AgentAnalysis {
        source: AnalysisSource::Trading,
        symbol: symbol.to_string(),
        date: date.to_string(),
        recommendation: decision
            .action
            .as_deref()
            .map(Verdict::parse)
            .unwrap_or(Verdict::Hold),
        confidence: normalize_confidence(decision.confidence.unwrap_or(0.0)),
        price_target: decision.recommendation.and_then(|r| r.take_profit),
        risk_level: decision.risk_assessment.and_then(|r| r.level),
        raw: decision_value,
    })
}

#[async_trait]
impl AnalysisAgent for TradingAgentsClient {
    fn source(&self) -> AnalysisSource {
        AnalysisSource::Trading
    }

    async fn analyze(&self, symbol: &str, date: &str) -> Result<AgentAnalysis> {
        let url = format!("{}/analyze", self.base_url);
        debug!(symbol, date, rounds = self.max_debate_rounds, "trading agents analyze");
        let body = post_json(
            &self.http,
            &url,
            &json!({
                "symbol": symbol,
                "date": date,
                "max_debate_rounds": self.max_debate_rounds,
            }),
            "trading agents",
        )
        .await?;
        parse_trading(symbol, date, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primo_body() -> Value {
        json!({
            "success": true,
            "result": { "analyses": { "AAPL": {
                "recommendation": "BUY",
                "confidence": 0.85,
                "price_target": 185.5,
                "risk_factors": ["market_volatility"]
            }}}
        })
    }

    fn trading_body() -> Value {
        json!({
            "success": true,
            "decision": {
                "action": "BUY",
                "confidence": 0.82,
                "risk_assessment": { "level": "moderate" },
                "recommendation": { "position_size": 0.15, "take_profit": 195.0 }
            }
        })
    }

    #[test]
    fn test_parse_primo() {
        let a = parse_primo("AAPL", "2024-12-04", primo_body()).unwrap();
        assert_eq!(a.source, AnalysisSource::Primo);
        assert_eq!(a.recommendation, Verdict::Buy);
        assert_eq!(a.confidence, 0.85);
        assert_eq!(a.price_target, Some(185.5));
        assert!(a.raw.get("risk_factors").is_some());
    }

    #[test]
    fn test_parse_primo_missing_symbol() {
        let err = parse_primo("MSFT", "2024-12-04", primo_body()).unwrap_err();
        assert!(err.to_string().contains("MSFT"));
    }

    #[test]
    fn test_parse_trading() {
        let a = parse_trading("AAPL", "2024-12-04", trading_body()).unwrap();
        assert_eq!(a.source, AnalysisSource::Trading);
        assert_eq!(a.recommendation, Verdict::Buy);
        assert_eq!(a.confidence, 0.82);
        assert_eq!(a.risk_level.as_deref(), Some("moderate"));
        assert_eq!(a.price_target, Some(195.0));
    }

    #[test]
    fn test_upstream_failure_flag() {
        let body = json!({ "success": false, "error": "model offline" });
        let err = parse_trading("AAPL", "2024-12-04", body).unwrap_err();
        assert!(err.to_string().contains("model offline"));
    }

    #[test]
    fn test_string_confidence_and_percent() {
        let body = json!({ "decision": { "action": "sell", "confidence": "75" } });
        let a = parse_trading("AAPL", "2024-12-04", body).unwrap();
        assert_eq!(a.recommendation, Verdict::Sell);
        assert!((a.confidence - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(-1.0), 0.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
        assert_eq!(normalize_confidence(0.4), 0.4);
        assert_eq!(normalize_confidence(40.0), 0.4);
        assert_eq!(normalize_confidence(400.0), 1.0);
    }
}
