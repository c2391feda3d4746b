//! Research Models
//! Verdicts, analyses, jobs and alerts shared by the agents, the store and the API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upstream trading verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Buy,
    Sell,
    Hold,
}

impl Verdict {
    pub const ALL: [Verdict; 3] = [Verdict::Buy, Verdict::Sell, Verdict::Hold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Buy => "BUY",
            Verdict::Sell => "SELL",
            Verdict::Hold => "HOLD",
        }
    }

    /// Case-insensitive; "strong buy" style labels collapse to their direction.
    /// Anything unrecognised is a HOLD.
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_ascii_uppercase();
        if s.contains("BUY") || s == "LONG" {
            Verdict::Buy
        } else if s.contains("SELL") || s == "SHORT" {
            Verdict::Sell
        } else {
            Verdict::Hold
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Verdict::Hold)
    }
}

/// Which agent produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Primo,
    Trading,
    Consensus,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSource::Primo => "primo",
            AnalysisSource::Trading => "trading",
            AnalysisSource::Consensus => "consensus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "primo" => Some(AnalysisSource::Primo),
            "trading" => Some(AnalysisSource::Trading),
            "consensus" => Some(AnalysisSource::Consensus),
            _ => None,
        }
    }
}

/// What a job runs. Same wire values as [`AnalysisSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Primo,
    Trading,
    Consensus,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Primo => "primo",
            JobType::Trading => "trading",
            JobType::Consensus => "consensus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "primo" => Some(JobType::Primo),
            "trading" => Some(JobType::Trading),
            "consensus" => Some(JobType::Consensus),
            _ => None,
        }
    }
}

/// One agent's verdict on a symbol for a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAnalysis {
    pub source: AnalysisSource,
    pub symbol: String,
    pub date: String,
    pub recommendation: Verdict,
    /// Normalized to [0, 1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    /// Upstream payload as received (or the consensus breakdown).
    #[serde(default)]
    pub raw: Value,
}

/// Stored analysis row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: i64,
    #[serde(flatten)]
    pub analysis: AgentAnalysis,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub symbol: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_ms: Option<f64>,
    pub error: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedStock {
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub enabled: bool,
    pub priority: i64,
    pub analysis_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub avg_duration_ms: Option<f64>,
    pub last_analyzed: Option<String>,
}

/// Request body for adding or updating a tracked stock.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrackedStock {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i64 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "warning" => AlertSeverity::Warning,
            "critical" => AlertSeverity::Critical,
            _ => AlertSeverity::Info,
        }
    }
}

pub const ALERT_HIGH_CONFIDENCE: &str = "high_confidence";
pub const ALERT_CONSENSUS_AGREEMENT: &str = "consensus_agreement";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub symbol: String,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_parse() {
        assert_eq!(Verdict::parse("buy"), Verdict::Buy);
        assert_eq!(Verdict::parse("Strong Sell"), Verdict::Sell);
        assert_eq!(Verdict::parse("HOLD"), Verdict::Hold);
        assert_eq!(Verdict::parse("maybe?"), Verdict::Hold);
        assert_eq!(serde_json::to_string(&Verdict::Buy).unwrap(), r#""BUY""#);
    }

    #[test]
    fn test_source_and_job_type_strings() {
        for s in [AnalysisSource::Primo, AnalysisSource::Trading, AnalysisSource::Consensus] {
            assert_eq!(AnalysisSource::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobType::parse("CONSENSUS"), Some(JobType::Consensus));
        assert_eq!(JobType::parse("other"), None);
        assert_eq!(JobStatus::parse("completed"), Some(JobStatus::Completed));
        assert_eq!(AlertSeverity::parse("critical"), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::parse("loud"), AlertSeverity::Info);
    }

    #[test]
    fn test_new_tracked_stock_defaults() {
        let stock: NewTrackedStock = serde_json::from_str(r#"{"symbol":"AAPL"}"#).unwrap();
        assert!(stock.enabled);
        assert_eq!(stock.priority, 5);
    }
}
