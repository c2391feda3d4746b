//! Analysis job execution.
//!
//! A job runs one agent (or both, for consensus), persists every verdict,
//! raises alerts and keeps per-symbol statistics. Failures are recorded on the
//! job row and returned to the caller.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::agents::AnalysisAgent;
use super::consensus::{merge_consensus, ConsensusOutcome};
use super::models::{
    AgentAnalysis, AlertSeverity, AnalysisSource, JobType, ALERT_CONSENSUS_AGREEMENT,
    ALERT_HIGH_CONFIDENCE,
};
use super::store::ResearchStore;

/// A unit of research work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    #[serde(default = "new_job_id")]
    pub job_id: String,
    pub symbol: String,
    pub job_type: JobType,
    /// Analysis date (YYYY-MM-DD). Defaults to today (UTC).
    #[serde(default = "today")]
    pub date: String,
}

fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

impl AnalysisJob {
    pub fn new(symbol: &str, job_type: JobType, date: Option<&str>) -> Self {
        Self {
            job_id: new_job_id(),
            symbol: symbol.trim().to_uppercase(),
            job_type,
            date: date.map(str::to_string).unwrap_or_else(today),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: String,
    pub symbol: String,
    pub source: AnalysisSource,
    /// The single-agent verdict, or the merged verdict for consensus jobs.
    pub analysis: AgentAnalysis,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusOutcome>,
    pub duration_ms: f64,
}

pub struct JobRunner {
    store: ResearchStore,
    primo: Arc<dyn AnalysisAgent>,
    trading: Arc<dyn AnalysisAgent>,
    high_confidence_threshold: f64,
}

impl JobRunner {
    pub fn new(
        store: ResearchStore,
        primo: Arc<dyn AnalysisAgent>,
        trading: Arc<dyn AnalysisAgent>,
        high_confidence_threshold: f64,
    ) -> Self {
        Self {
            store,
            primo,
            trading,
            high_confidence_threshold,
        }
    }

    pub fn store(&self) -> &ResearchStore {
        &self.store
    }

    /// Run `job` once.
    pub async fn execute(&self, job: &AnalysisJob) -> Result<JobOutcome> {
        self.execute_attempt(job, 0).await
    }

    /// Run `job`, recording `retry_count` previous attempts on the job row.
    pub async fn execute_attempt(&self, job: &AnalysisJob, retry_count: u32) -> Result<JobOutcome> {
        let symbol = job.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(anyhow!("symbol is required"));
        }

        self.store.ensure_tracked(&symbol)?;
        self.store
            .record_job_started(&job.job_id, &symbol, job.job_type, retry_count)?;

        let started = Instant::now();
        let result = self.run(job, &symbol).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(mut outcome) => {
                outcome.duration_ms = duration_ms;
                self.store.complete_job(&job.job_id, duration_ms)?;
                self.store.record_stock_outcome(&symbol, true, duration_ms)?;
                info!(
                    job_id = %job.job_id,
                    symbol = %symbol,
                    job_type = job.job_type.as_str(),
                    decision = outcome.analysis.recommendation.as_str(),
                    confidence = outcome.analysis.confidence,
                    "✅ Analysis job completed in {:.0}ms",
                    duration_ms
                );
                Ok(outcome)
            }
            Err(e) => {
                let msg = format!("{:#}", e);
                warn!(
                    job_id = %job.job_id,
                    symbol = %symbol,
                    job_type = job.job_type.as_str(),
                    attempt = retry_count + 1,
                    "❌ Analysis job failed: {}",
                    msg
                );
                if let Err(db_err) = self.store.fail_job(&job.job_id, duration_ms, &msg) {
                    warn!(job_id = %job.job_id, "failed to record job failure: {}", db_err);
                }
                if let Err(db_err) = self.store.record_stock_outcome(&symbol, false, duration_ms) {
                    warn!(symbol = %symbol, "failed to record stock failure: {}", db_err);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, job: &AnalysisJob, symbol: &str) -> Result<JobOutcome> {
        match job.job_type {
            JobType::Primo => self.run_single(job, symbol, self.primo.as_ref()).await,
            JobType::Trading => self.run_single(job, symbol, self.trading.as_ref()).await,
            JobType::Consensus => self.run_consensus(job, symbol).await,
        }
    }

    async fn run_single(
        &self,
        job: &AnalysisJob,
        symbol: &str,
        agent: &dyn AnalysisAgent,
    ) -> Result<JobOutcome> {
        let analysis = agent.analyze(symbol, &job.date).await?;
        self.store.insert_analysis(&analysis)?;
        self.maybe_alert_high_confidence(&analysis)?;

        Ok(JobOutcome {
            job_id: job.job_id.clone(),
            symbol: symbol.to_string(),
            source: analysis.source,
            analysis,
            agents: Vec::new(),
            consensus: None,
            duration_ms: 0.0,
        })
    }

    async fn run_consensus(&self, job: &AnalysisJob, symbol: &str) -> Result<JobOutcome> {
        let (primo, trading) = tokio::try_join!(
            self.primo.analyze(symbol, &job.date),
            self.trading.analyze(symbol, &job.date)
        )?;

        self.store.insert_analysis(&primo)?;
        self.store.insert_analysis(&trading)?;
        self.maybe_alert_high_confidence(&primo)?;
        self.maybe_alert_high_confidence(&trading)?;

        let agents = vec![primo, trading];
        let consensus = merge_consensus(&agents);

        let merged = AgentAnalysis {
            source: AnalysisSource::Consensus,
            symbol: symbol.to_string(),
            date: job.date.clone(),
            recommendation: consensus.decision,
            confidence: consensus.strength,
            price_target: agents.iter().find_map(|a| a.price_target),
            risk_level: agents.iter().find_map(|a| a.risk_level.clone()),
            raw: serde_json::to_value(&consensus)?,
        };
        self.store.insert_analysis(&merged)?;

        if consensus.agreement {
            self.store.insert_alert(
                symbol,
                ALERT_CONSENSUS_AGREEMENT,
                AlertSeverity::Info,
                &format!(
                    "Both agents agree on {} for {}",
                    consensus.decision.as_str(),
                    symbol
                ),
            )?;
        }

        Ok(JobOutcome {
            job_id: job.job_id.clone(),
            symbol: symbol.to_string(),
            source: AnalysisSource::Consensus,
            analysis: merged,
            agents,
            consensus: Some(consensus),
            duration_ms: 0.0,
        })
    }

    fn maybe_alert_high_confidence(&self, analysis: &AgentAnalysis) -> Result<()> {
        if analysis.recommendation.is_directional()
            && analysis.confidence >= self.high_confidence_threshold
        {
            self.store.insert_alert(
                &analysis.symbol,
                ALERT_HIGH_CONFIDENCE,
                AlertSeverity::Warning,
                &format!(
                    "{} {} signal for {} at {:.0}% confidence",
                    analysis.source.as_str(),
                    analysis.recommendation.as_str(),
                    analysis.symbol,
                    analysis.confidence * 100.0
                ),
            )?;
        }
        Ok(())
    }
}
