//! Research job routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::envelope::{ok, ApiError, ApiResponse, ApiResult};
use super::AppState;
use crate::research::{
    Alert, AnalysisJob, AnalysisRecord, AnalysisSource, JobOutcome, JobRecord, JobType,
    NewTrackedStock, TrackedStock,
};

const DEFAULT_RESULTS_LIMIT: usize = 20;
const MAX_RESULTS_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl AnalyzeRequest {
    fn into_job(self) -> Result<AnalysisJob, ApiError> {
        let symbol = self.symbol.trim();
        if symbol.is_empty() {
            return Err(ApiError::BadRequest("Missing required parameter: symbol".to_string()));
        }
        let job_type = match self.job_type.as_deref().map(str::trim) {
            None | Some("") => JobType::Consensus,
            Some(raw) => JobType::parse(raw).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Invalid jobType: {} (expected primo, trading or consensus)",
                    raw
                ))
            })?,
        };
        let date = match self.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => {
                chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|_| ApiError::BadRequest(format!("Invalid date: {}", d)))?;
                Some(d)
            }
            None => None,
        };
        Ok(AnalysisJob::new(symbol, job_type, date))
    }
}

/// POST /api/research/analyze (runs the job inline)
pub async fn post_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<JobOutcome> {
    let job = req.into_job()?;
    let outcome = state
        .runner
        .execute(&job)
        .await
        .map_err(|e| ApiError::Upstream(format!("Analysis failed for {}: {:#}", job.symbol, e)))?;
    Ok(ok(outcome))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enqueued {
    pub job_id: String,
    pub symbol: String,
    pub job_type: JobType,
}

/// POST /api/research/jobs
pub async fn post_job(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Enqueued>>), ApiError> {
    let job = req.into_job()?;
    let symbol = job.symbol.clone();
    let job_type = job.job_type;
    let job_id = state.queue.enqueue(job).await?;
    Ok((
        StatusCode::ACCEPTED,
        ok(Enqueued {
            job_id,
            symbol,
            job_type,
        }),
    ))
}

/// GET /api/research/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<JobRecord> {
    state
        .runner
        .store()
        .get_job(&job_id)?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub source: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/research/results/:symbol?source=&limit=
pub async fn get_results(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<ResultsQuery>,
) -> ApiResult<Vec<AnalysisRecord>> {
    let source = match q.source.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            AnalysisSource::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid source: {}", raw)))?,
        ),
        None => None,
    };
    let limit = q
        .limit
        .unwrap_or(DEFAULT_RESULTS_LIMIT)
        .clamp(1, MAX_RESULTS_LIMIT);
    let rows = state
        .runner
        .store()
        .list_analyses(&symbol.trim().to_uppercase(), source, limit)?;
    Ok(ok(rows))
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub symbol: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/research/alerts?symbol=
pub async fn get_alerts(
    State(state): State<AppState>,
    Query(q): Query<AlertsQuery>,
) -> ApiResult<Vec<Alert>> {
    let symbol = q
        .symbol
        .as_deref()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty());
    let limit = q
        .limit
        .unwrap_or(DEFAULT_RESULTS_LIMIT)
        .clamp(1, MAX_RESULTS_LIMIT);
    Ok(ok(state.runner.store().list_alerts(symbol.as_deref(), limit)?))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// GET /api/research/stocks/:symbol/jobs?limit=
pub async fn get_stock_jobs(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<JobRecord>> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_RESULTS_LIMIT)
        .clamp(1, MAX_RESULTS_LIMIT);
    let jobs = state
        .runner
        .store()
        .jobs_for_symbol(&symbol.trim().to_uppercase(), limit)?;
    Ok(ok(jobs))
}

/// GET /api/research/stocks
pub async fn get_stocks(State(state): State<AppState>) -> ApiResult<Vec<TrackedStock>> {
    Ok(ok(state.runner.store().list_stocks()?))
}

/// POST /api/research/stocks
pub async fn post_stock(
    State(state): State<AppState>,
    Json(stock): Json<NewTrackedStock>,
) -> ApiResult<TrackedStock> {
    if stock.symbol.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing required parameter: symbol".to_string()));
    }
    Ok(ok(state.runner.store().upsert_stock(&stock)?))
}
