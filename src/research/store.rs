//! Research persistence: tracked stocks, job history, analysis results and alerts.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};

use super::models::{
    AgentAnalysis, Alert, AlertSeverity, AnalysisRecord, AnalysisSource, JobRecord, JobStatus,
    JobType, NewTrackedStock, TrackedStock, Verdict,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_stocks (
    symbol TEXT PRIMARY KEY,
    name TEXT,
    sector TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 5,
    analysis_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    avg_duration_ms REAL,
    last_analyzed TEXT,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS job_history (
    job_id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    duration_ms REAL,
    error TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_job_history_symbol
    ON job_history(symbol, created_at DESC);

CREATE TABLE IF NOT EXISTS analysis_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    source TEXT NOT NULL,
    recommendation TEXT NOT NULL,
    confidence REAL NOT NULL,
    price_target REAL,
    risk_level TEXT,
    analysis_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analysis_results_symbol
    ON analysis_results(symbol, source, id DESC);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_symbol ON alerts(symbol, id DESC);
"#;

#[derive(Clone)]
pub struct ResearchStore {
    conn: Arc<Mutex<Connection>>,
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn stock_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedStock> {
    Ok(TrackedStock {
        symbol: row.get(0)?,
        name: row.get(1)?,
        sector: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        priority: row.get(4)?,
        analysis_count: row.get(5)?,
        success_count: row.get(6)?,
        failure_count: row.get(7)?,
        avg_duration_ms: row.get(8)?,
        last_analyzed: row.get(9)?,
    })
}

const STOCK_COLUMNS: &str = "symbol, name, sector, enabled, priority, analysis_count, \
     success_count, failure_count, avg_duration_ms, last_analyzed";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let job_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(JobRecord {
        job_id: row.get(0)?,
        symbol: row.get(1)?,
        job_type: JobType::parse(&job_type).unwrap_or(JobType::Consensus),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        duration_ms: row.get(6)?,
        error: row.get(7)?,
        retry_count: row.get::<_, i64>(8)?.max(0) as u32,
    })
}

const JOB_COLUMNS: &str =
    "job_id, symbol, job_type, status, started_at, completed_at, duration_ms, error, retry_count";

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRecord> {
    let source: String = row.get(3)?;
    let recommendation: String = row.get(4)?;
    let raw_json: String = row.get(8)?;
    Ok(AnalysisRecord {
        id: row.get(0)?,
        analysis: AgentAnalysis {
            symbol: row.get(1)?,
            date: row.get(2)?,
            source: AnalysisSource::parse(&source).unwrap_or(AnalysisSource::Consensus),
            recommendation: Verdict::parse(&recommendation),
            confidence: row.get(5)?,
            price_target: row.get(6)?,
            risk_level: row.get(7)?,
            raw: serde_json::from_str(&raw_json).unwrap_or(serde_json::Value::Null),
        },
        created_at: row.get(9)?,
    })
}

impl ResearchStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open research database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize research schema")?;

        let tracked: i64 = conn
            .query_row("SELECT COUNT(*) FROM tracked_stocks", [], |row| row.get(0))
            .unwrap_or(0);
        info!("🔬 Research store ready at {} ({} tracked stocks)", db_path, tracked);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- tracked stocks ----

    /// Insert or update a tracked stock, keeping its counters.
    pub fn upsert_stock(&self, stock: &NewTrackedStock) -> Result<TrackedStock> {
        let symbol = stock.symbol.trim().to_uppercase();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tracked_stocks (symbol, name, sector, enabled, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(symbol) DO UPDATE SET
                name = COALESCE(excluded.name, tracked_stocks.name),
                sector = COALESCE(excluded.sector, tracked_stocks.sector),
                enabled = excluded.enabled,
                priority = excluded.priority",
            params![symbol, stock.name, stock.sector, stock.enabled as i64, stock.priority, now()],
        )?;
        let sql = format!("SELECT {} FROM tracked_stocks WHERE symbol = ?1", STOCK_COLUMNS);
        let saved = conn.query_row(&sql, params![symbol], stock_from_row)?;
        Ok(saved)
    }

    /// Track `symbol` with defaults if unknown. Returns true when it was added.
    pub fn ensure_tracked(&self, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tracked_stocks (symbol, created_at) VALUES (?1, ?2)",
            params![symbol, now()],
        )?;
        if inserted > 0 {
            debug!(symbol, "auto-tracked new symbol");
        }
        Ok(inserted > 0)
    }

    pub fn get_stock(&self, symbol: &str) -> Result<Option<TrackedStock>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM tracked_stocks WHERE symbol = ?1", STOCK_COLUMNS);
        Ok(conn
            .query_row(&sql, params![symbol], stock_from_row)
            .optional()?)
    }

    /// Highest priority first.
    pub fn list_stocks(&self) -> Result<Vec<TrackedStock>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM tracked_stocks ORDER BY priority DESC, symbol ASC",
            STOCK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], stock_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count one analysis attempt and fold its duration into the running mean.
    pub fn record_stock_outcome(&self, symbol: &str, success: bool, duration_ms: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tracked_stocks SET
                avg_duration_ms = (COALESCE(avg_duration_ms, 0) * analysis_count + ?2) / (analysis_count + 1),
                analysis_count = analysis_count + 1,
                success_count = success_count + ?3,
                failure_count = failure_count + ?4,
                last_analyzed = ?5
             WHERE symbol = ?1",
            params![
                symbol,
                duration_ms,
                success as i64,
                (!success) as i64,
                now()
            ],
        )?;
        Ok(())
    }

    // ---- job history ----

    pub fn record_job_queued(&self, job_id: &str, symbol: &str, job_type: JobType) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO job_history (job_id, symbol, job_type, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, symbol, job_type.as_str(), JobStatus::Queued.as_str(), now()],
        )?;
        Ok(())
    }

    /// Mark a job processing. Re-running an existing job id clears its
    /// previous outcome and stores the attempt count.
    pub fn record_job_started(
        &self,
        job_id: &str,
        symbol: &str,
        job_type: JobType,
        retry_count: u32,
    ) -> Result<()> {
        let ts = now();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO job_history (job_id, symbol, job_type, status, started_at, retry_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5)
             ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = NULL,
                duration_ms = NULL,
                error = NULL,
                retry_count = excluded.retry_count",
            params![
                job_id,
                symbol,
                job_type.as_str(),
                JobStatus::Processing.as_str(),
                ts,
                retry_count as i64
            ],
        )?;
        Ok(())
    }

    pub fn complete_job(&self, job_id: &str, duration_ms: f64) -> Result<()> {
        self.finish_job(job_id, JobStatus::Completed, duration_ms, None)
    }

    pub fn fail_job(&self, job_id: &str, duration_ms: f64, error: &str) -> Result<()> {
        self.finish_job(job_id, JobStatus::Failed, duration_ms, Some(error))
    }

    fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        duration_ms: f64,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE job_history SET status = ?2, completed_at = ?3, duration_ms = ?4, error = ?5
             WHERE job_id = ?1",
            params![job_id, status.as_str(), now(), duration_ms, error],
        )?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM job_history WHERE job_id = ?1", JOB_COLUMNS);
        Ok(conn.query_row(&sql, params![job_id], job_from_row).optional()?)
    }

    /// Newest first.
    pub fn jobs_for_symbol(&self, symbol: &str, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM job_history WHERE symbol = ?1 ORDER BY created_at DESC LIMIT ?2",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![symbol, limit as i64], job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- analysis results ----

    pub fn insert_analysis(&self, analysis: &AgentAnalysis) -> Result<i64> {
        let raw = serde_json::to_string(&analysis.raw)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO analysis_results
                (symbol, date, source, recommendation, confidence, price_target, risk_level, analysis_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                analysis.symbol,
                analysis.date,
                analysis.source.as_str(),
                analysis.recommendation.as_str(),
                analysis.confidence,
                analysis.price_target,
                analysis.risk_level,
                raw,
                now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first, optionally filtered by source.
    pub fn list_analyses(
        &self,
        symbol: &str,
        source: Option<AnalysisSource>,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, date, source, recommendation, confidence, price_target, risk_level,
                    analysis_json, created_at
             FROM analysis_results
             WHERE symbol = ?1 AND (?2 IS NULL OR source = ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![symbol, source.map(|s| s.as_str()), limit as i64],
            analysis_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- alerts ----

    pub fn insert_alert(
        &self,
        symbol: &str,
        alert_type: &str,
        severity: AlertSeverity,
        message: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alerts (symbol, alert_type, severity, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![symbol, alert_type, severity.as_str(), message, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first.
    pub fn list_alerts(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, alert_type, severity, message, created_at
             FROM alerts
             WHERE ?1 IS NULL OR symbol = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![symbol, limit as i64], |row| {
            let severity: String = row.get(3)?;
            Ok(Alert {
                id: row.get(0)?,
                symbol: row.get(1)?,
                alert_type: row.get(2)?,
                severity: AlertSeverity::parse(&severity),
                message: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
