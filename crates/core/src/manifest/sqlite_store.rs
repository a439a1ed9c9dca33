//! SQLite-backed manifest store implementation.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, ToSql, TransactionBehavior};

use super::{
    FileRecord, FileStatus, HealthCheck, HealthStatus, HourlyStats, ManifestError,
    ManifestFilter, ManifestStore, MetricStatus, MetricStore, NewFile, QualityMetrics,
    QueryLogEntry, QueryStatus, ResourceUsage, Stage, StageMetric, StatusCount, Transition,
};
use crate::db::{self, from_db_time, from_db_time_opt, to_db_time};

const RECORD_COLUMNS: &str = "id, file_id, timestamp, satellite, product_type, source_locator, \
    status, retry_stage, download_attempt, processing_attempt, error_message, skip_reason, \
    created_at, updated_at, queued_at, download_started_at, downloaded_at, \
    processing_started_at, processed_at, raw_file_path, output_file_path, quality_score, \
    missing_data_pct, saturation_pct, mean_solar_zenith, file_size_mb, download_duration_sec, \
    processing_duration_sec";

const METRIC_COLUMNS: &str = "id, file_id, stage, attempt, duration_seconds, memory_mb, \
    cpu_percent, status, error_message, recorded_at";

/// SQLite-backed manifest store.
///
/// Besides `file_manifest` it owns the stage metrics, the catalog query log,
/// the health check log and the two reporting views.
pub struct SqliteManifestStore {
    conn: Mutex<Connection>,
}

impl SqliteManifestStore {
    /// Create a new store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, ManifestError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, ManifestError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ManifestError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_manifest (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                satellite TEXT NOT NULL,
                product_type TEXT NOT NULL,
                source_locator TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_stage TEXT,
                download_attempt INTEGER NOT NULL DEFAULT 0,
                processing_attempt INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                skip_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                queued_at TEXT,
                download_started_at TEXT,
                downloaded_at TEXT,
                processing_started_at TEXT,
                processed_at TEXT,
                raw_file_path TEXT,
                output_file_path TEXT,
                quality_score REAL,
                missing_data_pct REAL,
                saturation_pct REAL,
                mean_solar_zenith REAL,
                file_size_mb REAL,
                download_duration_sec REAL,
                processing_duration_sec REAL
            );

            CREATE INDEX IF NOT EXISTS idx_file_manifest_status ON file_manifest(status);
            CREATE INDEX IF NOT EXISTS idx_file_manifest_timestamp ON file_manifest(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_file_manifest_queued_at ON file_manifest(queued_at);
            CREATE INDEX IF NOT EXISTS idx_file_manifest_updated_at ON file_manifest(status, updated_at);

            CREATE TABLE IF NOT EXISTS processing_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id TEXT NOT NULL REFERENCES file_manifest(file_id) ON DELETE CASCADE,
                stage TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                duration_seconds REAL NOT NULL,
                memory_mb REAL,
                cpu_percent REAL,
                status TEXT NOT NULL,
                error_message TEXT,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_processing_metrics_file_id ON processing_metrics(file_id);
            CREATE INDEX IF NOT EXISTS idx_processing_metrics_stage ON processing_metrics(stage);

            CREATE TABLE IF NOT EXISTS api_query_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_timestamp TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                files_found INTEGER NOT NULL,
                files_new INTEGER NOT NULL,
                query_duration_sec REAL NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_api_query_log_timestamp ON api_query_log(query_timestamp DESC);

            CREATE TABLE IF NOT EXISTS health_checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                response_time_ms REAL,
                checked_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_health_checks_service ON health_checks(service, checked_at DESC);

            CREATE VIEW IF NOT EXISTS status_summary_24h AS
                SELECT status, COUNT(*) AS count
                FROM file_manifest
                WHERE datetime(timestamp) > datetime('now', '-24 hours')
                GROUP BY status;

            CREATE VIEW IF NOT EXISTS hourly_processing_stats AS
                SELECT
                    strftime('%Y-%m-%d %H:00:00', COALESCE(processed_at, updated_at)) AS hour,
                    COUNT(*) AS files_processed,
                    SUM(CASE WHEN status = 'COMPLETE' THEN 1 ELSE 0 END) AS files_complete,
                    SUM(CASE WHEN status = 'SKIPPED' THEN 1 ELSE 0 END) AS files_skipped,
                    SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END) AS files_failed,
                    AVG(processing_duration_sec) AS avg_processing_duration_sec,
                    AVG(quality_score) AS avg_quality_score
                FROM file_manifest
                WHERE status IN ('COMPLETE', 'SKIPPED', 'FAILED')
                GROUP BY hour;
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ManifestError> {
        self.conn
            .lock()
            .map_err(|_| ManifestError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &ManifestFilter) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref satellite) = filter.satellite {
            conditions.push("satellite = ?");
            params.push(Box::new(satellite.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn query_record(conn: &Connection, file_id: &str) -> Result<Option<FileRecord>, ManifestError> {
        let sql = format!("SELECT {} FROM file_manifest WHERE file_id = ?", RECORD_COLUMNS);
        Ok(conn
            .query_row(&sql, params![file_id], Self::row_to_record)
            .optional()?)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        let timestamp: String = row.get(2)?;
        let status: String = row.get(6)?;
        let retry_stage: Option<String> = row.get(7)?;
        let created_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;

        Ok(FileRecord {
            id: row.get(0)?,
            file_id: row.get(1)?,
            timestamp: from_db_time(&timestamp)?,
            satellite: row.get(3)?,
            product_type: row.get(4)?,
            source_locator: row.get(5)?,
            status: parse_column(6, &status)?,
            retry_stage: retry_stage
                .as_deref()
                .map(|s| parse_column::<Stage>(7, s))
                .transpose()?,
            download_attempt: row.get(8)?,
            processing_attempt: row.get(9)?,
            error_message: row.get(10)?,
            skip_reason: row.get(11)?,
            created_at: from_db_time(&created_at)?,
            updated_at: from_db_time(&updated_at)?,
            queued_at: from_db_time_opt(row.get(14)?)?,
            download_started_at: from_db_time_opt(row.get(15)?)?,
            downloaded_at: from_db_time_opt(row.get(16)?)?,
            processing_started_at: from_db_time_opt(row.get(17)?)?,
            processed_at: from_db_time_opt(row.get(18)?)?,
            raw_file_path: row.get(19)?,
            output_file_path: row.get(20)?,
            quality: QualityMetrics {
                quality_score: row.get(21)?,
                missing_data_pct: row.get(22)?,
                saturation_pct: row.get(23)?,
                mean_solar_zenith: row.get(24)?,
            },
            file_size_mb: row.get(25)?,
            download_duration_sec: row.get(26)?,
            processing_duration_sec: row.get(27)?,
        })
    }

    fn row_to_metric(row: &rusqlite::Row) -> rusqlite::Result<StageMetric> {
        let stage: String = row.get(2)?;
        let status: String = row.get(7)?;
        let recorded_at: String = row.get(9)?;

        Ok(StageMetric {
            id: Some(row.get(0)?),
            file_id: row.get(1)?,
            stage: parse_column(2, &stage)?,
            attempt: row.get(3)?,
            duration_seconds: row.get(4)?,
            resources: ResourceUsage {
                memory_mb: row.get(5)?,
                cpu_percent: row.get(6)?,
            },
            status: parse_column::<MetricStatus>(7, &status)?,
            error_message: row.get(8)?,
            recorded_at: from_db_time(&recorded_at)?,
        })
    }

    fn row_to_query(row: &rusqlite::Row) -> rusqlite::Result<QueryLogEntry> {
        let query_timestamp: String = row.get(1)?;
        let window_start: String = row.get(2)?;
        let window_end: String = row.get(3)?;
        let status: String = row.get(7)?;

        Ok(QueryLogEntry {
            id: Some(row.get(0)?),
            query_timestamp: from_db_time(&query_timestamp)?,
            window_start: from_db_time(&window_start)?,
            window_end: from_db_time(&window_end)?,
            files_found: row.get(4)?,
            files_new: row.get(5)?,
            query_duration_sec: row.get(6)?,
            status: if status == QueryStatus::Success.as_str() {
                QueryStatus::Success
            } else {
                QueryStatus::Failed
            },
            error_message: row.get(8)?,
        })
    }

    fn row_to_health_check(row: &rusqlite::Row) -> rusqlite::Result<HealthCheck> {
        let status: String = row.get(2)?;
        let checked_at: String = row.get(5)?;

        let status = match status.as_str() {
            "HEALTHY" => HealthStatus::Healthy,
            "DEGRADED" => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };

        Ok(HealthCheck {
            id: Some(row.get(0)?),
            service: row.get(1)?,
            status,
            message: row.get(3)?,
            response_time_ms: row.get(4)?,
            checked_at: from_db_time(&checked_at)?,
        })
    }
}

fn parse_column<T: FromStr<Err = String>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value
        .parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Column stamped once when a record enters `status`.
fn stage_timestamp_column(status: FileStatus) -> Option<&'static str> {
    match status {
        FileStatus::Queued => Some("queued_at"),
        FileStatus::Downloading => Some("download_started_at"),
        FileStatus::Downloaded => Some("downloaded_at"),
        FileStatus::Processing => Some("processing_started_at"),
        FileStatus::Complete | FileStatus::Skipped => Some("processed_at"),
        _ => None,
    }
}

fn attempt_column(stage: Stage) -> &'static str {
    match stage {
        Stage::Download => "download_attempt",
        Stage::Processing => "processing_attempt",
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl ManifestStore for SqliteManifestStore {
    fn insert_discovered(&self, file: &NewFile) -> Result<bool, ManifestError> {
        let conn = self.conn()?;
        let now = to_db_time(&Utc::now());

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO file_manifest (file_id, timestamp, satellite, product_type, source_locator, status, file_size_mb, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                file.file_id,
                to_db_time(&file.timestamp),
                file.satellite,
                file.product_type,
                file.source_locator,
                FileStatus::Discovered.as_str(),
                file.file_size_mb,
                now,
                now,
            ],
        )?;

        Ok(inserted == 1)
    }

    fn get(&self, file_id: &str) -> Result<Option<FileRecord>, ManifestError> {
        let conn = self.conn()?;
        Self::query_record(&conn, file_id)
    }

    fn list(&self, filter: &ManifestFilter) -> Result<Vec<FileRecord>, ManifestError> {
        let conn = self.conn()?;

        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM file_manifest {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            RECORD_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn count(&self, filter: &ManifestFilter) -> Result<i64, ManifestError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM file_manifest {}", where_clause);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn transition(
        &self,
        file_id: &str,
        expected: &[FileStatus],
        change: Transition,
    ) -> Result<FileRecord, ManifestError> {
        if let Some(from) = expected.iter().find(|s| !s.can_transition_to(change.to)) {
            return Err(ManifestError::IllegalTransition {
                from: *from,
                to: change.to,
            });
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let at = to_db_time(&change.at);
        let mut sets: Vec<String> = vec!["status = ?".to_string(), "updated_at = ?".to_string()];
        let mut params: Vec<Box<dyn ToSql>> =
            vec![Box::new(change.to.as_str()), Box::new(at.clone())];

        if let Some(column) = stage_timestamp_column(change.to) {
            sets.push(format!("{0} = COALESCE({0}, ?)", column));
            params.push(Box::new(at));
        }

        let starts = change.starts_stage();
        if let Some(stage) = starts {
            let column = attempt_column(stage);
            sets.push(format!("{0} = {0} + 1", column));
        }

        if let Some((stage, floor)) = change.attempt_floor {
            let column = attempt_column(stage);
            sets.push(format!("{0} = MAX({0}, ?)", column));
            params.push(Box::new(floor));
        }

        sets.push("retry_stage = ?".to_string());
        params.push(Box::new(change.retry_stage.map(|s| s.as_str())));

        let optional_columns: [(&str, Option<Box<dyn ToSql>>); 7] = [
            ("error_message", change.error_message.map(|v| Box::new(v) as Box<dyn ToSql>)),
            ("skip_reason", change.skip_reason.map(|v| Box::new(v) as Box<dyn ToSql>)),
            ("raw_file_path", change.raw_file_path.map(|v| Box::new(v) as Box<dyn ToSql>)),
            ("output_file_path", change.output_file_path.map(|v| Box::new(v) as Box<dyn ToSql>)),
            ("file_size_mb", change.file_size_mb.map(|v| Box::new(v) as Box<dyn ToSql>)),
            (
                "download_duration_sec",
                change.download_duration_sec.map(|v| Box::new(v) as Box<dyn ToSql>),
            ),
            (
                "processing_duration_sec",
                change.processing_duration_sec.map(|v| Box::new(v) as Box<dyn ToSql>),
            ),
        ];
        for (column, value) in optional_columns {
            if let Some(value) = value {
                sets.push(format!("{} = ?", column));
                params.push(value);
            }
        }

        if let Some(quality) = change.quality {
            sets.push("quality_score = ?".to_string());
            sets.push("missing_data_pct = ?".to_string());
            sets.push("saturation_pct = ?".to_string());
            sets.push("mean_solar_zenith = ?".to_string());
            params.push(Box::new(quality.quality_score));
            params.push(Box::new(quality.missing_data_pct));
            params.push(Box::new(quality.saturation_pct));
            params.push(Box::new(quality.mean_solar_zenith));
        }

        let mut sql = format!(
            "UPDATE file_manifest SET {} WHERE file_id = ? AND status IN ({})",
            sets.join(", "),
            placeholders(expected.len().max(1))
        );
        params.push(Box::new(file_id.to_string()));
        if expected.is_empty() {
            params.push(Box::new(Option::<String>::None));
        }
        for status in expected {
            params.push(Box::new(status.as_str()));
        }

        // A RETRY record only goes back to the stage that failed.
        if let Some(stage) = starts {
            if expected.contains(&FileStatus::Retry) {
                sql.push_str(" AND (status <> 'RETRY' OR retry_stage = ?)");
                params.push(Box::new(stage.as_str()));
            }
        }

        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let updated = tx.execute(&sql, param_refs.as_slice())?;

        if updated == 0 {
            return match Self::query_record(&tx, file_id)? {
                None => Err(ManifestError::NotFound(file_id.to_string())),
                Some(current) => Err(ManifestError::StaleTransition {
                    file_id: file_id.to_string(),
                    expected: expected.to_vec(),
                    actual: current.status,
                }),
            };
        }

        let record = Self::query_record(&tx, file_id)?
            .ok_or_else(|| ManifestError::NotFound(file_id.to_string()))?;
        tx.commit()?;

        Ok(record)
    }

    fn touch(&self, file_id: &str, status: FileStatus) -> Result<bool, ManifestError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE file_manifest SET updated_at = ? WHERE file_id = ? AND status = ?",
            params![to_db_time(&Utc::now()), file_id, status.as_str()],
        )?;
        Ok(updated == 1)
    }

    fn find_stale(
        &self,
        statuses: &[FileStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FileRecord>, ManifestError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM file_manifest WHERE status IN ({}) AND updated_at < ? ORDER BY updated_at ASC LIMIT ?",
            RECORD_COLUMNS,
            placeholders(statuses.len())
        );

        let mut params: Vec<Box<dyn ToSql>> = statuses
            .iter()
            .map(|s| Box::new(s.as_str()) as Box<dyn ToSql>)
            .collect();
        params.push(Box::new(to_db_time(&older_than)));
        params.push(Box::new(limit as i64));

        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn purge(&self, file_id: &str) -> Result<FileRecord, ManifestError> {
        let conn = self.conn()?;

        let record = Self::query_record(&conn, file_id)?
            .ok_or_else(|| ManifestError::NotFound(file_id.to_string()))?;
        conn.execute("DELETE FROM file_manifest WHERE file_id = ?", params![file_id])?;

        Ok(record)
    }

    fn status_summary(&self) -> Result<Vec<StatusCount>, ManifestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, count FROM status_summary_24h ORDER BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            Ok(StatusCount {
                status: parse_column(0, &status)?,
                count: row.get(1)?,
            })
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    fn hourly_stats(&self, limit: usize) -> Result<Vec<HourlyStats>, ManifestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT hour, files_processed, files_complete, files_skipped, files_failed, avg_processing_duration_sec, avg_quality_score FROM hourly_processing_stats ORDER BY hour DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(HourlyStats {
                hour: row.get(0)?,
                files_processed: row.get(1)?,
                files_complete: row.get(2)?,
                files_skipped: row.get(3)?,
                files_failed: row.get(4)?,
                avg_processing_duration_sec: row.get(5)?,
                avg_quality_score: row.get(6)?,
            })
        })?;

        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    fn record_query(&self, entry: &QueryLogEntry) -> Result<i64, ManifestError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO api_query_log (query_timestamp, window_start, window_end, files_found, files_new, query_duration_sec, status, error_message) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                to_db_time(&entry.query_timestamp),
                to_db_time(&entry.window_start),
                to_db_time(&entry.window_end),
                entry.files_found,
                entry.files_new,
                entry.query_duration_sec,
                entry.status.as_str(),
                entry.error_message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLogEntry>, ManifestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, query_timestamp, window_start, window_end, files_found, files_new, query_duration_sec, status, error_message FROM api_query_log ORDER BY query_timestamp DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_query)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn record_health_check(&self, check: &HealthCheck) -> Result<i64, ManifestError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO health_checks (service, status, message, response_time_ms, checked_at) VALUES (?, ?, ?, ?, ?)",
            params![
                check.service,
                check.status.as_str(),
                check.message,
                check.response_time_ms,
                to_db_time(&check.checked_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_health_checks(&self, limit: usize) -> Result<Vec<HealthCheck>, ManifestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, service, status, message, response_time_ms, checked_at FROM health_checks ORDER BY checked_at DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_health_check)?;

        let mut checks = Vec::new();
        for row in rows {
            checks.push(row?);
        }
        Ok(checks)
    }
}

impl MetricStore for SqliteManifestStore {
    fn append_metric(&self, metric: &StageMetric) -> Result<i64, ManifestError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO processing_metrics (file_id, stage, attempt, duration_seconds, memory_mb, cpu_percent, status, error_message, recorded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                metric.file_id,
                metric.stage.as_str(),
                metric.attempt,
                metric.duration_seconds,
                metric.resources.memory_mb,
                metric.resources.cpu_percent,
                metric.status.as_str(),
                metric.error_message,
                to_db_time(&metric.recorded_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn metrics_for(&self, file_id: &str) -> Result<Vec<StageMetric>, ManifestError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM processing_metrics WHERE file_id = ? ORDER BY id",
            METRIC_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![file_id], Self::row_to_metric)?;

        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row?);
        }
        Ok(metrics)
    }
}
