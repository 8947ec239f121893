use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use super::{ErrorReport, NewErrorReport, ReportError, ReportFilter, ReportStore};
use crate::errorflow::{FailureKind, WorkerKind};

/// SQLite-backed error report store
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Create a new store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, ReportError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing)
    pub fn in_memory() -> Result<Self, ReportError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ReportError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS error_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                repository_id TEXT NOT NULL,
                record_id INTEGER,
                worker TEXT NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                url TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_error_reports_repository ON error_reports(repository_id);
            CREATE INDEX IF NOT EXISTS idx_error_reports_record ON error_reports(record_id);
            "#,
        )
        .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ReportError> {
        self.conn
            .lock()
            .map_err(|_| ReportError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &ReportFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref repository_id) = filter.repository_id {
            conditions.push("repository_id = ?");
            params.push(Box::new(repository_id.clone()));
        }
        if let Some(record_id) = filter.record_id {
            conditions.push("record_id = ?");
            params.push(Box::new(record_id));
        }
        if let Some(worker) = filter.worker {
            conditions.push("worker = ?");
            params.push(Box::new(worker.as_str()));
        }
        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<ErrorReport> {
        let created_at: String = row.get(1)?;
        let worker: String = row.get(4)?;
        let kind: String = row.get(5)?;

        Ok(ErrorReport {
            id: row.get(0)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            repository_id: row.get(2)?,
            record_id: row.get(3)?,
            worker: worker.parse().unwrap_or(WorkerKind::Object),
            kind: kind.parse().unwrap_or(FailureKind::Storage),
            message: row.get(6)?,
            url: row.get(7)?,
        })
    }
}

fn db_err(e: rusqlite::Error) -> ReportError {
    ReportError::Database(e.to_string())
}

impl ReportStore for SqliteReportStore {
    fn insert(&self, report: &NewErrorReport) -> Result<i64, ReportError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO error_reports (created_at, repository_id, record_id, worker, kind, message, url) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                report.repository_id,
                report.record_id,
                report.worker.as_str(),
                report.kind.as_str(),
                report.message,
                report.url,
            ],
        )
        .map_err(db_err)?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &ReportFilter) -> Result<Vec<ErrorReport>, ReportError> {
        let conn = self.conn()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT id, created_at, repository_id, record_id, worker, kind, message, url FROM error_reports {} ORDER BY id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_report)
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn count(&self, filter: &ReportFilter) -> Result<i64, ReportError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM error_reports {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }
}
