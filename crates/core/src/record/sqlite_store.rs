//! SQLite-backed record store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{
    BatchOutcome, ProcessStatus, Record, RecordBatch, RecordError, RecordFilter, RecordStore,
    StatusCounts,
};

const COLUMNS: &str =
    "id, repository_id, identifier, object_id, fingerprint, datestamp, status, error_detail, created_at, updated_at";

/// Withdrawn records carry this as their error detail.
pub const WITHDRAWN_DETAIL: &str = "deleted at source";

// Stay well below SQLite's host parameter limit
const LOOKUP_CHUNK: usize = 500;

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Create a new store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, RecordError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, RecordError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RecordError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id TEXT NOT NULL,
                identifier TEXT NOT NULL,
                object_id TEXT NOT NULL UNIQUE,
                fingerprint TEXT NOT NULL UNIQUE,
                datestamp TEXT,
                status TEXT NOT NULL,
                error_detail TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_status ON records(status, id);
            CREATE INDEX IF NOT EXISTS idx_records_repository ON records(repository_id, status);
            "#,
        )
        .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RecordError> {
        self.conn
            .lock()
            .map_err(|_| RecordError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &RecordFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref repository_id) = filter.repository_id {
            conditions.push("repository_id = ?");
            params.push(Box::new(repository_id.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let status: String = row.get(6)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        Ok(Record {
            id: row.get(0)?,
            repository_id: row.get(1)?,
            identifier: row.get(2)?,
            object_id: row.get(3)?,
            fingerprint: row.get(4)?,
            datestamp: row.get(5)?,
            // Unknown statuses are parked as FAILED so no worker picks them up.
            status: status.parse().unwrap_or(ProcessStatus::Failed),
            error_detail: row.get(7)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Record>, RecordError> {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params, Self::row_to_record)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> RecordError {
    RecordError::Database(e.to_string())
}

fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, id: i64) -> Result<Option<Record>, RecordError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM records WHERE id = ?", COLUMNS),
            params![id],
            Self::row_to_record,
        )
        .optional()
        .map_err(db_err)
    }

    fn list(&self, filter: &RecordFilter) -> Result<Vec<Record>, RecordError> {
        let conn = self.conn()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM records {} ORDER BY id ASC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Self::query_records(&conn, &sql, &param_refs)
    }

    fn count(&self, filter: &RecordFilter) -> Result<i64, RecordError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM records {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn find_by_fingerprints(
        &self,
        fingerprints: &[String],
    ) -> Result<HashMap<String, Record>, RecordError> {
        let conn = self.conn()?;
        let mut found = HashMap::new();

        for chunk in fingerprints.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT {} FROM records WHERE fingerprint IN ({})",
                COLUMNS,
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), Self::row_to_record)
                .map_err(db_err)?;
            for row in rows {
                let record = row.map_err(db_err)?;
                found.insert(record.fingerprint.clone(), record);
            }
        }

        Ok(found)
    }

    fn apply_batch(&self, batch: &RecordBatch) -> Result<BatchOutcome, RecordError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let now = now_str();
        let mut outcome = BatchOutcome::default();

        {
            let mut insert = tx
                .prepare(
                    "INSERT OR IGNORE INTO records (repository_id, identifier, object_id, fingerprint, datestamp, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(db_err)?;
            for record in &batch.inserts {
                outcome.inserted += insert
                    .execute(params![
                        record.repository_id,
                        record.identifier,
                        record.object_id,
                        record.fingerprint,
                        record.datestamp,
                        ProcessStatus::Pending.as_str(),
                        now,
                        now,
                    ])
                    .map_err(db_err)?;
            }

            let mut withdraw = tx
                .prepare(
                    "UPDATE records SET status = ?, error_detail = ?, updated_at = ? WHERE id = ? AND status NOT IN (?, ?)",
                )
                .map_err(db_err)?;
            for id in &batch.withdrawals {
                let changed = withdraw
                    .execute(params![
                        ProcessStatus::Rejected.as_str(),
                        WITHDRAWN_DETAIL,
                        now,
                        id,
                        ProcessStatus::Processing.as_str(),
                        ProcessStatus::Rejected.as_str(),
                    ])
                    .map_err(db_err)?;
                if changed == 1 {
                    outcome.withdrawn.push(*id);
                }
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(outcome)
    }

    fn next_claimable(
        &self,
        limit: usize,
        excluded_repositories: &[String],
        retry_failed_before: DateTime<Utc>,
    ) -> Result<Vec<Record>, RecordError> {
        let conn = self.conn()?;
        let pending = ProcessStatus::Pending.as_str();
        let failed = ProcessStatus::Failed.as_str();
        let cutoff = retry_failed_before.to_rfc3339_opts(SecondsFormat::Micros, true);
        let limit = limit as i64;
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&pending, &failed, &cutoff];

        let exclusion = if excluded_repositories.is_empty() {
            String::new()
        } else {
            for repository_id in excluded_repositories {
                params.push(repository_id);
            }
            format!(
                "AND repository_id NOT IN ({})",
                placeholders(excluded_repositories.len())
            )
        };

        params.push(&pending);
        params.push(&limit);
        // Timestamps share one fixed-width UTC format, so they compare as text
        let sql = format!(
            "SELECT {} FROM records WHERE (status = ? OR (status = ? AND updated_at < ?)) {} \
             ORDER BY CASE WHEN status = ? THEN 0 ELSE 1 END, id ASC LIMIT ?",
            COLUMNS, exclusion
        );

        Self::query_records(&conn, &sql, &params)
    }

    fn claim(&self, id: i64) -> Result<bool, RecordError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE records SET status = ?, error_detail = NULL, updated_at = ? WHERE id = ? AND status IN (?, ?)",
                params![
                    ProcessStatus::Processing.as_str(),
                    now_str(),
                    id,
                    ProcessStatus::Pending.as_str(),
                    ProcessStatus::Failed.as_str()
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn finish(
        &self,
        id: i64,
        status: ProcessStatus,
        error_detail: Option<&str>,
    ) -> Result<bool, RecordError> {
        if !ProcessStatus::Processing.can_transition_to(status) {
            return Err(RecordError::InvalidTransition { record_id: id, to: status });
        }

        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE records SET status = ?, error_detail = ?, updated_at = ? WHERE id = ? AND status = ?",
                params![
                    status.as_str(),
                    error_detail,
                    now_str(),
                    id,
                    ProcessStatus::Processing.as_str()
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn reset(&self, id: i64) -> Result<bool, RecordError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE records SET status = ?, error_detail = NULL, updated_at = ? WHERE id = ? AND status != ?",
                params![
                    ProcessStatus::Pending.as_str(),
                    now_str(),
                    id,
                    ProcessStatus::Processing.as_str()
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM records WHERE id = ?)",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            if !exists {
                return Err(RecordError::NotFound(id));
            }
        }
        Ok(changed == 1)
    }

    fn reset_failed(&self, repository_id: &str) -> Result<usize, RecordError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE records SET status = ?, error_detail = NULL, updated_at = ? WHERE repository_id = ? AND status = ?",
            params![
                ProcessStatus::Pending.as_str(),
                now_str(),
                repository_id,
                ProcessStatus::Failed.as_str()
            ],
        )
        .map_err(db_err)
    }

    fn reset_processing(&self) -> Result<usize, RecordError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE records SET status = ?, updated_at = ? WHERE status = ?",
            params![
                ProcessStatus::Pending.as_str(),
                now_str(),
                ProcessStatus::Processing.as_str()
            ],
        )
        .map_err(db_err)
    }

    fn status_counts(&self, repository_id: Option<&str>) -> Result<StatusCounts, RecordError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT status, COUNT(*) FROM records WHERE (?1 IS NULL OR repository_id = ?1) GROUP BY status",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![repository_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_err)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            if let Ok(status) = status.parse::<ProcessStatus>() {
                counts.set(status, count);
            }
        }
        Ok(counts)
    }
}
