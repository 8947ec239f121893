//! SQLite-backed repository store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    FailureTally, HarvestState, NewRepository, Repository, RepositoryError, RepositoryFilter,
    RepositoryStore, Schedule,
};

const COLUMNS: &str = "id, name, url, metadata_prefix, set_spec, stylesheet, enabled, schedule, anchor_time, state, harvest_requested, consecutive_failures, last_harvest, datestamp, created_at, updated_at";

/// SQLite-backed repository store.
pub struct SqliteRepositoryStore {
    conn: Mutex<Connection>,
}

impl SqliteRepositoryStore {
    /// Create a new store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                metadata_prefix TEXT NOT NULL,
                set_spec TEXT,
                stylesheet TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                schedule TEXT NOT NULL,
                anchor_time TEXT NOT NULL,
                state TEXT NOT NULL,
                harvest_requested INTEGER NOT NULL DEFAULT 0,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_harvest TEXT,
                datestamp TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_repositories_state ON repositories(state);
            "#,
        )
        .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &RepositoryFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.as_str()));
        }
        if let Some(enabled) = filter.enabled {
            conditions.push("enabled = ?");
            params.push(Box::new(enabled));
        }
        if let Some(requested) = filter.harvest_requested {
            conditions.push("harvest_requested = ?");
            params.push(Box::new(requested));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_repository(row: &rusqlite::Row) -> rusqlite::Result<Repository> {
        let schedule: String = row.get(7)?;
        let anchor_time: String = row.get(8)?;
        let state: String = row.get(9)?;
        let last_harvest: Option<String> = row.get(12)?;
        let created_at: String = row.get(14)?;
        let updated_at: String = row.get(15)?;

        Ok(Repository {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            metadata_prefix: row.get(3)?,
            set: row.get(4)?,
            stylesheet: row.get(5)?,
            enabled: row.get(6)?,
            schedule: schedule.parse().unwrap_or(Schedule::Daily),
            anchor_time: NaiveTime::parse_from_str(&anchor_time, "%H:%M:%S")
                .unwrap_or(NaiveTime::MIN),
            // An unreadable state is treated as paused so nothing harvests it.
            state: state.parse().unwrap_or(HarvestState::PausedOnError),
            harvest_requested: row.get(10)?,
            consecutive_failures: row.get(11)?,
            last_harvest: last_harvest.as_deref().and_then(parse_timestamp),
            datestamp: row.get(13)?,
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Repository>, RepositoryError> {
        conn.query_row(
            &format!("SELECT {} FROM repositories WHERE id = ?", COLUMNS),
            params![id],
            Self::row_to_repository,
        )
        .optional()
        .map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl RepositoryStore for SqliteRepositoryStore {
    fn create(&self, request: NewRepository) -> Result<Repository, RepositoryError> {
        let conn = self.conn()?;

        if Self::fetch(&conn, &request.id)?.is_some() {
            return Err(RepositoryError::AlreadyExists(request.id));
        }

        let now = now_str();
        conn.execute(
            &format!(
                "INSERT INTO repositories ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, NULL, NULL, ?, ?)",
                COLUMNS
            ),
            params![
                request.id,
                request.name,
                request.url,
                request.metadata_prefix,
                request.set,
                request.stylesheet,
                request.enabled,
                request.schedule.as_str(),
                request.anchor_time.format("%H:%M:%S").to_string(),
                HarvestState::Idle.as_str(),
                now,
                now,
            ],
        )
        .map_err(db_err)?;

        Self::fetch(&conn, &request.id)?.ok_or(RepositoryError::NotFound(request.id))
    }

    fn get(&self, id: &str) -> Result<Option<Repository>, RepositoryError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &RepositoryFilter) -> Result<Vec<Repository>, RepositoryError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM repositories {} ORDER BY id ASC",
            COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_repository)
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn count(&self, filter: &RepositoryFilter) -> Result<i64, RepositoryError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM repositories {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(db_err)
    }

    fn try_start_harvest(&self, id: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE repositories SET state = ?, harvest_requested = 0, updated_at = ? WHERE id = ? AND state = ? AND enabled = 1",
                params![
                    HarvestState::Harvesting.as_str(),
                    now_str(),
                    id,
                    HarvestState::Idle.as_str()
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn finish_harvest(&self, id: &str, datestamp: Option<&str>) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let now = now_str();
        let changed = conn
            .execute(
                "UPDATE repositories SET state = ?, consecutive_failures = 0, last_harvest = ?, datestamp = COALESCE(?, datestamp), updated_at = ? WHERE id = ? AND state = ?",
                params![
                    HarvestState::Idle.as_str(),
                    now,
                    datestamp,
                    now,
                    id,
                    HarvestState::Harvesting.as_str()
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn abort_harvest(&self, id: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE repositories SET state = ?, updated_at = ? WHERE id = ? AND state = ?",
                params![
                    HarvestState::Idle.as_str(),
                    now_str(),
                    id,
                    HarvestState::Harvesting.as_str()
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn increment_failures(
        &self,
        id: &str,
        threshold: u32,
    ) -> Result<FailureTally, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let current: Option<(String, u32)> = tx
            .query_row(
                "SELECT state, consecutive_failures FROM repositories WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let (state, failures) = current.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        if state == HarvestState::PausedOnError.as_str() {
            return Ok(FailureTally {
                consecutive_failures: failures,
                paused_now: false,
            });
        }

        let failures = failures.saturating_add(1);
        let paused_now = failures >= threshold;
        let new_state = if paused_now {
            HarvestState::PausedOnError.as_str()
        } else {
            state.as_str()
        };

        tx.execute(
            "UPDATE repositories SET consecutive_failures = ?, state = ?, updated_at = ? WHERE id = ?",
            params![failures, new_state, now_str(), id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(FailureTally {
            consecutive_failures: failures,
            paused_now,
        })
    }

    fn reset_failures(&self, id: &str) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE repositories SET consecutive_failures = 0 WHERE id = ? AND state != ? AND consecutive_failures != 0",
            params![id, HarvestState::PausedOnError.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn resume(&self, id: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE repositories SET state = ?, consecutive_failures = 0, updated_at = ? WHERE id = ? AND state = ?",
                params![
                    HarvestState::Idle.as_str(),
                    now_str(),
                    id,
                    HarvestState::PausedOnError.as_str()
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn request_harvest(&self, id: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE repositories SET harvest_requested = 1, updated_at = ? WHERE id = ? AND enabled = 1 AND state != ?",
                params![now_str(), id, HarvestState::PausedOnError.as_str()],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE repositories SET enabled = ?, harvest_requested = CASE WHEN ? THEN harvest_requested ELSE 0 END, updated_at = ? WHERE id = ?",
                params![enabled, enabled, now_str(), id],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn reset_harvesting(&self) -> Result<usize, RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE repositories SET state = ?, updated_at = ? WHERE state = ?",
            params![
                HarvestState::Idle.as_str(),
                now_str(),
                HarvestState::Harvesting.as_str()
            ],
        )
        .map_err(db_err)
    }
}
