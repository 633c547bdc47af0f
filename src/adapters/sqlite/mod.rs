//! SQLite adapter: reference implementations of the persistence ports.
//!
//! Provides local persistence for check definitions and reports. The CRUD
//! surface around checks belongs to the embedding layer; this adapter only
//! carries what the pipeline contract needs (list, create, idempotent
//! append, finalize, load) plus an insert used by that layer and by tests.
//!
//! # Mutex Behavior
//!
//! Database connections are protected by `Mutex`. A poisoned mutex (from a
//! panic in another thread) will cause a panic. This fail-fast behavior is
//! intentional: continuing to aggregate against a connection in unknown
//! state could lose result rows.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{CheckDefinition, CheckId, PerCheckResult, RawValue, Report, ReportStatus};
use crate::ports::{CheckCatalog, ReportStore};

/// Error type for persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// SQLite-backed check catalog.
pub struct SqliteCheckCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCheckCatalog {
    /// Open or create a catalog database at the given path.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory catalog (for testing).
    ///
    /// # Errors
    /// Returns error if the database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let catalog = Self {
            conn: Mutex::new(conn),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("Lock failed");

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS checks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                query TEXT,
                warning_threshold REAL NOT NULL,
                error_threshold REAL NOT NULL,
                epsilon REAL NOT NULL
            );
            ",
        )?;

        Ok(())
    }

    /// Persist a declarative check definition.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub fn insert(&self, check: &CheckDefinition) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("Lock failed");

        conn.execute(
            "INSERT OR REPLACE INTO checks
                (id, name, description, query, warning_threshold, error_threshold, epsilon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                check.id.as_str(),
                check.name,
                check.description,
                check.query,
                check.warning_threshold,
                check.error_threshold,
                check.epsilon,
            ],
        )?;

        Ok(())
    }
}

impl CheckCatalog for SqliteCheckCatalog {
    type Error = StorageError;

    fn list_all(&self) -> Result<Vec<CheckDefinition>, Self::Error> {
        let conn = self.conn.lock().expect("Lock failed");

        let mut stmt = conn.prepare(
            "SELECT id, name, description, query, warning_threshold, error_threshold, epsilon
             FROM checks ORDER BY id",
        )?;

        let checks = stmt
            .query_map([], |row| {
                Ok(CheckDefinition {
                    id: CheckId::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                    query: row.get(3)?,
                    warning_threshold: row.get(4)?,
                    error_threshold: row.get(5)?,
                    epsilon: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(checks)
    }
}

/// SQLite-backed report store.
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Open or create a report database at the given path.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory report store (for testing).
    ///
    /// # Errors
    /// Returns error if the database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("Lock failed");

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL,
                epsilon REAL NOT NULL,
                number_of_entities INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS report_results (
                report_id TEXT NOT NULL,
                check_id TEXT NOT NULL,
                stratum TEXT NOT NULL DEFAULT '',
                check_name TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                raw_value INTEGER NOT NULL,
                obfuscated REAL NOT NULL,
                warning_threshold REAL NOT NULL,
                error_threshold REAL NOT NULL,
                epsilon REAL NOT NULL,
                error_text TEXT,
                subject_ids TEXT NOT NULL,
                PRIMARY KEY (report_id, check_id, stratum)
            );

            CREATE INDEX IF NOT EXISTS idx_report_results_report
                ON report_results(report_id);
            ",
        )?;

        Ok(())
    }
}

impl ReportStore for SqliteReportStore {
    type Error = StorageError;

    fn create(&self, report: &Report) -> Result<(), Self::Error> {
        let conn = self.conn.lock().expect("Lock failed");

        conn.execute(
            "INSERT INTO reports (id, created_at, status, epsilon, number_of_entities)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                report.id,
                report.created_at.to_rfc3339(),
                report.status.to_string(),
                report.epsilon,
                report.number_of_entities as i64,
            ],
        )?;

        Ok(())
    }

    fn append_result(&self, report_id: &str, result: &PerCheckResult) -> Result<(), Self::Error> {
        let subject_ids = serde_json::to_string(&result.subject_ids)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let conn = self.conn.lock().expect("Lock failed");

        // INSERT OR IGNORE keeps the append idempotent on
        // (report, check, stratum) under at-least-once delivery.
        conn.execute(
            "INSERT OR IGNORE INTO report_results
                (report_id, check_id, stratum, check_name, fingerprint, raw_value,
                 obfuscated, warning_threshold, error_threshold, epsilon,
                 error_text, subject_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                report_id,
                result.check_id.as_str(),
                result.stratum.as_deref().unwrap_or(""),
                result.check_name,
                result.fingerprint,
                result.raw.as_i64(),
                result.obfuscated,
                result.warning_threshold,
                result.error_threshold,
                result.epsilon,
                result.error,
                subject_ids,
            ],
        )?;

        Ok(())
    }

    fn finalize(&self, report_id: &str, number_of_entities: u64) -> Result<(), Self::Error> {
        let conn = self.conn.lock().expect("Lock failed");

        let updated = conn.execute(
            "UPDATE reports SET status = ?1, number_of_entities = ?2 WHERE id = ?3",
            params![
                ReportStatus::Generated.to_string(),
                number_of_entities as i64,
                report_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::NotFound(report_id.to_string()));
        }

        Ok(())
    }

    fn load(&self, report_id: &str) -> Result<Option<Report>, Self::Error> {
        let conn = self.conn.lock().expect("Lock failed");

        let header = conn
            .query_row(
                "SELECT id, created_at, status, epsilon, number_of_entities
                 FROM reports WHERE id = ?1",
                params![report_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, created_at, status, epsilon, number_of_entities)) = header else {
            return Ok(None);
        };

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            .with_timezone(&chrono::Utc);
        let status = match status.as_str() {
            "GENERATED" => ReportStatus::Generated,
            _ => ReportStatus::Generating,
        };

        let mut stmt = conn.prepare(
            "SELECT check_id, stratum, check_name, fingerprint, raw_value, obfuscated,
                    warning_threshold, error_threshold, epsilon, error_text, subject_ids
             FROM report_results WHERE report_id = ?1 ORDER BY rowid",
        )?;

        let results = stmt
            .query_map(params![report_id], |row| {
                let stratum: String = row.get(1)?;
                let subject_ids: String = row.get(10)?;
                Ok((
                    PerCheckResult {
                        check_id: CheckId::new(row.get::<_, String>(0)?),
                        stratum: (!stratum.is_empty()).then_some(stratum),
                        check_name: row.get(2)?,
                        fingerprint: row.get(3)?,
                        raw: RawValue::from_i64(row.get(4)?),
                        obfuscated: row.get(5)?,
                        warning_threshold: row.get(6)?,
                        error_threshold: row.get(7)?,
                        epsilon: row.get(8)?,
                        error: row.get(9)?,
                        subject_ids: BTreeSet::new(),
                    },
                    subject_ids,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let results = results
            .into_iter()
            .map(|(mut result, subject_ids)| {
                result.subject_ids = serde_json::from_str(&subject_ids)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(result)
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        Ok(Some(Report {
            id,
            created_at,
            status,
            epsilon,
            number_of_entities: number_of_entities.max(0) as u64,
            results,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CheckOutcome;

    fn sample_check(id: &str) -> CheckDefinition {
        CheckDefinition::declarative(
            id,
            format!("check {id}"),
            "a test check",
            "define InInitialPopulation: true",
            10.0,
            20.0,
            1.0,
        )
    }

    fn sample_row(check: &str, stratum: Option<&str>) -> PerCheckResult {
        let outcome = CheckOutcome::subjects(
            "Patient",
            ["p1", "p2"].iter().map(|s| s.to_string()).collect(),
        );
        Report::result_row(
            CheckId::new(check),
            check.to_string(),
            "ab".repeat(32),
            &outcome,
            3.0,
            10.0,
            20.0,
            0.5,
            stratum.map(str::to_string),
            512,
        )
    }

    #[test]
    fn test_catalog_roundtrip() {
        let catalog = SqliteCheckCatalog::in_memory().expect("Should create db");
        catalog.insert(&sample_check("c1")).expect("Should insert");
        catalog.insert(&sample_check("c2")).expect("Should insert");

        let checks = catalog.list_all().expect("Should list");
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].id.as_str(), "c1");
        assert_eq!(
            checks[0].query.as_deref(),
            Some("define InInitialPopulation: true")
        );
    }

    #[test]
    fn test_report_roundtrip() {
        let store = SqliteReportStore::in_memory().expect("Should create db");
        let report = Report::new(2.0);
        store.create(&report).expect("Should create");

        store
            .append_result(&report.id, &sample_row("c1", None))
            .expect("Should append");
        store
            .append_result(&report.id, &sample_row("c2", Some("female")))
            .expect("Should append");
        store.finalize(&report.id, 100).expect("Should finalize");

        let loaded = store
            .load(&report.id)
            .expect("Should load")
            .expect("Should exist");
        assert_eq!(loaded.status, ReportStatus::Generated);
        assert_eq!(loaded.number_of_entities, 100);
        assert_eq!(loaded.results.len(), 2);
        assert_eq!(loaded.results[0].raw, RawValue::Count(2));
        assert_eq!(loaded.results[1].stratum.as_deref(), Some("female"));
        assert_eq!(loaded.results[0].subject_ids.len(), 2);
    }

    #[test]
    fn test_append_is_idempotent() {
        let store = SqliteReportStore::in_memory().expect("Should create db");
        let report = Report::new(1.0);
        store.create(&report).expect("Should create");

        let row = sample_row("c1", None);
        store.append_result(&report.id, &row).expect("Should append");
        store.append_result(&report.id, &row).expect("Should append");

        let loaded = store
            .load(&report.id)
            .expect("Should load")
            .expect("Should exist");
        assert_eq!(loaded.results.len(), 1);
    }

    #[test]
    fn test_strata_of_same_check_are_distinct_rows() {
        let store = SqliteReportStore::in_memory().expect("Should create db");
        let report = Report::new(1.0);
        store.create(&report).expect("Should create");

        store
            .append_result(&report.id, &sample_row("c1", Some("female")))
            .expect("Should append");
        store
            .append_result(&report.id, &sample_row("c1", Some("male")))
            .expect("Should append");

        let loaded = store
            .load(&report.id)
            .expect("Should load")
            .expect("Should exist");
        assert_eq!(loaded.results.len(), 2);
    }

    #[test]
    fn test_finalize_missing_report() {
        let store = SqliteReportStore::in_memory().expect("Should create db");
        assert!(matches!(
            store.finalize("missing", 10),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_missing_report() {
        let store = SqliteReportStore::in_memory().expect("Should create db");
        assert!(store.load("missing").expect("Should query").is_none());
    }
}
