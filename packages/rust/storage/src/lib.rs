//! libSQL storage layer: the persistent record sink.
//!
//! The [`Storage`] struct wraps a local libSQL database holding integrated
//! records and per-run bookkeeping. It implements [`Sink`], so a pipeline
//! can write straight into it.
//!
//! **Access rules:**
//! - `curator run`: read-write via [`Storage::open`]
//! - reporting commands: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use curator_shared::{CuratorError, Record, RecordMetadata, Result, RunId, Sink};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Bookkeeping row for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRow {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub final_state: Option<String>,
    pub stats_json: Option<String>,
}

fn storage_err(e: impl std::fmt::Display) -> CuratorError {
    CuratorError::Storage(e.to_string())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CuratorError::Storage(format!("invalid date: {e}")))
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CuratorError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        info!(path = %path.display(), "storage opened");
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CuratorError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CuratorError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CuratorError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Insert or replace the record stored under `record.key`.
    pub async fn put_record(&self, record: &Record) -> Result<()> {
        self.check_writable()?;
        let meta = &record.metadata;
        let metadata_json = serde_json::to_string(meta).map_err(storage_err)?;

        self.conn
            .execute(
                "INSERT INTO records (key, content, source, language, quality_score, quality_tier,
                                      fingerprint, integrated_at, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(key) DO UPDATE SET
                   content = excluded.content,
                   source = excluded.source,
                   language = excluded.language,
                   quality_score = excluded.quality_score,
                   quality_tier = excluded.quality_tier,
                   fingerprint = excluded.fingerprint,
                   integrated_at = excluded.integrated_at,
                   metadata_json = excluded.metadata_json",
                params![
                    record.key.as_str(),
                    record.content.as_str(),
                    meta.source.as_str(),
                    meta.language.as_str(),
                    meta.quality_score,
                    meta.quality_tier.as_str(),
                    meta.fingerprint.as_str(),
                    meta.integrated_at.to_rfc3339(),
                    metadata_json,
                ],
            )
            .await
            .map_err(storage_err)?;

        debug!(key = %record.key, "record stored");
        Ok(())
    }

    pub async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, content, metadata_json FROM records WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Records ordered by score (highest first), then key.
    pub async fn list_records(&self, language: Option<&str>, limit: u32) -> Result<Vec<Record>> {
        let mut rows = match language {
            Some(language) => {
                self.conn
                    .query(
                        "SELECT key, content, metadata_json FROM records
                         WHERE language = ?1 COLLATE NOCASE
                         ORDER BY quality_score DESC, key ASC LIMIT ?2",
                        params![language, limit],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        "SELECT key, content, metadata_json FROM records
                         ORDER BY quality_score DESC, key ASC LIMIT ?1",
                        params![limit],
                    )
                    .await
            }
        }
        .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    pub async fn count_records(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM records", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(storage_err)?;
                Ok(count.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    pub async fn insert_run(&self, run_id: &RunId) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![run_id.to_string(), now],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Close out a run with its final state and metrics JSON.
    pub async fn finish_run(&self, run_id: &RunId, final_state: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, final_state = ?2, stats_json = ?3 WHERE id = ?4",
                params![now, final_state, stats_json, run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// All runs, newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, final_state, stats_json
                 FROM runs ORDER BY started_at DESC, id DESC",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let started: String = row.get(1).map_err(storage_err)?;
            let finished: Option<String> = row.get(2).ok();
            results.push(RunRow {
                id: row.get(0).map_err(storage_err)?,
                started_at: parse_timestamp(&started)?,
                finished_at: finished.as_deref().map(parse_timestamp).transpose()?,
                final_state: row.get(3).ok(),
                stats_json: row.get(4).ok(),
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl Sink for Storage {
    async fn put(&self, key: &str, record: &Record) -> Result<()> {
        if key != record.key {
            return Err(CuratorError::Storage(format!(
                "key mismatch: sink key {key}, record key {}",
                record.key
            )));
        }
        self.put_record(record).await
    }
}

fn row_to_record(row: &libsql::Row) -> Result<Record> {
    let metadata_json: String = row.get(2).map_err(storage_err)?;
    let metadata: RecordMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| CuratorError::Storage(format!("corrupt record metadata: {e}")))?;
    Ok(Record {
        key: row.get(0).map_err(storage_err)?,
        content: row.get(1).map_err(storage_err)?,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_shared::{Candidate, Complexity, QualityTier, ScoredCandidate, SourceKind};
    use uuid::Uuid;

    async fn test_storage() -> (Storage, std::path::PathBuf) {
        let tmp = std::env::temp_dir().join(format!("curator_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        (storage, tmp)
    }

    fn record(key: &str, language: &str, score: f64) -> Record {
        let mut candidate = Candidate::new(
            format!("fn {key}() {{}}"),
            "api",
            SourceKind::Api,
            language,
        );
        candidate.url = Some(format!("https://example.com/{key}"));
        candidate.external_score = Some(12);
        Record::from_scored(
            key.to_string(),
            ScoredCandidate {
                fingerprint: candidate.fingerprint(),
                candidate,
                quality_score: score,
                quality_tier: QualityTier::from_score(score),
                complexity: Complexity::Moderate,
                patterns: vec!["function-definition".into()],
                validated: true,
            },
        )
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let (storage, _) = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let (first, path) = test_storage().await;
        drop(first);
        let second = Storage::open(&path).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn record_round_trip_and_upsert() {
        let (storage, _) = test_storage().await;
        let original = record("api_rust_1", "rust", 7.5);

        storage.put(&original.key, &original).await.unwrap();
        let loaded = storage.get_record("api_rust_1").await.unwrap().unwrap();
        assert_eq!(loaded, original);

        let mut changed = original.clone();
        changed.content = "fn replaced() {}".into();
        storage.put_record(&changed).await.unwrap();
        let loaded = storage.get_record("api_rust_1").await.unwrap().unwrap();
        assert_eq!(loaded.content, "fn replaced() {}");
        assert_eq!(storage.count_records().await.unwrap(), 1);

        assert!(storage.get_record("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_score_then_key() {
        let (storage, _) = test_storage().await;
        for r in [
            record("b", "rust", 6.0),
            record("a", "rust", 6.0),
            record("c", "python", 9.0),
            record("d", "Rust", 2.0),
        ] {
            storage.put_record(&r).await.unwrap();
        }

        let keys = |rs: Vec<Record>| rs.into_iter().map(|r| r.key).collect::<Vec<_>>();
        assert_eq!(keys(storage.list_records(None, 10).await.unwrap()), ["c", "a", "b", "d"]);
        assert_eq!(keys(storage.list_records(Some("rust"), 2).await.unwrap()), ["a", "b"]);
        assert_eq!(storage.list_records(Some("rust"), 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sink_rejects_key_mismatch() {
        let (storage, _) = test_storage().await;
        let r = record("k1", "rust", 5.0);
        assert!(storage.put("other", &r).await.is_err());
    }

    #[tokio::test]
    async fn run_bookkeeping() {
        let (storage, _) = test_storage().await;
        let run_id = RunId::new();
        storage.insert_run(&run_id).await.unwrap();

        let runs = storage.list_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_none());

        storage
            .finish_run(&run_id, "STOPPED", r#"{"total_integrated":3}"#)
            .await
            .unwrap();
        let runs = storage.list_runs().await.unwrap();
        assert_eq!(runs[0].id, run_id.to_string());
        assert_eq!(runs[0].final_state.as_deref(), Some("STOPPED"));
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].stats_json.as_deref().unwrap().contains("total_integrated"));
    }

    #[tokio::test]
    async fn readonly_refuses_writes() {
        let (storage, path) = test_storage().await;
        storage.put_record(&record("k", "go", 5.0)).await.unwrap();
        drop(storage);

        let ro = Storage::open_readonly(&path).await.unwrap();
        assert_eq!(ro.count_records().await.unwrap(), 1);
        assert!(ro.put_record(&record("k2", "go", 5.0)).await.is_err());

        let missing = std::env::temp_dir().join(format!("curator_absent_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&missing).await.is_err());
    }
}
