//! libSQL run ledger.
//!
//! Records every batch run and the per-article outcome inside it, so
//! `blogpostgen history` can show what was spent and where a run stopped.
//! The ledger is bookkeeping only: article state never depends on it.

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use uuid::Uuid;

use blogpostgen_shared::{BlogPostGenError, Result};

use crate::migrations;

/// Outcome of one article within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunItemRecord {
    pub article_path: String,
    /// `succeeded` or `failed`.
    pub status: String,
    pub actions_run: u32,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub error: Option<String>,
}

/// Totals written when a run finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTotals {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub stopped_early: bool,
}

/// A row of the `runs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub pipeline: String,
    pub started_at: String,
    /// `None` while running, or if the process died mid-run.
    pub finished_at: Option<String>,
    pub forced: bool,
    pub totals: RunTotals,
}

fn storage_err(e: libsql::Error) -> BlogPostGenError {
    BlogPostGenError::Storage(e.to_string())
}

/// Handle on a project's ledger database.
pub struct RunLedger {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl RunLedger {
    /// Open or create the ledger at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BlogPostGenError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let ledger = Self { db, conn };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying ledger migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BlogPostGenError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 on a fresh database.
    async fn schema_version(&self) -> u32 {
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

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a new run and return its id (UUID v7, so ids sort by start time).
    pub async fn start_run(&self, pipeline: &str, forced: bool) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, pipeline, started_at, forced) VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), pipeline, now.as_str(), i64::from(forced)],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    pub async fn record_item(&self, run_id: &str, item: &RunItemRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO run_items
                   (run_id, article_path, status, actions_run, tokens_used, cost_usd, error, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run_id,
                    item.article_path.as_str(),
                    item.status.as_str(),
                    i64::from(item.actions_run),
                    to_i64(item.tokens_used),
                    item.cost_usd,
                    item.error.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn finish_run(&self, run_id: &str, totals: &RunTotals) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, processed = ?2, succeeded = ?3, failed = ?4,
                   tokens_used = ?5, cost_usd = ?6, stopped_early = ?7
                 WHERE id = ?8",
                params![
                    now.as_str(),
                    i64::from(totals.processed),
                    i64::from(totals.succeeded),
                    i64::from(totals.failed),
                    to_i64(totals.tokens_used),
                    totals.cost_usd,
                    i64::from(totals.stopped_early),
                    run_id,
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, pipeline, started_at, finished_at, forced, processed, succeeded,
                        failed, tokens_used, cost_usd, stopped_early
                 FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    /// Items of `run_id` in recording order.
    pub async fn run_items(&self, run_id: &str) -> Result<Vec<RunItemRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT article_path, status, actions_run, tokens_used, cost_usd, error
                 FROM run_items WHERE run_id = ?1 ORDER BY id",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(RunItemRecord {
                article_path: row.get::<String>(0).map_err(storage_err)?,
                status: row.get::<String>(1).map_err(storage_err)?,
                actions_run: u32::try_from(row.get::<i64>(2).map_err(storage_err)?)
                    .unwrap_or_default(),
                tokens_used: to_u64(row.get::<i64>(3).map_err(storage_err)?),
                cost_usd: row.get::<f64>(4).map_err(storage_err)?,
                error: row.get::<String>(5).ok(),
            });
        }
        Ok(results)
    }
}

fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let count = |idx: i32| -> Result<u32> {
        Ok(u32::try_from(row.get::<i64>(idx).map_err(storage_err)?).unwrap_or_default())
    };
    Ok(RunRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        pipeline: row.get::<String>(1).map_err(storage_err)?,
        started_at: row.get::<String>(2).map_err(storage_err)?,
        finished_at: row.get::<String>(3).ok(),
        forced: row.get::<i64>(4).map_err(storage_err)? != 0,
        totals: RunTotals {
            processed: count(5)?,
            succeeded: count(6)?,
            failed: count(7)?,
            tokens_used: to_u64(row.get::<i64>(8).map_err(storage_err)?),
            cost_usd: row.get::<f64>(9).map_err(storage_err)?,
            stopped_early: row.get::<i64>(10).map_err(storage_err)? != 0,
        },
    })
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_ledger() -> RunLedger {
        let tmp = std::env::temp_dir()
            .join(format!("bpg_ledger_{}", Uuid::now_v7()))
            .join("ledger.db");
        RunLedger::open(&tmp).await.expect("open ledger")
    }

    #[tokio::test]
    async fn open_creates_schema() {
        let ledger = test_ledger().await;
        assert_eq!(ledger.schema_version().await, 1);
        assert!(ledger.list_runs(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn reopen_does_not_reapply_migrations() {
        let dir = std::env::temp_dir().join(format!("bpg_ledger_{}", Uuid::now_v7()));
        let path = dir.join("ledger.db");
        let first = RunLedger::open(&path).await.expect("open");
        first.start_run("generate", false).await.expect("start");
        drop(first);

        let second = RunLedger::open(&path).await.expect("reopen");
        assert_eq!(second.list_runs(10).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let ledger = test_ledger().await;
        let run_id = ledger.start_run("enhance", true).await.expect("start");

        ledger
            .record_item(
                &run_id,
                &RunItemRecord {
                    article_path: "a".into(),
                    status: "succeeded".into(),
                    actions_run: 3,
                    tokens_used: 1200,
                    cost_usd: 0.04,
                    error: None,
                },
            )
            .await
            .expect("record a");
        ledger
            .record_item(
                &run_id,
                &RunItemRecord {
                    article_path: "b".into(),
                    status: "failed".into(),
                    actions_run: 1,
                    tokens_used: 0,
                    cost_usd: 0.0,
                    error: Some("HTTP 503: unavailable".into()),
                },
            )
            .await
            .expect("record b");

        let totals = RunTotals {
            processed: 2,
            succeeded: 1,
            failed: 1,
            tokens_used: 1200,
            cost_usd: 0.04,
            stopped_early: true,
        };
        ledger.finish_run(&run_id, &totals).await.expect("finish");

        let runs = ledger.list_runs(5).await.expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pipeline, "enhance");
        assert!(runs[0].forced);
        assert!(runs[0].finished_at.is_some());
        assert_eq!(runs[0].totals, totals);

        let items = ledger.run_items(&run_id).await.expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].article_path, "a");
        assert_eq!(items[1].error.as_deref(), Some("HTTP 503: unavailable"));
    }

    #[tokio::test]
    async fn list_runs_newest_first_with_limit() {
        let ledger = test_ledger().await;
        let first = ledger.start_run("generate", false).await.expect("start");
        let second = ledger.start_run("enhance", false).await.expect("start");

        let runs = ledger.list_runs(1).await.expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, second);
        assert!(runs[0].finished_at.is_none());
        assert_ne!(runs[0].id, first);
    }
}
