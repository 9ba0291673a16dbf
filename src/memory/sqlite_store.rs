//! SQLite-backed [`CheckpointStore`].
//!
//! One table, opened fresh per operation via `spawn_blocking` since
//! `rusqlite::Connection` isn't `Send` and can't be held across an `.await`.
//! Rows are ordered by an auto-incrementing `seq` rather than a timestamp so
//! `get_latest` is exact even when two checkpoints land in the same
//! millisecond.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::params;

use super::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{GraphError, GraphResult};
use crate::message::Message;

pub struct SqliteCheckpointStore {
    db_path: PathBuf,
}

impl SqliteCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> GraphResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| GraphError::execution(format!("sqlite checkpoint store: open failed: {e}")))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                graph_id TEXT NOT NULL,
                current_node_id TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| GraphError::execution(format!("sqlite checkpoint store: create table failed: {e}")))?;
        conn.execute("CREATE INDEX IF NOT EXISTS checkpoints_run_id ON checkpoints(run_id)", [])
            .map_err(|e| GraphError::execution(format!("sqlite checkpoint store: create index failed: {e}")))?;
        Ok(SqliteCheckpointStore { db_path })
    }

    fn to_error(context: &str, err: impl std::fmt::Display) -> GraphError {
        GraphError::execution(format!("sqlite checkpoint store: {context}: {err}"))
    }
}

fn row_to_checkpoint(
    run_id: String,
    graph_id: String,
    current_node_id: String,
    message_json: String,
    created_at: String,
) -> GraphResult<Checkpoint> {
    let message: Message = serde_json::from_str(&message_json)
        .map_err(|e| SqliteCheckpointStore::to_error("decode message", e))?;
    let created_at = created_at
        .parse()
        .map_err(|e| SqliteCheckpointStore::to_error("decode created_at", e))?;
    Ok(Checkpoint {
        run_id,
        graph_id,
        current_node_id,
        message,
        created_at,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> GraphResult<()> {
        let db_path = self.db_path.clone();
        let message_json = serde_json::to_string(&checkpoint.message)
            .map_err(|e| Self::to_error("encode message", e))?;
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| Self::to_error("open", e))?;
            conn.execute(
                "INSERT INTO checkpoints (run_id, graph_id, current_node_id, message, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    checkpoint.run_id,
                    checkpoint.graph_id,
                    checkpoint.current_node_id,
                    message_json,
                    checkpoint.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Self::to_error("insert", e))?;
            Ok::<(), GraphError>(())
        })
        .await
        .map_err(|e| Self::to_error("spawn_blocking join", e))?
    }

    async fn get_latest(&self, run_id: &str) -> GraphResult<Option<Checkpoint>> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| Self::to_error("open", e))?;
            let mut stmt = conn
                .prepare(
                    "SELECT run_id, graph_id, current_node_id, message, created_at FROM checkpoints \
                     WHERE run_id = ?1 ORDER BY seq DESC LIMIT 1",
                )
                .map_err(|e| Self::to_error("prepare", e))?;
            let mut rows = stmt.query(params![run_id]).map_err(|e| Self::to_error("query", e))?;
            match rows.next().map_err(|e| Self::to_error("step", e))? {
                Some(row) => {
                    let checkpoint = row_to_checkpoint(
                        row.get(0).map_err(|e| Self::to_error("column run_id", e))?,
                        row.get(1).map_err(|e| Self::to_error("column graph_id", e))?,
                        row.get(2).map_err(|e| Self::to_error("column current_node_id", e))?,
                        row.get(3).map_err(|e| Self::to_error("column message", e))?,
                        row.get(4).map_err(|e| Self::to_error("column created_at", e))?,
                    )?;
                    Ok(Some(checkpoint))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| Self::to_error("spawn_blocking join", e))?
    }

    async fn list(&self, run_id: &str) -> GraphResult<Vec<Checkpoint>> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| Self::to_error("open", e))?;
            let mut stmt = conn
                .prepare(
                    "SELECT run_id, graph_id, current_node_id, message, created_at FROM checkpoints \
                     WHERE run_id = ?1 ORDER BY seq ASC",
                )
                .map_err(|e| Self::to_error("prepare", e))?;
            let rows = stmt
                .query_map(params![run_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(|e| Self::to_error("query_map", e))?;
            let mut checkpoints = Vec::new();
            for row in rows {
                let (run_id, graph_id, current_node_id, message_json, created_at) =
                    row.map_err(|e| Self::to_error("row", e))?;
                checkpoints.push(row_to_checkpoint(run_id, graph_id, current_node_id, message_json, created_at)?);
            }
            Ok(checkpoints)
        })
        .await
        .map_err(|e| Self::to_error("spawn_blocking join", e))?
    }

    async fn delete(&self, run_id: &str) -> GraphResult<()> {
        let db_path = self.db_path.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| Self::to_error("open", e))?;
            conn.execute("DELETE FROM checkpoints WHERE run_id = ?1", params![run_id])
                .map_err(|e| Self::to_error("delete", e))?;
            Ok::<(), GraphError>(())
        })
        .await
        .map_err(|e| Self::to_error("spawn_blocking join", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(run_id: &str, node_id: &str) -> Checkpoint {
        Checkpoint {
            run_id: run_id.to_string(),
            graph_id: "g1".to_string(),
            current_node_id: node_id.to_string(),
            message: Message::new("hi", "user"),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_then_get_latest_round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::new(dir.path().join("checkpoints.db")).unwrap();
        store.put(checkpoint("r1", "a")).await.unwrap();
        store.put(checkpoint("r1", "b")).await.unwrap();
        let latest = store.get_latest("r1").await.unwrap().unwrap();
        assert_eq!(latest.current_node_id, "b");
        let all = store.list("r1").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_all_checkpoints_for_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointStore::new(dir.path().join("checkpoints.db")).unwrap();
        store.put(checkpoint("r1", "a")).await.unwrap();
        store.delete("r1").await.unwrap();
        assert!(store.get_latest("r1").await.unwrap().is_none());
    }
}
