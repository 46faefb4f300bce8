use super::models::{Entity, EntityId, HistorySnapshot};
use super::HistoryStore;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// [`HistoryStore`] over a connection borrowed for the duration of a run.
pub struct SqliteHistoryStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteHistoryStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert an entity or replace its name and value.
    pub fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO source (uid, name, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(uid) DO UPDATE SET name = excluded.name, value = excluded.value",
                params![entity.uid, entity.name, entity.value],
            )
            .with_context(|| format!("Failed to upsert entity {}", entity.uid))?;
        Ok(())
    }

    pub fn count_snapshots(&self, uid: EntityId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM history WHERE uid = ?1",
            params![uid],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<HistorySnapshot> {
        Ok(HistorySnapshot {
            uid: row.get("uid")?,
            run_ts: row.get("run_ts")?,
            content_json: row.get("content_json")?,
        })
    }
}

impl HistoryStore for SqliteHistoryStore<'_> {
    fn list_entity_ids(&self) -> Result<Vec<EntityId>> {
        let mut stmt = self.conn.prepare("SELECT uid FROM source")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<EntityId>>>()?;
        Ok(ids)
    }

    fn get_entity(&self, uid: EntityId) -> Result<Option<Entity>> {
        let entity = self
            .conn
            .query_row(
                "SELECT uid, name, value FROM source WHERE uid = ?1",
                params![uid],
                |row| {
                    Ok(Entity {
                        uid: row.get("uid")?,
                        name: row.get("name")?,
                        value: row.get("value")?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to look up entity {}", uid))?;
        Ok(entity)
    }

    fn get_latest_snapshot(&self, uid: EntityId) -> Result<Option<HistorySnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT uid, run_ts, content_json FROM history
                 WHERE uid = ?1 ORDER BY run_ts DESC LIMIT 1",
                params![uid],
                Self::row_to_snapshot,
            )
            .optional()
            .with_context(|| format!("Failed to read latest history of entity {}", uid))?;
        Ok(snapshot)
    }

    fn insert_snapshot(&self, uid: EntityId, run_ts: &str, content_json: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO history (uid, run_ts, content_json) VALUES (?1, ?2, ?3)",
            params![uid, run_ts, content_json],
        )
        .with_context(|| format!("Failed to insert history of entity {}", uid))?;
        tx.commit()?;
        Ok(())
    }
}
