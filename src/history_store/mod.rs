mod models;
mod schema;
mod sqlite_history_store;

pub use models::*;
pub use schema::HISTORY_VERSIONED_SCHEMAS;
pub use sqlite_history_store::SqliteHistoryStore;

use anyhow::Result;

pub trait HistoryStore {
    /// Ids of every tracked entity, in source-query order.
    fn list_entity_ids(&self) -> Result<Vec<EntityId>>;
    fn get_entity(&self, uid: EntityId) -> Result<Option<Entity>>;
    /// Most recent snapshot by run timestamp, if the entity has any.
    fn get_latest_snapshot(&self, uid: EntityId) -> Result<Option<HistorySnapshot>>;
    /// Insert one snapshot row and commit it.
    fn insert_snapshot(&self, uid: EntityId, run_ts: &str, content_json: &str) -> Result<()>;
}
