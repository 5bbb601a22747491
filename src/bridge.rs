//! Bridge rows join a share to a matter subtree root, so share access does
//! not re-walk permissions on every request. Issuing shares is external;
//! this store only keeps the join alive and tears it down.

use chrono::Utc;
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::error::CoreResult;

#[derive(Debug, Clone, FromRow)]
pub struct Bridge {
    pub uuid: String,
    pub share_uuid: String,
    pub matter_uuid: String,
    pub sort: i64,
    pub create_time: chrono::DateTime<Utc>,
    pub update_time: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BridgeStore {
    pool: SqlitePool,
}

impl BridgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, share_uuid: &str, matter_uuid: &str) -> CoreResult<Bridge> {
        let now = Utc::now();
        let bridge = Bridge {
            uuid: Uuid::new_v4().to_string(),
            share_uuid: share_uuid.to_string(),
            matter_uuid: matter_uuid.to_string(),
            sort: now.timestamp_millis(),
            create_time: now,
            update_time: now,
        };
        sqlx::query(
            "INSERT INTO bridge (uuid, share_uuid, matter_uuid, sort, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&bridge.uuid)
        .bind(&bridge.share_uuid)
        .bind(&bridge.matter_uuid)
        .bind(bridge.sort)
        .bind(bridge.create_time)
        .bind(bridge.update_time)
        .execute(&self.pool)
        .await?;
        Ok(bridge)
    }

    pub async fn find_by_matter_uuid(&self, matter_uuid: &str) -> CoreResult<Vec<Bridge>> {
        let rows = sqlx::query_as::<_, Bridge>(
            "SELECT * FROM bridge WHERE matter_uuid = ?1 ORDER BY sort ASC",
        )
        .bind(matter_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Called when the matter is permanently deleted.
    pub async fn delete_by_matter_uuid(&self, matter_uuid: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM bridge WHERE matter_uuid = ?1")
            .bind(matter_uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Called when the share is revoked.
    pub async fn delete_by_share_uuid(&self, share_uuid: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM bridge WHERE share_uuid = ?1")
            .bind(share_uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn bridges_are_torn_down_from_either_side() {
        let pool = db::connect_in_memory().await.expect("db");
        let store = BridgeStore::new(pool);
        store.create("share-1", "m1").await.expect("create");
        store.create("share-1", "m2").await.expect("create");
        store.create("share-2", "m1").await.expect("create");

        store.delete_by_share_uuid("share-1").await.expect("revoke");
        assert_eq!(store.find_by_matter_uuid("m2").await.expect("list").len(), 0);
        assert_eq!(store.find_by_matter_uuid("m1").await.expect("list").len(), 1);

        store.delete_by_matter_uuid("m1").await.expect("purge");
        assert_eq!(store.find_by_matter_uuid("m1").await.expect("list").len(), 0);
    }
}
