//! Space persistence and the quota ledger.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::config::PAGE_HANDLE_SIZE;
use crate::error::{CoreError, CoreResult};
use crate::space::{self, SPACE_TYPE_PRIVATE, SPACE_TYPE_SHARED, Space};

#[derive(Debug, Clone)]
pub struct SpaceStore {
    pool: SqlitePool,
}

impl SpaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_by_uuid(&self, uuid: &str) -> CoreResult<Option<Space>> {
        let space = sqlx::query_as::<_, Space>("SELECT * FROM space WHERE uuid = ?1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(space)
    }

    /// Point lookup that treats absence as an error.
    pub async fn check_by_uuid(&self, uuid: &str) -> CoreResult<Space> {
        self.find_by_uuid(uuid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("no space with uuid = {uuid}")))
    }

    pub async fn find_by_name(&self, name: &str) -> CoreResult<Option<Space>> {
        let space = sqlx::query_as::<_, Space>("SELECT * FROM space WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(space)
    }

    pub async fn count_by_user_uuid(&self, user_uuid: &str) -> CoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM space WHERE user_uuid = ?1 AND kind = ?2",
        )
        .bind(user_uuid)
        .bind(SPACE_TYPE_PRIVATE)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Create a space after validating name, kind and exclusivity. A private
    /// space requires an owner and a user owns at most one.
    pub async fn create(
        &self,
        name: &str,
        user_uuid: &str,
        kind: &str,
        size_limit: i64,
        total_size_limit: i64,
    ) -> CoreResult<Space> {
        space::check_space_name(name)?;
        space::check_size_limit(size_limit)?;
        space::check_size_limit(total_size_limit)?;
        match kind {
            SPACE_TYPE_PRIVATE => {
                if user_uuid.is_empty() {
                    return Err(CoreError::bad_request("private space requires a user"));
                }
                if self.count_by_user_uuid(user_uuid).await? > 0 {
                    return Err(CoreError::bad_request(format!(
                        "user already owns a private space, cannot create {name}"
                    )));
                }
            }
            SPACE_TYPE_SHARED => {}
            other => {
                return Err(CoreError::bad_request(format!(
                    "unsupported space kind: {other}"
                )));
            }
        }
        if self.find_by_name(name).await?.is_some() {
            return Err(CoreError::bad_request(format!(
                "space name {name} already exists"
            )));
        }

        let now = Utc::now();
        let space = Space {
            uuid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            user_uuid: if kind == SPACE_TYPE_PRIVATE {
                user_uuid.to_string()
            } else {
                String::new()
            },
            kind: kind.to_string(),
            size_limit,
            total_size_limit,
            total_size: 0,
            sort: now.timestamp_millis(),
            create_time: now,
            update_time: now,
        };
        sqlx::query(
            "INSERT INTO space (uuid, name, user_uuid, kind, size_limit, total_size_limit,
                total_size, sort, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&space.uuid)
        .bind(&space.name)
        .bind(&space.user_uuid)
        .bind(&space.kind)
        .bind(space.size_limit)
        .bind(space.total_size_limit)
        .bind(space.total_size)
        .bind(space.sort)
        .bind(space.create_time)
        .bind(space.update_time)
        .execute(&self.pool)
        .await?;
        Ok(space)
    }

    /// Limits are the only editable attributes after creation.
    pub async fn edit_limits(
        &self,
        uuid: &str,
        size_limit: i64,
        total_size_limit: i64,
    ) -> CoreResult<Space> {
        space::check_size_limit(size_limit)?;
        space::check_size_limit(total_size_limit)?;
        sqlx::query(
            "UPDATE space SET size_limit = ?1, total_size_limit = ?2, update_time = ?3
             WHERE uuid = ?4",
        )
        .bind(size_limit)
        .bind(total_size_limit)
        .bind(Utc::now())
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        self.check_by_uuid(uuid).await
    }

    /// Overwrite the running total, used by reconciliation re-syncs.
    pub async fn update_total_size(&self, uuid: &str, total_size: i64) -> CoreResult<()> {
        sqlx::query("UPDATE space SET total_size = ?1, update_time = ?2 WHERE uuid = ?3")
            .bind(total_size)
            .bind(Utc::now())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Check a prospective size change against the total limit and apply it,
    /// all on the caller's transaction so the guarded matter write commits or
    /// rolls back together with the ledger update.
    pub async fn check_and_reserve(
        conn: &mut SqliteConnection,
        space_uuid: &str,
        delta: i64,
    ) -> CoreResult<()> {
        let (total_size, total_size_limit): (i64, i64) = sqlx::query_as(
            "SELECT total_size, total_size_limit FROM space WHERE uuid = ?1",
        )
        .bind(space_uuid)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("no space with uuid = {space_uuid}")))?;

        if total_size_limit >= 0 && total_size + delta > total_size_limit {
            return Err(CoreError::QuotaExceeded(format!(
                "space total would reach {} of limit {total_size_limit}",
                total_size + delta
            )));
        }
        sqlx::query(
            "UPDATE space SET total_size = MAX(total_size + ?1, 0), update_time = ?2
             WHERE uuid = ?3",
        )
        .bind(delta)
        .bind(Utc::now())
        .bind(space_uuid)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Apply a size delta outside any caller transaction (removals only,
    /// which cannot fail a limit check).
    pub async fn release(&self, space_uuid: &str, freed: i64) -> CoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::check_and_reserve(&mut conn, space_uuid, -freed).await
    }

    /// The per-file limit is independent of the running total.
    pub fn check_file_size(space: &Space, size: i64) -> CoreResult<()> {
        if space.size_limit >= 0 && size > space.size_limit {
            return Err(CoreError::FileTooLarge(format!(
                "file of {size} bytes exceeds the per-file limit of {}",
                space.size_limit
            )));
        }
        Ok(())
    }

    /// Feed every space, page by page, through the callback. Sweeps use this
    /// to bound memory on large installations.
    pub async fn page_handle<F>(&self, mut each: F) -> CoreResult<()>
    where
        F: FnMut(Space),
    {
        let mut page = 0i64;
        loop {
            let spaces = sqlx::query_as::<_, Space>(
                "SELECT * FROM space ORDER BY uuid ASC LIMIT ?1 OFFSET ?2",
            )
            .bind(PAGE_HANDLE_SIZE)
            .bind(page * PAGE_HANDLE_SIZE)
            .fetch_all(&self.pool)
            .await?;
            let done = (spaces.len() as i64) < PAGE_HANDLE_SIZE;
            for space in spaces {
                each(space);
            }
            if done {
                return Ok(());
            }
            page += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> SpaceStore {
        SpaceStore::new(db::connect_in_memory().await.expect("db"))
    }

    #[tokio::test]
    async fn private_space_is_exclusive_per_user() {
        let store = store().await;
        store
            .create("alice", "u1", SPACE_TYPE_PRIVATE, -1, -1)
            .await
            .expect("first space");
        let err = store
            .create("alice2", "u1", SPACE_TYPE_PRIVATE, -1, -1)
            .await
            .expect_err("second private space");
        assert!(matches!(err, CoreError::BadRequest(_)));

        // A shared space carries no owner.
        let shared = store
            .create("team", "", SPACE_TYPE_SHARED, -1, -1)
            .await
            .expect("shared space");
        assert!(shared.user_uuid.is_empty());
    }

    #[tokio::test]
    async fn duplicate_space_name_is_rejected() {
        let store = store().await;
        store
            .create("alice", "u1", SPACE_TYPE_PRIVATE, -1, -1)
            .await
            .expect("create");
        let err = store
            .create("alice", "u2", SPACE_TYPE_PRIVATE, -1, -1)
            .await
            .expect_err("duplicate name");
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn reserve_rolls_back_with_the_transaction() {
        let store = store().await;
        let space = store
            .create("alice", "u1", SPACE_TYPE_PRIVATE, -1, 100)
            .await
            .expect("create");

        // A reservation that fits, committed.
        let mut tx = store.pool().begin().await.expect("begin");
        SpaceStore::check_and_reserve(&mut tx, &space.uuid, 60)
            .await
            .expect("reserve 60");
        tx.commit().await.expect("commit");

        // A reservation that crosses the limit fails and leaves the total as
        // it was before the failing call.
        let mut tx = store.pool().begin().await.expect("begin");
        let err = SpaceStore::check_and_reserve(&mut tx, &space.uuid, 41)
            .await
            .expect_err("over quota");
        assert!(matches!(err, CoreError::QuotaExceeded(_)));
        drop(tx);

        let reloaded = store.check_by_uuid(&space.uuid).await.expect("reload");
        assert_eq!(reloaded.total_size, 60);

        // Removals always pass and clamp at zero.
        store.release(&space.uuid, 100).await.expect("release");
        let reloaded = store.check_by_uuid(&space.uuid).await.expect("reload");
        assert_eq!(reloaded.total_size, 0);
    }

    #[tokio::test]
    async fn per_file_limit_is_independent() {
        let mut space = Space::new_for_test("alice");
        space.size_limit = 10;
        assert!(SpaceStore::check_file_size(&space, 10).is_ok());
        let err = SpaceStore::check_file_size(&space, 11).expect_err("too large");
        assert!(matches!(err, CoreError::FileTooLarge(_)));
        space.size_limit = -1;
        assert!(SpaceStore::check_file_size(&space, i64::MAX).is_ok());
    }
}
