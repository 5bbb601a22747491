//! Tree-shaped persistence for matters: lookups, filtered children queries,
//! stable paged listings, targeted column updates and the cascading
//! permanent delete that keeps DB rows and disk content aligned.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::QueryBuilder;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use crate::bridge::BridgeStore;
use crate::derivative::DerivativeStore;
use crate::disk;
use crate::error::{CoreError, CoreResult};
use crate::matter::{MATTER_ROOT, Matter};
use crate::space::Space;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Dir,
    Name,
    Size,
    Times,
    CreateTime,
    UpdateTime,
    DeleteTime,
}

impl SortKey {
    fn column(self) -> &'static str {
        match self {
            SortKey::Dir => "dir",
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Times => "times",
            SortKey::CreateTime => "create_time",
            SortKey::UpdateTime => "update_time",
            SortKey::DeleteTime => "delete_time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderPair {
    pub key: SortKey,
    pub direction: SortDirection,
}

/// Default listing order: directories first, newest first.
pub fn default_order() -> Vec<OrderPair> {
    vec![
        OrderPair {
            key: SortKey::Dir,
            direction: SortDirection::Desc,
        },
        OrderPair {
            key: SortKey::CreateTime,
            direction: SortDirection::Desc,
        },
    ]
}

/// Filters for children and paged listings. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct MatterFilter {
    pub puuid: Option<String>,
    pub space_uuid: Option<String>,
    pub user_uuid: Option<String>,
    pub dir: Option<bool>,
    pub deleted: Option<bool>,
    /// Substring match on the name.
    pub name: Option<String>,
    /// Extension allow-list, lowercase without the dot.
    pub extensions: Option<Vec<String>>,
    pub delete_time_before: Option<DateTime<Utc>>,
}

impl MatterFilter {
    fn apply(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(puuid) = &self.puuid {
            qb.push(" AND puuid = ").push_bind(puuid.clone());
        }
        if let Some(space_uuid) = &self.space_uuid {
            qb.push(" AND space_uuid = ").push_bind(space_uuid.clone());
        }
        if let Some(user_uuid) = &self.user_uuid {
            qb.push(" AND user_uuid = ").push_bind(user_uuid.clone());
        }
        if let Some(dir) = self.dir {
            qb.push(" AND dir = ").push_bind(dir);
        }
        if let Some(deleted) = self.deleted {
            qb.push(" AND deleted = ").push_bind(deleted);
        }
        if let Some(name) = &self.name {
            qb.push(" AND name LIKE ").push_bind(format!("%{name}%"));
        }
        if let Some(before) = self.delete_time_before {
            qb.push(" AND delete_time < ").push_bind(before);
        }
        if let Some(extensions) = &self.extensions
            && !extensions.is_empty()
        {
            qb.push(" AND (");
            for (i, ext) in extensions.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("name LIKE ").push_bind(format!("%.{ext}"));
            }
            qb.push(")");
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatterStore {
    pool: SqlitePool,
    storage_root: PathBuf,
    derivatives: DerivativeStore,
    bridges: BridgeStore,
}

impl MatterStore {
    pub fn new(
        pool: SqlitePool,
        storage_root: PathBuf,
        derivatives: DerivativeStore,
        bridges: BridgeStore,
    ) -> Self {
        Self {
            pool,
            storage_root,
            derivatives,
            bridges,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn storage_root(&self) -> &std::path::Path {
        &self.storage_root
    }

    pub async fn find_by_uuid(&self, uuid: &str) -> CoreResult<Option<Matter>> {
        let matter = sqlx::query_as::<_, Matter>("SELECT * FROM matter WHERE uuid = ?1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(matter)
    }

    /// Point lookup that treats absence as an error, unlike `find_by_uuid`.
    pub async fn check_by_uuid(&self, uuid: &str) -> CoreResult<Matter> {
        self.find_by_uuid(uuid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("no matter with uuid = {uuid}")))
    }

    /// Like `check_by_uuid`, but the sentinel id resolves to the space's
    /// synthesized virtual root.
    pub async fn check_with_root_by_uuid(&self, uuid: &str, space: &Space) -> CoreResult<Matter> {
        if uuid.is_empty() {
            return Err(CoreError::bad_request("uuid cannot be empty"));
        }
        if uuid == MATTER_ROOT {
            return Ok(Matter::root_of(space));
        }
        self.check_by_uuid(uuid).await
    }

    /// Non-deleted child by name, directories preferred when a file and a
    /// directory share the name.
    pub async fn find_child_by_name(
        &self,
        space_uuid: &str,
        puuid: &str,
        name: &str,
    ) -> CoreResult<Option<Matter>> {
        let matter = sqlx::query_as::<_, Matter>(
            "SELECT * FROM matter
             WHERE space_uuid = ?1 AND puuid = ?2 AND name = ?3 AND deleted = 0
             ORDER BY dir DESC LIMIT 1",
        )
        .bind(space_uuid)
        .bind(puuid)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(matter)
    }

    /// Non-deleted sibling with the exact `(dir, name)` pair.
    pub async fn find_sibling(
        &self,
        space_uuid: &str,
        puuid: &str,
        dir: bool,
        name: &str,
    ) -> CoreResult<Option<Matter>> {
        let matter = sqlx::query_as::<_, Matter>(
            "SELECT * FROM matter
             WHERE space_uuid = ?1 AND puuid = ?2 AND dir = ?3 AND name = ?4 AND deleted = 0",
        )
        .bind(space_uuid)
        .bind(puuid)
        .bind(dir)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(matter)
    }

    /// Sibling lookup that also sees trashed rows. Reconciliation must not
    /// adopt a disk entry whose row merely sits in the trash.
    pub async fn find_sibling_any(
        &self,
        space_uuid: &str,
        puuid: &str,
        dir: bool,
        name: &str,
    ) -> CoreResult<Option<Matter>> {
        let matter = sqlx::query_as::<_, Matter>(
            "SELECT * FROM matter
             WHERE space_uuid = ?1 AND puuid = ?2 AND dir = ?3 AND name = ?4
             ORDER BY deleted ASC LIMIT 1",
        )
        .bind(space_uuid)
        .bind(puuid)
        .bind(dir)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(matter)
    }

    /// Every child row, trash included; the cascade and move paths need them
    /// all. Insertion order keeps the traversal deterministic.
    pub async fn children_all(&self, space_uuid: &str, puuid: &str) -> CoreResult<Vec<Matter>> {
        let rows = sqlx::query_as::<_, Matter>(
            "SELECT * FROM matter WHERE space_uuid = ?1 AND puuid = ?2 ORDER BY sort ASC",
        )
        .bind(space_uuid)
        .bind(puuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Paged listing with caller-specified ordering. The monotonic `sort`
    /// column is always appended as the final tie-break so pagination stays
    /// stable across pages.
    pub async fn page(
        &self,
        filter: &MatterFilter,
        orders: &[OrderPair],
        page: i64,
        page_size: i64,
    ) -> CoreResult<(i64, Vec<Matter>)> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM matter WHERE 1=1");
        filter.apply(&mut count_qb);
        let count: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM matter WHERE 1=1");
        filter.apply(&mut qb);
        qb.push(" ORDER BY ");
        for pair in orders {
            qb.push(pair.key.column());
            qb.push(match pair.direction {
                SortDirection::Asc => " ASC, ",
                SortDirection::Desc => " DESC, ",
            });
        }
        qb.push("sort ASC");
        qb.push(" LIMIT ").push_bind(page_size);
        qb.push(" OFFSET ").push_bind(page * page_size);
        let rows = qb
            .build_query_as::<Matter>()
            .fetch_all(&self.pool)
            .await?;
        Ok((count, rows))
    }

    /// Insert a new row, assigning id, sort key and timestamps.
    pub async fn create(&self, mut matter: Matter) -> CoreResult<Matter> {
        let now = Utc::now();
        matter.uuid = Uuid::new_v4().to_string();
        matter.sort = now.timestamp_millis();
        matter.create_time = now;
        matter.update_time = now;
        matter.visit_time = now;
        self.insert(&matter).await?;
        Ok(matter)
    }

    /// Insert a row as-is; reconciliation uses this to adopt disk entries
    /// with sizes and digests already computed.
    pub async fn insert(&self, matter: &Matter) -> CoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_with(&mut conn, matter).await
    }

    /// Insert on the caller's transaction, so a quota reservation and the
    /// row write it guards commit or roll back together.
    pub async fn insert_with(
        conn: &mut sqlx::SqliteConnection,
        matter: &Matter,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO matter (uuid, puuid, space_uuid, space_name, user_uuid, dir, name,
                digest, size, privacy, path, times, prop, deleted, delete_time, visit_time,
                sort, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19)",
        )
        .bind(&matter.uuid)
        .bind(&matter.puuid)
        .bind(&matter.space_uuid)
        .bind(&matter.space_name)
        .bind(&matter.user_uuid)
        .bind(matter.dir)
        .bind(&matter.name)
        .bind(&matter.digest)
        .bind(matter.size)
        .bind(matter.privacy)
        .bind(&matter.path)
        .bind(matter.times)
        .bind(&matter.prop)
        .bind(matter.deleted)
        .bind(matter.delete_time)
        .bind(matter.visit_time)
        .bind(matter.sort)
        .bind(matter.create_time)
        .bind(matter.update_time)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Overwrite-in-place of a file's content columns, on the caller's
    /// transaction for the same reason as `insert_with`.
    pub async fn update_content_with(
        conn: &mut sqlx::SqliteConnection,
        uuid: &str,
        digest: &str,
        size: i64,
        privacy: bool,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE matter SET digest = ?1, size = ?2, privacy = ?3, update_time = ?4
             WHERE uuid = ?5",
        )
        .bind(digest)
        .bind(size)
        .bind(privacy)
        .bind(Utc::now())
        .bind(uuid)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Full-row update, stamping `update_time`.
    pub async fn save(&self, matter: &mut Matter) -> CoreResult<()> {
        matter.update_time = Utc::now();
        sqlx::query(
            "UPDATE matter SET puuid = ?1, space_uuid = ?2, space_name = ?3, user_uuid = ?4,
                dir = ?5, name = ?6, digest = ?7, size = ?8, privacy = ?9, path = ?10,
                times = ?11, prop = ?12, deleted = ?13, delete_time = ?14, visit_time = ?15,
                update_time = ?16
             WHERE uuid = ?17",
        )
        .bind(&matter.puuid)
        .bind(&matter.space_uuid)
        .bind(&matter.space_name)
        .bind(&matter.user_uuid)
        .bind(matter.dir)
        .bind(&matter.name)
        .bind(&matter.digest)
        .bind(matter.size)
        .bind(matter.privacy)
        .bind(&matter.path)
        .bind(matter.times)
        .bind(&matter.prop)
        .bind(matter.deleted)
        .bind(matter.delete_time)
        .bind(matter.visit_time)
        .bind(matter.update_time)
        .bind(&matter.uuid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rename touches the name column only. `update_time` is deliberately
    /// left alone so the DAV etag stays stable across pure renames.
    pub async fn set_name(&self, uuid: &str, name: &str) -> CoreResult<()> {
        sqlx::query("UPDATE matter SET name = ?1 WHERE uuid = ?2")
            .bind(name)
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_privacy(&self, uuid: &str, privacy: bool) -> CoreResult<()> {
        sqlx::query("UPDATE matter SET privacy = ?1, update_time = ?2 WHERE uuid = ?3")
            .bind(privacy)
            .bind(Utc::now())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Shallow trash flip. Directories are not cascaded here; only the
    /// permanent delete cascades.
    pub async fn soft_delete(&self, uuid: &str) -> CoreResult<()> {
        sqlx::query("UPDATE matter SET deleted = 1, delete_time = ?1 WHERE uuid = ?2")
            .bind(Utc::now())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clears the trash flag. Sibling collisions are not re-checked; see the
    /// design notes.
    pub async fn recover(&self, uuid: &str) -> CoreResult<()> {
        sqlx::query("UPDATE matter SET deleted = 0, delete_time = NULL WHERE uuid = ?1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Download bookkeeping; callers fire-and-forget this.
    pub async fn times_increment(&self, uuid: &str) -> CoreResult<()> {
        sqlx::query("UPDATE matter SET times = times + 1, visit_time = ?1 WHERE uuid = ?2")
            .bind(Utc::now())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sum of direct children's bytes (directory rows carry size 0).
    pub async fn sum_size_by_puuid(&self, space_uuid: &str, puuid: &str) -> CoreResult<i64> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(size) FROM matter WHERE space_uuid = ?1 AND puuid = ?2",
        )
        .bind(space_uuid)
        .bind(puuid)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum.unwrap_or(0))
    }

    /// Total file bytes of a space, trash included (trash still occupies
    /// quota until it expires).
    pub async fn sum_size_by_space(&self, space_uuid: &str) -> CoreResult<i64> {
        let sum: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(size) FROM matter WHERE space_uuid = ?1 AND dir = 0",
        )
        .bind(space_uuid)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum.unwrap_or(0))
    }

    /// Remove a bare row. Reconciliation uses this when the disk content is
    /// already gone, so no disk or cache cleanup happens here.
    pub async fn delete_row(&self, uuid: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM matter WHERE uuid = ?1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Permanent cascading delete. Children go before their parent row;
    /// file rows are removed from the DB first and from disk second, so a
    /// crash can only leave orphaned disk entries (re-adopted by the scan
    /// sweep), never a file row without content. Returns the freed bytes.
    pub fn delete<'a>(&'a self, matter: &'a Matter) -> BoxFuture<'a, CoreResult<i64>> {
        Box::pin(async move {
            let mut freed = 0i64;
            if matter.dir {
                let children = self.children_all(&matter.space_uuid, &matter.uuid).await?;
                for child in &children {
                    freed += self.delete(child).await?;
                }
                if !matter.is_root() {
                    self.delete_row(&matter.uuid).await?;
                    let abs = matter.absolute_path(&self.storage_root);
                    disk::remove_empty_dir(&abs).await;
                }
            } else {
                self.delete_row(&matter.uuid).await?;
                if let Err(err) = self.derivatives.invalidate(&matter.uuid).await {
                    warn!(uuid = %matter.uuid, error = %err, "cannot purge derivatives");
                }
                if let Err(err) = self.bridges.delete_by_matter_uuid(&matter.uuid).await {
                    warn!(uuid = %matter.uuid, error = %err, "cannot purge bridges");
                }
                let abs = matter.absolute_path(&self.storage_root);
                if let Err(err) = disk::remove_file_if_exists(&abs).await {
                    warn!(path = %abs.display(), error = %err, "cannot remove file from disk");
                }
                freed += matter.size;
            }
            Ok(freed)
        })
    }
}
