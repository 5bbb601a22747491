//! Disk↔DB reconciliation: align a space's matter rows with whatever is
//! physically under its root directory. Rows without disk content are
//! removed (physical truth, not a user action); disk entries without rows
//! are adopted, hashing file content once.

use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PAGE_HANDLE_SIZE;
use crate::disk;
use crate::error::CoreResult;
use crate::locking::UserLockManager;
use crate::matter::{self, Matter};
use crate::matter_store::{MatterFilter, MatterStore, OrderPair, SortDirection, SortKey};
use crate::space::Space;
use crate::space_store::SpaceStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub removed_rows: u64,
    pub adopted_dirs: u64,
    pub adopted_files: u64,
}

impl ScanStats {
    pub fn is_noop(&self) -> bool {
        *self == ScanStats::default()
    }
}

pub struct Reconciler {
    matters: MatterStore,
    spaces: SpaceStore,
    locks: Arc<UserLockManager>,
    storage_root: PathBuf,
}

impl Reconciler {
    pub fn new(
        matters: MatterStore,
        spaces: SpaceStore,
        locks: Arc<UserLockManager>,
        storage_root: PathBuf,
    ) -> Self {
        Self {
            matters,
            spaces,
            locks,
            storage_root,
        }
    }

    /// Sweep every space. Per-space failures are logged and skipped so one
    /// bad space cannot abort the run; a busy owner skips its space too.
    pub async fn reconcile_all(&self) -> CoreResult<ScanStats> {
        let mut spaces = Vec::new();
        self.spaces.page_handle(|space| spaces.push(space)).await?;

        let mut total = ScanStats::default();
        for space in spaces {
            match self.reconcile_space(&space).await {
                Ok(stats) => {
                    total.removed_rows += stats.removed_rows;
                    total.adopted_dirs += stats.adopted_dirs;
                    total.adopted_files += stats.adopted_files;
                }
                Err(err) => {
                    warn!(space = %space.name, error = %err, "reconciliation failed for space");
                }
            }
        }
        Ok(total)
    }

    /// Reconcile one space under its owner's lock, so no atomic operation
    /// mutates the tree mid-scan for that user.
    pub async fn reconcile_space(&self, space: &Space) -> CoreResult<ScanStats> {
        let owner = if space.user_uuid.is_empty() {
            space.name.clone()
        } else {
            space.user_uuid.clone()
        };
        let _guard = self.locks.try_lock_user(&owner).await?;

        let root_dir = matter::space_matter_root_dir(&self.storage_root, &space.name);
        disk::ensure_dir(&root_dir).await?;

        let mut stats = ScanStats::default();
        stats.removed_rows = self.remove_stale_rows(space).await?;

        let root = Matter::root_of(space);
        self.adopt_untracked(space, &root, &root_dir, &mut stats)
            .await?;

        // The running total can only be trusted again after both phases.
        let total = self.matters.sum_size_by_space(&space.uuid).await?;
        self.spaces.update_total_size(&space.uuid, total).await?;

        if !stats.is_noop() {
            info!(
                space = %space.name,
                removed = stats.removed_rows,
                adopted_dirs = stats.adopted_dirs,
                adopted_files = stats.adopted_files,
                "reconciliation finished"
            );
        }
        Ok(stats)
    }

    /// Phase one: page through the space's rows and drop those whose disk
    /// path is gone. Directory rows cascade, taking equally-stale children
    /// with them.
    async fn remove_stale_rows(&self, space: &Space) -> CoreResult<u64> {
        let filter = MatterFilter {
            space_uuid: Some(space.uuid.clone()),
            ..Default::default()
        };
        let orders = [OrderPair {
            key: SortKey::CreateTime,
            direction: SortDirection::Asc,
        }];

        let mut stale = Vec::new();
        let mut page = 0i64;
        loop {
            let (_, rows) = self
                .matters
                .page(&filter, &orders, page, PAGE_HANDLE_SIZE)
                .await?;
            let done = (rows.len() as i64) < PAGE_HANDLE_SIZE;
            for row in rows {
                if !disk::exists(&row.absolute_path(&self.storage_root)).await {
                    stale.push(row.uuid);
                }
            }
            if done {
                break;
            }
            page += 1;
        }

        let mut removed = 0u64;
        for uuid in stale {
            // A cascade for an earlier stale directory may have taken this
            // row out already.
            let Some(row) = self.matters.find_by_uuid(&uuid).await? else {
                continue;
            };
            match self.matters.delete(&row).await {
                Ok(_) => removed += 1,
                Err(err) => {
                    warn!(uuid = %row.uuid, error = %err, "cannot remove stale row");
                }
            }
        }
        Ok(removed)
    }

    /// Phase two: walk the disk tree and create rows for untracked entries.
    /// Already-tracked files are never re-hashed.
    fn adopt_untracked<'a>(
        &'a self,
        space: &'a Space,
        parent: &'a Matter,
        parent_dir: &'a Path,
        stats: &'a mut ScanStats,
    ) -> BoxFuture<'a, CoreResult<()>> {
        Box::pin(async move {
            for entry in disk::list_dir(parent_dir).await? {
                if matter::check_matter_name(&entry.name).is_err() {
                    warn!(name = %entry.name, "skipping unrepresentable disk entry");
                    continue;
                }
                let known = self
                    .matters
                    .find_sibling_any(&space.uuid, &parent.uuid, entry.is_dir, &entry.name)
                    .await?;
                match known {
                    Some(row) if row.dir => {
                        self.adopt_untracked(space, &row, &entry.path, stats).await?;
                    }
                    Some(_) => {}
                    None => {
                        let row = self.adopt_entry(space, parent, &entry).await?;
                        if row.dir {
                            stats.adopted_dirs += 1;
                            self.adopt_untracked(space, &row, &entry.path, stats).await?;
                        } else {
                            stats.adopted_files += 1;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn adopt_entry(
        &self,
        space: &Space,
        parent: &Matter,
        entry: &disk::DiskEntry,
    ) -> CoreResult<Matter> {
        let mut row = Matter::root_of(space);
        row.puuid = parent.uuid.clone();
        row.user_uuid = space.user_uuid.clone();
        row.dir = entry.is_dir;
        row.name = entry.name.clone();
        row.path = format!("{}/{}", parent.path, entry.name);
        if !entry.is_dir {
            row.size = entry.size;
            row.digest = hash_file(&entry.path).await?;
        }
        let now = chrono::Utc::now();
        row.uuid = Uuid::new_v4().to_string();
        row.sort = now.timestamp_millis();
        row.create_time = now;
        row.update_time = now;
        row.visit_time = now;
        self.matters.insert(&row).await?;
        Ok(row)
    }
}

async fn hash_file(path: &Path) -> CoreResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
