//! The atomic operations engine: every tree mutation enters here, under a
//! per-user advisory lock, and leaves the metadata store, the quota ledger
//! and the physical disk tree in agreement.
//!
//! Callers are already authenticated and authorized; the engine re-checks
//! space ownership as defense-in-depth but trusts the permission oracle.

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::disk;
use crate::error::{CoreError, CoreResult};
use crate::locking::UserLockManager;
use crate::matter::{self, MATTER_MAX_DEPTH, MATTER_ROOT, Matter};
use crate::matter_store::{MatterFilter, MatterStore, OrderPair, SortDirection, SortKey};
use crate::space::Space;
use crate::space_store::SpaceStore;

/// Byte stream feeding an upload; IO and remote errors arrive in-band.
pub type ByteStream = Box<dyn Stream<Item = CoreResult<Bytes>> + Send + Unpin>;

pub struct MatterEngine {
    matters: MatterStore,
    spaces: SpaceStore,
    locks: Arc<UserLockManager>,
    storage_root: PathBuf,
    fetcher: reqwest::Client,
    trash_retention: ChronoDuration,
}

impl MatterEngine {
    pub fn new(
        matters: MatterStore,
        spaces: SpaceStore,
        locks: Arc<UserLockManager>,
        storage_root: PathBuf,
        trash_retention_days: u32,
    ) -> Self {
        Self {
            matters,
            spaces,
            locks,
            storage_root,
            fetcher: reqwest::Client::new(),
            trash_retention: ChronoDuration::days(i64::from(trash_retention_days)),
        }
    }

    pub fn matters(&self) -> &MatterStore {
        &self.matters
    }

    pub fn spaces(&self) -> &SpaceStore {
        &self.spaces
    }

    pub fn locks(&self) -> &Arc<UserLockManager> {
        &self.locks
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    fn space_root(&self, space: &Space) -> PathBuf {
        matter::space_matter_root_dir(&self.storage_root, &space.name)
    }

    /// Parents must be live directories of the caller's space.
    fn check_parent(&self, parent: &Matter, space: &Space) -> CoreResult<()> {
        if !parent.dir {
            return Err(CoreError::bad_request("parent is not a directory"));
        }
        if parent.space_uuid != space.uuid {
            return Err(CoreError::Unauthorized(
                "parent belongs to a different space".into(),
            ));
        }
        if parent.deleted {
            return Err(CoreError::bad_request("parent is in the trash"));
        }
        Ok(())
    }

    fn check_same_space(matter: &Matter, space: &Space) -> CoreResult<()> {
        if matter.space_uuid != space.uuid {
            return Err(CoreError::Unauthorized(
                "matter belongs to a different space".into(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Directory creation
    // ------------------------------------------------------------------

    pub async fn create_directory(
        &self,
        user_uuid: &str,
        space: &Space,
        parent_uuid: &str,
        name: &str,
    ) -> CoreResult<Matter> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let parent = self.matters.check_with_root_by_uuid(parent_uuid, space).await?;
        self.create_directory_unlocked(user_uuid, space, &parent, name)
            .await
    }

    async fn create_directory_unlocked(
        &self,
        user_uuid: &str,
        space: &Space,
        parent: &Matter,
        name: &str,
    ) -> CoreResult<Matter> {
        matter::check_matter_name(name)?;
        self.check_parent(parent, space)?;
        if parent.depth() + 1 > MATTER_MAX_DEPTH {
            return Err(CoreError::bad_request(format!(
                "directory depth cannot exceed {MATTER_MAX_DEPTH}"
            )));
        }
        if self
            .matters
            .find_sibling(&space.uuid, &parent.uuid, true, name)
            .await?
            .is_some()
        {
            return Err(CoreError::conflict(format!(
                "directory {name} already exists here"
            )));
        }

        let mut row = Matter::root_of(space);
        row.puuid = parent.uuid.clone();
        row.user_uuid = user_uuid.to_string();
        row.dir = true;
        row.name = name.to_string();
        row.path = format!("{}/{}", parent.path, name);
        let created = self.matters.create(row).await?;
        disk::ensure_dir(&created.absolute_path(&self.storage_root)).await?;
        info!(space = %space.name, path = %created.path, "create directory");
        Ok(created)
    }

    /// Resolve or create every directory along `dest_path`; existing
    /// directories are reused, never duplicated.
    async fn create_directories_unlocked(
        &self,
        user_uuid: &str,
        space: &Space,
        dest_path: &str,
    ) -> CoreResult<Matter> {
        let segments: Vec<&str> = dest_path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() > MATTER_MAX_DEPTH {
            return Err(CoreError::bad_request(format!(
                "directory depth cannot exceed {MATTER_MAX_DEPTH}"
            )));
        }
        let mut current = Matter::root_of(space);
        for segment in segments {
            matter::check_matter_name(segment)?;
            current = match self
                .matters
                .find_sibling(&space.uuid, &current.uuid, true, segment)
                .await?
            {
                Some(existing) => existing,
                None => {
                    self.create_directory_unlocked(user_uuid, space, &current, segment)
                        .await?
                }
            };
        }
        Ok(current)
    }

    // ------------------------------------------------------------------
    // Upload / crawl / mirror
    // ------------------------------------------------------------------

    pub async fn upload(
        &self,
        user_uuid: &str,
        space: &Space,
        parent_uuid: &str,
        filename: &str,
        privacy: bool,
        stream: ByteStream,
    ) -> CoreResult<Matter> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let parent = self.matters.check_with_root_by_uuid(parent_uuid, space).await?;
        self.upload_unlocked(user_uuid, space, &parent, filename, privacy, stream)
            .await
    }

    /// The shared upload path: spool to a temp file while hashing, rename
    /// into place, then commit quota and metadata in one transaction. Disk
    /// precedes DB; a failed commit removes the disk file best-effort and
    /// anything missed is re-adopted by reconciliation.
    async fn upload_unlocked(
        &self,
        user_uuid: &str,
        space: &Space,
        parent: &Matter,
        filename: &str,
        privacy: bool,
        mut stream: ByteStream,
    ) -> CoreResult<Matter> {
        matter::check_matter_name(filename)?;
        self.check_parent(parent, space)?;
        if self
            .matters
            .find_sibling(&space.uuid, &parent.uuid, true, filename)
            .await?
            .is_some()
        {
            return Err(CoreError::conflict(format!(
                "a directory named {filename} already exists here"
            )));
        }
        let existing = self
            .matters
            .find_sibling(&space.uuid, &parent.uuid, false, filename)
            .await?;

        let relative_path = format!("{}/{}", parent.path, filename);
        let target = disk::resolve_under(&self.space_root(space), &relative_path)?;
        let parent_dir = target
            .parent()
            .ok_or_else(|| CoreError::bad_request("invalid target path"))?;
        disk::ensure_dir(parent_dir).await?;

        let temp_path = parent_dir.join(format!(".{filename}.tmp.{}", Uuid::new_v4()));
        let spooled = self
            .spool(space, &temp_path, &mut stream)
            .await;
        let (size, digest) = match spooled {
            Ok(pair) => pair,
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(err);
            }
        };

        fs::rename(&temp_path, &target).await?;

        let delta = size - existing.as_ref().map(|m| m.size).unwrap_or(0);
        let committed: CoreResult<Matter> = async {
            let mut tx = self.matters.pool().begin().await?;
            SpaceStore::check_and_reserve(&mut tx, &space.uuid, delta).await?;
            let stored = match &existing {
                Some(found) => {
                    MatterStore::update_content_with(&mut tx, &found.uuid, &digest, size, privacy)
                        .await?;
                    tx.commit().await?;
                    self.matters.check_by_uuid(&found.uuid).await?
                }
                None => {
                    let now = Utc::now();
                    let mut row = Matter::root_of(space);
                    row.uuid = Uuid::new_v4().to_string();
                    row.puuid = parent.uuid.clone();
                    row.user_uuid = user_uuid.to_string();
                    row.dir = false;
                    row.name = filename.to_string();
                    row.digest = digest.clone();
                    row.size = size;
                    row.privacy = privacy;
                    row.path = relative_path.clone();
                    row.sort = now.timestamp_millis();
                    row.create_time = now;
                    row.update_time = now;
                    row.visit_time = now;
                    MatterStore::insert_with(&mut tx, &row).await?;
                    tx.commit().await?;
                    row
                }
            };
            Ok(stored)
        }
        .await;

        match committed {
            Ok(stored) => {
                info!(space = %space.name, path = %stored.path, size, "upload file");
                Ok(stored)
            }
            Err(err) => {
                // The content at this path is invisible to the metadata
                // store; remove it so the trees stay aligned.
                if let Err(cleanup) = disk::remove_file_if_exists(&target).await {
                    warn!(path = %target.display(), error = %cleanup,
                        "cannot clean up after failed upload commit");
                }
                Err(err)
            }
        }
    }

    /// Write the stream to `temp_path`, enforcing the per-file limit and
    /// hashing as bytes arrive.
    async fn spool(
        &self,
        space: &Space,
        temp_path: &Path,
        stream: &mut ByteStream,
    ) -> CoreResult<(i64, String)> {
        let mut file = File::create(temp_path).await?;
        let mut hasher = Sha256::new();
        let mut size: i64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            size += chunk.len() as i64;
            SpaceStore::check_file_size(space, size)?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        drop(file);
        Ok((size, hex::encode(hasher.finalize())))
    }

    /// Fetch a remote resource and store it like an upload. Intermediate
    /// directories along `dest_path` are resolved or created idempotently.
    pub async fn crawl(
        &self,
        user_uuid: &str,
        space: &Space,
        url: &str,
        parent_uuid: Option<&str>,
        dest_path: Option<&str>,
        filename: &str,
        privacy: bool,
    ) -> CoreResult<Matter> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CoreError::bad_request(
                "url must start with http:// or https://",
            ));
        }
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let parent = match (parent_uuid, dest_path) {
            (Some(uuid), _) => {
                let parent = self.matters.check_with_root_by_uuid(uuid, space).await?;
                self.check_parent(&parent, space)?;
                parent
            }
            (None, Some(path)) => {
                self.create_directories_unlocked(user_uuid, space, path)
                    .await?
            }
            (None, None) => {
                return Err(CoreError::bad_request(
                    "either a parent uuid or a destination path is required",
                ));
            }
        };

        let response = self.fetcher.get(url).send().await?.error_for_status()?;
        let stream: ByteStream = Box::new(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(CoreError::from)),
        );
        info!(url, filename, "crawl remote file");
        self.upload_unlocked(user_uuid, space, &parent, filename, privacy, stream)
            .await
    }

    /// Bulk-import a local directory tree. With `overwrite` off, files that
    /// already exist at the destination name are skipped, not failed.
    pub async fn mirror(
        &self,
        user_uuid: &str,
        space: &Space,
        src_path: &str,
        dest_path: &str,
        overwrite: bool,
    ) -> CoreResult<()> {
        let src = PathBuf::from(src_path);
        let metadata = fs::metadata(&src).await?;
        if !metadata.is_dir() {
            return Err(CoreError::bad_request("source path is not a directory"));
        }
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let dest = self
            .create_directories_unlocked(user_uuid, space, dest_path)
            .await?;
        self.mirror_dir(user_uuid, space, &src, &dest, overwrite)
            .await
    }

    fn mirror_dir<'a>(
        &'a self,
        user_uuid: &'a str,
        space: &'a Space,
        src: &'a Path,
        dest: &'a Matter,
        overwrite: bool,
    ) -> BoxFuture<'a, CoreResult<()>> {
        Box::pin(async move {
            for entry in disk::list_dir(src).await? {
                if entry.is_dir {
                    let child = match self
                        .matters
                        .find_sibling(&space.uuid, &dest.uuid, true, &entry.name)
                        .await?
                    {
                        Some(found) => found,
                        None => {
                            self.create_directory_unlocked(user_uuid, space, dest, &entry.name)
                                .await?
                        }
                    };
                    self.mirror_dir(user_uuid, space, &entry.path, &child, overwrite)
                        .await?;
                } else {
                    let exists = self
                        .matters
                        .find_sibling(&space.uuid, &dest.uuid, false, &entry.name)
                        .await?
                        .is_some();
                    if exists && !overwrite {
                        info!(name = %entry.name, "mirror skips existing file");
                        continue;
                    }
                    let file = File::open(&entry.path).await?;
                    let stream: ByteStream = Box::new(
                        ReaderStream::new(file).map(|chunk| chunk.map_err(CoreError::from)),
                    );
                    self.upload_unlocked(user_uuid, space, dest, &entry.name, true, stream)
                        .await?;
                }
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Rename / privacy / move
    // ------------------------------------------------------------------

    /// Rename changes the display name only: the disk path keeps its old
    /// segment and `update_time` is untouched, so the etag is stable.
    pub async fn rename(
        &self,
        user_uuid: &str,
        space: &Space,
        uuid: &str,
        new_name: &str,
    ) -> CoreResult<Matter> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let matter = self.matters.check_by_uuid(uuid).await?;
        Self::check_same_space(&matter, space)?;
        if matter.deleted {
            return Err(CoreError::bad_request("matter is in the trash"));
        }
        matter::check_matter_name(new_name)?;
        if matter.name == new_name {
            return Err(CoreError::bad_request("name is unchanged"));
        }
        if self
            .matters
            .find_sibling(&space.uuid, &matter.puuid, matter.dir, new_name)
            .await?
            .is_some()
        {
            return Err(CoreError::conflict(format!(
                "{new_name} already exists here"
            )));
        }
        self.matters.set_name(uuid, new_name).await?;
        info!(uuid, new_name, "rename matter");
        self.matters.check_by_uuid(uuid).await
    }

    pub async fn change_privacy(
        &self,
        user_uuid: &str,
        space: &Space,
        uuid: &str,
        privacy: bool,
    ) -> CoreResult<()> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let matter = self.matters.check_by_uuid(uuid).await?;
        Self::check_same_space(&matter, space)?;
        if matter.deleted {
            return Err(CoreError::bad_request("matter is in the trash"));
        }
        if matter.privacy == privacy {
            return Err(CoreError::bad_request("privacy is unchanged"));
        }
        self.matters.set_privacy(uuid, privacy).await
    }

    /// Move sources one at a time into `dest`. The batch is deliberately
    /// not atomic: a failure leaves earlier sources already moved, and the
    /// caller re-checks state.
    pub async fn move_batch(
        &self,
        user_uuid: &str,
        space: &Space,
        src_uuids: &[String],
        dest_uuid: &str,
    ) -> CoreResult<()> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let dest = self.matters.check_with_root_by_uuid(dest_uuid, space).await?;
        self.check_parent(&dest, space)?;
        for src_uuid in src_uuids {
            self.move_single(space, src_uuid, &dest).await?;
        }
        Ok(())
    }

    async fn move_single(&self, space: &Space, src_uuid: &str, dest: &Matter) -> CoreResult<()> {
        let mut src = self.matters.check_by_uuid(src_uuid).await?;
        Self::check_same_space(&src, space)?;
        if src.deleted {
            return Err(CoreError::bad_request("source is in the trash"));
        }
        if src.puuid == dest.uuid {
            return Err(CoreError::bad_request(
                "source is already a child of the destination",
            ));
        }
        self.check_not_descendant(space, &src, dest).await?;
        if self
            .matters
            .find_sibling(&space.uuid, &dest.uuid, src.dir, &src.name)
            .await?
            .is_some()
        {
            return Err(CoreError::conflict(format!(
                "{} already exists in the destination",
                src.name
            )));
        }

        let old_path = src.path.clone();
        let new_path = format!("{}/{}", dest.path, src.name);
        let old_abs = src.absolute_path(&self.storage_root);
        src.path = new_path.clone();
        let new_abs = src.absolute_path(&self.storage_root);
        disk::rename(&old_abs, &new_abs).await?;

        src.puuid = dest.uuid.clone();
        self.matters.save(&mut src).await?;
        if src.dir {
            self.rewrite_descendant_paths(&src, &old_path, &new_path)
                .await?;
        }
        info!(uuid = %src.uuid, from = %old_path, to = %new_path, "move matter");
        Ok(())
    }

    /// Moving a directory under itself would detach the subtree.
    async fn check_not_descendant(
        &self,
        space: &Space,
        src: &Matter,
        dest: &Matter,
    ) -> CoreResult<()> {
        if dest.uuid == src.uuid {
            return Err(CoreError::bad_request(
                "cannot move a directory into itself",
            ));
        }
        let mut cursor = dest.puuid.clone();
        while !cursor.is_empty() && cursor != MATTER_ROOT {
            if cursor == src.uuid {
                return Err(CoreError::bad_request(
                    "cannot move a directory into its own subtree",
                ));
            }
            cursor = self.matters.check_by_uuid(&cursor).await?.puuid;
        }
        Ok(())
    }

    /// Denormalized `path` strings of the whole subtree are rewritten by
    /// prefix; each node keeps its own (possibly stale) segment names.
    fn rewrite_descendant_paths<'a>(
        &'a self,
        parent: &'a Matter,
        old_prefix: &'a str,
        new_prefix: &'a str,
    ) -> BoxFuture<'a, CoreResult<()>> {
        Box::pin(async move {
            let children = self
                .matters
                .children_all(&parent.space_uuid, &parent.uuid)
                .await?;
            for mut child in children {
                if let Some(rest) = child.path.strip_prefix(old_prefix) {
                    child.path = format!("{new_prefix}{rest}");
                    self.matters.save(&mut child).await?;
                }
                if child.dir {
                    self.rewrite_descendant_paths(&child, old_prefix, new_prefix)
                        .await?;
                }
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Trash and permanent delete
    // ------------------------------------------------------------------

    /// Shallow: the single row is flagged, descendants stay untouched.
    pub async fn soft_delete(&self, user_uuid: &str, space: &Space, uuid: &str) -> CoreResult<()> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let matter = self.matters.check_by_uuid(uuid).await?;
        Self::check_same_space(&matter, space)?;
        if matter.deleted {
            return Err(CoreError::bad_request("matter is already in the trash"));
        }
        self.matters.soft_delete(uuid).await?;
        info!(uuid, "soft delete matter");
        Ok(())
    }

    /// Clears the trash flag without re-validating the restored name
    /// against newer siblings; see the design notes.
    pub async fn recover(&self, user_uuid: &str, space: &Space, uuid: &str) -> CoreResult<()> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let matter = self.matters.check_by_uuid(uuid).await?;
        Self::check_same_space(&matter, space)?;
        if !matter.deleted {
            return Err(CoreError::bad_request("matter is not in the trash"));
        }
        self.matters.recover(uuid).await?;
        info!(uuid, "recover matter");
        Ok(())
    }

    /// Permanent, cascading, and quota-releasing.
    pub async fn delete(&self, user_uuid: &str, space: &Space, uuid: &str) -> CoreResult<()> {
        let _guard = self.locks.try_lock_user(user_uuid).await?;
        let matter = self.matters.check_by_uuid(uuid).await?;
        Self::check_same_space(&matter, space)?;
        let freed = self.matters.delete(&matter).await?;
        if freed > 0 {
            self.spaces.release(&space.uuid, freed).await?;
        }
        info!(uuid, freed, "permanent delete matter");
        Ok(())
    }

    /// Purge every soft-deleted matter older than the retention window.
    /// Runs both on the schedule and on manual trigger; per-item failures
    /// are logged and skipped so one bad record cannot stall the trash.
    pub async fn clean_expired_deleted_matters(&self) -> CoreResult<u64> {
        let cutoff = Utc::now() - self.trash_retention;
        let mut spaces = Vec::new();
        self.spaces.page_handle(|space| spaces.push(space)).await?;

        let mut purged = 0u64;
        for space in spaces {
            let owner = if space.user_uuid.is_empty() {
                space.name.clone()
            } else {
                space.user_uuid.clone()
            };
            let guard = match self.locks.try_lock_user(&owner).await {
                Ok(guard) => guard,
                Err(_) => {
                    info!(space = %space.name, "trash sweep skipped, owner busy");
                    continue;
                }
            };
            let filter = MatterFilter {
                space_uuid: Some(space.uuid.clone()),
                deleted: Some(true),
                delete_time_before: Some(cutoff),
                ..Default::default()
            };
            let orders = [OrderPair {
                key: SortKey::DeleteTime,
                direction: SortDirection::Asc,
            }];
            // Deleting shrinks the result set, so always re-fetch page zero.
            // A round that purges nothing means every remaining row is
            // failing; stop rather than spin on it.
            loop {
                let (_, expired) = self.matters.page(&filter, &orders, 0, 100).await?;
                if expired.is_empty() {
                    break;
                }
                let mut purged_this_round = 0u64;
                for matter in expired {
                    match self.matters.delete(&matter).await {
                        Ok(freed) => {
                            if freed > 0
                                && let Err(err) = self.spaces.release(&space.uuid, freed).await
                            {
                                warn!(space = %space.name, error = %err,
                                    "cannot release quota for expired matter");
                            }
                            purged_this_round += 1;
                        }
                        Err(err) => {
                            warn!(uuid = %matter.uuid, error = %err,
                                "cannot purge expired matter");
                        }
                    }
                }
                purged += purged_this_round;
                if purged_this_round == 0 {
                    break;
                }
            }
            drop(guard);
        }
        if purged > 0 {
            info!(purged, "trash expiry sweep finished");
        }
        Ok(purged)
    }

    // ------------------------------------------------------------------
    // Zip download and counters
    // ------------------------------------------------------------------

    /// Stage an archive of the given matters (already verified to share one
    /// parent and space) under the space's zip directory and return its
    /// path. The caller streams it out and removes it afterwards.
    pub async fn stage_zip(&self, space: &Space, uuids: &[String]) -> CoreResult<PathBuf> {
        if uuids.is_empty() {
            return Err(CoreError::bad_request("nothing to archive"));
        }
        let mut entries = Vec::new();
        for uuid in uuids {
            let matter = self.matters.check_by_uuid(uuid).await?;
            Self::check_same_space(&matter, space)?;
            if matter.deleted {
                return Err(CoreError::bad_request("matter is in the trash"));
            }
            self.collect_zip_entries(&matter, &matter.name, &mut entries)
                .await?;
        }

        let zip_dir = matter::space_zip_root_dir(&self.storage_root, &space.name);
        disk::ensure_dir(&zip_dir).await?;
        let zip_path = zip_dir.join(format!("{}.zip", Uuid::new_v4()));
        let staging = zip_path.clone();
        tokio::task::spawn_blocking(move || write_zip(&staging, &entries))
            .await
            .map_err(|err| CoreError::Io(std::io::Error::other(err)))??;
        info!(path = %zip_path.display(), "staged zip archive");
        Ok(zip_path)
    }

    fn collect_zip_entries<'a>(
        &'a self,
        matter: &'a Matter,
        zip_name: &'a str,
        entries: &'a mut Vec<ZipEntry>,
    ) -> BoxFuture<'a, CoreResult<()>> {
        Box::pin(async move {
            if matter.dir {
                entries.push(ZipEntry {
                    zip_name: format!("{zip_name}/"),
                    disk_path: None,
                });
                let children = self
                    .matters
                    .children_all(&matter.space_uuid, &matter.uuid)
                    .await?;
                for child in children.iter().filter(|c| !c.deleted) {
                    let child_name = format!("{zip_name}/{}", child.name);
                    self.collect_zip_entries(child, &child_name, entries).await?;
                }
            } else {
                entries.push(ZipEntry {
                    zip_name: zip_name.to_string(),
                    disk_path: Some(matter.absolute_path(&self.storage_root)),
                });
            }
            Ok(())
        })
    }

    /// Download bookkeeping never blocks a response and may be dropped on
    /// shutdown.
    pub fn record_download(&self, uuid: &str) {
        let matters = self.matters.clone();
        let uuid = uuid.to_string();
        tokio::spawn(async move {
            if let Err(err) = matters.times_increment(&uuid).await {
                warn!(uuid, error = %err, "cannot record download");
            }
        });
    }
}

struct ZipEntry {
    zip_name: String,
    disk_path: Option<PathBuf>,
}

fn write_zip(target: &Path, entries: &[ZipEntry]) -> CoreResult<()> {
    use std::io::Write;

    let file = std::fs::File::create(target)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for entry in entries {
        match &entry.disk_path {
            None => {
                writer
                    .add_directory(entry.zip_name.as_str(), options)
                    .map_err(|err| CoreError::Io(std::io::Error::other(err)))?;
            }
            Some(disk_path) => {
                writer
                    .start_file(entry.zip_name.as_str(), options)
                    .map_err(|err| CoreError::Io(std::io::Error::other(err)))?;
                let mut source = std::fs::File::open(disk_path)?;
                std::io::copy(&mut source, &mut writer)?;
            }
        }
    }
    writer
        .finish()
        .map_err(|err| CoreError::Io(std::io::Error::other(err)))?
        .flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeStore;
    use crate::db;
    use crate::derivative::DerivativeStore;
    use crate::space::SPACE_TYPE_PRIVATE;
    use tempfile::{TempDir, tempdir};

    const USER: &str = "u1";

    async fn fixture(size_limit: i64, total_limit: i64) -> (TempDir, MatterEngine, Space) {
        let temp = tempdir().expect("tempdir");
        let pool = db::connect_in_memory().await.expect("db");
        let root = temp.path().to_path_buf();
        let matters = MatterStore::new(
            pool.clone(),
            root.clone(),
            DerivativeStore::new(pool.clone(), root.clone()),
            BridgeStore::new(pool.clone()),
        );
        let spaces = SpaceStore::new(pool);
        let space = spaces
            .create("alice", USER, SPACE_TYPE_PRIVATE, size_limit, total_limit)
            .await
            .expect("space");
        tokio::fs::create_dir_all(matter::space_matter_root_dir(temp.path(), &space.name))
            .await
            .expect("space root");
        let engine = MatterEngine::new(
            matters,
            spaces,
            Arc::new(UserLockManager::new()),
            root,
            7,
        );
        (temp, engine, space)
    }

    fn bytes_stream(data: &'static [u8]) -> ByteStream {
        Box::new(futures_util::stream::iter(vec![Ok(Bytes::from_static(
            data,
        ))]))
    }

    #[tokio::test]
    async fn sibling_directories_cannot_share_a_name() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect("first");
        let err = engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect_err("duplicate");
        assert!(matches!(err, CoreError::Conflict(_)));

        // A file may share a directory's name, but not another file's.
        engine
            .upload(USER, &space, MATTER_ROOT, "docs", true, bytes_stream(b"x"))
            .await
            .expect_err("directory shadows the filename");
    }

    #[tokio::test]
    async fn create_directory_rejects_bad_parents_and_names() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let file = engine
            .upload(USER, &space, MATTER_ROOT, "a.txt", true, bytes_stream(b"x"))
            .await
            .expect("upload");
        let err = engine
            .create_directory(USER, &space, &file.uuid, "docs")
            .await
            .expect_err("file parent");
        assert!(matches!(err, CoreError::BadRequest(_)));

        let err = engine
            .create_directory(USER, &space, MATTER_ROOT, "bad/name")
            .await
            .expect_err("reserved char");
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn quota_is_enforced_end_to_end() {
        // totalSizeLimit=5: a 10-byte upload must fail and leave no trace.
        let (temp, engine, space) = fixture(-1, 5).await;
        let err = engine
            .upload(
                USER,
                &space,
                MATTER_ROOT,
                "report.pdf",
                true,
                bytes_stream(b"0123456789"),
            )
            .await
            .expect_err("over quota");
        assert!(matches!(err, CoreError::QuotaExceeded(_)));
        let reloaded = engine.spaces.check_by_uuid(&space.uuid).await.expect("space");
        assert_eq!(reloaded.total_size, 0);
        assert!(
            engine
                .matters
                .find_sibling(&space.uuid, MATTER_ROOT, false, "report.pdf")
                .await
                .expect("query")
                .is_none()
        );
        let disk_path =
            matter::space_matter_root_dir(temp.path(), &space.name).join("report.pdf");
        assert!(!disk::exists(&disk_path).await, "failed upload left disk content");

        // The same upload with an unlimited space succeeds and books 10 bytes.
        let (_temp2, engine2, space2) = fixture(-1, -1).await;
        engine2
            .upload(
                USER,
                &space2,
                MATTER_ROOT,
                "report.pdf",
                true,
                bytes_stream(b"0123456789"),
            )
            .await
            .expect("upload");
        let reloaded = engine2.spaces.check_by_uuid(&space2.uuid).await.expect("space");
        assert_eq!(reloaded.total_size, 10);
    }

    #[tokio::test]
    async fn quota_sequence_fails_on_the_crossing_upload() {
        let (_temp, engine, space) = fixture(-1, 100).await;
        engine
            .upload(USER, &space, MATTER_ROOT, "a.bin", true, bytes_stream(&[7u8; 60]))
            .await
            .expect("first 60");
        let before = engine.spaces.check_by_uuid(&space.uuid).await.expect("space");
        assert_eq!(before.total_size, 60);

        let err = engine
            .upload(USER, &space, MATTER_ROOT, "b.bin", true, bytes_stream(&[7u8; 41]))
            .await
            .expect_err("crossing upload");
        assert!(matches!(err, CoreError::QuotaExceeded(_)));
        let after = engine.spaces.check_by_uuid(&space.uuid).await.expect("space");
        assert_eq!(after.total_size, before.total_size);
    }

    #[tokio::test]
    async fn per_file_limit_fails_mid_spool() {
        let (_temp, engine, space) = fixture(4, -1).await;
        let err = engine
            .upload(USER, &space, MATTER_ROOT, "big.bin", true, bytes_stream(&[1u8; 5]))
            .await
            .expect_err("file too large");
        assert!(matches!(err, CoreError::FileTooLarge(_)));
    }

    #[tokio::test]
    async fn upload_overwrites_same_name_in_place() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let first = engine
            .upload(USER, &space, MATTER_ROOT, "note.txt", true, bytes_stream(b"hello"))
            .await
            .expect("first upload");
        let second = engine
            .upload(USER, &space, MATTER_ROOT, "note.txt", false, bytes_stream(b"hi"))
            .await
            .expect("overwrite");
        assert_eq!(first.uuid, second.uuid, "overwrite must reuse the row");
        assert_eq!(second.size, 2);
        assert_ne!(first.digest, second.digest);
        assert!(!second.privacy);

        let space_row = engine.spaces.check_by_uuid(&space.uuid).await.expect("space");
        assert_eq!(space_row.total_size, 2, "delta applied, not summed");
    }

    #[tokio::test]
    async fn move_rejects_cycles_and_noops() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let a = engine
            .create_directory(USER, &space, MATTER_ROOT, "a")
            .await
            .expect("a");
        let b = engine
            .create_directory(USER, &space, &a.uuid, "b")
            .await
            .expect("b");

        // /a into /a/b is a cycle.
        let err = engine
            .move_batch(USER, &space, &[a.uuid.clone()], &b.uuid)
            .await
            .expect_err("cycle");
        assert!(matches!(err, CoreError::BadRequest(_)));

        // /a into /a is equally rejected.
        let err = engine
            .move_batch(USER, &space, &[a.uuid.clone()], &a.uuid)
            .await
            .expect_err("self");
        assert!(matches!(err, CoreError::BadRequest(_)));

        // b is already a child of a.
        let err = engine
            .move_batch(USER, &space, &[b.uuid.clone()], &a.uuid)
            .await
            .expect_err("noop");
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn move_rewrites_subtree_paths_and_disk() {
        let (temp, engine, space) = fixture(-1, -1).await;
        let a = engine
            .create_directory(USER, &space, MATTER_ROOT, "a")
            .await
            .expect("a");
        let b = engine
            .create_directory(USER, &space, MATTER_ROOT, "b")
            .await
            .expect("b");
        let f = engine
            .upload(USER, &space, &a.uuid, "f.txt", true, bytes_stream(b"data"))
            .await
            .expect("f");

        engine
            .move_batch(USER, &space, &[a.uuid.clone()], &b.uuid)
            .await
            .expect("move");

        let moved_a = engine.matters.check_by_uuid(&a.uuid).await.expect("a");
        assert_eq!(moved_a.puuid, b.uuid);
        assert_eq!(moved_a.path, "/b/a");
        let moved_f = engine.matters.check_by_uuid(&f.uuid).await.expect("f");
        assert_eq!(moved_f.puuid, a.uuid, "puuid of descendants is untouched");
        assert_eq!(moved_f.path, "/b/a/f.txt");

        let root = matter::space_matter_root_dir(temp.path(), &space.name);
        assert!(disk::exists(&root.join("b/a/f.txt")).await);
        assert!(!disk::exists(&root.join("a")).await);
    }

    #[tokio::test]
    async fn move_conflict_leaves_earlier_sources_moved() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let dest = engine
            .create_directory(USER, &space, MATTER_ROOT, "dest")
            .await
            .expect("dest");
        let one = engine
            .upload(USER, &space, MATTER_ROOT, "one.txt", true, bytes_stream(b"1"))
            .await
            .expect("one");
        engine
            .upload(USER, &space, &dest.uuid, "two.txt", true, bytes_stream(b"x"))
            .await
            .expect("clash");
        let two = engine
            .upload(USER, &space, MATTER_ROOT, "two.txt", true, bytes_stream(b"2"))
            .await
            .expect("two");

        let err = engine
            .move_batch(
                USER,
                &space,
                &[one.uuid.clone(), two.uuid.clone()],
                &dest.uuid,
            )
            .await
            .expect_err("second source collides");
        assert!(matches!(err, CoreError::Conflict(_)));

        // The batch is not atomic: the first source is already moved.
        let moved_one = engine.matters.check_by_uuid(&one.uuid).await.expect("one");
        assert_eq!(moved_one.puuid, dest.uuid);
        let stale_two = engine.matters.check_by_uuid(&two.uuid).await.expect("two");
        assert_eq!(stale_two.puuid, MATTER_ROOT);
    }

    #[tokio::test]
    async fn rename_keeps_update_time_and_rejects_collisions() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let file = engine
            .upload(USER, &space, MATTER_ROOT, "old.txt", true, bytes_stream(b"x"))
            .await
            .expect("upload");
        engine
            .upload(USER, &space, MATTER_ROOT, "taken.txt", true, bytes_stream(b"y"))
            .await
            .expect("other");

        let err = engine
            .rename(USER, &space, &file.uuid, "taken.txt")
            .await
            .expect_err("collision");
        assert!(matches!(err, CoreError::Conflict(_)));

        let renamed = engine
            .rename(USER, &space, &file.uuid, "new.txt")
            .await
            .expect("rename");
        assert_eq!(renamed.name, "new.txt");
        assert_eq!(renamed.update_time, file.update_time, "etag must stay stable");
        assert_eq!(renamed.path, file.path, "disk address is untouched");
    }

    #[tokio::test]
    async fn soft_delete_is_shallow_and_recovery_skips_collision_checks() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let docs = engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect("docs");
        let inner = engine
            .upload(USER, &space, &docs.uuid, "f.txt", true, bytes_stream(b"x"))
            .await
            .expect("inner");

        engine
            .soft_delete(USER, &space, &docs.uuid)
            .await
            .expect("soft delete");
        let trashed = engine.matters.check_by_uuid(&docs.uuid).await.expect("docs");
        assert!(trashed.deleted);
        let child = engine.matters.check_by_uuid(&inner.uuid).await.expect("f");
        assert!(!child.deleted, "soft delete must not cascade");

        // While docs sits in the trash a new sibling takes its name. The
        // engine does not pre-check the restored name; the store's live
        // sibling index surfaces the collision as a conflict instead of
        // silently creating duplicates.
        let replacement = engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect("replacement");
        let err = engine
            .recover(USER, &space, &docs.uuid)
            .await
            .expect_err("recover into collision");
        assert!(matches!(err, CoreError::Conflict(_)));

        // Once the newer sibling is gone the same recovery succeeds and the
        // row comes back exactly where it was.
        engine
            .delete(USER, &space, &replacement.uuid)
            .await
            .expect("drop replacement");
        engine.recover(USER, &space, &docs.uuid).await.expect("recover");
        let recovered = engine.matters.check_by_uuid(&docs.uuid).await.expect("docs");
        assert!(!recovered.deleted);
        assert_eq!(recovered.puuid, MATTER_ROOT);
        assert_eq!(recovered.path, docs.path);
    }

    #[tokio::test]
    async fn permanent_delete_releases_quota() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let docs = engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect("docs");
        engine
            .upload(USER, &space, &docs.uuid, "a.txt", true, bytes_stream(b"aaaa"))
            .await
            .expect("a");
        engine
            .upload(USER, &space, &docs.uuid, "b.txt", true, bytes_stream(b"bb"))
            .await
            .expect("b");
        let booked = engine.spaces.check_by_uuid(&space.uuid).await.expect("space");
        assert_eq!(booked.total_size, 6);

        engine.delete(USER, &space, &docs.uuid).await.expect("delete");
        let drained = engine.spaces.check_by_uuid(&space.uuid).await.expect("space");
        assert_eq!(drained.total_size, 0);
    }

    #[tokio::test]
    async fn trash_expiry_purges_only_old_entries() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let old = engine
            .upload(USER, &space, MATTER_ROOT, "old.txt", true, bytes_stream(b"old"))
            .await
            .expect("old");
        let fresh = engine
            .upload(USER, &space, MATTER_ROOT, "fresh.txt", true, bytes_stream(b"new"))
            .await
            .expect("fresh");
        engine.soft_delete(USER, &space, &old.uuid).await.expect("trash old");
        engine.soft_delete(USER, &space, &fresh.uuid).await.expect("trash fresh");

        // Age the first entry past the retention window.
        let ancient = Utc::now() - ChronoDuration::days(30);
        sqlx::query("UPDATE matter SET delete_time = ?1 WHERE uuid = ?2")
            .bind(ancient)
            .bind(&old.uuid)
            .execute(engine.matters.pool())
            .await
            .expect("age row");

        let purged = engine.clean_expired_deleted_matters().await.expect("sweep");
        assert_eq!(purged, 1);
        assert!(engine.matters.find_by_uuid(&old.uuid).await.expect("old").is_none());
        assert!(engine.matters.find_by_uuid(&fresh.uuid).await.expect("fresh").is_some());

        // Idempotent: nothing else has aged out.
        let again = engine.clean_expired_deleted_matters().await.expect("sweep");
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn mirror_imports_and_skips_existing_without_overwrite() {
        let (temp, engine, space) = fixture(-1, -1).await;
        let src = temp.path().join("import-src");
        tokio::fs::create_dir_all(src.join("sub")).await.expect("mkdir");
        tokio::fs::write(src.join("top.txt"), b"top").await.expect("write");
        tokio::fs::write(src.join("sub/leaf.txt"), b"leaf").await.expect("write");

        engine
            .mirror(USER, &space, src.to_str().expect("utf8"), "/imported", false)
            .await
            .expect("mirror");
        let imported = engine
            .matters
            .find_sibling(&space.uuid, MATTER_ROOT, true, "imported")
            .await
            .expect("query")
            .expect("imported dir");
        let top = engine
            .matters
            .find_sibling(&space.uuid, &imported.uuid, false, "top.txt")
            .await
            .expect("query")
            .expect("top.txt");
        assert_eq!(top.size, 3);

        // Second run without overwrite keeps the original rows.
        tokio::fs::write(src.join("top.txt"), b"changed").await.expect("rewrite");
        engine
            .mirror(USER, &space, src.to_str().expect("utf8"), "/imported", false)
            .await
            .expect("mirror again");
        let kept = engine.matters.check_by_uuid(&top.uuid).await.expect("top");
        assert_eq!(kept.size, 3, "existing file must be skipped");

        engine
            .mirror(USER, &space, src.to_str().expect("utf8"), "/imported", true)
            .await
            .expect("mirror overwrite");
        let replaced = engine.matters.check_by_uuid(&top.uuid).await.expect("top");
        assert_eq!(replaced.size, 7, "overwrite must replace content");
    }

    #[tokio::test]
    async fn stage_zip_archives_a_subtree() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let docs = engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect("docs");
        engine
            .upload(USER, &space, &docs.uuid, "a.txt", true, bytes_stream(b"alpha"))
            .await
            .expect("a");

        let staged = engine
            .stage_zip(&space, &[docs.uuid.clone()])
            .await
            .expect("zip");
        let metadata = tokio::fs::metadata(&staged).await.expect("stat");
        assert!(metadata.len() > 0);
        assert_eq!(staged.extension().and_then(|e| e.to_str()), Some("zip"));
    }

    #[tokio::test]
    async fn concurrent_edits_by_one_user_are_busy() {
        let (_temp, engine, space) = fixture(-1, -1).await;
        let guard = engine.locks.try_lock_user(USER).await.expect("hold lock");
        let err = engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect_err("locked");
        assert!(matches!(err, CoreError::Busy(_)));
        assert!(err.retryable());
        drop(guard);
        engine
            .create_directory(USER, &space, MATTER_ROOT, "docs")
            .await
            .expect("after release");
    }
}
