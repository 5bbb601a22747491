//! Derivative cache: generated transforms (resized images and the like) of
//! a source matter, keyed by a canonical transform signature. Entries are
//! created lazily by the caller and only ever removed when the source is
//! permanently deleted; there is no size-based eviction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::disk;
use crate::error::CoreResult;
use crate::matter::{self, Matter};

/// Canonical signature of an image transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Scale preserving aspect ratio to fit inside the box.
    Fit,
    /// Scale and crop to fill the box exactly.
    Fill,
}

impl FitMode {
    fn as_str(self) -> &'static str {
        match self {
            FitMode::Fit => "fit",
            FitMode::Fill => "fill",
        }
    }
}

impl std::str::FromStr for FitMode {
    type Err = crate::error::CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "fit" => Ok(FitMode::Fit),
            "fill" => Ok(FitMode::Fill),
            other => Err(crate::error::CoreError::bad_request(format!(
                "unsupported fit mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSignature {
    pub mode: FitMode,
    pub width: u32,
    pub height: u32,
}

impl TransformSignature {
    /// The canonical key string, stable across requests.
    pub fn canonical(&self) -> String {
        format!("{}_{}x{}", self.mode.as_str(), self.width, self.height)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Derivative {
    pub uuid: String,
    pub matter_uuid: String,
    pub space_uuid: String,
    pub user_uuid: String,
    pub signature: String,
    pub name: String,
    pub path: String,
    pub size: i64,
    pub sort: i64,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DerivativeStore {
    pool: SqlitePool,
    storage_root: PathBuf,
}

impl DerivativeStore {
    pub fn new(pool: SqlitePool, storage_root: PathBuf) -> Self {
        Self { pool, storage_root }
    }

    /// Cache lookup; absent means the caller must generate the content.
    pub async fn get(
        &self,
        matter_uuid: &str,
        signature: &TransformSignature,
    ) -> CoreResult<Option<Derivative>> {
        let row = sqlx::query_as::<_, Derivative>(
            "SELECT * FROM derivative WHERE matter_uuid = ?1 AND signature = ?2",
        )
        .bind(matter_uuid)
        .bind(signature.canonical())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Absolute disk location a new derivative of `matter` should be
    /// generated at, under the space's cache directory.
    pub fn derivative_disk_path(&self, matter: &Matter, signature: &TransformSignature) -> PathBuf {
        matter::space_cache_root_dir(&self.storage_root, &matter.space_name)
            .join(format!("{}_{}", matter.uuid, signature.canonical()))
            .with_extension(matter::extension_of(&matter.name).unwrap_or_else(|| "bin".into()))
    }

    /// Register a freshly generated derivative file.
    pub async fn put(
        &self,
        matter: &Matter,
        signature: &TransformSignature,
        disk_path: &Path,
        size: i64,
    ) -> CoreResult<Derivative> {
        let relative = disk_path
            .strip_prefix(&self.storage_root)
            .map(|p| p.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
            .unwrap_or_else(|_| disk_path.to_string_lossy().to_string());
        let now = Utc::now();
        let derivative = Derivative {
            uuid: Uuid::new_v4().to_string(),
            matter_uuid: matter.uuid.clone(),
            space_uuid: matter.space_uuid.clone(),
            user_uuid: matter.user_uuid.clone(),
            signature: signature.canonical(),
            name: format!("{}_{}", signature.canonical(), matter.name),
            path: relative,
            size,
            sort: now.timestamp_millis(),
            create_time: now,
            update_time: now,
        };
        sqlx::query(
            "INSERT INTO derivative (uuid, matter_uuid, space_uuid, user_uuid, signature,
                name, path, size, sort, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&derivative.uuid)
        .bind(&derivative.matter_uuid)
        .bind(&derivative.space_uuid)
        .bind(&derivative.user_uuid)
        .bind(&derivative.signature)
        .bind(&derivative.name)
        .bind(&derivative.path)
        .bind(derivative.size)
        .bind(derivative.sort)
        .bind(derivative.create_time)
        .bind(derivative.update_time)
        .execute(&self.pool)
        .await?;
        Ok(derivative)
    }

    /// Drop every derivative of a source matter, rows and disk files both.
    /// Disk failures are logged, not raised; stale cache files are harmless.
    pub async fn invalidate(&self, matter_uuid: &str) -> CoreResult<()> {
        let rows = sqlx::query_as::<_, Derivative>(
            "SELECT * FROM derivative WHERE matter_uuid = ?1",
        )
        .bind(matter_uuid)
        .fetch_all(&self.pool)
        .await?;
        for derivative in &rows {
            let abs = self.storage_root.join(
                derivative
                    .path
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .collect::<PathBuf>(),
            );
            if let Err(err) = disk::remove_file_if_exists(&abs).await {
                warn!(path = %abs.display(), error = %err, "cannot remove derivative file");
            }
        }
        sqlx::query("DELETE FROM derivative WHERE matter_uuid = ?1")
            .bind(matter_uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::space::Space;
    use tempfile::tempdir;

    fn sample_matter(space: &Space) -> Matter {
        let mut matter = Matter::root_of(space);
        matter.uuid = "m-photo".to_string();
        matter.dir = false;
        matter.name = "photo.jpg".to_string();
        matter.path = "/photo.jpg".to_string();
        matter
    }

    #[tokio::test]
    async fn put_get_invalidate_roundtrip() {
        let temp = tempdir().expect("tempdir");
        let pool = db::connect_in_memory().await.expect("db");
        let store = DerivativeStore::new(pool, temp.path().to_path_buf());
        let space = Space::new_for_test("alice");
        let matter = sample_matter(&space);
        let signature = TransformSignature {
            mode: FitMode::Fit,
            width: 200,
            height: 200,
        };

        assert!(store.get(&matter.uuid, &signature).await.expect("get").is_none());

        let disk_path = store.derivative_disk_path(&matter, &signature);
        tokio::fs::create_dir_all(disk_path.parent().expect("parent"))
            .await
            .expect("mkdir");
        tokio::fs::write(&disk_path, b"thumb").await.expect("write");
        store
            .put(&matter, &signature, &disk_path, 5)
            .await
            .expect("put");

        let cached = store
            .get(&matter.uuid, &signature)
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(cached.signature, "fit_200x200");
        assert_eq!(cached.size, 5);

        // A different signature misses.
        let other = TransformSignature {
            mode: FitMode::Fill,
            width: 200,
            height: 200,
        };
        assert!(store.get(&matter.uuid, &other).await.expect("get").is_none());

        store.invalidate(&matter.uuid).await.expect("invalidate");
        assert!(store.get(&matter.uuid, &signature).await.expect("get").is_none());
        assert!(!crate::disk::exists(&disk_path).await);
    }
}
