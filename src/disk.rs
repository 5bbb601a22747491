//! Physical disk helpers: safe resolution under the storage root plus the
//! small set of filesystem moves the metadata engine is allowed to make.

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Normalize a relative path, rejecting traversal and absolute components.
pub fn resolve_under(root: &Path, relative: &str) -> CoreResult<PathBuf> {
    let mut normalized = PathBuf::new();
    let trimmed = relative.trim_start_matches(['/', '\\']);
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::bad_request(format!(
                    "invalid path: {relative}"
                )));
            }
        }
    }
    Ok(root.join(normalized))
}

pub async fn ensure_dir(path: &Path) -> CoreResult<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}

pub async fn exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

/// Remove a file, tolerating a path that is already gone.
pub async fn remove_file_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Remove a directory only when it exists and is empty. Anything else is
/// left in place and logged; reconciliation will pick the pieces up.
pub async fn remove_empty_dir(path: &Path) {
    match fs::read_dir(path).await {
        Ok(mut dir) => match dir.next_entry().await {
            Ok(Some(_)) => {
                warn!(path = %path.display(), "directory not empty, left on disk");
            }
            Ok(None) => {
                if let Err(err) = fs::remove_dir(path).await {
                    warn!(path = %path.display(), error = %err, "cannot remove directory");
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot inspect directory");
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot open directory");
        }
    }
}

/// Rename, creating the destination's parent first.
pub async fn rename(from: &Path, to: &Path) -> CoreResult<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(from, to).await?;
    Ok(())
}

/// One entry of a directory listing used by the reconciliation sweep.
#[derive(Debug)]
pub struct DiskEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: i64,
    pub path: PathBuf,
}

/// List the direct children of a directory, skipping entries whose names
/// are not valid UTF-8 (they cannot be represented as matter names).
pub async fn list_dir(path: &Path) -> CoreResult<Vec<DiskEntry>> {
    let mut out = Vec::new();
    let mut dir = fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            warn!(path = %entry.path().display(), "skipping non-utf8 name");
            continue;
        };
        let metadata = entry.metadata().await?;
        out.push(DiskEntry {
            name,
            is_dir: metadata.is_dir(),
            size: metadata.len() as i64,
            path: entry.path(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_rejects_traversal() {
        let root = Path::new("/srv/store");
        assert!(resolve_under(root, "../outside").is_err());
        assert!(resolve_under(root, "a/../../outside").is_err());
        let ok = resolve_under(root, "/docs/./report.pdf").expect("resolve");
        assert_eq!(ok, Path::new("/srv/store/docs/report.pdf"));
    }

    #[tokio::test]
    async fn remove_empty_dir_spares_populated_ones() {
        let temp = tempdir().expect("tempdir");
        let full = temp.path().join("full");
        let empty = temp.path().join("empty");
        fs::create_dir_all(&full).await.expect("mkdir");
        fs::create_dir_all(&empty).await.expect("mkdir");
        fs::write(full.join("keep.txt"), b"x").await.expect("write");

        remove_empty_dir(&full).await;
        remove_empty_dir(&empty).await;
        remove_empty_dir(&temp.path().join("missing")).await;

        assert!(exists(&full).await);
        assert!(!exists(&empty).await);
    }
}
