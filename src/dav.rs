//! WebDAV adapter: exposes a space's matter tree as a DAV collection.
//!
//! Paths are resolved component-by-component by sibling name from the
//! space's virtual root; every write method is expressed purely in terms of
//! the atomic operations engine, never direct disk or DB access. Property
//! values come from a static live-prop table over `(space, matter)`.

use axum::extract::Extension;
use axum::http::Request;
use bytes::{Buf, Bytes};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, FsStream,
    OpenOptions, ReadDirMeta,
};
use dav_server::{DavHandler, body::Body as DavBody};
use futures_util::StreamExt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::config::UNLIMITED_QUOTA_BYTES;
use crate::engine::{ByteStream, MatterEngine};
use crate::error::CoreError;
use crate::matter::{self, Matter};
use crate::space::Space;

/// 代理 WebDAV 请求到 dav-server 处理器。
pub async fn webdav_handler(
    Extension(dav_handler): Extension<Arc<DavHandler>>,
    req: Request<axum::body::Body>,
) -> axum::http::Response<DavBody> {
    dav_handler.handle(req).await
}

// ---------------------------------------------------------------------
// Live properties
// ---------------------------------------------------------------------

/// One live DAV property: a pure function of `(space, matter)`. `find` is
/// None for properties we acknowledge but have no value for; looking up a
/// name with no table entry at all means "not applicable", never an error.
pub struct LiveProp {
    pub name: &'static str,
    /// Whether the property also applies to collections.
    pub dir: bool,
    pub find: Option<fn(&Space, &Matter) -> String>,
}

pub static LIVE_PROPS: &[LiveProp] = &[
    LiveProp {
        name: "resourcetype",
        dir: true,
        find: Some(|_, matter| {
            if matter.dir {
                r#"<D:collection xmlns:D="DAV:"/>"#.to_string()
            } else {
                String::new()
            }
        }),
    },
    LiveProp {
        name: "displayname",
        dir: true,
        find: Some(|_, matter| {
            if matter.is_root() {
                String::new()
            } else {
                escape_xml(&matter.name)
            }
        }),
    },
    LiveProp {
        name: "getcontentlength",
        dir: false,
        find: Some(|_, matter| matter.size.to_string()),
    },
    LiveProp {
        // Some clients sort child collections by getlastmodified, so the
        // property applies to directories too.
        name: "getlastmodified",
        dir: true,
        find: Some(|_, matter| httpdate::fmt_http_date(SystemTime::from(matter.update_time))),
    },
    LiveProp {
        name: "creationdate",
        dir: false,
        find: None,
    },
    LiveProp {
        name: "getcontentlanguage",
        dir: false,
        find: None,
    },
    LiveProp {
        name: "getcontenttype",
        dir: false,
        find: Some(|_, matter| {
            if matter.dir {
                String::new()
            } else {
                matter.mime_type()
            }
        }),
    },
    LiveProp {
        // Concatenated hex of update time and size. Not advertised for
        // collections, where it is no reliable synchronization signal.
        name: "getetag",
        dir: false,
        find: Some(|_, matter| match etag_of(matter) {
            Some(etag) => format!("\"{etag}\""),
            None => String::new(),
        }),
    },
    LiveProp {
        name: "lockdiscovery",
        dir: false,
        find: None,
    },
    LiveProp {
        // Static capability; there is no real lock manager behind it.
        name: "supportedlock",
        dir: true,
        find: Some(|_, _| {
            concat!(
                r#"<D:lockentry xmlns:D="DAV:">"#,
                "<D:lockscope><D:exclusive/></D:lockscope>",
                "<D:locktype><D:write/></D:locktype>",
                "</D:lockentry>"
            )
            .to_string()
        }),
    },
    LiveProp {
        name: "quota-available-bytes",
        dir: true,
        find: Some(|space, _| {
            let available = space
                .available_bytes()
                .unwrap_or(UNLIMITED_QUOTA_BYTES);
            available.to_string()
        }),
    },
    LiveProp {
        name: "quota-used-bytes",
        dir: true,
        find: Some(|space, _| space.total_size.to_string()),
    },
];

pub fn find_live_prop(name: &str) -> Option<&'static LiveProp> {
    LIVE_PROPS.iter().find(|prop| prop.name == name)
}

/// Hex of update-time nanoseconds and size; directories carry no etag.
pub fn etag_of(matter: &Matter) -> Option<String> {
    if matter.dir {
        return None;
    }
    let nanos = matter.update_time.timestamp_nanos_opt().unwrap_or_default();
    Some(format!("{:x}{:x}", nanos, matter.size))
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------
// Filesystem adapter
// ---------------------------------------------------------------------

#[derive(Clone)]
pub struct MatterFs {
    engine: Arc<MatterEngine>,
    space_uuid: String,
    user_uuid: String,
}

impl std::fmt::Debug for MatterFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatterFs")
            .field("space_uuid", &self.space_uuid)
            .finish()
    }
}

impl MatterFs {
    pub fn new(engine: Arc<MatterEngine>, space_uuid: String, user_uuid: String) -> Box<MatterFs> {
        Box::new(MatterFs {
            engine,
            space_uuid,
            user_uuid,
        })
    }

    async fn space(&self) -> FsResult<Space> {
        self.engine
            .spaces()
            .check_by_uuid(&self.space_uuid)
            .await
            .map_err(fs_err)
    }

    /// Walk `sub` from the virtual root by sibling name. The empty path is
    /// the root itself.
    async fn resolve(&self, space: &Space, sub: &[String]) -> FsResult<Matter> {
        let mut current = Matter::root_of(space);
        for name in sub {
            if !current.dir {
                return Err(FsError::NotFound);
            }
            current = self
                .engine
                .matters()
                .find_child_by_name(&space.uuid, &current.uuid, name)
                .await
                .map_err(fs_err)?
                .ok_or(FsError::NotFound)?;
        }
        Ok(current)
    }

    async fn resolve_path(&self, path: &DavPath) -> FsResult<(Space, Matter)> {
        let space = self.space().await?;
        let segments = segments_of(path)?;
        let matter = self.resolve(&space, &segments).await?;
        Ok((space, matter))
    }
}

fn segments_of(path: &DavPath) -> FsResult<Vec<String>> {
    let rel = path.as_rel_ospath();
    let mut out = Vec::new();
    for component in rel.components() {
        match component {
            std::path::Component::Normal(segment) => {
                out.push(segment.to_str().ok_or(FsError::GeneralFailure)?.to_string());
            }
            std::path::Component::CurDir => continue,
            _ => return Err(FsError::Forbidden),
        }
    }
    Ok(out)
}

fn fs_err(err: CoreError) -> FsError {
    match err {
        CoreError::NotFound(_) => FsError::NotFound,
        CoreError::Conflict(_) => FsError::Exists,
        CoreError::Unauthorized(_) => FsError::Forbidden,
        CoreError::BadRequest(_) => FsError::Forbidden,
        CoreError::QuotaExceeded(_) | CoreError::FileTooLarge(_) => FsError::InsufficientStorage,
        _ => FsError::GeneralFailure,
    }
}

#[derive(Debug, Clone)]
struct MatterMeta {
    len: u64,
    modified: SystemTime,
    created: SystemTime,
    dir: bool,
    etag: Option<String>,
}

impl MatterMeta {
    fn of(matter: &Matter) -> MatterMeta {
        MatterMeta {
            len: matter.size.max(0) as u64,
            modified: SystemTime::from(matter.update_time),
            created: SystemTime::from(matter.create_time),
            dir: matter.dir,
            etag: etag_of(matter),
        }
    }
}

impl DavMetaData for MatterMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.dir
    }

    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.created)
    }

    fn etag(&self) -> Option<String> {
        self.etag.clone()
    }
}

struct MatterDirEntry {
    name: String,
    meta: MatterMeta,
}

impl DavDirEntry for MatterDirEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}

/// GET streams straight from disk; PUT spools to a staging file and commits
/// through the engine's upload path on flush, so quota and overwrite
/// semantics are identical to a REST upload.
enum FileState {
    Read {
        matter: Matter,
        file: File,
    },
    Write {
        engine: Arc<MatterEngine>,
        space: Space,
        user_uuid: String,
        parent_uuid: String,
        name: String,
        temp: PathBuf,
        file: Option<File>,
        written: u64,
        stored: Option<Matter>,
    },
}

struct MatterDavFile {
    state: FileState,
}

impl std::fmt::Debug for MatterDavFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            FileState::Read { matter, .. } => {
                f.debug_struct("MatterDavFile").field("read", &matter.path).finish()
            }
            FileState::Write { name, .. } => {
                f.debug_struct("MatterDavFile").field("write", name).finish()
            }
        }
    }
}

impl DavFile for MatterDavFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            match &self.state {
                FileState::Read { matter, .. } => {
                    Ok(Box::new(MatterMeta::of(matter)) as Box<dyn DavMetaData>)
                }
                FileState::Write {
                    stored, written, ..
                } => match stored {
                    Some(matter) => Ok(Box::new(MatterMeta::of(matter)) as Box<dyn DavMetaData>),
                    None => Ok(Box::new(MatterMeta {
                        len: *written,
                        modified: SystemTime::now(),
                        created: SystemTime::now(),
                        dir: false,
                        etag: None,
                    }) as Box<dyn DavMetaData>),
                },
            }
        })
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let FileState::Write { file, written, .. } = &mut self.state else {
                return Err(FsError::Forbidden);
            };
            let Some(file) = file.as_mut() else {
                return Err(FsError::GeneralFailure);
            };
            while buf.has_remaining() {
                let advanced = {
                    let chunk = buf.chunk();
                    file.write_all(chunk)
                        .await
                        .map_err(|_| FsError::GeneralFailure)?;
                    chunk.len()
                };
                *written += advanced as u64;
                buf.advance(advanced);
            }
            Ok(())
        })
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let FileState::Write { file, written, .. } = &mut self.state else {
                return Err(FsError::Forbidden);
            };
            let Some(file) = file.as_mut() else {
                return Err(FsError::GeneralFailure);
            };
            file.write_all(&buf).await.map_err(|_| FsError::GeneralFailure)?;
            *written += buf.len() as u64;
            Ok(())
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            let FileState::Read { file, .. } = &mut self.state else {
                return Err(FsError::Forbidden);
            };
            let mut buf = vec![0u8; count];
            let read = file.read(&mut buf).await.map_err(|_| FsError::GeneralFailure)?;
            buf.truncate(read);
            Ok(Bytes::from(buf))
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let FileState::Read { file, .. } = &mut self.state else {
                return Err(FsError::Forbidden);
            };
            file.seek(pos).await.map_err(|_| FsError::GeneralFailure)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let FileState::Write {
                engine,
                space,
                user_uuid,
                parent_uuid,
                name,
                temp,
                file,
                stored,
                ..
            } = &mut self.state
            else {
                return Ok(());
            };
            if stored.is_some() {
                return Ok(());
            }
            let Some(mut spool) = file.take() else {
                return Err(FsError::GeneralFailure);
            };
            spool.sync_all().await.map_err(|_| FsError::GeneralFailure)?;
            drop(spool);

            let source = File::open(&*temp).await.map_err(|_| FsError::GeneralFailure)?;
            let stream: ByteStream =
                Box::new(ReaderStream::new(source).map(|chunk| chunk.map_err(CoreError::from)));
            let result = engine
                .upload(user_uuid, space, parent_uuid, name, true, stream)
                .await;
            let _ = tokio::fs::remove_file(&*temp).await;
            match result {
                Ok(matter) => {
                    *stored = Some(matter);
                    Ok(())
                }
                Err(err) => Err(fs_err(err)),
            }
        })
    }
}

impl DavFileSystem for MatterFs {
    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let space = self.space().await?;
            let segments = segments_of(path)?;

            if options.write || options.create || options.create_new || options.truncate {
                if options.append {
                    return Err(FsError::NotImplemented);
                }
                let Some((name, parents)) = segments.split_last() else {
                    return Err(FsError::Forbidden);
                };
                matter::check_matter_name(name).map_err(|_| FsError::Forbidden)?;
                let parent = self.resolve(&space, parents).await?;
                if !parent.dir {
                    return Err(FsError::NotFound);
                }
                let existing = self
                    .engine
                    .matters()
                    .find_child_by_name(&space.uuid, &parent.uuid, name)
                    .await
                    .map_err(fs_err)?;
                if let Some(found) = &existing {
                    if found.dir {
                        return Err(FsError::Forbidden);
                    }
                    if options.create_new {
                        return Err(FsError::Exists);
                    }
                }

                let staging_dir =
                    matter::space_zip_root_dir(self.engine.storage_root(), &space.name);
                tokio::fs::create_dir_all(&staging_dir)
                    .await
                    .map_err(|_| FsError::GeneralFailure)?;
                let temp = staging_dir.join(format!(".dav-put.{}", Uuid::new_v4()));
                let file = File::create(&temp)
                    .await
                    .map_err(|_| FsError::GeneralFailure)?;
                return Ok(Box::new(MatterDavFile {
                    state: FileState::Write {
                        engine: self.engine.clone(),
                        space,
                        user_uuid: self.user_uuid.clone(),
                        parent_uuid: parent.uuid,
                        name: name.clone(),
                        temp,
                        file: Some(file),
                        written: 0,
                        stored: None,
                    },
                }) as Box<dyn DavFile>);
            }

            let matter = self.resolve(&space, &segments).await?;
            if matter.dir {
                return Err(FsError::Forbidden);
            }
            let file = File::open(matter.absolute_path(self.engine.storage_root()))
                .await
                .map_err(|_| FsError::NotFound)?;
            self.engine.record_download(&matter.uuid);
            Ok(Box::new(MatterDavFile {
                state: FileState::Read { matter, file },
            }) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let (space, matter) = self.resolve_path(path).await?;
            if !matter.dir {
                return Err(FsError::Forbidden);
            }
            let children = self
                .engine
                .matters()
                .children_all(&space.uuid, &matter.uuid)
                .await
                .map_err(fs_err)?;
            let entries: Vec<FsResult<Box<dyn DavDirEntry>>> = children
                .into_iter()
                .filter(|child| !child.deleted)
                .map(|child| {
                    Ok(Box::new(MatterDirEntry {
                        name: child.name.clone(),
                        meta: MatterMeta::of(&child),
                    }) as Box<dyn DavDirEntry>)
                })
                .collect();
            let stream = futures_util::stream::iter(entries);
            Ok(Box::pin(stream) as FsStream<Box<dyn DavDirEntry>>)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let (_, matter) = self.resolve_path(path).await?;
            Ok(Box::new(MatterMeta::of(&matter)) as Box<dyn DavMetaData>)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let space = self.space().await?;
            let segments = segments_of(path)?;
            let Some((name, parents)) = segments.split_last() else {
                return Err(FsError::Exists);
            };
            let parent = self.resolve(&space, parents).await?;
            self.engine
                .create_directory(&self.user_uuid, &space, &parent.uuid, name)
                .await
                .map_err(fs_err)?;
            Ok(())
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (space, matter) = self.resolve_path(path).await?;
            if !matter.dir || matter.is_root() {
                return Err(FsError::Forbidden);
            }
            self.engine
                .delete(&self.user_uuid, &space, &matter.uuid)
                .await
                .map_err(fs_err)
        })
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let (space, matter) = self.resolve_path(path).await?;
            if matter.dir {
                return Err(FsError::Forbidden);
            }
            self.engine
                .delete(&self.user_uuid, &space, &matter.uuid)
                .await
                .map_err(fs_err)
        })
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let space = self.space().await?;
            let from_segments = segments_of(from)?;
            let to_segments = segments_of(to)?;
            let source = self.resolve(&space, &from_segments).await?;
            if source.is_root() {
                return Err(FsError::Forbidden);
            }
            let Some((to_name, to_parents)) = to_segments.split_last() else {
                return Err(FsError::Forbidden);
            };
            let dest_parent = self.resolve(&space, to_parents).await?;
            if self
                .engine
                .matters()
                .find_child_by_name(&space.uuid, &dest_parent.uuid, to_name)
                .await
                .map_err(fs_err)?
                .is_some()
            {
                return Err(FsError::Exists);
            }

            if source.puuid != dest_parent.uuid {
                self.engine
                    .move_batch(
                        &self.user_uuid,
                        &space,
                        &[source.uuid.clone()],
                        &dest_parent.uuid,
                    )
                    .await
                    .map_err(fs_err)?;
            }
            if source.name != *to_name {
                self.engine
                    .rename(&self.user_uuid, &space, &source.uuid, to_name)
                    .await
                    .map_err(fs_err)?;
            }
            Ok(())
        })
    }

    fn get_quota<'a>(&'a self) -> FsFuture<'a, (u64, Option<u64>)> {
        Box::pin(async move {
            let space = self.space().await?;
            let used = space.total_size.max(0) as u64;
            let available = space
                .available_bytes()
                .unwrap_or(UNLIMITED_QUOTA_BYTES)
                .max(0) as u64;
            Ok((used, Some(available)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeStore;
    use crate::db;
    use crate::derivative::DerivativeStore;
    use crate::locking::UserLockManager;
    use crate::matter_store::MatterStore;
    use crate::space::SPACE_TYPE_PRIVATE;
    use crate::space_store::SpaceStore;
    use chrono::TimeZone;
    use tempfile::{TempDir, tempdir};

    async fn fixture() -> (TempDir, MatterFs, Space) {
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
            .create("alice", "u1", SPACE_TYPE_PRIVATE, -1, -1)
            .await
            .expect("space");
        tokio::fs::create_dir_all(crate::matter::space_matter_root_dir(temp.path(), &space.name))
            .await
            .expect("space root");
        let engine = Arc::new(MatterEngine::new(
            matters,
            spaces,
            Arc::new(UserLockManager::new()),
            root,
            7,
        ));
        let fs = MatterFs {
            engine,
            space_uuid: space.uuid.clone(),
            user_uuid: "u1".to_string(),
        };
        (temp, fs, space)
    }

    fn one_byte_stream() -> ByteStream {
        Box::new(futures_util::stream::iter(vec![Ok(Bytes::from_static(
            b"x",
        ))]))
    }

    #[tokio::test]
    async fn resolution_walks_components_and_hides_trash() {
        let (_temp, fs, space) = fixture().await;
        let docs = fs
            .engine
            .create_directory("u1", &space, crate::matter::MATTER_ROOT, "docs")
            .await
            .expect("docs");
        let report = fs
            .engine
            .upload("u1", &space, &docs.uuid, "report.pdf", true, one_byte_stream())
            .await
            .expect("upload");

        // Empty path is the virtual root.
        let root = fs.resolve(&space, &[]).await.expect("root");
        assert!(root.is_root());

        let found = fs
            .resolve(&space, &["docs".to_string(), "report.pdf".to_string()])
            .await
            .expect("resolve file");
        assert_eq!(found.uuid, report.uuid);

        assert!(matches!(
            fs.resolve(&space, &["missing".to_string()]).await,
            Err(FsError::NotFound)
        ));

        // Soft-deleted entries disappear from DAV resolution.
        fs.engine
            .soft_delete("u1", &space, &report.uuid)
            .await
            .expect("trash");
        assert!(matches!(
            fs.resolve(&space, &["docs".to_string(), "report.pdf".to_string()])
                .await,
            Err(FsError::NotFound)
        ));
    }

    fn sample(space: &Space) -> Matter {
        let mut matter = Matter::root_of(space);
        matter.uuid = "m1".to_string();
        matter.dir = false;
        matter.name = "report.pdf".to_string();
        matter.path = "/report.pdf".to_string();
        matter.size = 1234;
        matter.update_time = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        matter
    }

    #[test]
    fn etag_tracks_update_time_and_size_only() {
        let space = Space::new_for_test("alice");
        let mut matter = sample(&space);
        let original = etag_of(&matter).expect("file etag");

        // A pure rename leaves both inputs alone.
        matter.name = "renamed.pdf".to_string();
        assert_eq!(etag_of(&matter).expect("etag"), original);

        let mut resized = matter.clone();
        resized.size += 1;
        assert_ne!(etag_of(&resized).expect("etag"), original);

        let mut touched = matter.clone();
        touched.update_time += chrono::Duration::seconds(1);
        assert_ne!(etag_of(&touched).expect("etag"), original);

        // Directories do not advertise an etag.
        let mut dir = matter.clone();
        dir.dir = true;
        assert!(etag_of(&dir).is_none());
    }

    #[test]
    fn unknown_props_are_not_errors() {
        assert!(find_live_prop("no-such-prop").is_none());
        // Known-but-valueless entries answer empty, not an error.
        let lockdiscovery = find_live_prop("lockdiscovery").expect("entry");
        assert!(lockdiscovery.find.is_none());
    }

    #[test]
    fn quota_props_use_unlimited_sentinel() {
        let mut space = Space::new_for_test("alice");
        space.total_size = 42;
        let root = Matter::root_of(&space);

        let used = find_live_prop("quota-used-bytes")
            .and_then(|p| p.find)
            .expect("fn")(&space, &root);
        assert_eq!(used, "42");

        let available_fn = find_live_prop("quota-available-bytes")
            .and_then(|p| p.find)
            .expect("fn");
        assert_eq!(available_fn(&space, &root), UNLIMITED_QUOTA_BYTES.to_string());

        space.total_size_limit = 100;
        assert_eq!(available_fn(&space, &root), "58");
        space.total_size = 200;
        assert_eq!(available_fn(&space, &root), "0");
    }

    #[test]
    fn displayname_is_escaped_and_empty_for_root() {
        let space = Space::new_for_test("alice");
        let display = find_live_prop("displayname").and_then(|p| p.find).expect("fn");
        assert_eq!(display(&space, &Matter::root_of(&space)), "");

        let mut matter = sample(&space);
        matter.name = "a<b>&c.txt".to_string();
        assert_eq!(display(&space, &matter), "a&lt;b&gt;&amp;c.txt");
    }

    #[test]
    fn resourcetype_marks_collections_only() {
        let space = Space::new_for_test("alice");
        let resourcetype = find_live_prop("resourcetype").and_then(|p| p.find).expect("fn");
        assert_eq!(
            resourcetype(&space, &Matter::root_of(&space)),
            r#"<D:collection xmlns:D="DAV:"/>"#
        );
        assert_eq!(resourcetype(&space, &sample(&space)), "");
    }
}
