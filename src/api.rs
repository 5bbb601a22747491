//! 文件树的 REST 接口：每个处理器只是引擎操作的薄封装。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Json, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::engine::{ByteStream, MatterEngine};
use crate::error::{CoreError, CoreResult};
use crate::matter::Matter;
use crate::matter_store::{MatterFilter, OrderPair, SortDirection, SortKey, default_order};
use crate::scan::Reconciler;
use crate::space::Space;

/// The space and user bootstrapped at startup; requests may override the
/// space explicitly.
#[derive(Debug, Clone)]
pub struct BootContext {
    pub space_uuid: String,
    pub user_uuid: String,
}

async fn resolve_space(
    engine: &MatterEngine,
    boot: &BootContext,
    space_uuid: Option<&str>,
) -> CoreResult<Space> {
    let uuid = space_uuid.unwrap_or(&boot.space_uuid);
    engine.spaces().check_by_uuid(uuid).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pager {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub data: Vec<Matter>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageQuery {
    space_uuid: Option<String>,
    puuid: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
    deleted: Option<bool>,
    dir: Option<bool>,
    name: Option<String>,
    /// Comma-separated extension allow-list.
    extensions: Option<String>,
    order_by: Option<String>,
    desc: Option<bool>,
}

/// 分页列出文件与目录。
pub async fn page_matters(
    Query(query): Query<PageQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
) -> Result<JsonResponse<Pager>, CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    let filter = MatterFilter {
        puuid: query.puuid.clone(),
        space_uuid: Some(space.uuid.clone()),
        deleted: query.deleted,
        dir: query.dir,
        name: query.name.clone(),
        extensions: query.extensions.as_deref().map(|raw| {
            raw.split(',')
                .map(|ext| ext.trim().to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect()
        }),
        ..Default::default()
    };
    let orders = match query.order_by.as_deref() {
        None => default_order(),
        Some(raw) => {
            let key = match raw {
                "name" => SortKey::Name,
                "size" => SortKey::Size,
                "times" => SortKey::Times,
                "create_time" => SortKey::CreateTime,
                "update_time" => SortKey::UpdateTime,
                other => {
                    return Err(CoreError::bad_request(format!(
                        "unsupported sort key: {other}"
                    )));
                }
            };
            vec![OrderPair {
                key,
                direction: if query.desc.unwrap_or(false) {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                },
            }]
        }
    };
    let page = query.page.unwrap_or(0).max(0);
    let page_size = query.page_size.unwrap_or(200).clamp(1, 1000);
    let (total, data) = engine.matters().page(&filter, &orders, page, page_size).await?;
    Ok(JsonResponse(Pager {
        page,
        page_size,
        total,
        data,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UuidQuery {
    uuid: String,
    space_uuid: Option<String>,
}

pub async fn matter_detail(
    Query(query): Query<UuidQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
) -> Result<JsonResponse<Matter>, CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    let mut matter = engine.matters().check_by_uuid(&query.uuid).await?;
    if matter.space_uuid != space.uuid {
        return Err(CoreError::Unauthorized("matter is in another space".into()));
    }
    // Directory sizes are never stored; sum the children on demand.
    if matter.dir {
        matter.size = engine
            .matters()
            .sum_size_by_puuid(&space.uuid, &matter.uuid)
            .await?;
    }
    Ok(JsonResponse(matter))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MkdirBody {
    puuid: String,
    name: String,
    space_uuid: Option<String>,
}

pub async fn create_directory(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<MkdirBody>,
) -> Result<(StatusCode, JsonResponse<Matter>), CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    let created = engine
        .create_directory(&boot.user_uuid, &space, &body.puuid, &body.name)
        .await?;
    Ok((StatusCode::CREATED, JsonResponse(created)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadQuery {
    puuid: String,
    filename: String,
    privacy: Option<bool>,
    space_uuid: Option<String>,
}

/// 上传文件：请求体即文件内容。
pub async fn upload_matter(
    Query(query): Query<UploadQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    body: AxumBody,
) -> Result<(StatusCode, JsonResponse<Matter>), CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    let stream: ByteStream = Box::new(
        BodyExt::into_data_stream(body)
            .map(|chunk| chunk.map_err(|err| CoreError::Io(std::io::Error::other(err)))),
    );
    let stored = engine
        .upload(
            &boot.user_uuid,
            &space,
            &query.puuid,
            &query.filename,
            query.privacy.unwrap_or(true),
            stream,
        )
        .await?;
    Ok((StatusCode::CREATED, JsonResponse(stored)))
}

/// 下载文件内容。
pub async fn download_matter(
    Query(query): Query<UuidQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
) -> Result<Response, CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    let matter = engine.matters().check_by_uuid(&query.uuid).await?;
    if matter.space_uuid != space.uuid {
        return Err(CoreError::Unauthorized("matter is in another space".into()));
    }
    if matter.dir {
        return Err(CoreError::bad_request("matter is a directory"));
    }
    let file = File::open(matter.absolute_path(engine.storage_root())).await?;
    engine.record_download(&matter.uuid);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&matter.mime_type())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(length) = HeaderValue::from_str(&matter.size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, length);
    }
    info!(path = %matter.path, size = matter.size, "download file");
    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CrawlBody {
    url: String,
    filename: String,
    puuid: Option<String>,
    dest_path: Option<String>,
    privacy: Option<bool>,
    space_uuid: Option<String>,
}

pub async fn crawl_matter(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<CrawlBody>,
) -> Result<JsonResponse<Matter>, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    let stored = engine
        .crawl(
            &boot.user_uuid,
            &space,
            &body.url,
            body.puuid.as_deref(),
            body.dest_path.as_deref(),
            &body.filename,
            body.privacy.unwrap_or(true),
        )
        .await?;
    Ok(JsonResponse(stored))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenameBody {
    uuid: String,
    name: String,
    space_uuid: Option<String>,
}

pub async fn rename_matter(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<RenameBody>,
) -> Result<JsonResponse<Matter>, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    let renamed = engine
        .rename(&boot.user_uuid, &space, &body.uuid, &body.name)
        .await?;
    Ok(JsonResponse(renamed))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrivacyBody {
    uuid: String,
    privacy: bool,
    space_uuid: Option<String>,
}

pub async fn change_privacy(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<PrivacyBody>,
) -> Result<StatusCode, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    engine
        .change_privacy(&boot.user_uuid, &space, &body.uuid, body.privacy)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MoveBody {
    src_uuids: Vec<String>,
    dest_uuid: String,
    space_uuid: Option<String>,
}

pub async fn move_matters(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<MoveBody>,
) -> Result<StatusCode, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    engine
        .move_batch(&boot.user_uuid, &space, &body.src_uuids, &body.dest_uuid)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UuidsBody {
    uuids: Vec<String>,
    space_uuid: Option<String>,
}

/// 批量放入回收站。不存在的记录跳过，跨空间的记录拒绝。
pub async fn soft_delete_matters(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<UuidsBody>,
) -> Result<StatusCode, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    for uuid in &body.uuids {
        if engine.matters().find_by_uuid(uuid).await?.is_none() {
            warn!(uuid, "matter no longer exists, skipping");
            continue;
        }
        engine.soft_delete(&boot.user_uuid, &space, uuid).await?;
    }
    Ok(StatusCode::OK)
}

pub async fn recover_matters(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<UuidsBody>,
) -> Result<StatusCode, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    for uuid in &body.uuids {
        if engine.matters().find_by_uuid(uuid).await?.is_none() {
            warn!(uuid, "matter no longer exists, skipping");
            continue;
        }
        engine.recover(&boot.user_uuid, &space, uuid).await?;
    }
    Ok(StatusCode::OK)
}

/// 彻底删除（级联）。
pub async fn delete_matters(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<UuidsBody>,
) -> Result<StatusCode, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    for uuid in &body.uuids {
        if engine.matters().find_by_uuid(uuid).await?.is_none() {
            warn!(uuid, "matter no longer exists, skipping");
            continue;
        }
        engine.delete(&boot.user_uuid, &space, uuid).await?;
    }
    Ok(StatusCode::OK)
}

/// 手动触发回收站过期清理。
pub async fn clean_trash(
    Extension(engine): Extension<Arc<MatterEngine>>,
) -> Result<JsonResponse<serde_json::Value>, CoreError> {
    let purged = engine.clean_expired_deleted_matters().await?;
    Ok(JsonResponse(serde_json::json!({ "purged": purged })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MirrorBody {
    src_path: String,
    dest_path: String,
    overwrite: Option<bool>,
    space_uuid: Option<String>,
}

pub async fn mirror_matters(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<MirrorBody>,
) -> Result<StatusCode, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    engine
        .mirror(
            &boot.user_uuid,
            &space,
            &body.src_path,
            &body.dest_path,
            body.overwrite.unwrap_or(false),
        )
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ZipQuery {
    /// Comma-separated matter uuids sharing one parent.
    uuids: String,
    space_uuid: Option<String>,
}

/// 打包下载：所有成员必须属于同一空间且共享同一父目录。
pub async fn zip_matters(
    Query(query): Query<ZipQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
) -> Result<Response, CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    let uuids: Vec<String> = query
        .uuids
        .split(',')
        .map(|uuid| uuid.trim().to_string())
        .filter(|uuid| !uuid.is_empty())
        .collect();
    if uuids.is_empty() {
        return Err(CoreError::bad_request("uuids cannot be empty"));
    }

    let mut shared_parent: Option<String> = None;
    for uuid in &uuids {
        let matter = engine.matters().check_by_uuid(uuid).await?;
        if matter.space_uuid != space.uuid {
            return Err(CoreError::Unauthorized("matter is in another space".into()));
        }
        if matter.deleted {
            return Err(CoreError::bad_request("matter is in the trash"));
        }
        match &shared_parent {
            None => shared_parent = Some(matter.puuid.clone()),
            Some(parent) if *parent == matter.puuid => {}
            Some(_) => {
                return Err(CoreError::bad_request(
                    "matters must share a single parent",
                ));
            }
        }
    }

    let staged = engine.stage_zip(&space, &uuids).await?;
    let file = File::open(&staged).await?;
    // The staging file is unlinked while the open handle streams it out.
    if let Err(err) = tokio::fs::remove_file(&staged).await {
        warn!(path = %staged.display(), error = %err, "cannot remove staged zip");
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"matterbox.zip\""),
    );
    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScanBody {
    space_name: Option<String>,
}

/// 手动触发磁盘对账。
pub async fn trigger_scan(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(reconciler): Extension<Arc<Reconciler>>,
    Json(body): Json<ScanBody>,
) -> Result<JsonResponse<serde_json::Value>, CoreError> {
    let stats = match &body.space_name {
        None => reconciler.reconcile_all().await?,
        Some(name) => {
            let space = engine
                .spaces()
                .find_by_name(name)
                .await?
                .ok_or_else(|| CoreError::not_found(format!("no space named {name}")))?;
            reconciler.reconcile_space(&space).await?
        }
    };
    Ok(JsonResponse(serde_json::json!({
        "removedRows": stats.removed_rows,
        "adoptedDirs": stats.adopted_dirs,
        "adoptedFiles": stats.adopted_files,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpaceQuery {
    space_uuid: Option<String>,
}

pub async fn space_detail(
    Query(query): Query<SpaceQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
) -> Result<JsonResponse<Space>, CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    Ok(JsonResponse(space))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpaceEditBody {
    size_limit: i64,
    total_size_limit: i64,
    space_uuid: Option<String>,
}

pub async fn space_edit(
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(boot): Extension<Arc<BootContext>>,
    Json(body): Json<SpaceEditBody>,
) -> Result<JsonResponse<Space>, CoreError> {
    let space = resolve_space(&engine, &boot, body.space_uuid.as_deref()).await?;
    let edited = engine
        .spaces()
        .edit_limits(&space.uuid, body.size_limit, body.total_size_limit)
        .await?;
    Ok(JsonResponse(edited))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DerivativeQuery {
    matter_uuid: String,
    mode: String,
    width: u32,
    height: u32,
    space_uuid: Option<String>,
}

impl DerivativeQuery {
    fn signature(&self) -> CoreResult<crate::derivative::TransformSignature> {
        Ok(crate::derivative::TransformSignature {
            mode: self.mode.parse()?,
            width: self.width,
            height: self.height,
        })
    }
}

/// 查询派生缓存；未命中返回 404，由外部图像处理方生成后再注册。
pub async fn derivative_detail(
    Query(query): Query<DerivativeQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(derivatives): Extension<Arc<crate::derivative::DerivativeStore>>,
    Extension(boot): Extension<Arc<BootContext>>,
) -> Result<JsonResponse<crate::derivative::Derivative>, CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    let matter = engine.matters().check_by_uuid(&query.matter_uuid).await?;
    if matter.space_uuid != space.uuid {
        return Err(CoreError::Unauthorized("matter is in another space".into()));
    }
    let signature = query.signature()?;
    let cached = derivatives
        .get(&matter.uuid, &signature)
        .await?
        .ok_or_else(|| {
            CoreError::not_found(format!(
                "no derivative {} for matter {}",
                signature.canonical(),
                matter.uuid
            ))
        })?;
    Ok(JsonResponse(cached))
}

/// 注册外部生成的派生文件：请求体即生成内容。
pub async fn derivative_register(
    Query(query): Query<DerivativeQuery>,
    Extension(engine): Extension<Arc<MatterEngine>>,
    Extension(derivatives): Extension<Arc<crate::derivative::DerivativeStore>>,
    Extension(boot): Extension<Arc<BootContext>>,
    body: AxumBody,
) -> Result<(StatusCode, JsonResponse<crate::derivative::Derivative>), CoreError> {
    let space = resolve_space(&engine, &boot, query.space_uuid.as_deref()).await?;
    let matter = engine.matters().check_by_uuid(&query.matter_uuid).await?;
    if matter.space_uuid != space.uuid {
        return Err(CoreError::Unauthorized("matter is in another space".into()));
    }
    if matter.dir {
        return Err(CoreError::bad_request("directories have no derivatives"));
    }
    let signature = query.signature()?;
    if let Some(existing) = derivatives.get(&matter.uuid, &signature).await? {
        return Ok((StatusCode::OK, JsonResponse(existing)));
    }

    let disk_path = derivatives.derivative_disk_path(&matter, &signature);
    if let Some(parent) = disk_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = BodyExt::collect(body)
        .await
        .map_err(|err| CoreError::Io(std::io::Error::other(err)))?
        .to_bytes();
    tokio::fs::write(&disk_path, &content).await?;
    let entry = derivatives
        .put(&matter, &signature, &disk_path, content.len() as i64)
        .await?;
    info!(matter = %matter.uuid, signature = %entry.signature, "registered derivative");
    Ok((StatusCode::CREATED, JsonResponse(entry)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InvalidateBody {
    matter_uuid: String,
}

pub async fn derivative_invalidate(
    Extension(derivatives): Extension<Arc<crate::derivative::DerivativeStore>>,
    Json(body): Json<InvalidateBody>,
) -> Result<StatusCode, CoreError> {
    derivatives.invalidate(&body.matter_uuid).await?;
    Ok(StatusCode::OK)
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
    use tempfile::tempdir;

    async fn handler_fixture() -> (
        tempfile::TempDir,
        Extension<Arc<MatterEngine>>,
        Extension<Arc<BootContext>>,
    ) {
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
        let boot = Arc::new(BootContext {
            space_uuid: space.uuid.clone(),
            user_uuid: "u1".to_string(),
        });
        (temp, Extension(engine), Extension(boot))
    }

    #[tokio::test]
    async fn mkdir_then_page_lists_the_directory() {
        let (_temp, engine, boot) = handler_fixture().await;
        create_directory(
            engine.clone(),
            boot.clone(),
            Json(MkdirBody {
                puuid: crate::matter::MATTER_ROOT.to_string(),
                name: "docs".to_string(),
                space_uuid: None,
            }),
        )
        .await
        .expect("mkdir");

        let JsonResponse(pager) = page_matters(
            Query(PageQuery {
                space_uuid: None,
                puuid: Some(crate::matter::MATTER_ROOT.to_string()),
                page: None,
                page_size: None,
                deleted: Some(false),
                dir: None,
                name: None,
                extensions: None,
                order_by: None,
                desc: None,
            }),
            engine.clone(),
            boot.clone(),
        )
        .await
        .expect("page");
        assert_eq!(pager.total, 1);
        assert_eq!(pager.data[0].name, "docs");
        assert!(pager.data[0].dir);

        // Unsupported sort keys are rejected, not silently interpolated.
        let err = page_matters(
            Query(PageQuery {
                space_uuid: None,
                puuid: None,
                page: None,
                page_size: None,
                deleted: None,
                dir: None,
                name: None,
                extensions: None,
                order_by: Some("uuid; DROP TABLE matter".to_string()),
                desc: None,
            }),
            engine,
            boot,
        )
        .await
        .expect_err("bad sort key");
        assert!(matches!(err, CoreError::BadRequest(_)));
    }
}
