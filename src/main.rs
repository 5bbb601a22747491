//! Matterbox server binary.
//!
//! This crate wires together the matter metadata engine, the quota ledger,
//! the reconciliation and trash sweeps and the WebDAV mount. The main entry
//! point builds every component with explicit constructor injection, builds
//! the Axum router and starts the HTTP listener.

mod api;
mod auth;
mod background;
mod bridge;
mod config;
mod dav;
mod db;
mod derivative;
mod disk;
mod engine;
mod error;
mod locking;
mod logging;
mod matter;
mod matter_store;
mod scan;
mod space;
mod space_store;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{any, get, post, put};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use dav_server::{DavHandler, fakels::FakeLs};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};
use uuid::Uuid;

use crate::api::BootContext;
use crate::auth::AuthConfig;
use crate::background::spawn_background_tasks;
use crate::bridge::BridgeStore;
use crate::config::{Args, WEBDAV_PREFIX};
use crate::dav::MatterFs;
use crate::derivative::DerivativeStore;
use crate::engine::MatterEngine;
use crate::error::CoreError;
use crate::locking::UserLockManager;
use crate::matter_store::MatterStore;
use crate::scan::Reconciler;
use crate::space::{SPACE_TYPE_PRIVATE, Space};
use crate::space_store::SpaceStore;

fn io_err(err: CoreError) -> std::io::Error {
    std::io::Error::other(err.to_string())
}

/// Starts the Matterbox server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage_root = PathBuf::from(&args.storage_dir);
    tokio::fs::create_dir_all(&storage_root).await?;

    let pool = db::connect(Path::new(&args.db_path)).await.map_err(io_err)?;
    db::ping(&pool).await.map_err(io_err)?;

    let derivatives = Arc::new(DerivativeStore::new(pool.clone(), storage_root.clone()));
    let bridges = BridgeStore::new(pool.clone());
    let matters = MatterStore::new(
        pool.clone(),
        storage_root.clone(),
        (*derivatives).clone(),
        bridges,
    );
    let spaces = SpaceStore::new(pool);
    let locks = Arc::new(UserLockManager::new());
    let engine = Arc::new(MatterEngine::new(
        matters.clone(),
        spaces.clone(),
        locks.clone(),
        storage_root.clone(),
        args.trash_retention_days,
    ));
    let reconciler = Arc::new(Reconciler::new(
        matters,
        spaces.clone(),
        locks,
        storage_root.clone(),
    ));

    let space = bootstrap_space(&spaces, &args, &storage_root).await?;
    let boot = Arc::new(BootContext {
        space_uuid: space.uuid.clone(),
        user_uuid: space.user_uuid.clone(),
    });
    let auth_config = Arc::new(AuthConfig {
        username: args.auth_user.clone(),
        password: args.auth_pass.clone(),
    });

    let dav_handler = Arc::new(
        DavHandler::builder()
            .strip_prefix(WEBDAV_PREFIX)
            .filesystem(MatterFs::new(
                engine.clone(),
                space.uuid.clone(),
                space.user_uuid.clone(),
            ))
            .locksystem(FakeLs::new())
            .build_handler(),
    );

    let app = Router::new()
        .route(WEBDAV_PREFIX, any(dav::webdav_handler))
        .route(
            &format!("{WEBDAV_PREFIX}/{{*path}}"),
            any(dav::webdav_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/matter/page", get(api::page_matters))
        .route("/api/matter/detail", get(api::matter_detail))
        .route("/api/matter/mkdir", post(api::create_directory))
        .route(
            "/api/matter/upload",
            put(api::upload_matter).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/matter/download", get(api::download_matter))
        .route("/api/matter/crawl", post(api::crawl_matter))
        .route("/api/matter/rename", post(api::rename_matter))
        .route("/api/matter/privacy", post(api::change_privacy))
        .route("/api/matter/move", post(api::move_matters))
        .route("/api/matter/soft-delete", post(api::soft_delete_matters))
        .route("/api/matter/recovery", post(api::recover_matters))
        .route("/api/matter/delete", post(api::delete_matters))
        .route("/api/matter/zip", get(api::zip_matters))
        .route("/api/matter/mirror", post(api::mirror_matters))
        .route("/api/trash/clean", post(api::clean_trash))
        .route("/api/scan", post(api::trigger_scan))
        .route("/api/space/detail", get(api::space_detail))
        .route("/api/space/edit", post(api::space_edit))
        .route("/api/derivative/detail", get(api::derivative_detail))
        .route(
            "/api/derivative/register",
            put(api::derivative_register).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/derivative/invalidate", post(api::derivative_invalidate))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(engine.clone()))
        .layer(Extension(reconciler.clone()))
        .layer(Extension(derivatives))
        .layer(Extension(auth_config))
        .layer(Extension(boot))
        .layer(Extension(dav_handler));

    spawn_background_tasks(engine, reconciler, args.scan_enabled);

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", addr);
    info!("📁 WebDAV mount at {}{}", addr, WEBDAV_PREFIX);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// Find or create the private space owned by the configured user, and make
/// sure its disk directories exist.
async fn bootstrap_space(
    spaces: &SpaceStore,
    args: &Args,
    storage_root: &Path,
) -> Result<Space, std::io::Error> {
    let space = match spaces.find_by_name(&args.auth_user).await.map_err(io_err)? {
        Some(existing) => existing,
        None => {
            let owner = Uuid::new_v4().to_string();
            info!(name = %args.auth_user, "bootstrapping private space");
            spaces
                .create(
                    &args.auth_user,
                    &owner,
                    SPACE_TYPE_PRIVATE,
                    args.space_size_limit,
                    args.space_total_limit,
                )
                .await
                .map_err(io_err)?
        }
    };
    for dir in [
        matter::space_matter_root_dir(storage_root, &space.name),
        matter::space_cache_root_dir(storage_root, &space.name),
        matter::space_zip_root_dir(storage_root, &space.name),
    ] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(space)
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
