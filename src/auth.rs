//! Basic 认证中间件：API 与 WebDAV 共用同一份凭据。

use axum::extract::Extension;
use axum::http::Request;
use axum::{body::Body as AxumBody, middleware, response::Response};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Basic};
use std::sync::Arc;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// 认证中间件：校验 Basic 认证头。
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, CoreError> {
    if let Some(TypedHeader(header)) = auth_header
        && header.username() == auth.username
        && header.password() == auth.password
    {
        return Ok(next.run(req).await);
    }
    Err(CoreError::Unauthorized("credentials required".into()))
}
