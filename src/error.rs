//! 统一的核心错误类型与 HTTP 状态映射。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Failure taxonomy for the metadata engine. Callers can tell retryable
/// conditions (lock contention, transient IO) from terminal ones.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("file too large: {0}")]
    FileTooLarge(String),
    #[error("busy: {0}")]
    Busy(String),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("database failure: {0}")]
    Db(sqlx::Error),
    #[error("remote fetch failed: {0}")]
    Remote(#[from] reqwest::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// 判断该错误是否可以重试。
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Busy(_) | CoreError::Io(_) | CoreError::Db(_) | CoreError::Remote(_)
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        CoreError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            return CoreError::Conflict("a sibling with the same name already exists".into());
        }
        CoreError::Db(err)
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        match self {
            CoreError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            CoreError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            CoreError::Unauthorized(msg) => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(r#"Basic realm="Matterbox""#),
                );
                (StatusCode::UNAUTHORIZED, headers, msg).into_response()
            }
            CoreError::QuotaExceeded(msg) | CoreError::FileTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, msg).into_response()
            }
            CoreError::Busy(msg) => {
                let mut headers = HeaderMap::new();
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                (StatusCode::TOO_MANY_REQUESTS, headers, msg).into_response()
            }
            CoreError::Io(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
            CoreError::Db(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
            CoreError::Remote(err) => (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;

    #[test]
    fn busy_and_io_are_retryable() {
        assert!(CoreError::Busy("locked".into()).retryable());
        assert!(CoreError::Io(std::io::Error::other("disk gone")).retryable());
        assert!(!CoreError::Conflict("duplicate".into()).retryable());
        assert!(!CoreError::BadRequest("bad name".into()).retryable());
    }
}
