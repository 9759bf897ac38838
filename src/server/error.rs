use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<Error>() {
            Some(Error::Decode(_) | Error::InvalidParameter(_)) => StatusCode::BAD_REQUEST,
            Some(Error::IndexUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Some(
                Error::EmptyCorpus(_)
                | Error::IndexBuildFailed(_)
                | Error::RebuildInProgress
                | Error::BuildAborted,
            ) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("请求处理失败: {:?}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Decode("bad".to_string()), StatusCode::BAD_REQUEST),
            (Error::InvalidParameter("nan".to_string()), StatusCode::BAD_REQUEST),
            (Error::IndexUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (Error::EmptyCorpus(PathBuf::from("/x")), StatusCode::CONFLICT),
            (Error::RebuildInProgress, StatusCode::CONFLICT),
            (Error::BuildAborted, StatusCode::CONFLICT),
            (Error::DegenerateFeature, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
        let other = AppError::from(anyhow::anyhow!("boom"));
        assert_eq!(other.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
