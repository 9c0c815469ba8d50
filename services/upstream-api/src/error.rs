//! APIエラーハンドリング
//!
//! すべてのエラーは`{"error": ..., "message": ...}`のJSONで返す。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::inbox::InboxError;

/// APIエラーレスポンスのボディ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    /// エラー種別（例: "bad_request", "unauthorized", "not_found", "internal_error"）
    pub error: String,
    pub message: String,
}

/// APIエラー
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error: error.into(),
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn error(&self) -> &str {
        &self.body.error
    }

    pub fn message(&self) -> &str {
        &self.body.message
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<InboxError> for ApiError {
    fn from(err: InboxError) -> Self {
        ApiError::internal_error(format!("データベースエラー: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    #[test]
    fn test_constructors() {
        let cases = [
            (ApiError::bad_request("x"), StatusCode::BAD_REQUEST, "bad_request"),
            (ApiError::unauthorized("x"), StatusCode::UNAUTHORIZED, "unauthorized"),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND, "not_found"),
            (
                ApiError::internal_error("x"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
        ];

        for (error, status, kind) in cases {
            assert_eq!(error.status(), status);
            assert_eq!(error.error(), kind);
            assert_eq!(error.message(), "x");
        }
    }

    #[test]
    fn test_inbox_error_maps_to_internal_error() {
        let error: ApiError = InboxError::Pool("timeout".to_string()).into();

        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.error(), "internal_error");
        assert!(error.message().contains("timeout"));
    }

    /// not_foundがJSON形式で404レスポンスを返すことを確認
    #[tokio::test]
    async fn test_not_found_returns_json_404() {
        async fn error_handler() -> ApiError {
            ApiError::not_found("配送が見つかりません: 3")
        }

        let app = Router::new().route("/error", get(error_handler));
        let request = Request::builder()
            .uri("/error")
            .method("GET")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error_body: ApiErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(error_body.error, "not_found");
        assert_eq!(error_body.message, "配送が見つかりません: 3");
    }
}
