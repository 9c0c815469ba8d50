//! APIエラーハンドリング
//!
//! 受付Lambdaの非2xxレスポンスはすべて`{"error": 種別, "message": 詳細}`形式で返す。

use lambda_http::http::header::{CONTENT_TYPE, HeaderValue};
use lambda_http::http::StatusCode;
use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::batch_processor::BatchError;
use super::message_pipeline::PipelineError;
use super::retrieval_handler::RetrievalError;
use crate::domain::ValidationError;
use crate::infrastructure::{IntakeConfigError, MessageStoreError};

/// シリアライズに失敗したときの固定レスポンスボディ
const FALLBACK_ERROR_BODY: &str =
    r#"{"error":"internal_error","message":"failed to serialize response"}"#;

/// APIエラーレスポンスのボディ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    /// エラー種別（例: "bad_request", "not_found", "store_unconfigured"）
    pub error: String,
    /// 詳細なエラーメッセージ
    pub message: String,
}

/// APIエラー
///
/// ステータスコードとJSONボディの組。ハンドラー層のエラーはすべてここに変換する。
#[derive(Debug, Clone, PartialEq)]
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

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 405 Method Not Allowed
    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", message)
    }

    /// 500 ストア未設定（NotFoundとは区別する）
    pub fn store_unconfigured() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_unconfigured",
            "message store is not configured",
        )
    }

    /// 500 ストアのバックエンドエラー
    pub fn store_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "store_error", message)
    }

    /// 500 設定エラー
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "configuration_error", message)
    }

    /// 500 Internal Server Error
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

    /// Lambda HTTPレスポンスに変換
    pub fn into_response(self) -> Response<Body> {
        json_response(self.status, &self.body)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.body.error, self.status, self.body.message)
    }
}

impl std::error::Error for ApiError {}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<MessageStoreError> for ApiError {
    fn from(err: MessageStoreError) -> Self {
        ApiError::store_error(err.to_string())
    }
}

impl From<IntakeConfigError> for ApiError {
    fn from(err: IntakeConfigError) -> Self {
        ApiError::configuration_error(err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(e) => e.into(),
            PipelineError::Store(e) => e.into(),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Malformed(_) => ApiError::bad_request(err.to_string()),
            BatchError::Store { .. } => ApiError::store_error(err.to_string()),
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::StoreUnconfigured => ApiError::store_unconfigured(),
            RetrievalError::NotFound(_) => ApiError::not_found(err.to_string()),
            RetrievalError::Store(e) => e.into(),
        }
    }
}

/// 値をJSONにしてContent-Type付きのレスポンスを作る
///
/// シリアライズに失敗した場合はログを出して500を返す。
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(json) => text_response(status, json),
        Err(e) => {
            error!(error = %e, "レスポンスのシリアライズに失敗");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                FALLBACK_ERROR_BODY.to_string(),
            )
        }
    }
}

fn text_response(status: StatusCode, json: String) -> Response<Body> {
    let mut response = Response::new(Body::Text(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// テスト用: レスポンスボディを文字列で取り出す
#[cfg(test)]
pub(crate) fn body_text(response: &Response<Body>) -> String {
    match response.body() {
        Body::Text(text) => text.clone(),
        Body::Binary(bytes) => String::from_utf8(bytes.clone()).unwrap(),
        Body::Empty => String::new(),
        _ => panic!("予期しないBody型"),
    }
}
