//! 認証ミドルウェア
//!
//! 受付Lambdaと共有するAPIトークンでリクエストを認証する。
//! /healthは認証をバイパスする。

use crate::error::ApiError;
use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// 認証なしで公開するパス
const HEALTH_PATH: &str = "/health";

/// 認証設定
#[derive(Clone)]
pub struct AuthConfig {
    pub api_token: String,
}

impl AuthConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
        }
    }
}

/// Authorizationヘッダーからトークンを取り出す（`Bearer <token>`または`<token>`）
fn extract_token(header: &str) -> &str {
    header
        .strip_prefix("Bearer ")
        .unwrap_or(header)
        .trim()
}

/// 認証ミドルウェア
///
/// 失敗時は401 Unauthorized（JSON形式）を返す。
pub async fn auth_middleware(
    State(config): State<AuthConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == HEALTH_PATH {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(header) = auth_header else {
        tracing::warn!(path = %request.uri().path(), "認証ヘッダーがありません");
        return ApiError::unauthorized("Authorizationヘッダーが必要です").into_response();
    };

    if extract_token(header) == config.api_token {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "無効なAPIトークン");
        ApiError::unauthorized("APIトークンが無効です").into_response()
    }
}
