//! 受付Lambdaからの転送を受け取る上流HTTP APIサーバー
//!
//! 本バイナリは以下の機能を提供する:
//! - 転送メッセージの受信 (POST /messages)
//! - 受信済み配送の一覧 (GET /messages?limit=n)
//! - 受信済み配送の取得 (GET /messages/{delivery_id})
//! - ヘルスチェック (GET /health)

mod auth;
mod error;
mod inbox;

pub use auth::{AuthConfig, auth_middleware};
pub use error::ApiError;
pub use inbox::{Delivery, InboundMessage, InboxError, SaveOutcome, SqliteInbox, clamp_limit};

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// APIトークン環境変数名
const API_TOKEN_ENV: &str = "API_TOKEN";

/// データベースパス環境変数名
const DB_PATH_ENV: &str = "DB_PATH";

/// リッスンアドレス環境変数名
const LISTEN_ADDR_ENV: &str = "LISTEN_ADDR";

const DEFAULT_DB_PATH: &str = "/var/lib/vmtp/inbox.db";

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// 受付Lambdaが付与するメッセージIDヘッダー
const MESSAGE_ID_HEADER: &str = "x-vmtp-message-id";

/// 起動時のエラー
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("環境変数 {0} が設定されていません")]
    MissingEnv(&'static str),

    #[error("LISTEN_ADDR が不正です: {0}")]
    InvalidListenAddr(String),

    #[error("受信箱の初期化に失敗しました: {0}")]
    Inbox(#[from] InboxError),

    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),
}

/// サーバー設定
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub api_token: String,
    pub db_path: String,
    pub listen_addr: SocketAddr,
}

impl ServerConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let api_token = lookup(API_TOKEN_ENV)
            .filter(|token| !token.is_empty())
            .ok_or(StartupError::MissingEnv(API_TOKEN_ENV))?;
        let db_path = lookup(DB_PATH_ENV).unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let listen_addr = lookup(LISTEN_ADDR_ENV)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| StartupError::InvalidListenAddr(e.to_string()))?;

        Ok(Self {
            api_token,
            db_path,
            listen_addr,
        })
    }
}

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    pub auth_config: AuthConfig,
    pub inbox: Arc<SqliteInbox>,
}

/// POST /messagesのレスポンス
#[derive(Debug, Serialize, Deserialize)]
struct DeliveryReceipt {
    delivery_id: i64,
}

/// GET /messagesのクエリ
#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<u32>,
}

/// ヘルスチェックエンドポイント（認証不要）
async fn health() -> &'static str {
    "OK"
}

/// 転送メッセージ受信エンドポイント (POST /messages)
///
/// # Returns
/// - 201 Created: 新規に保管した
/// - 200 OK: 同じメッセージIDを受信済み
/// - 400 Bad Request: ボディが不正
/// - 500 Internal Server Error: データベースエラー
async fn receive_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<InboundMessage>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(message) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    message.validate().map_err(ApiError::bad_request)?;

    let message_id = headers
        .get(MESSAGE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    tracing::info!(
        message_id = ?message_id,
        sender = %message.sender,
        recipients = ?message.recipients,
        subject = %message.subject,
        "転送メッセージを受信"
    );
    for attachment in &message.attachments {
        tracing::info!(
            filename = %attachment.filename,
            content_type = %attachment.content_type,
            "添付ファイル"
        );
    }

    let outcome = state.inbox.save(message_id, &message).await.map_err(|e| {
        tracing::error!(error = %e, "配送の保存に失敗");
        ApiError::from(e)
    })?;

    let status = match outcome {
        SaveOutcome::Created(delivery_id) => {
            tracing::info!(delivery_id, "配送を保存");
            StatusCode::CREATED
        }
        SaveOutcome::Duplicate(delivery_id) => {
            tracing::info!(delivery_id, "受信済みのメッセージID");
            StatusCode::OK
        }
    };

    Ok((
        status,
        Json(DeliveryReceipt {
            delivery_id: outcome.delivery_id(),
        }),
    )
        .into_response())
}

/// 配送一覧エンドポイント (GET /messages?limit=n)
async fn list_deliveries(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<Delivery>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let limit = clamp_limit(params.limit);

    let deliveries = state.inbox.recent(limit).await?;
    tracing::info!(limit, count = deliveries.len(), "配送一覧を返却");
    Ok(Json(deliveries))
}

/// 配送取得エンドポイント (GET /messages/{delivery_id})
async fn get_delivery(
    State(state): State<AppState>,
    delivery_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Delivery>, ApiError> {
    let Path(delivery_id) = delivery_id.map_err(|e| ApiError::bad_request(e.body_text()))?;

    match state.inbox.get(delivery_id).await? {
        Some(delivery) => Ok(Json(delivery)),
        None => {
            tracing::warn!(delivery_id, "配送が見つからない");
            Err(ApiError::not_found(format!(
                "配送が見つかりません: {}",
                delivery_id
            )))
        }
    }
}

/// ルーターを構築する
///
/// /health以外のルートには認証ミドルウェアを適用する。
pub fn create_router(auth_config: AuthConfig, inbox: Arc<SqliteInbox>) -> Router {
    let state = AppState {
        auth_config: auth_config.clone(),
        inbox,
    };

    Router::new()
        .route("/health", get(health))
        .route("/messages", get(list_deliveries).post(receive_message))
        .route("/messages/{delivery_id}", get(get_delivery))
        .layer(middleware::from_fn_with_state(auth_config, auth_middleware))
        // method, path, status, latencyを記録
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// SIGTERMまたはCtrl+C (SIGINT) を待機する
///
/// ハンドラーを登録できなかったシグナルは待機しない。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C シグナルハンドラーの登録に失敗");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM シグナルハンドラーの登録に失敗");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C (SIGINT) を受信しました。graceful shutdownを開始します");
        }
        _ = terminate => {
            tracing::info!("SIGTERM を受信しました。graceful shutdownを開始します");
        }
    }
}

/// メイン関数
///
/// # 環境変数
/// - `API_TOKEN`: APIトークン（必須）
/// - `DB_PATH`: データベースファイルのパス（デフォルト: /var/lib/vmtp/inbox.db）
/// - `LISTEN_ADDR`: リッスンアドレス（デフォルト: 127.0.0.1:8080）
/// - `RUST_LOG`: ログレベル（デフォルト: info）
#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("上流APIサーバーを起動します");

    let config = ServerConfig::from_env()?;
    tracing::info!(db_path = %config.db_path, "設定を読み込みました");

    let inbox = Arc::new(SqliteInbox::new(&config.db_path).await?);
    let app = create_router(AuthConfig::new(config.api_token), inbox);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "リッスン開始");

    // 処理中のリクエスト完了後に受信箱（SQLite接続）がドロップされる
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("サーバーが正常に停止しました");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, header},
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const TEST_TOKEN: &str = "test-token-for-api-tests";

    async fn create_test_app() -> (Router, Arc<SqliteInbox>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("inbox.db");
        let inbox = Arc::new(
            SqliteInbox::new(&db_path.to_string_lossy())
                .await
                .unwrap(),
        );
        let app = create_router(AuthConfig::new(TEST_TOKEN), inbox.clone());
        (app, inbox, dir)
    }

    fn message_json() -> Value {
        json!({
            "sender": "alice@example.com",
            "recipients": ["bob@example.com"],
            "subject": "Hello",
            "body": "Hi Bob",
            "metadata": {"priority": "high"},
            "attachments": [
                {"filename": "hello.txt", "contentType": "text/plain", "content": "aGVsbG8="}
            ]
        })
    }

    fn post_message(body: &Value, message_id: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/messages")
            .method("POST")
            .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = message_id {
            builder = builder.header("X-Vmtp-Message-Id", id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    // ========================================
    // 設定
    // ========================================

    #[test]
    fn test_config_defaults() {
        let env: HashMap<&str, &str> = [("API_TOKEN", "secret")].into();
        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.api_token, "secret");
        assert_eq!(config.db_path, "/var/lib/vmtp/inbox.db");
        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_config_requires_api_token() {
        let result = ServerConfig::from_lookup(|_| None);
        assert!(matches!(result, Err(StartupError::MissingEnv("API_TOKEN"))));

        let result = ServerConfig::from_lookup(|k| (k == "API_TOKEN").then(String::new));
        assert!(matches!(result, Err(StartupError::MissingEnv("API_TOKEN"))));
    }

    #[test]
    fn test_config_rejects_invalid_listen_addr() {
        let env: HashMap<&str, &str> = [("API_TOKEN", "secret"), ("LISTEN_ADDR", "nowhere")].into();
        let result = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(matches!(result, Err(StartupError::InvalidListenAddr(_))));
    }

    // ========================================
    // GET /health
    // ========================================

    #[tokio::test]
    async fn test_health_returns_ok_without_auth() {
        let (app, _inbox, _dir) = create_test_app().await;

        let request = Request::builder()
            .uri("/health")
            .method("GET")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"OK");
    }

    // ========================================
    // POST /messages
    // ========================================

    #[tokio::test]
    async fn test_post_message_creates_delivery() {
        let (app, inbox, _dir) = create_test_app().await;

        let response = app
            .oneshot(post_message(&message_json(), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await, json!({"delivery_id": 1}));

        let delivery = inbox.get(1).await.unwrap().unwrap();
        assert_eq!(delivery.message.sender, "alice@example.com");
        assert_eq!(delivery.message.attachments[0].filename, "hello.txt");
    }

    #[tokio::test]
    async fn test_post_repeated_message_id_returns_existing_delivery() {
        let (app, inbox, _dir) = create_test_app().await;

        let first = app
            .clone()
            .oneshot(post_message(&message_json(), Some("1700000000000-0-abc")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let retry = app
            .oneshot(post_message(&message_json(), Some("1700000000000-0-abc")))
            .await
            .unwrap();

        assert_eq!(retry.status(), StatusCode::OK);
        assert_eq!(body_json(retry).await, json!({"delivery_id": 1}));
        assert_eq!(inbox.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_post_invalid_message_returns_bad_request() {
        let (app, _inbox, _dir) = create_test_app().await;
        let mut body = message_json();
        body["recipients"] = json!([]);

        let response = app.oneshot(post_message(&body, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "bad_request");
        assert_eq!(json["message"], "recipients must not be empty");
    }

    #[tokio::test]
    async fn test_post_malformed_json_returns_bad_request() {
        let (app, _inbox, _dir) = create_test_app().await;

        let request = Request::builder()
            .uri("/messages")
            .method("POST")
            .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{ invalid json }"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_post_without_auth_returns_unauthorized() {
        let (app, _inbox, _dir) = create_test_app().await;

        let request = Request::builder()
            .uri("/messages")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(message_json().to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // ========================================
    // GET /messages
    // ========================================

    #[tokio::test]
    async fn test_list_returns_newest_first_with_limit() {
        let (app, inbox, _dir) = create_test_app().await;
        for subject in ["first", "second", "third"] {
            let mut message: InboundMessage = serde_json::from_value(message_json()).unwrap();
            message.subject = subject.to_string();
            inbox.save(None, &message).await.unwrap();
        }

        let response = app.oneshot(get("/messages?limit=2")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let subjects: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["subject"].as_str().unwrap())
            .collect();
        assert_eq!(subjects, vec!["third", "second"]);
    }

    #[tokio::test]
    async fn test_list_empty_inbox() {
        let (app, _inbox, _dir) = create_test_app().await;

        let response = app.oneshot(get("/messages")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_list_invalid_limit_returns_bad_request() {
        let (app, _inbox, _dir) = create_test_app().await;

        let response = app.oneshot(get("/messages?limit=many")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "bad_request");
    }

    // ========================================
    // GET /messages/{delivery_id}
    // ========================================

    #[tokio::test]
    async fn test_get_delivery() {
        let (app, _inbox, _dir) = create_test_app().await;
        app.clone()
            .oneshot(post_message(&message_json(), Some("m-1")))
            .await
            .unwrap();

        let response = app.oneshot(get("/messages/1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["delivery_id"], 1);
        assert_eq!(json["message_id"], "m-1");
        assert_eq!(json["metadata"]["priority"], "high");
    }

    #[tokio::test]
    async fn test_get_unknown_delivery_returns_not_found() {
        let (app, _inbox, _dir) = create_test_app().await;

        let response = app.oneshot(get("/messages/99")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");
    }

    #[tokio::test]
    async fn test_get_non_numeric_delivery_id_returns_bad_request() {
        let (app, _inbox, _dir) = create_test_app().await;

        let response = app.oneshot(get("/messages/abc")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
