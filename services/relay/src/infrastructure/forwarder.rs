// Forwarder - 上流配送エンドポイントへのHTTP転送
//
// 受け付けたメッセージを設定された上流URLにPOSTする。
// 転送結果は受付レスポンスに影響しない（呼び出し側でログのみ）。
// 再試行の有無はForwardPolicyで明示する。

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use url::Url;

use super::config::ForwarderConfig;
use crate::domain::Message;

/// 保存済みメッセージのIDを上流に伝えるヘッダー
pub const MESSAGE_ID_HEADER: &str = "X-Vmtp-Message-Id";

/// リクエストタイムアウト（秒）
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 再試行間隔の下限（ミリ秒）
const RETRY_MIN_INTERVAL_MS: u64 = 200;

/// 再試行間隔の上限（秒）
const RETRY_MAX_INTERVAL_SECS: u64 = 5;

/// 転送ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardPolicy {
    /// 1回だけ送信し、失敗しても再試行しない
    #[default]
    AtMostOnce,
    /// 一時的な失敗を指数バックオフで最大`max_retries`回再試行する
    AtLeastOnce { max_retries: u32 },
}

impl ForwardPolicy {
    /// 再試行回数からポリシーを決定（0はAtMostOnce）
    pub fn from_max_retries(max_retries: u32) -> Self {
        if max_retries == 0 {
            ForwardPolicy::AtMostOnce
        } else {
            ForwardPolicy::AtLeastOnce { max_retries }
        }
    }

    /// 最大再試行回数
    pub fn max_retries(&self) -> u32 {
        match self {
            ForwardPolicy::AtMostOnce => 0,
            ForwardPolicy::AtLeastOnce { max_retries } => *max_retries,
        }
    }
}

/// 転送エラー
#[derive(Debug, Error)]
pub enum ForwardError {
    /// 上流が成功以外のステータスを返した
    #[error("HTTPエラー: status={status}, message={message}")]
    HttpError {
        /// HTTPステータスコード
        status: u16,
        /// レスポンスボディ
        message: String,
    },

    /// ネットワークエラー（接続失敗、タイムアウト等）
    #[error("ネットワークエラー: {0}")]
    NetworkError(String),

    /// シリアライズエラー
    #[error("シリアライズエラー: {0}")]
    SerializationError(String),

    /// 再試行回数超過
    #[error("再試行回数超過: {0}")]
    RetryExhausted(String),

    /// HTTPクライアントの構築に失敗
    #[error("HTTPクライアント構築エラー: {0}")]
    ClientBuildError(String),
}

/// メッセージ転送トレイト
///
/// 実HTTP実装とテスト用モックを差し替えられるようにする。
#[async_trait]
pub trait MessageForwarder: Send + Sync {
    /// メッセージを上流に転送
    ///
    /// # 引数
    /// * `message_id` - 保存済みの場合はそのID
    /// * `message` - 転送するメッセージ
    async fn forward(&self, message_id: Option<&str>, message: &Message) -> Result<(), ForwardError>;
}

/// HTTP転送の実装
#[derive(Clone)]
pub struct HttpForwarder {
    /// HTTPクライアント（AtLeastOnce時は再試行ミドルウェア付き）
    client: ClientWithMiddleware,
    /// 転送先URL
    upstream_url: Url,
    /// 上流APIトークン
    api_token: Option<String>,
    /// 転送ポリシー
    policy: ForwardPolicy,
}

impl std::fmt::Debug for HttpForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpForwarder")
            .field("upstream_url", &self.upstream_url.as_str())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl HttpForwarder {
    /// 設定からHttpForwarderを作成
    pub fn new(config: &ForwarderConfig) -> Result<Self, ForwardError> {
        info!(
            upstream_url = %config.upstream_url,
            policy = ?config.policy,
            "HttpForwarderを初期化"
        );

        let base_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ForwardError::ClientBuildError(e.to_string()))?;

        let client = match config.policy {
            ForwardPolicy::AtMostOnce => ClientBuilder::new(base_client).build(),
            ForwardPolicy::AtLeastOnce { max_retries } => {
                let retry_policy = ExponentialBackoff::builder()
                    .retry_bounds(
                        Duration::from_millis(RETRY_MIN_INTERVAL_MS),
                        Duration::from_secs(RETRY_MAX_INTERVAL_SECS),
                    )
                    .build_with_max_retries(max_retries);
                ClientBuilder::new(base_client)
                    .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                    .build()
            }
        };

        Ok(Self {
            client,
            upstream_url: config.upstream_url.clone(),
            api_token: config.api_token.clone(),
            policy: config.policy,
        })
    }

    /// 転送ポリシーを取得
    pub fn policy(&self) -> ForwardPolicy {
        self.policy
    }

    /// 転送先URLを取得
    pub fn upstream_url(&self) -> &Url {
        &self.upstream_url
    }
}

#[async_trait]
impl MessageForwarder for HttpForwarder {
    #[instrument(skip(self, message), fields(message_id = ?message_id))]
    async fn forward(&self, message_id: Option<&str>, message: &Message) -> Result<(), ForwardError> {
        debug!(url = %self.upstream_url, "メッセージを転送");

        let body = serde_json::to_string(message).map_err(|e| {
            error!(error = %e, "メッセージのシリアライズに失敗");
            ForwardError::SerializationError(e.to_string())
        })?;

        let mut request = self
            .client
            .post(self.upstream_url.clone())
            .header("Content-Type", "application/json")
            .body(body);

        if let Some(id) = message_id {
            request = request.header(MESSAGE_ID_HEADER, id);
        }
        if let Some(token) = &self.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| match e {
            reqwest_middleware::Error::Middleware(err) => {
                ForwardError::RetryExhausted(err.to_string())
            }
            reqwest_middleware::Error::Reqwest(err) => ForwardError::NetworkError(err.to_string()),
        })?;

        let status = response.status();
        if status.is_success() {
            info!(status = %status, "メッセージの転送に成功");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ForwardError::HttpError {
            status: status.as_u16(),
            message: body,
        })
    }
}
