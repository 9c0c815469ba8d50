// IntakeClient - 受付LambdaへのHTTPクライアント
//
// メッセージ送信側（CLIやライブラリ利用者）から受付エンドポイントに
// 単一メッセージまたはバッチをPOSTする。受付Lambda本体はこのモジュールに依存しない。

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domain::Message;

/// 送信者を省略したときのデフォルト
pub const DEFAULT_SENDER: &str = "noreply@example.com";

/// リクエストタイムアウト（秒）
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// 接続タイムアウト（秒）
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// クライアントのエラー型
#[derive(Debug, Error)]
pub enum ClientError {
    /// 受付エンドポイントが成功以外のステータスを返した
    #[error("Worker responded with {status}: {message}")]
    HttpError { status: u16, message: String },

    /// ネットワークエラー
    #[error("ネットワークエラー: {0}")]
    NetworkError(String),

    /// HTTPクライアントの構築に失敗
    #[error("HTTPクライアント構築エラー: {0}")]
    ClientBuildError(String),
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    messages: &'a [Message],
}

/// 受付Lambdaのクライアント
#[derive(Debug, Clone)]
pub struct IntakeClient {
    client: Client,
    worker_url: String,
    default_sender: String,
}

impl IntakeClient {
    pub fn new(worker_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ClientError::ClientBuildError(e.to_string()))?;

        Ok(Self {
            client,
            worker_url: worker_url.into(),
            default_sender: DEFAULT_SENDER.to_string(),
        })
    }

    /// `compose`で使う送信者を変更
    pub fn with_default_sender(mut self, sender: impl Into<String>) -> Self {
        self.default_sender = sender.into();
        self
    }

    pub fn worker_url(&self) -> &str {
        &self.worker_url
    }

    /// デフォルト送信者でメッセージを組み立てる
    pub fn compose(
        &self,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Message {
        Message::new(self.default_sender.clone(), recipients, subject, body)
    }

    /// バッチ受付URL（末尾のスラッシュは1つだけ除去）
    fn batch_url(&self) -> String {
        let base = self.worker_url.strip_suffix('/').unwrap_or(&self.worker_url);
        format!("{}/batch", base)
    }

    /// 単一メッセージを送信し、レスポンスボディを返す
    #[instrument(skip(self, message), fields(recipients = message.recipients.len()))]
    pub async fn send_message(&self, message: &Message) -> Result<String, ClientError> {
        debug!(url = %self.worker_url, "メッセージを送信");
        self.post_json(&self.worker_url, message).await
    }

    /// 複数メッセージをバッチで送信し、レスポンスボディを返す
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn send_batch(&self, messages: &[Message]) -> Result<String, ClientError> {
        let url = self.batch_url();
        debug!(url = %url, "バッチを送信");
        self.post_json(&url, &BatchRequest { messages }).await
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<String, ClientError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(ClientError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }

        info!(status = %status, "受付エンドポイントが応答");
        Ok(body)
    }
}
