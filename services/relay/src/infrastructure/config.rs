/// 受付Lambdaの設定
///
/// すべて環境変数から読み込む。ストアと転送先はどちらも任意で、
/// 未設定の場合はその機能を無効にする（エラーにはしない）。
use thiserror::Error;
use url::Url;

use super::forwarder::ForwardPolicy;

/// メッセージテーブル名の環境変数
pub const MESSAGES_TABLE_ENV: &str = "MESSAGES_TABLE";

/// 転送先URLの環境変数
pub const UPSTREAM_URL_ENV: &str = "UPSTREAM_URL";

/// 転送先APIトークンの環境変数
pub const UPSTREAM_API_TOKEN_ENV: &str = "UPSTREAM_API_TOKEN";

/// 転送の最大再試行回数の環境変数
pub const FORWARD_MAX_RETRIES_ENV: &str = "FORWARD_MAX_RETRIES";

/// 設定読み込みのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntakeConfigError {
    /// 環境変数の値が不正
    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnvVar { name: String, reason: String },
}

/// 転送先の設定
#[derive(Debug, Clone, PartialEq)]
pub struct ForwarderConfig {
    /// 転送先URL（http/httpsの絶対URL）
    pub upstream_url: Url,
    /// Authorizationヘッダーに付与するトークン
    pub api_token: Option<String>,
    /// 転送ポリシー
    pub policy: ForwardPolicy,
}

/// 受付Lambda全体の設定
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntakeConfig {
    /// DynamoDBメッセージテーブル名（未設定ならストアなし）
    pub messages_table: Option<String>,
    /// 転送設定（未設定なら転送しない）
    pub forwarder: Option<ForwarderConfig>,
}

impl IntakeConfig {
    /// 環境変数から設定を読み込み
    ///
    /// 環境変数:
    /// - MESSAGES_TABLE: メッセージ保存用DynamoDBテーブル名（任意）
    /// - UPSTREAM_URL: 転送先URL（任意）
    /// - UPSTREAM_API_TOKEN: 転送先APIトークン（任意）
    /// - FORWARD_MAX_RETRIES: 0または未設定でat-most-once、1以上でat-least-once（任意）
    pub fn from_env() -> Result<Self, IntakeConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意のルックアップ関数から設定を読み込み
    ///
    /// 空文字の値は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IntakeConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let messages_table = get(MESSAGES_TABLE_ENV);

        let policy = match get(FORWARD_MAX_RETRIES_ENV) {
            Some(raw) => {
                let retries = raw.trim().parse::<u32>().map_err(|e| IntakeConfigError::InvalidEnvVar {
                    name: FORWARD_MAX_RETRIES_ENV.to_string(),
                    reason: e.to_string(),
                })?;
                ForwardPolicy::from_max_retries(retries)
            }
            None => ForwardPolicy::AtMostOnce,
        };

        let forwarder = match get(UPSTREAM_URL_ENV) {
            Some(raw) => Some(ForwarderConfig {
                upstream_url: Self::parse_upstream_url(&raw)?,
                api_token: get(UPSTREAM_API_TOKEN_ENV),
                policy,
            }),
            None => None,
        };

        Ok(Self {
            messages_table,
            forwarder,
        })
    }

    fn parse_upstream_url(raw: &str) -> Result<Url, IntakeConfigError> {
        let invalid = |reason: String| IntakeConfigError::InvalidEnvVar {
            name: UPSTREAM_URL_ENV.to_string(),
            reason,
        };

        let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported scheme: {}", other))),
        }
    }
}
