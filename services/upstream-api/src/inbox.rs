//! SQLite受信箱
//!
//! 受付Lambdaから転送されたメッセージを配送単位（delivery）として保管する。
//! - 書き込み: 専用の単一接続（Arc<Mutex<Connection>>）
//! - 読み取り: deadpool-sqliteによるasync接続プール
//!
//! `X-Vmtp-Message-Id`付きの転送は同じIDで再送されても1件しか保管しない。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 一覧取得のデフォルト件数
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// 一覧取得の最大件数
pub const MAX_LIST_LIMIT: u32 = 1000;

/// 読み取りプールの最大接続数
const READ_POOL_SIZE: usize = 4;

/// 受信箱のエラー
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("データベースエラー: {0}")]
    Database(String),

    #[error("プールエラー: {0}")]
    Pool(String),

    #[error("接続構築エラー: {0}")]
    Build(String),

    #[error("シリアライズエラー: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for InboxError {
    fn from(err: rusqlite::Error) -> Self {
        InboxError::Database(err.to_string())
    }
}

impl From<deadpool_sqlite::BuildError> for InboxError {
    fn from(err: deadpool_sqlite::BuildError) -> Self {
        InboxError::Build(err.to_string())
    }
}

impl From<deadpool_sqlite::PoolError> for InboxError {
    fn from(err: deadpool_sqlite::PoolError) -> Self {
        InboxError::Pool(err.to_string())
    }
}

impl From<deadpool_sqlite::InteractError> for InboxError {
    fn from(err: deadpool_sqlite::InteractError) -> Self {
        InboxError::Database(err.to_string())
    }
}

/// 転送されてきた添付ファイル
///
/// 内容はbase64文字列またはバイト配列のどちらでも受け取り、そのまま保管する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: serde_json::Value,
}

/// 転送されてきたメッセージ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<InboundAttachment>,
}

impl InboundMessage {
    /// 必須フィールドを検証し、問題があれば理由を返す
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("sender", &self.sender),
            ("subject", &self.subject),
            ("body", &self.body),
        ] {
            if value.is_empty() {
                return Err(format!("missing required field: {}", field));
            }
        }
        if self.recipients.is_empty() {
            return Err("recipients must not be empty".to_string());
        }
        Ok(())
    }
}

/// 保管済みの配送
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    /// 受信箱内の連番
    pub delivery_id: i64,
    /// 転送元が付与したメッセージID（あれば）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// 受信時刻（エポックミリ秒）
    pub received_at: i64,
    #[serde(flatten)]
    pub message: InboundMessage,
}

/// 保存結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// 新規に保管した
    Created(i64),
    /// 同じメッセージIDを受信済みのため保管しなかった
    Duplicate(i64),
}

impl SaveOutcome {
    pub fn delivery_id(&self) -> i64 {
        match self {
            SaveOutcome::Created(id) | SaveOutcome::Duplicate(id) => *id,
        }
    }
}

/// 一覧件数を決める（未指定は100件、上限1000件）
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
}

/// SQLiteデータベースのスキーマを定義するSQL
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;

CREATE TABLE IF NOT EXISTS deliveries (
    delivery_id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT UNIQUE,           -- X-Vmtp-Message-Id（なければNULL）
    sender TEXT NOT NULL,
    received_at INTEGER NOT NULL,     -- エポックミリ秒
    message_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deliveries_sender ON deliveries(sender);
"#;

/// SQLite受信箱
pub struct SqliteInbox {
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool,
}

impl SqliteInbox {
    /// データベースを開いてスキーマを初期化する
    pub async fn new(db_path: &str) -> Result<Self, InboxError> {
        let write_conn = Connection::open(db_path)?;
        write_conn.execute_batch(SCHEMA_SQL)?;

        let read_pool = Config::new(db_path)
            .builder(Runtime::Tokio1)
            .map_err(|e| InboxError::Build(e.to_string()))?
            .max_size(READ_POOL_SIZE)
            .build()?;

        Ok(Self {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
        })
    }

    /// 配送を保存
    ///
    /// `message_id`が受信済みであれば保存せず、既存の配送IDを返す。
    pub async fn save(
        &self,
        message_id: Option<&str>,
        message: &InboundMessage,
    ) -> Result<SaveOutcome, InboxError> {
        let message_id = message_id.map(str::to_string);
        let message_json = serde_json::to_string(message)
            .map_err(|e| InboxError::Serialization(e.to_string()))?;
        let sender = message.sender.clone();
        let received_at = now_millis();
        let conn = self.write_conn.clone();

        tokio::task::spawn_blocking(move || -> Result<SaveOutcome, InboxError> {
            let conn = conn
                .lock()
                .map_err(|_| InboxError::Database("書き込み接続のロックが壊れている".to_string()))?;

            if let Some(id) = &message_id {
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT delivery_id FROM deliveries WHERE message_id = ?1",
                        [id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(delivery_id) = existing {
                    return Ok(SaveOutcome::Duplicate(delivery_id));
                }
            }

            conn.execute(
                "INSERT INTO deliveries (message_id, sender, received_at, message_json) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![message_id, sender, received_at, message_json],
            )?;

            Ok(SaveOutcome::Created(conn.last_insert_rowid()))
        })
        .await
        .map_err(|e| InboxError::Database(format!("タスク実行エラー: {}", e)))?
    }

    /// 新しい順に配送を取得
    pub async fn recent(&self, limit: u32) -> Result<Vec<Delivery>, InboxError> {
        let conn = self.read_pool.get().await?;

        conn.interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT delivery_id, message_id, received_at, message_json FROM deliveries ORDER BY delivery_id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit], Self::row_to_parts)?;

            let mut deliveries = Vec::new();
            for row in rows {
                deliveries.push(Self::parts_to_delivery(row?)?);
            }
            Ok(deliveries)
        })
        .await?
    }

    /// 配送IDで1件取得
    pub async fn get(&self, delivery_id: i64) -> Result<Option<Delivery>, InboxError> {
        let conn = self.read_pool.get().await?;

        conn.interact(move |conn| {
            let parts = conn
                .query_row(
                    "SELECT delivery_id, message_id, received_at, message_json FROM deliveries WHERE delivery_id = ?1",
                    [delivery_id],
                    Self::row_to_parts,
                )
                .optional()?;
            parts.map(Self::parts_to_delivery).transpose()
        })
        .await?
    }

    fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveryRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn parts_to_delivery(
        (delivery_id, message_id, received_at, message_json): DeliveryRow,
    ) -> Result<Delivery, InboxError> {
        let message = serde_json::from_str(&message_json)
            .map_err(|e| InboxError::Serialization(e.to_string()))?;
        Ok(Delivery {
            delivery_id,
            message_id,
            received_at,
            message,
        })
    }
}

/// deliveriesテーブルの1行
type DeliveryRow = (i64, Option<String>, i64, String);

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
