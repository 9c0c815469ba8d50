/// キーアドレス型メッセージストアの抽象化
///
/// 実装: DynamoDB（本番）、テスト用モック。
/// ストアはシステム境界で任意であり、未設定時の扱いはアプリケーション層が決める。
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Message, StoredRecord};

/// メッセージストア操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MessageStoreError {
    /// 書き込みに失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// 読み取りに失敗
    #[error("Read error: {0}")]
    ReadError(String),

    /// データのシリアライズ/デシリアライズに失敗
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// メッセージ永続化用トレイト
///
/// キーはメッセージID。書き込みは同一IDで上書きされる（べき等）。
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// メッセージをIDで保存
    async fn put(&self, id: &str, message: &Message) -> Result<(), MessageStoreError>;

    /// IDで取得
    ///
    /// # 戻り値
    /// * 見つかった場合は`Ok(Some(Message))`
    /// * 見つからなかった場合は`Ok(None)`
    async fn get(&self, id: &str) -> Result<Option<Message>, MessageStoreError>;

    /// 保存済みの全IDを列挙（順序保証なし）
    async fn list_ids(&self) -> Result<Vec<String>, MessageStoreError>;

    /// 全レコードを取得
    ///
    /// IDを列挙してから1件ずつ`get`する。スナップショットではないため、
    /// 列挙後に消えたIDは結果から除外する。
    async fn list(&self) -> Result<Vec<StoredRecord>, MessageStoreError> {
        let ids = self.list_ids().await?;
        let mut records = Vec::with_capacity(ids.len());

        for id in ids {
            match self.get(&id).await? {
                Some(message) => records.push(StoredRecord::new(id, message)),
                None => debug!(message_id = %id, "列挙後にレコードが消えたためスキップ"),
            }
        }

        Ok(records)
    }
}
