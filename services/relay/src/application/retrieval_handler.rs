/// 保存済みメッセージの取得
use thiserror::Error;
use tracing::debug;

use crate::domain::StoredRecord;
use crate::infrastructure::{MessageStore, MessageStoreError};

/// 取得処理のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrievalError {
    /// ストアが設定されていない
    #[error("message store is not configured")]
    StoreUnconfigured,

    /// 指定IDのメッセージが存在しない
    #[error("message not found: {0}")]
    NotFound(String),

    /// ストアの読み取りに失敗
    #[error(transparent)]
    Store(#[from] MessageStoreError),
}

pub struct RetrievalHandler<'a, S: MessageStore> {
    store: Option<&'a S>,
}

impl<'a, S: MessageStore> RetrievalHandler<'a, S> {
    pub fn new(store: Option<&'a S>) -> Self {
        Self { store }
    }

    fn store(&self) -> Result<&'a S, RetrievalError> {
        self.store.ok_or(RetrievalError::StoreUnconfigured)
    }

    /// IDで1件取得
    pub async fn get_one(&self, id: &str) -> Result<StoredRecord, RetrievalError> {
        let message = self
            .store()?
            .get(id)
            .await?
            .ok_or_else(|| RetrievalError::NotFound(id.to_string()))?;

        debug!(message_id = %id, "メッセージを取得");
        Ok(StoredRecord::new(id, message))
    }

    /// 全件取得（ページングなし、順序保証なし）
    pub async fn list_all(&self) -> Result<Vec<StoredRecord>, RetrievalError> {
        let records = self.store()?.list().await?;
        debug!(count = records.len(), "メッセージを列挙");
        Ok(records)
    }
}
