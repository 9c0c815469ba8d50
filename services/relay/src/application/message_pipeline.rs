/// 単一メッセージの受付パイプライン
///
/// 検証 → （ストアがあれば）保存 → （転送先があれば）転送 の順に処理する。
/// 転送の失敗はログに残すだけで、受付結果には影響しない。
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Message, MessageIdGenerator, MessageValidator, ValidationError};
use crate::infrastructure::{MessageForwarder, MessageStore, MessageStoreError};

/// 受付結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// 割り当てたID（ストア未設定の場合はNone）
    pub id: Option<String>,
}

/// パイプラインのエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// 検証に失敗（副作用なし）
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 保存に失敗
    #[error(transparent)]
    Store(#[from] MessageStoreError),
}

/// 受付パイプライン
///
/// ストアと転送先はどちらも任意で、呼び出し側から注入する。
pub struct MessagePipeline<S, F>
where
    S: MessageStore,
    F: MessageForwarder,
{
    store: Option<S>,
    forwarder: Option<F>,
    id_generator: MessageIdGenerator,
}

impl<S, F> MessagePipeline<S, F>
where
    S: MessageStore,
    F: MessageForwarder,
{
    pub fn new(store: Option<S>, forwarder: Option<F>, id_generator: MessageIdGenerator) -> Self {
        Self {
            store,
            forwarder,
            id_generator,
        }
    }

    /// 保存先ストア（未設定ならNone）
    pub fn store(&self) -> Option<&S> {
        self.store.as_ref()
    }

    pub fn has_forwarder(&self) -> bool {
        self.forwarder.is_some()
    }

    /// 生のペイロードを検証して受け付ける
    pub async fn submit(&self, payload: &Value) -> Result<Accepted, PipelineError> {
        let message = MessageValidator::validate(payload)?;
        Ok(self.accept(message).await?)
    }

    /// 検証済みメッセージを保存・転送する
    pub async fn accept(&self, message: Message) -> Result<Accepted, MessageStoreError> {
        let id = match &self.store {
            Some(store) => {
                let id = self.id_generator.next_id();
                store.put(&id, &message).await?;
                debug!(message_id = %id, "メッセージを保存");
                Some(id)
            }
            None => None,
        };

        if let Some(forwarder) = &self.forwarder {
            if let Err(e) = forwarder.forward(id.as_deref(), &message).await {
                warn!(
                    message_id = ?id,
                    error = %e,
                    "メッセージの転送に失敗"
                );
            }
        }

        info!(
            message_id = ?id,
            recipients = message.recipients.len(),
            attachments = message.attachments.len(),
            "メッセージを受付"
        );

        Ok(Accepted { id })
    }
}
