/// バッチ受付
///
/// `{"messages": [...]}`の各要素に単一メッセージのパイプラインを順番に適用する。
/// 要素ごとの結果は入力と同じ順序の`results`に入る。
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::message_pipeline::MessagePipeline;
use crate::domain::MessageValidator;
use crate::infrastructure::{MessageForwarder, MessageStore, MessageStoreError};

/// バッチ要素ごとの結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemOutcome {
    /// 受付済み（ストア未設定ならIDなし）
    Accepted {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// 検証エラーで拒否
    Rejected { index: usize, reason: String },
}

/// バッチ全体の結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// 保存された要素のID（入力順）
    pub ids: Vec<String>,
    /// 要素ごとの結果（入力と同じ長さ・順序）
    pub results: Vec<ItemOutcome>,
}

impl BatchOutcome {
    pub fn accepted_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, ItemOutcome::Accepted { .. }))
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.results.len() - self.accepted_count()
    }
}

/// バッチ処理のエラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    /// リクエストボディが`{"messages": [...]}`の形でない
    #[error("malformed batch request: {0}")]
    Malformed(String),

    /// 保存に失敗（それ以前の要素は保存済みのまま残る）
    #[error("batch aborted at index {index}: {source}")]
    Store {
        index: usize,
        source: MessageStoreError,
    },
}

/// バッチプロセッサー
pub struct BatchProcessor<'a, S, F>
where
    S: MessageStore,
    F: MessageForwarder,
{
    pipeline: &'a MessagePipeline<S, F>,
}

impl<'a, S, F> BatchProcessor<'a, S, F>
where
    S: MessageStore,
    F: MessageForwarder,
{
    pub fn new(pipeline: &'a MessagePipeline<S, F>) -> Self {
        Self { pipeline }
    }

    /// バッチを処理
    ///
    /// 要素は1件ずつ順番に処理し、並列化しない。
    pub async fn process(&self, payload: &Value) -> Result<BatchOutcome, BatchError> {
        let messages = payload
            .as_object()
            .ok_or_else(|| BatchError::Malformed("request body must be a JSON object".to_string()))?
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| BatchError::Malformed("messages must be an array".to_string()))?;

        let mut outcome = BatchOutcome::default();

        for (index, item) in messages.iter().enumerate() {
            let message = match MessageValidator::validate(item) {
                Ok(message) => message,
                Err(e) => {
                    debug!(index, reason = %e, "バッチ要素を拒否");
                    outcome.results.push(ItemOutcome::Rejected {
                        index,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let accepted = self
                .pipeline
                .accept(message)
                .await
                .map_err(|source| BatchError::Store { index, source })?;

            if let Some(id) = &accepted.id {
                outcome.ids.push(id.clone());
            }
            outcome.results.push(ItemOutcome::Accepted {
                index,
                id: accepted.id,
            });
        }

        info!(
            total = messages.len(),
            accepted = outcome.accepted_count(),
            rejected = outcome.rejected_count(),
            "バッチを処理"
        );

        Ok(outcome)
    }
}
