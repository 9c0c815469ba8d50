/// DynamoDBによるメッセージストア実装
///
/// アイテム構造:
/// - `id` (S): パーティションキー（メッセージID）
/// - `message_json` (S): シリアライズしたメッセージ
/// - `stored_at` (N): 保存時刻（エポックミリ秒）
use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::AttributeValue;
use tracing::{debug, instrument};

use super::message_store::{MessageStore, MessageStoreError};
use crate::domain::Message;

/// MessageStoreのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoMessageStore {
    /// DynamoDBクライアント
    client: DynamoDbClient,
    /// メッセージテーブル名
    table_name: String,
}

impl DynamoMessageStore {
    /// 新しいDynamoMessageStoreを作成
    ///
    /// # 引数
    /// * `client` - DynamoDBクライアント
    /// * `table_name` - メッセージテーブルの名前
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// 環境のAWS設定からクライアントを構築して作成
    pub async fn from_env(table_name: impl Into<String>) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(DynamoDbClient::new(&aws_config), table_name)
    }

    /// テーブル名を取得
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn serialize_message(message: &Message) -> Result<String, MessageStoreError> {
        serde_json::to_string(message)
            .map_err(|e| MessageStoreError::SerializationError(e.to_string()))
    }

    fn deserialize_message(json: &str) -> Result<Message, MessageStoreError> {
        serde_json::from_str(json).map_err(|e| MessageStoreError::SerializationError(e.to_string()))
    }

    /// アイテムからmessage_jsonを取り出してデシリアライズ
    fn message_from_item(item: &HashMap<String, AttributeValue>) -> Result<Message, MessageStoreError> {
        let json = item
            .get("message_json")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| {
                MessageStoreError::SerializationError("Missing message_json field".to_string())
            })?;
        Self::deserialize_message(json)
    }

    /// アイテムからidを取り出す
    fn id_from_item(item: &HashMap<String, AttributeValue>) -> Option<String> {
        item.get("id").and_then(|v| v.as_s().ok()).cloned()
    }
}

#[async_trait]
impl MessageStore for DynamoMessageStore {
    #[instrument(skip(self, message), fields(message_id = %id))]
    async fn put(&self, id: &str, message: &Message) -> Result<(), MessageStoreError> {
        let message_json = Self::serialize_message(message)?;
        let stored_at = chrono::Utc::now().timestamp_millis();

        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("id", AttributeValue::S(id.to_string()))
            .item("message_json", AttributeValue::S(message_json))
            .item("stored_at", AttributeValue::N(stored_at.to_string()))
            .send()
            .await
            .map_err(|e| MessageStoreError::WriteError(e.into_service_error().to_string()))?;

        debug!("メッセージを保存");
        Ok(())
    }

    #[instrument(skip(self), fields(message_id = %id))]
    async fn get(&self, id: &str) -> Result<Option<Message>, MessageStoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| MessageStoreError::ReadError(e.into_service_error().to_string()))?;

        match result.item {
            Some(item) => Ok(Some(Self::message_from_item(&item)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_ids(&self) -> Result<Vec<String>, MessageStoreError> {
        let mut ids = Vec::new();
        let mut exclusive_start_key: Option<HashMap<String, AttributeValue>> = None;

        // LastEvaluatedKeyがなくなるまでスキャンを続ける
        loop {
            let response = self
                .client
                .scan()
                .table_name(&self.table_name)
                .projection_expression("id")
                .set_exclusive_start_key(exclusive_start_key.take())
                .send()
                .await
                .map_err(|e| MessageStoreError::ReadError(e.into_service_error().to_string()))?;

            ids.extend(response.items().iter().filter_map(Self::id_from_item));

            match response.last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => break,
            }
        }

        debug!(count = ids.len(), "メッセージIDを列挙");
        Ok(ids)
    }
}
