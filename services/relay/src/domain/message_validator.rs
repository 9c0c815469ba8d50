/// 受信ペイロードのバリデーション
///
/// 型なしのJSONを検証し、`Message`または列挙されたエラーのどちらかを返す。
/// 必須フィールドの有無と型だけを確認し、メールアドレス形式やサイズ制限は検証しない。
use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use super::message::{Attachment, Message};

/// メッセージのバリデーションエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// ペイロードがJSONオブジェクトでない
    #[error("message must be a JSON object")]
    NotAnObject,
    /// 必須フィールドが欠落、null、または空文字
    #[error("missing required field: {0}")]
    MissingField(String),
    /// フィールドの型が不正
    #[error("invalid field type: {0}")]
    InvalidFieldType(String),
    /// recipientsが文字列の配列でない、または空
    #[error("invalid recipients: {0}")]
    InvalidRecipients(String),
}

/// メッセージバリデータ
pub struct MessageValidator;

impl MessageValidator {
    /// ペイロードを検証して`Message`に変換
    ///
    /// チェック順序:
    /// 1. sender, subject, bodyが存在し空でない
    /// 2. recipientsが存在する
    /// 3. recipientsが空でない文字列配列
    /// 4. metadata, attachmentsの型（省略時は空）
    pub fn validate(payload: &Value) -> Result<Message, ValidationError> {
        let obj = payload.as_object().ok_or(ValidationError::NotAnObject)?;

        let sender = Self::required_string(obj, "sender")?;
        let subject = Self::required_string(obj, "subject")?;
        let body = Self::required_string(obj, "body")?;
        let recipients = Self::recipients(obj)?;
        let metadata = Self::metadata(obj)?;
        let attachments = Self::attachments(obj)?;

        Ok(Message {
            sender,
            recipients,
            subject,
            body,
            metadata,
            attachments,
        })
    }

    fn required_string(obj: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
        match obj.get(field) {
            None | Some(Value::Null) => Err(ValidationError::MissingField(field.to_string())),
            Some(Value::String(s)) if s.is_empty() => {
                Err(ValidationError::MissingField(field.to_string()))
            }
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(ValidationError::InvalidFieldType(field.to_string())),
        }
    }

    fn recipients(obj: &Map<String, Value>) -> Result<Vec<String>, ValidationError> {
        let items = match obj.get("recipients") {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingField("recipients".to_string()));
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(ValidationError::MissingField("recipients".to_string()));
            }
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ValidationError::InvalidRecipients(
                    "recipients must be an array".to_string(),
                ));
            }
        };

        if items.is_empty() {
            return Err(ValidationError::InvalidRecipients(
                "recipients must not be empty".to_string(),
            ));
        }

        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ValidationError::InvalidRecipients(
                        "recipients must contain only strings".to_string(),
                    )
                })
            })
            .collect()
    }

    fn metadata(obj: &Map<String, Value>) -> Result<BTreeMap<String, String>, ValidationError> {
        match obj.get("metadata") {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(key, value)| {
                    value
                        .as_str()
                        .map(|v| (key.clone(), v.to_string()))
                        .ok_or_else(|| ValidationError::InvalidFieldType("metadata".to_string()))
                })
                .collect(),
            Some(_) => Err(ValidationError::InvalidFieldType("metadata".to_string())),
        }
    }

    fn attachments(obj: &Map<String, Value>) -> Result<Vec<Attachment>, ValidationError> {
        match obj.get("attachments") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    serde_json::from_value(item.clone())
                        .map_err(|_| ValidationError::InvalidFieldType("attachments".to_string()))
                })
                .collect(),
            Some(_) => Err(ValidationError::InvalidFieldType("attachments".to_string())),
        }
    }
}
