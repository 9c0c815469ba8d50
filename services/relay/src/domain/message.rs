/// VMTPメッセージのドメインモデル
///
/// 受付・保存・転送・取得の各段階で共有するメッセージ構造を定義する。
/// JSON表現はワーカーのHTTP APIと同一（添付ファイルのみcamelCase）。
use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// 送信メッセージ
///
/// `MessageValidator::validate`を通過したものだけが保存・転送の対象になる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// 送信者アドレス（空文字不可）
    pub sender: String,
    /// 宛先アドレスのリスト（1件以上）
    pub recipients: Vec<String>,
    /// 件名（空文字不可）
    pub subject: String,
    /// 本文（空文字不可）
    pub body: String,
    /// 任意のキー・値メタデータ
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// 添付ファイル（空の場合はシリアライズ時に省略）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// メタデータ・添付ファイルなしのメッセージを作成
    pub fn new(
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipients,
            subject: subject.into(),
            body: body.into(),
            metadata: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }
}

/// 添付ファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// ファイル名
    pub filename: String,
    /// MIMEタイプ
    pub content_type: String,
    /// 内容（base64文字列またはバイト配列）
    pub content: AttachmentContent,
}

impl Attachment {
    /// バイト列からbase64エンコード済みの添付ファイルを作成
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content: AttachmentContent::Base64(STANDARD.encode(bytes)),
        }
    }
}

/// 添付ファイルの内容
///
/// 受信した表現のまま保存・返却する（base64への正規化はしない）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentContent {
    /// base64エンコード済み文字列
    Base64(String),
    /// バイト値の配列（0-255）
    Bytes(Vec<u8>),
}

/// 保存済みレコード
///
/// メッセージと、書き込み時に割り当てたIDの組。
/// JSONではメッセージのフィールドに`id`を加えたフラットな形になる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// ストアのキー
    pub id: String,
    #[serde(flatten)]
    pub message: Message,
}

impl StoredRecord {
    pub fn new(id: impl Into<String>, message: Message) -> Self {
        Self {
            id: id.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_message() -> Message {
        Message::new(
            "alice@example.com",
            vec!["bob@example.com".to_string(), "carol@example.com".to_string()],
            "Hello",
            "Hi there",
        )
    }

    // ==================== シリアライズテスト ====================

    #[test]
    fn test_message_serializes_with_wire_field_names() {
        let mut message = sample_message();
        message.metadata.insert("priority".to_string(), "high".to_string());

        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["sender"], "alice@example.com");
        assert_eq!(value["recipients"], json!(["bob@example.com", "carol@example.com"]));
        assert_eq!(value["subject"], "Hello");
        assert_eq!(value["body"], "Hi there");
        assert_eq!(value["metadata"], json!({"priority": "high"}));
    }

    #[test]
    fn test_message_without_attachments_omits_field() {
        let value = serde_json::to_value(sample_message()).unwrap();

        assert!(value.get("attachments").is_none());
        // metadataは空でも出力する
        assert_eq!(value["metadata"], json!({}));
    }

    #[test]
    fn test_attachment_uses_camel_case_content_type() {
        let mut message = sample_message();
        message.attachments.push(Attachment {
            filename: "note.txt".to_string(),
            content_type: "text/plain".to_string(),
            content: AttachmentContent::Base64("aGVsbG8=".to_string()),
        });

        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["attachments"][0]["contentType"], "text/plain");
        assert_eq!(value["attachments"][0]["content"], "aGVsbG8=");
    }

    // ==================== 添付ファイルテスト ====================

    #[test]
    fn test_attachment_from_bytes_encodes_base64() {
        let attachment = Attachment::from_bytes("hello.bin", "application/octet-stream", b"hello");

        assert_eq!(attachment.filename, "hello.bin");
        assert_eq!(attachment.content_type, "application/octet-stream");
        assert_eq!(attachment.content, AttachmentContent::Base64("aGVsbG8=".to_string()));
    }

    #[test]
    fn test_attachment_content_accepts_byte_array() {
        let attachment: Attachment = serde_json::from_value(json!({
            "filename": "raw.bin",
            "contentType": "application/octet-stream",
            "content": [104, 105]
        }))
        .unwrap();

        assert_eq!(attachment.content, AttachmentContent::Bytes(vec![104, 105]));
    }

    // ==================== StoredRecordテスト ====================

    #[test]
    fn test_stored_record_flattens_message_fields() {
        let record = StoredRecord::new("1700000000000-0-abc", sample_message());

        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["id"], "1700000000000-0-abc");
        assert_eq!(value["sender"], "alice@example.com");
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_stored_record_deserializes_from_flat_json() {
        let record: StoredRecord = serde_json::from_value(json!({
            "id": "42",
            "sender": "alice@example.com",
            "recipients": ["bob@example.com"],
            "subject": "s",
            "body": "b",
            "metadata": {}
        }))
        .unwrap();

        assert_eq!(record.id, "42");
        assert_eq!(record.message.recipients, vec!["bob@example.com".to_string()]);
        assert!(record.message.attachments.is_empty());
    }
}
