/// VMTPメッセージ送信CLI
///
/// 受付エンドポイントにメッセージを1件送信し、レスポンスを標準出力に表示する。
///
/// 使用例:
/// ```text
/// vmtp-send --subject "週次レポート" --metadata priority=high \
///     --attach ./report.pdf bob@example.com carol@example.com "本文"
/// ```
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, error};
use vmtp_relay::client::{ClientError, DEFAULT_SENDER, IntakeClient};
use vmtp_relay::domain::{Attachment, Message};
use vmtp_relay::infrastructure::init_cli_logging;

/// 添付ファイルのContent-Type
const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// コマンドライン引数
#[derive(Parser, Debug)]
#[command(name = "vmtp-send")]
#[command(about = "Send a VMTP message to the intake worker")]
struct Args {
    /// 宛先アドレス（1つ以上）
    #[arg(required = true, num_args = 1..)]
    recipients: Vec<String>,

    /// 本文
    body: String,

    /// 受付エンドポイントURL
    #[arg(long, default_value = "http://localhost:8787")]
    worker: String,

    /// 件名
    #[arg(long, default_value = "VMTP Test")]
    subject: String,

    /// 送信者アドレス
    #[arg(long, default_value = DEFAULT_SENDER)]
    sender: String,

    /// メタデータ（key=value、複数指定可）
    #[arg(long = "metadata", value_name = "KEY=VALUE")]
    metadata: Vec<String>,

    /// メタデータを含むJSONファイル（--metadataの値を上書き）
    #[arg(long = "metadata-file", value_name = "PATH")]
    metadata_file: Option<PathBuf>,

    /// 添付ファイル（複数指定可）
    #[arg(long = "attach", value_name = "PATH")]
    attach: Vec<PathBuf>,
}

/// CLIのエラー型
#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to read metadata file: {0}")]
    MetadataFile(String),

    #[error("Failed to read attachment {path}: {reason}")]
    Attachment { path: String, reason: String },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// `key=value`の組をメタデータに変換（最初の`=`で分割、`=`のない組は無視）
fn parse_metadata_pairs(pairs: &[String]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// メタデータJSONファイルを読み込む
///
/// 文字列以外の値はJSON表記の文字列に変換する。
fn read_metadata_file(path: &Path) -> Result<BTreeMap<String, String>, CliError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| CliError::MetadataFile(e.to_string()))?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| CliError::MetadataFile(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| CliError::MetadataFile("metadata file must contain a JSON object".to_string()))?;

    Ok(object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect())
}

/// ファイルを読み込んで添付ファイルにする（ファイル名はパスの最後の要素）
fn read_attachment(path: &Path) -> Result<Attachment, CliError> {
    let bytes = std::fs::read(path).map_err(|e| CliError::Attachment {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Attachment::from_bytes(filename, ATTACHMENT_CONTENT_TYPE, &bytes))
}

/// 引数からメッセージを組み立てる
fn build_message(args: &Args) -> Result<Message, CliError> {
    let mut metadata = parse_metadata_pairs(&args.metadata);
    if let Some(path) = &args.metadata_file {
        metadata.extend(read_metadata_file(path)?);
    }

    let attachments = args
        .attach
        .iter()
        .map(|path| read_attachment(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut message = Message::new(
        args.sender.clone(),
        args.recipients.clone(),
        args.subject.clone(),
        args.body.clone(),
    );
    message.metadata = metadata;
    message.attachments = attachments;
    Ok(message)
}

async fn run(args: Args) -> Result<String, CliError> {
    let message = build_message(&args)?;
    debug!(
        recipients = message.recipients.len(),
        attachments = message.attachments.len(),
        "メッセージを組み立て"
    );

    let client = IntakeClient::new(args.worker)?;
    Ok(client.send_message(&message).await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_cli_logging();

    let args = Args::parse();

    match run(args).await {
        Ok(response) => {
            println!("{}", response);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "送信に失敗");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
