/// 受付Lambdaエントリポイント
///
/// Lambda Function URL経由のHTTPリクエストを受け付け、
/// メッセージの検証・保存・転送と保存済みメッセージの取得を行う。
///
/// ストア（DynamoDB）と転送先は環境変数で設定し、どちらも省略できる。
use lambda_http::{Body, Error, Request, Response, run, service_fn};
use tokio::sync::OnceCell;
use tracing::{error, info};
use vmtp_relay::application::{ApiError, IntakeRouter, MessagePipeline};
use vmtp_relay::domain::MessageIdGenerator;
use vmtp_relay::infrastructure::{DynamoMessageStore, HttpForwarder, IntakeConfig, init_logging};

type Router = IntakeRouter<DynamoMessageStore, HttpForwarder>;

/// ルーターの静的インスタンス
///
/// warm start時にDynamoDBクライアントとHTTPクライアントを再利用する。
/// 設定エラーの場合は保持せず、次のリクエストで再度初期化を試みる。
static ROUTER: OnceCell<Router> = OnceCell::const_new();

async fn get_router() -> Result<&'static Router, ApiError> {
    ROUTER.get_or_try_init(load_router).await
}

/// 環境変数から設定を読み込んでルーターを構築
async fn load_router() -> Result<Router, ApiError> {
    let config = IntakeConfig::from_env()?;
    build_router(&config).await
}

async fn build_router(config: &IntakeConfig) -> Result<Router, ApiError> {
    let store = match &config.messages_table {
        Some(table_name) => Some(DynamoMessageStore::from_env(table_name.clone()).await),
        None => None,
    };

    let forwarder = config
        .forwarder
        .as_ref()
        .map(HttpForwarder::new)
        .transpose()
        .map_err(|e| ApiError::configuration_error(e.to_string()))?;

    info!(
        messages_table = ?config.messages_table,
        upstream_url = ?config.forwarder.as_ref().map(|f| f.upstream_url.as_str()),
        "受付ルーターを初期化"
    );

    Ok(IntakeRouter::new(MessagePipeline::new(
        store,
        forwarder,
        MessageIdGenerator::new(),
    )))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    info!("受付Lambda関数を初期化");

    run(service_fn(handler)).await
}

/// HTTPリクエストハンドラー
async fn handler(request: Request) -> Result<Response<Body>, Error> {
    Ok(respond(get_router().await, request).await)
}

/// ルーターの初期化結果に応じてレスポンスを生成
async fn respond(router: Result<&Router, ApiError>, request: Request) -> Response<Body> {
    match router {
        Ok(router) => router.handle(request).await,
        Err(e) => {
            error!(error = e.error(), message = e.message(), "受付ルーターの初期化に失敗");
            e.into_response()
        }
    }
}
