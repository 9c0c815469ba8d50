/// 受付ルーター
///
/// HTTPメソッドとパスからハンドラーを1つ選び、結果をHTTPレスポンスに変換する。
///
/// | メソッド | パス | ルート |
/// |----------|------|--------|
/// | GET | `/messages?id=<id>` | 1件取得 |
/// | GET | `/messages` | 全件取得 |
/// | POST | `/batch` | バッチ受付 |
/// | POST | その他 | 単一メッセージ受付 |
/// | その他 | - | 405 |
use lambda_http::http::{Method, StatusCode};
use lambda_http::{Body, Request, RequestExt, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::api_error::{ApiError, json_response};
use super::batch_processor::{BatchOutcome, BatchProcessor};
use super::message_pipeline::MessagePipeline;
use super::retrieval_handler::RetrievalHandler;
use crate::infrastructure::{MessageForwarder, MessageStore};

/// 取得ルートのパス
pub const MESSAGES_PATH: &str = "/messages";

/// バッチ受付のパス
pub const BATCH_PATH: &str = "/batch";

/// 受付済みを示すステータス文字列
const STATUS_ACCEPTED: &str = "accepted";

/// リクエストの振り分け先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// GET /messages?id=<id>
    GetMessage(String),
    /// GET /messages
    ListMessages,
    /// POST /batch
    SubmitBatch,
    /// POST（/batch以外）
    SubmitMessage,
    /// 上記以外
    MethodNotAllowed,
}

impl Route {
    /// メソッド・パス・クエリの`id`からルートを決める
    ///
    /// 空の`id`は未指定として扱う。パス末尾のスラッシュは正規化しない。
    pub fn resolve(method: &Method, path: &str, id: Option<&str>) -> Self {
        match *method {
            Method::GET if path == MESSAGES_PATH => match id {
                Some(id) if !id.is_empty() => Route::GetMessage(id.to_string()),
                _ => Route::ListMessages,
            },
            Method::POST if path == BATCH_PATH => Route::SubmitBatch,
            Method::POST => Route::SubmitMessage,
            _ => Route::MethodNotAllowed,
        }
    }

    /// ログ用のルート名
    pub fn name(&self) -> &'static str {
        match self {
            Route::GetMessage(_) => "get_message",
            Route::ListMessages => "list_messages",
            Route::SubmitBatch => "submit_batch",
            Route::SubmitMessage => "submit_message",
            Route::MethodNotAllowed => "method_not_allowed",
        }
    }
}

/// 単一受付のレスポンス
#[derive(Debug, Serialize)]
struct SubmitResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

/// バッチ受付のレスポンス
#[derive(Debug, Serialize)]
struct BatchResponse {
    status: &'static str,
    #[serde(flatten)]
    outcome: BatchOutcome,
}

/// 受付ルーター
///
/// パイプライン（ストア・転送先を含む）を注入して作成する。
pub struct IntakeRouter<S, F>
where
    S: MessageStore,
    F: MessageForwarder,
{
    pipeline: MessagePipeline<S, F>,
}

impl<S, F> IntakeRouter<S, F>
where
    S: MessageStore,
    F: MessageForwarder,
{
    pub fn new(pipeline: MessagePipeline<S, F>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &MessagePipeline<S, F> {
        &self.pipeline
    }

    /// リクエストを処理してレスポンスを返す
    ///
    /// エラーはすべて`ApiError`のJSONレスポンスに変換するため、このメソッド自体は失敗しない。
    pub async fn handle(&self, request: Request) -> Response<Body> {
        let id = query_id(&request);
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let route = Route::resolve(&method, &path, id.as_deref());

        info!(method = %method, path = %path, route = route.name(), "リクエストを受信");

        let result = match route {
            Route::GetMessage(id) => self.get_message(&id).await,
            Route::ListMessages => self.list_messages().await,
            Route::SubmitBatch => match parse_json_body(request.body()) {
                Ok(payload) => self.submit_batch(&payload).await,
                Err(e) => Err(e),
            },
            Route::SubmitMessage => match parse_json_body(request.body()) {
                Ok(payload) => self.submit_message(&payload).await,
                Err(e) => Err(e),
            },
            Route::MethodNotAllowed => Err(ApiError::method_not_allowed(format!(
                "{} {} is not allowed",
                method, path
            ))),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                if e.status().is_server_error() {
                    error!(status = %e.status(), error = e.error(), message = e.message(), "リクエスト処理に失敗");
                } else {
                    warn!(status = %e.status(), error = e.error(), message = e.message(), "リクエストを拒否");
                }
                e.into_response()
            }
        }
    }

    async fn submit_message(&self, payload: &Value) -> Result<Response<Body>, ApiError> {
        let accepted = self.pipeline.submit(payload).await?;
        Ok(json_response(
            StatusCode::OK,
            &SubmitResponse {
                status: STATUS_ACCEPTED,
                id: accepted.id,
            },
        ))
    }

    async fn submit_batch(&self, payload: &Value) -> Result<Response<Body>, ApiError> {
        let outcome = BatchProcessor::new(&self.pipeline).process(payload).await?;
        Ok(json_response(
            StatusCode::OK,
            &BatchResponse {
                status: STATUS_ACCEPTED,
                outcome,
            },
        ))
    }

    async fn get_message(&self, id: &str) -> Result<Response<Body>, ApiError> {
        let record = RetrievalHandler::new(self.pipeline.store()).get_one(id).await?;
        Ok(json_response(StatusCode::OK, &record))
    }

    async fn list_messages(&self) -> Result<Response<Body>, ApiError> {
        let records = RetrievalHandler::new(self.pipeline.store()).list_all().await?;
        Ok(json_response(StatusCode::OK, &records))
    }
}

/// クエリ文字列から`id`を取り出す
///
/// URIのクエリを優先し、なければLambdaイベント由来のクエリパラメータを見る。
fn query_id(request: &Request) -> Option<String> {
    let from_uri = request.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
    });

    from_uri.or_else(|| {
        request
            .query_string_parameters_ref()
            .and_then(|params| params.first("id"))
            .map(str::to_string)
    })
}

/// リクエストボディをJSONとしてパース
fn parse_json_body(body: &Body) -> Result<Value, ApiError> {
    let bytes: &[u8] = match body {
        Body::Text(text) => text.as_bytes(),
        Body::Binary(bytes) => bytes.as_slice(),
        _ => &[],
    };

    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::bad_request(format!("malformed JSON body: {}", e)))
}
