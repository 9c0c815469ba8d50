// アプリケーション層モジュール
pub mod api_error;
pub mod batch_processor;
pub mod intake_router;
pub mod message_pipeline;
pub mod retrieval_handler;

// 再エクスポート
pub use api_error::{ApiError, ApiErrorBody};
pub use batch_processor::{BatchError, BatchOutcome, BatchProcessor, ItemOutcome};
pub use intake_router::{IntakeRouter, Route};
pub use message_pipeline::{Accepted, MessagePipeline, PipelineError};
pub use retrieval_handler::{RetrievalError, RetrievalHandler};
