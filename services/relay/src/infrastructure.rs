// Infrastructure layer modules
pub mod config;
pub mod dynamo_message_store;
pub mod forwarder;
pub mod logging;
pub mod message_store;

// Re-exports
pub use config::{ForwarderConfig, IntakeConfig, IntakeConfigError};
pub use dynamo_message_store::DynamoMessageStore;
pub use forwarder::{ForwardError, ForwardPolicy, HttpForwarder, MESSAGE_ID_HEADER, MessageForwarder};
pub use logging::{init_cli_logging, init_logging};
pub use message_store::{MessageStore, MessageStoreError};
