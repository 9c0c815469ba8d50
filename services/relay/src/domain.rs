// Domain layer modules
pub mod message;
pub mod message_id;
pub mod message_validator;

// Re-exports
pub use message::{Attachment, AttachmentContent, Message, StoredRecord};
pub use message_id::{Clock, MessageIdGenerator};
pub use message_validator::{MessageValidator, ValidationError};
