pub mod chat;
pub mod conversation;

pub use chat::{ChatMessage, Role};
pub use conversation::{Attachment, AttachmentKind, Conversation, Message};
