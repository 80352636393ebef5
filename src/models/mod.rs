pub mod conversation;
pub mod message;

pub use conversation::{
    ConversationKind, ConversationRef, ConversationSummary, EphemeralHandle,
};
pub use message::{Message, MessageDto, MessageKind, MessageStatus};
