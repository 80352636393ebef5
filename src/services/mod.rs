pub mod content_guard;
pub mod conversation_service;
pub mod message_service;
pub mod rate_limit;
