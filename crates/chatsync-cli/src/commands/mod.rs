pub mod chats;
pub mod common;
pub mod daemon;
pub mod settings;
pub mod status;
pub mod sync;
