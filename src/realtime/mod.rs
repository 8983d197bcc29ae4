pub mod chat;
pub mod protocol;
pub mod registry;
