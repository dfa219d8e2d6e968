// Service layer - chat reconciliation, realtime, roster and config

pub mod chat_format;
pub mod chat_message_store;
pub mod chat_realtime;
pub mod chat_send;
pub mod chat_service;
pub mod chat_types;
pub mod config;
pub mod roster;
pub mod session;

pub use chat_message_store::ConversationStore;
pub use chat_realtime::{
    LocalRealtimeSource, RealtimeBridge, RealtimeSource, UnavailableRealtimeSource,
};
pub use chat_send::SendCoordinator;
pub use chat_service::ChatConsole;
pub use config::ConfigService;
pub use roster::RosterService;
pub use session::SessionContext;
