pub mod backend_api;
pub mod error;
pub mod services;
pub mod state;

pub use backend_api::{BackendApi, BackendApiClient};
pub use error::{ConsoleError, Result};
pub use services::chat_format::{group_header, group_header_at, ConversationView};
pub use services::chat_types::{ConversationKey, DeliveryState, Message};
pub use services::roster::validate_group;
pub use services::{ChatConsole, ConfigService, RosterService, SessionContext};
pub use state::AppState;

use services::config::LoggingSettings;

/// Install the global logger.
///
/// `RUST_LOG` overrides the configured level. Calling twice is harmless.
pub fn init_logging(settings: &LoggingSettings) {
    let level = settings
        .level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);

    let result = env_logger::Builder::new()
        .filter_level(level)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper", log::LevelFilter::Warn)
        .filter_module("hyper_util", log::LevelFilter::Warn)
        .parse_default_env()
        .try_init();

    if result.is_ok() {
        log::info!("Logging initialized at {}", level);
    }
}
