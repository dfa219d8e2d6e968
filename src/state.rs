use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backend_api::BackendApiClient;
use crate::error::Result;
use crate::services::{
    ChatConsole, ConfigService, RealtimeSource, RosterService, SessionContext,
    UnavailableRealtimeSource,
};

/// Application state shared by the admin console front end.
pub struct AppState {
    pub config: Arc<RwLock<ConfigService>>,
    backend: BackendApiClient,
    realtime: Arc<dyn RealtimeSource>,
}

impl AppState {
    /// Build state from `config`. `realtime` is replaced by an unavailable
    /// source when realtime is disabled in config.
    pub fn new(config: ConfigService, realtime: Arc<dyn RealtimeSource>) -> Result<Self> {
        let app_config = config.get();
        log::info!(
            "Initializing console state: backend={}, timeout={}s",
            app_config.backend.base_url,
            app_config.backend.timeout_secs
        );

        let backend = BackendApiClient::new(&app_config.backend)?;
        let realtime: Arc<dyn RealtimeSource> = if app_config.realtime.enabled {
            realtime
        } else {
            log::info!("Realtime disabled in config, using backend history only");
            Arc::new(UnavailableRealtimeSource)
        };

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            backend,
            realtime,
        })
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<SessionContext> {
        self.backend.login(username, password).await
    }

    /// Chat console bound to `session`.
    pub async fn open_console(&self, session: &SessionContext) -> ChatConsole {
        let settings = self.config.read().await.get().chat;
        ChatConsole::new(
            session,
            Arc::new(self.backend.with_session(session)),
            self.realtime.clone(),
            &settings,
        )
    }

    pub fn roster(&self, session: &SessionContext) -> RosterService {
        RosterService::new(Arc::new(self.backend.with_session(session)))
    }
}
