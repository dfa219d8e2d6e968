//! Chat console: ties the conversation store, realtime bridge and send
//! coordinator together for one admin session.

use chrono::Local;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::chat_format::{self, ConversationView};
use super::chat_message_store::{ConversationStore, MatchWindow};
use super::chat_realtime::{
    RealtimeBridge, RealtimeHealth, RealtimeSource, RealtimeUpdate, RealtimeUpdateHandler,
    SubscriptionStatus,
};
use super::chat_send::{SendCoordinator, SendReceipt};
use super::chat_types::{
    normalize_history, ConversationKey, ConversationSummary, Message, Participant,
};
use super::config::ChatSettings;
use super::session::SessionContext;
use crate::backend_api::BackendApi;
use crate::error::{ConsoleError, Result};

pub struct ChatConsole {
    me: Participant,
    backend: Arc<dyn BackendApi>,
    store: Arc<RwLock<ConversationStore>>,
    bridge: Mutex<RealtimeBridge>,
    health: RealtimeHealth,
    sender: SendCoordinator,
}

impl ChatConsole {
    pub fn new(
        session: &SessionContext,
        backend: Arc<dyn BackendApi>,
        source: Arc<dyn RealtimeSource>,
        settings: &ChatSettings,
    ) -> Self {
        let store = Arc::new(RwLock::new(ConversationStore::new(MatchWindow::from(settings))));
        let health = RealtimeHealth::default();
        let sender = SendCoordinator::new(
            backend.clone(),
            store.clone(),
            health.clone(),
            settings.max_message_size,
        );
        Self {
            me: session.admin().as_participant(),
            backend,
            store,
            bridge: Mutex::new(RealtimeBridge::new(source, health.clone())),
            health,
            sender,
        }
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    // ── Conversation selection ─────────────────────────────────

    pub async fn open_direct(&self, peer_id: &str) -> Result<ConversationKey> {
        let key = ConversationKey::direct(&self.me.id, peer_id);
        self.select(key.clone()).await?;
        Ok(key)
    }

    pub async fn open_group(&self, group_id: &str) -> Result<ConversationKey> {
        let key = ConversationKey::group(group_id);
        self.select(key.clone()).await?;
        Ok(key)
    }

    /// Switch to `key`: cancel the old subscription, load history, subscribe.
    async fn select(&self, key: ConversationKey) -> Result<SubscriptionStatus> {
        // Held across the whole switch so concurrent opens serialize.
        let mut bridge = self.bridge.lock().await;
        bridge.unsubscribe().await;
        self.store.write().await.activate(key.clone());

        let fallback = match self.fetch_history(&key).await {
            Ok(messages) => messages,
            Err(e) if e.is_unauthorized() => return Err(e),
            Err(e) => {
                log::warn!("History for {} unavailable: {}", key, e);
                Vec::new()
            }
        };
        self.store.write().await.merge(&key, fallback.clone());

        let handler = Arc::new(ConsoleUpdateAdapter {
            store: self.store.clone(),
            fallback,
        });
        let status = bridge.subscribe(key.clone(), handler).await;
        log::info!("Opened conversation {} ({:?})", key, status);
        Ok(status)
    }

    async fn fetch_history(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        let records = match key {
            ConversationKey::Direct { .. } => {
                let peer = key.peer_of(&self.me.id).ok_or_else(|| {
                    ConsoleError::ChatError(format!(
                        "{} is not a participant of {}",
                        self.me.id, key
                    ))
                })?;
                self.backend.get_conversation(peer).await?
            }
            ConversationKey::Group { group_id } => {
                self.backend.get_group_conversation(group_id).await?
            }
        };
        Ok(normalize_history(key, &records))
    }

    /// Cancel realtime interest and drop the open conversation.
    pub async fn close(&self) {
        self.bridge.lock().await.unsubscribe().await;
        self.store.write().await.close();
    }

    // ── Reads ──────────────────────────────────────────────────

    pub async fn active_key(&self) -> Option<ConversationKey> {
        self.store.read().await.active_key().cloned()
    }

    pub async fn current_messages(&self, key: &ConversationKey) -> Vec<Message> {
        self.store.read().await.current_messages(key)
    }

    pub fn group_header(&self, messages: &[Message]) -> Option<String> {
        chat_format::group_header(messages)
    }

    /// Rendered view of `key` for the logged-in admin.
    pub async fn view(&self, key: &ConversationKey) -> ConversationView {
        let messages = self.current_messages(key).await;
        chat_format::present(&messages, &self.me.id, Local::now())
    }

    pub fn realtime_degraded(&self) -> bool {
        self.health.is_degraded()
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.backend.get_conversations().await
    }

    // ── Sending ────────────────────────────────────────────────

    pub async fn send(&self, key: &ConversationKey, text: &str) -> Result<Option<SendReceipt>> {
        self.sender.send(key, text, &self.me).await
    }
}

/// Feeds realtime updates into the store. Empty or degraded updates fall
/// back to the history fetched when the conversation was opened.
struct ConsoleUpdateAdapter {
    store: Arc<RwLock<ConversationStore>>,
    fallback: Vec<Message>,
}

#[async_trait::async_trait]
impl RealtimeUpdateHandler for ConsoleUpdateAdapter {
    async fn handle_update(&self, update: RealtimeUpdate) {
        let messages = if update.messages.is_empty() {
            self.fallback.clone()
        } else {
            update.messages
        };
        let report = self.store.write().await.merge(&update.key, messages);
        if report.retired_placeholders > 0 {
            log::debug!(
                "{} placeholder(s) confirmed in {}",
                report.retired_placeholders,
                update.key
            );
        }
    }
}
