//! Optimistic sends: placeholder first, backend call second.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::chat_message_store::ConversationStore;
use super::chat_realtime::RealtimeHealth;
use super::chat_types::{ConversationKey, DeliveryState, Message, Participant, UNKNOWN_SENDER};
use crate::backend_api::BackendApi;
use crate::error::{ConsoleError, Result};

/// Result of an accepted send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub local_id: String,
    /// Id assigned by the backend, when it echoed the stored message.
    pub backend_id: Option<String>,
    /// True when the placeholder was confirmed in place (realtime degraded).
    pub confirmed: bool,
}

enum Target<'a> {
    User(&'a str),
    Group(&'a str),
}

#[derive(Clone)]
pub struct SendCoordinator {
    backend: Arc<dyn BackendApi>,
    store: Arc<RwLock<ConversationStore>>,
    health: RealtimeHealth,
    max_message_size: usize,
}

impl SendCoordinator {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        store: Arc<RwLock<ConversationStore>>,
        health: RealtimeHealth,
        max_message_size: usize,
    ) -> Self {
        Self {
            backend,
            store,
            health,
            max_message_size,
        }
    }

    /// Send `text` to `key` as `sender`.
    ///
    /// Whitespace-only text is ignored (`Ok(None)`). The placeholder is
    /// visible before the backend call starts and is removed if the call
    /// fails; there is no retry.
    pub async fn send(
        &self,
        key: &ConversationKey,
        text: &str,
        sender: &Participant,
    ) -> Result<Option<SendReceipt>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if text.len() > self.max_message_size {
            return Err(ConsoleError::Validation(format!(
                "Message is {} bytes, limit is {}",
                text.len(),
                self.max_message_size
            )));
        }

        let target = match key {
            ConversationKey::Direct { .. } => {
                let peer = key.peer_of(&sender.id).ok_or_else(|| {
                    ConsoleError::ChatError(format!(
                        "{} is not a participant of {}",
                        sender.id, key
                    ))
                })?;
                Target::User(peer)
            }
            ConversationKey::Group { group_id } => Target::Group(group_id),
        };

        let placeholder = Message {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            conversation_key: key.clone(),
            sender_id: sender.id.clone(),
            sender_display_name: sender
                .username
                .clone()
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            text: text.to_string(),
            timestamp: Utc::now(),
            delivery_state: DeliveryState::Pending,
        };

        // Lock released before the first await on the backend.
        let handle = {
            let mut store = self.store.write().await;
            store.insert_pending(placeholder)
        }
        .ok_or_else(|| ConsoleError::ChatError(format!("Conversation {} is not open", key)))?;

        let result = match target {
            Target::User(peer) => self.backend.send_message(peer, text).await,
            Target::Group(group_id) => self.backend.send_group_message(group_id, text).await,
        };

        match result {
            Ok(echo) => {
                let backend_id = echo.and_then(|m| m.id);
                let confirmed = if self.health.is_degraded() {
                    self.store
                        .write()
                        .await
                        .confirm(&handle, backend_id.clone())
                } else {
                    false
                };
                log::debug!(
                    "Sent {} to {} (backend id {:?}, confirmed {})",
                    handle.local_id,
                    key,
                    backend_id,
                    confirmed
                );
                Ok(Some(SendReceipt {
                    local_id: handle.local_id,
                    backend_id,
                    confirmed,
                }))
            }
            Err(e) => {
                log::warn!("Send to {} failed: {}", key, e);
                self.store.write().await.remove(&handle);
                Err(e)
            }
        }
    }
}
