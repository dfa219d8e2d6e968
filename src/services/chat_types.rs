use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ── Conversation identity ──────────────────────────────────────

/// Delimiter between the two participant ids of a direct conversation key.
pub const DIRECT_KEY_DELIMITER: &str = "_";

const DIRECT_REALTIME_ROOT: &str = "chats";
const GROUP_REALTIME_ROOT: &str = "groupChats";

/// Display name used when a record carries no sender name.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Identity of a conversation, shared by backend queries and realtime subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ConversationKey {
    /// Participants are stored sorted, so `direct(a, b) == direct(b, a)`.
    Direct { participants: [String; 2] },
    Group {
        #[serde(rename = "groupId")]
        group_id: String,
    },
}

impl ConversationKey {
    pub fn direct(user_a: &str, user_b: &str) -> Self {
        let mut participants = [user_a.to_string(), user_b.to_string()];
        participants.sort();
        ConversationKey::Direct { participants }
    }

    pub fn group(group_id: &str) -> Self {
        ConversationKey::Group {
            group_id: group_id.to_string(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ConversationKey::Group { .. })
    }

    /// The other participant of a direct conversation, seen from `me`.
    pub fn peer_of(&self, me: &str) -> Option<&str> {
        match self {
            ConversationKey::Direct { participants } => {
                if participants[0] == me {
                    Some(participants[1].as_str())
                } else if participants[1] == me {
                    Some(participants[0].as_str())
                } else {
                    None
                }
            }
            ConversationKey::Group { .. } => None,
        }
    }

    /// Path the realtime source publishes this conversation under.
    pub fn realtime_path(&self) -> String {
        match self {
            ConversationKey::Direct { .. } => format!("{}/{}", DIRECT_REALTIME_ROOT, self),
            ConversationKey::Group { group_id } => {
                format!("{}/{}", GROUP_REALTIME_ROOT, group_id)
            }
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKey::Direct { participants } => {
                write!(f, "{}", participants.join(DIRECT_KEY_DELIMITER))
            }
            ConversationKey::Group { group_id } => write!(f, "{}", group_id),
        }
    }
}

// ── Messages ───────────────────────────────────────────────────

/// Delivery state of a message in the conversation store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    /// Optimistic, not yet seen on the realtime stream.
    Pending,
    Confirmed,
    /// Rejected by the backend. Never rendered.
    Failed,
}

/// A message as the rest of the console sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_key: ConversationKey,
    pub sender_id: String,
    pub sender_display_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub delivery_state: DeliveryState,
}

/// A user reference embedded in wire messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// User reference: the backend returns either a bare id or a populated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    User(Participant),
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::User(p) => &p.id,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            UserRef::Id(_) => None,
            UserRef::User(p) => p.username.as_deref(),
        }
    }
}

impl From<&str> for UserRef {
    fn from(id: &str) -> Self {
        UserRef::Id(id.to_string())
    }
}

/// Either epoch milliseconds (realtime) or an RFC3339 string (REST).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            WireTimestamp::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&Utc))
                .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
        }
    }
}

/// Message record as delivered by the realtime source or the REST backend.
///
/// The two sources disagree on field names; every known variant is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<Participant>,
    #[serde(default)]
    pub sender: Option<UserRef>,
    #[serde(default)]
    pub sender_info: Option<Participant>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    #[serde(default)]
    pub created_at: Option<WireTimestamp>,
}

impl WireMessage {
    /// Normalize into a confirmed [`Message`] for `key`.
    ///
    /// `fallback_id` is used when the record has no id of its own (realtime
    /// snapshots key records by id instead of embedding it). Returns `None`
    /// for records missing a sender or a usable timestamp.
    pub fn normalize(&self, key: &ConversationKey, fallback_id: Option<&str>) -> Option<Message> {
        let id = self.id.as_deref().or(fallback_id)?.to_string();
        let sender_id = self
            .from
            .as_ref()
            .map(|p| p.id.clone())
            .or_else(|| self.sender.as_ref().map(|s| s.id().to_string()))
            .or_else(|| self.sender_info.as_ref().map(|p| p.id.clone()))?;
        let sender_display_name = self
            .from
            .as_ref()
            .and_then(|p| p.username.clone())
            .or_else(|| self.sender.as_ref().and_then(|s| s.username().map(str::to_string)))
            .or_else(|| self.sender_info.as_ref().and_then(|p| p.username.clone()))
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        let timestamp = self
            .timestamp
            .as_ref()
            .or(self.created_at.as_ref())
            .and_then(WireTimestamp::to_datetime)?;
        let text = self
            .text
            .clone()
            .or_else(|| self.content.clone())
            .unwrap_or_default();

        Some(Message {
            id,
            conversation_key: key.clone(),
            sender_id,
            sender_display_name,
            text,
            timestamp,
            delivery_state: DeliveryState::Confirmed,
        })
    }
}

/// Full replacement set for one conversation: message id → record.
pub type RealtimeSnapshot = HashMap<String, WireMessage>;

/// Normalize a realtime snapshot into messages sorted by timestamp.
pub fn normalize_snapshot(key: &ConversationKey, snapshot: &RealtimeSnapshot) -> Vec<Message> {
    let mut messages: Vec<Message> = snapshot
        .iter()
        .filter_map(|(id, record)| {
            let normalized = record.normalize(key, Some(id));
            if normalized.is_none() {
                log::warn!("Skipping malformed realtime record {} in {}", id, key);
            }
            normalized
        })
        .collect();
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    messages
}

/// Normalize a backend conversation history.
pub fn normalize_history(key: &ConversationKey, records: &[WireMessage]) -> Vec<Message> {
    records
        .iter()
        .filter_map(|record| {
            let normalized = record.normalize(key, None);
            if normalized.is_none() {
                log::warn!("Skipping malformed history record in {}", key);
            }
            normalized
        })
        .collect()
}

// ── Roster types ───────────────────────────────────────────────

/// A user as listed by the backend roster endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Group record from `/groups`. Members come back as ids or populated users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserRef>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Group {
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.id().to_string()).collect()
    }
}

/// Summary of a conversation for listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(alias = "userId", alias = "_id")]
    pub id: String,
    #[serde(default, alias = "username")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<WireTimestamp>,
    #[serde(default)]
    pub unread_count: u32,
}

fn default_true() -> bool {
    true
}
