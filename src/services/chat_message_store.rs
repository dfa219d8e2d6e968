//! Conversation store: authoritative messages plus optimistic placeholders
//! for the open conversation, reconciled on every merge.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::chat_types::{ConversationKey, DeliveryState, Message};
use super::config::ChatSettings;

/// Handle to a placeholder, returned by [`ConversationStore::insert_pending`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingHandle {
    pub conversation_key: ConversationKey,
    pub local_id: String,
}

/// Bounds a realtime echo must fall in to retire a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchWindow {
    pub after: Duration,
    pub skew: Duration,
}

impl MatchWindow {
    /// Bounds that fall outside chrono's range are treated as open.
    pub fn contains(&self, created_at: DateTime<Utc>, candidate: DateTime<Utc>) -> bool {
        let after_start = created_at
            .checked_sub_signed(self.skew)
            .map_or(true, |start| candidate >= start);
        let before_end = created_at
            .checked_add_signed(self.after)
            .map_or(true, |end| candidate <= end);
        after_start && before_end
    }
}

impl Default for MatchWindow {
    fn default() -> Self {
        Self::from(&ChatSettings::default())
    }
}

impl From<&ChatSettings> for MatchWindow {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            after: millis(settings.confirmation_window_ms),
            skew: millis(settings.clock_skew_ms),
        }
    }
}

/// Config durations saturate at `Duration::MAX`.
fn millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

/// Outcome of a merge, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: bool,
    pub confirmed: usize,
    pub retired_placeholders: usize,
    pub outstanding_placeholders: usize,
}

#[derive(Debug, Clone)]
struct Placeholder {
    message: Message,
    /// Local clock at send time; the display timestamp in `message` may be later.
    created_at: DateTime<Utc>,
    arrival: u64,
    /// Only confirmed messages that first arrived after this seq may retire it.
    watermark: u64,
    acknowledged_id: Option<String>,
}

impl Placeholder {
    fn is_counterpart(
        &self,
        candidate: &Message,
        candidate_arrival: u64,
        window: &MatchWindow,
    ) -> bool {
        if self.acknowledged_id.as_deref() == Some(candidate.id.as_str()) {
            return true;
        }
        candidate_arrival > self.watermark
            && candidate.sender_id == self.message.sender_id
            && candidate.text == self.message.text
            && window.contains(self.created_at, candidate.timestamp)
    }
}

/// One slot of the rendered list.
#[derive(Debug)]
enum Slot<'a> {
    Confirmed { message: &'a Message, arrival: u64 },
    Pending(&'a Placeholder),
}

impl Slot<'_> {
    fn message(&self) -> &Message {
        match self {
            Slot::Confirmed { message, .. } => message,
            Slot::Pending(p) => &p.message,
        }
    }

    /// Sort key: timestamp, then confirmed before pending, then arrival.
    fn order_key(&self) -> (DateTime<Utc>, u8, u64) {
        match self {
            Slot::Confirmed { message, arrival } => (message.timestamp, 0, *arrival),
            Slot::Pending(p) => (p.message.timestamp, 1, p.arrival),
        }
    }
}

#[derive(Debug)]
struct ConversationLog {
    key: ConversationKey,
    authoritative: Vec<(Message, u64)>,
    /// First-seen arrival seq per confirmed id.
    arrivals: HashMap<String, u64>,
    /// Confirmed ids that already retired a placeholder.
    claimed: HashSet<String>,
    placeholders: Vec<Placeholder>,
}

impl ConversationLog {
    fn new(key: ConversationKey) -> Self {
        Self {
            key,
            authoritative: Vec::new(),
            arrivals: HashMap::new(),
            claimed: HashSet::new(),
            placeholders: Vec::new(),
        }
    }

    fn slots(&self) -> Vec<Slot<'_>> {
        let mut slots: Vec<Slot<'_>> = self
            .authoritative
            .iter()
            .map(|(message, arrival)| Slot::Confirmed {
                message,
                arrival: *arrival,
            })
            .chain(self.placeholders.iter().map(Slot::Pending))
            .collect();
        slots.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        slots
    }

    fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.authoritative
            .iter()
            .map(|(m, _)| m.timestamp)
            .chain(self.placeholders.iter().map(|p| p.message.timestamp))
            .max()
    }
}

/// Holds the message list of the currently open conversation.
///
/// Mutated only through `activate`, `merge`, `insert_pending`, `confirm`
/// and `remove`; `current_messages` is the single read path.
#[derive(Debug)]
pub struct ConversationStore {
    active: Option<ConversationLog>,
    window: MatchWindow,
    next_arrival: u64,
}

impl ConversationStore {
    pub fn new(window: MatchWindow) -> Self {
        Self {
            active: None,
            window,
            next_arrival: 0,
        }
    }

    pub fn active_key(&self) -> Option<&ConversationKey> {
        self.active.as_ref().map(|log| &log.key)
    }

    /// Open `key`, discarding the previous conversation and its placeholders.
    ///
    /// Returns false if `key` was already active (nothing discarded).
    pub fn activate(&mut self, key: ConversationKey) -> bool {
        if self.active_key() == Some(&key) {
            return false;
        }
        if let Some(previous) = self.active.take() {
            if !previous.placeholders.is_empty() {
                log::debug!(
                    "Discarding {} unconfirmed placeholder(s) for {}",
                    previous.placeholders.len(),
                    previous.key
                );
            }
        }
        log::debug!("Conversation {} is now active", key);
        self.active = Some(ConversationLog::new(key));
        true
    }

    /// Drop the open conversation entirely.
    pub fn close(&mut self) {
        self.active = None;
    }

    fn log_mut(&mut self, key: &ConversationKey) -> Option<&mut ConversationLog> {
        self.active.as_mut().filter(|log| &log.key == key)
    }

    fn log(&self, key: &ConversationKey) -> Option<&ConversationLog> {
        self.active.as_ref().filter(|log| &log.key == key)
    }

    /// Replace the authoritative messages of `key` and reconcile placeholders.
    pub fn merge(&mut self, key: &ConversationKey, incoming: Vec<Message>) -> MergeReport {
        let window = self.window;
        let mut next_arrival = self.next_arrival;
        let Some(log) = self.active.as_mut().filter(|log| &log.key == key) else {
            log::debug!("Ignoring merge for inactive conversation {}", key);
            return MergeReport::default();
        };

        // Dedup by id (last record wins), then order by timestamp.
        let mut by_id: HashMap<String, Message> = HashMap::with_capacity(incoming.len());
        for mut message in incoming {
            message.delivery_state = DeliveryState::Confirmed;
            message.conversation_key = key.clone();
            by_id.insert(message.id.clone(), message);
        }
        let mut confirmed: Vec<Message> = by_id.into_values().collect();
        confirmed.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let authoritative: Vec<(Message, u64)> = confirmed
            .into_iter()
            .map(|message| {
                let arrival = *log.arrivals.entry(message.id.clone()).or_insert_with(|| {
                    next_arrival += 1;
                    next_arrival
                });
                (message, arrival)
            })
            .collect();

        // Reconciliation pass: first match wins, in placeholder-creation order.
        let claimed = &mut log.claimed;
        let before = log.placeholders.len();
        log.placeholders.retain(|placeholder| {
            let counterpart = authoritative.iter().find(|(candidate, arrival)| {
                !claimed.contains(&candidate.id)
                    && placeholder.is_counterpart(candidate, *arrival, &window)
            });
            match counterpart {
                Some((candidate, _)) => {
                    log::debug!(
                        "Placeholder {} reconciled with {}",
                        placeholder.message.id,
                        candidate.id
                    );
                    claimed.insert(candidate.id.clone());
                    false
                }
                None => true,
            }
        });

        let report = MergeReport {
            applied: true,
            confirmed: authoritative.len(),
            retired_placeholders: before - log.placeholders.len(),
            outstanding_placeholders: log.placeholders.len(),
        };
        log.authoritative = authoritative;
        self.next_arrival = next_arrival;
        report
    }

    /// Append a provisional message to its conversation.
    ///
    /// The placeholder is displayed at the end of the current list even if
    /// its local timestamp is older than messages already shown. Returns
    /// `None` if the message's conversation is not the active one.
    pub fn insert_pending(&mut self, mut message: Message) -> Option<PendingHandle> {
        let key = message.conversation_key.clone();
        self.next_arrival += 1;
        let arrival = self.next_arrival;
        let watermark = arrival;

        let log = self.log_mut(&key)?;
        let created_at = message.timestamp;
        if let Some(latest) = log.latest_timestamp() {
            if latest > message.timestamp {
                message.timestamp = latest;
            }
        }
        message.delivery_state = DeliveryState::Pending;

        let handle = PendingHandle {
            conversation_key: key,
            local_id: message.id.clone(),
        };
        log.placeholders.push(Placeholder {
            message,
            created_at,
            arrival,
            watermark,
            acknowledged_id: None,
        });
        Some(handle)
    }

    /// Mark a placeholder as acknowledged by the backend.
    ///
    /// It stays in place (state `Confirmed`) until a realtime snapshot carries
    /// its counterpart, matched by `acknowledged_id` or by content.
    pub fn confirm(&mut self, handle: &PendingHandle, acknowledged_id: Option<String>) -> bool {
        let Some(log) = self.log_mut(&handle.conversation_key) else {
            return false;
        };
        match log
            .placeholders
            .iter_mut()
            .find(|p| p.message.id == handle.local_id)
        {
            Some(placeholder) => {
                placeholder.message.delivery_state = DeliveryState::Confirmed;
                if acknowledged_id.is_some() {
                    placeholder.acknowledged_id = acknowledged_id;
                }
                true
            }
            None => false,
        }
    }

    /// Roll back a placeholder. Returns it marked `Failed`.
    pub fn remove(&mut self, handle: &PendingHandle) -> Option<Message> {
        let log = self.log_mut(&handle.conversation_key)?;
        let index = log
            .placeholders
            .iter()
            .position(|p| p.message.id == handle.local_id)?;
        let mut message = log.placeholders.remove(index).message;
        message.delivery_state = DeliveryState::Failed;
        Some(message)
    }

    /// Merged, sorted, deduplicated view of `key`. Empty if `key` is not open.
    pub fn current_messages(&self, key: &ConversationKey) -> Vec<Message> {
        self.log(key)
            .map(|log| log.slots().iter().map(|s| s.message().clone()).collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, key: &ConversationKey) -> usize {
        self.log(key).map(|log| log.placeholders.len()).unwrap_or(0)
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(MatchWindow::default())
    }
}

/// Whether `messages` is non-decreasing by timestamp.
pub fn is_chronological(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp)
}
