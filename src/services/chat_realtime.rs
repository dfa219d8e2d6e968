//! Realtime bridge: one live subscription to the push source at a time.
//!
//! Snapshots are normalized and handed to an [`UpdateHandler`]. Cancelling a
//! subscription waits for its task, so no update for a closed conversation is
//! delivered after `unsubscribe` returns.

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::chat_types::{
    normalize_snapshot, ConversationKey, Message, RealtimeSnapshot, WireMessage,
};
use crate::error::{ConsoleError, Result};

/// Push source keyed by path (`chats/<a>_<b>`, `groupChats/<id>`).
///
/// Each stream item is the full current contents of the path.
#[async_trait::async_trait]
pub trait RealtimeSource: Send + Sync {
    async fn listen(&self, path: &str) -> Result<BoxStream<'static, Result<RealtimeSnapshot>>>;
}

/// Normalized update for the subscribed conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeUpdate {
    pub key: ConversationKey,
    pub messages: Vec<Message>,
    /// The source failed; `messages` is empty and history should be used instead.
    pub degraded: bool,
}

/// Update handler - implemented by the chat console.
pub type UpdateHandler = Arc<dyn RealtimeUpdateHandler + Send + Sync>;

#[async_trait::async_trait]
pub trait RealtimeUpdateHandler: Send + Sync {
    async fn handle_update(&self, update: RealtimeUpdate);
}

/// Shared flag: true while the push source is failing.
#[derive(Debug, Clone, Default)]
pub struct RealtimeHealth(Arc<AtomicBool>);

impl RealtimeHealth {
    pub fn is_degraded(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_degraded(&self, degraded: bool) {
        let was = self.0.swap(degraded, Ordering::SeqCst);
        if was != degraded {
            if degraded {
                log::warn!("Realtime updates degraded, falling back to backend history");
            } else {
                log::info!("Realtime updates restored");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionStatus {
    Live,
    Degraded,
}

struct ActiveSubscription {
    key: ConversationKey,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns at most one realtime subscription.
pub struct RealtimeBridge {
    source: Arc<dyn RealtimeSource>,
    health: RealtimeHealth,
    active: Option<ActiveSubscription>,
}

impl RealtimeBridge {
    pub fn new(source: Arc<dyn RealtimeSource>, health: RealtimeHealth) -> Self {
        Self {
            source,
            health,
            active: None,
        }
    }

    pub fn health(&self) -> &RealtimeHealth {
        &self.health
    }

    /// Key of the running subscription. `None` once its stream has ended.
    pub fn active_key(&self) -> Option<&ConversationKey> {
        self.active
            .as_ref()
            .filter(|a| !a.task.is_finished())
            .map(|a| &a.key)
    }

    /// Subscribe to `key`, cancelling any previous subscription first.
    ///
    /// Re-subscribing the active key also replaces it: the old listener stops
    /// and `handler` receives the current snapshot.
    ///
    /// A source failure is not an error: the handler gets a degraded update
    /// and the status says so.
    pub async fn subscribe(
        &mut self,
        key: ConversationKey,
        handler: UpdateHandler,
    ) -> SubscriptionStatus {
        self.unsubscribe().await;

        let path = key.realtime_path();
        let mut updates = match self.source.listen(&path).await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Realtime listen on {} failed: {}", path, e);
                self.health.set_degraded(true);
                handler.handle_update(degraded_update(&key)).await;
                return SubscriptionStatus::Degraded;
            }
        };

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let health = self.health.clone();
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    item = updates.next() => match item {
                        Some(Ok(snapshot)) => {
                            health.set_degraded(false);
                            let messages = normalize_snapshot(&task_key, &snapshot);
                            log::debug!(
                                "Realtime snapshot for {}: {} messages",
                                task_key,
                                messages.len()
                            );
                            handler
                                .handle_update(RealtimeUpdate {
                                    key: task_key.clone(),
                                    messages,
                                    degraded: false,
                                })
                                .await;
                        }
                        Some(Err(e)) => {
                            log::warn!("Realtime stream for {} failed: {}", task_key, e);
                            health.set_degraded(true);
                            handler.handle_update(degraded_update(&task_key)).await;
                        }
                        None => {
                            log::warn!("Realtime stream for {} ended", task_key);
                            health.set_degraded(true);
                            handler.handle_update(degraded_update(&task_key)).await;
                            break;
                        }
                    }
                }
            }
        });

        log::info!("Subscribed to realtime path {}", path);
        self.active = Some(ActiveSubscription {
            key,
            shutdown_tx,
            task,
        });
        SubscriptionStatus::Live
    }

    /// Cancel the active subscription. No-op when there is none.
    pub async fn unsubscribe(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.shutdown_tx.send(());
        if let Err(e) = active.task.await {
            log::warn!("Realtime task for {} ended abnormally: {}", active.key, e);
        }
        log::info!("Unsubscribed from {}", active.key);
    }
}

fn degraded_update(key: &ConversationKey) -> RealtimeUpdate {
    RealtimeUpdate {
        key: key.clone(),
        messages: Vec::new(),
        degraded: true,
    }
}

// ── Sources ────────────────────────────────────────────────────

type PathState = std::result::Result<RealtimeSnapshot, String>;

/// In-process push source. Backs local runs and tests.
pub struct LocalRealtimeSource {
    paths: Mutex<HashMap<String, watch::Sender<PathState>>>,
    available: AtomicBool,
}

impl LocalRealtimeSource {
    pub fn new() -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// When unavailable, new `listen` calls fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Replace the contents of `path`.
    pub fn publish(&self, path: &str, snapshot: RealtimeSnapshot) {
        self.with_sender(path, |tx| {
            tx.send_replace(Ok(snapshot));
        });
    }

    /// Add or replace one record under `path`.
    pub fn push(&self, path: &str, id: &str, record: WireMessage) {
        self.with_sender(path, |tx| {
            tx.send_modify(|state| match state {
                Ok(snapshot) => {
                    snapshot.insert(id.to_string(), record);
                }
                Err(_) => {
                    let mut snapshot = RealtimeSnapshot::new();
                    snapshot.insert(id.to_string(), record);
                    *state = Ok(snapshot);
                }
            });
        });
    }

    /// Emit a stream error to current listeners of `path`.
    pub fn interrupt(&self, path: &str, reason: &str) {
        self.with_sender(path, |tx| {
            tx.send_replace(Err(reason.to_string()));
        });
    }

    pub fn listener_count(&self, path: &str) -> usize {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn with_sender<F: FnOnce(&watch::Sender<PathState>)>(&self, path: &str, f: F) {
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = paths
            .entry(path.to_string())
            .or_insert_with(|| watch::channel(Ok(RealtimeSnapshot::new())).0);
        f(tx);
    }
}

impl Default for LocalRealtimeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RealtimeSource for LocalRealtimeSource {
    async fn listen(&self, path: &str) -> Result<BoxStream<'static, Result<RealtimeSnapshot>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ConsoleError::RealtimeDegraded(format!(
                "source unavailable for {}",
                path
            )));
        }

        let mut rx = {
            let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
            paths
                .entry(path.to_string())
                .or_insert_with(|| watch::channel(Ok(RealtimeSnapshot::new())).0)
                .subscribe()
        };
        rx.mark_changed();

        let updates = stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let item = rx
                .borrow_and_update()
                .clone()
                .map_err(ConsoleError::RealtimeDegraded);
            Some((item, rx))
        });
        Ok(updates.boxed())
    }
}

/// Source used when realtime is disabled in config.
pub struct UnavailableRealtimeSource;

#[async_trait::async_trait]
impl RealtimeSource for UnavailableRealtimeSource {
    async fn listen(&self, path: &str) -> Result<BoxStream<'static, Result<RealtimeSnapshot>>> {
        Err(ConsoleError::RealtimeDegraded(format!(
            "realtime disabled, not listening on {}",
            path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat_types::WireTimestamp;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Recorder {
        tx: mpsc::UnboundedSender<RealtimeUpdate>,
    }

    #[async_trait::async_trait]
    impl RealtimeUpdateHandler for Recorder {
        async fn handle_update(&self, update: RealtimeUpdate) {
            let _ = self.tx.send(update);
        }
    }

    fn recorder() -> (UpdateHandler, mpsc::UnboundedReceiver<RealtimeUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    fn record(sender: &str, text: &str, ms: i64) -> WireMessage {
        WireMessage {
            sender: Some(sender.into()),
            text: Some(text.into()),
            timestamp: Some(WireTimestamp::Millis(ms)),
            ..Default::default()
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<RealtimeUpdate>) -> RealtimeUpdate {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("handler dropped")
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_and_new_snapshots() {
        let source = Arc::new(LocalRealtimeSource::new());
        let key = ConversationKey::direct("admin", "bob");
        source.push(&key.realtime_path(), "m1", record("bob", "hello", 1_000));

        let mut bridge = RealtimeBridge::new(source.clone(), RealtimeHealth::default());
        let (handler, mut rx) = recorder();
        let status = bridge.subscribe(key.clone(), handler).await;
        assert_eq!(status, SubscriptionStatus::Live);

        let first = next(&mut rx).await;
        assert_eq!(first.key, key);
        assert!(!first.degraded);
        assert_eq!(first.messages.len(), 1);

        source.push(&key.realtime_path(), "m2", record("admin", "hi", 2_000));
        let second = next(&mut rx).await;
        let texts: Vec<&str> = second.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "hi"]);

        bridge.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let source = Arc::new(LocalRealtimeSource::new());
        let key = ConversationKey::group("g1");
        let mut bridge = RealtimeBridge::new(source.clone(), RealtimeHealth::default());
        let (handler, mut rx) = recorder();

        bridge.subscribe(key.clone(), handler).await;
        next(&mut rx).await;

        bridge.unsubscribe().await;
        bridge.unsubscribe().await;
        assert!(bridge.active_key().is_none());
        assert_eq!(source.listener_count(&key.realtime_path()), 0);

        source.push(&key.realtime_path(), "late", record("u1", "late", 5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous_subscription() {
        let source = Arc::new(LocalRealtimeSource::new());
        let a = ConversationKey::direct("admin", "a");
        let b = ConversationKey::direct("admin", "b");
        let mut bridge = RealtimeBridge::new(source.clone(), RealtimeHealth::default());

        let (handler_a, mut rx_a) = recorder();
        bridge.subscribe(a.clone(), handler_a).await;
        next(&mut rx_a).await;

        let (handler_b, mut rx_b) = recorder();
        bridge.subscribe(b.clone(), handler_b).await;
        next(&mut rx_b).await;
        assert_eq!(bridge.active_key(), Some(&b));

        source.push(&a.realtime_path(), "x", record("a", "for a", 10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        bridge.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_resubscribe_same_key_replaces_handler() {
        let source = Arc::new(LocalRealtimeSource::new());
        let key = ConversationKey::group("g1");
        source.push(&key.realtime_path(), "m1", record("u1", "first", 1_000));
        let mut bridge = RealtimeBridge::new(source.clone(), RealtimeHealth::default());

        let (old_handler, mut old_rx) = recorder();
        bridge.subscribe(key.clone(), old_handler).await;
        next(&mut old_rx).await;

        let (new_handler, mut new_rx) = recorder();
        let status = bridge.subscribe(key.clone(), new_handler).await;
        assert_eq!(status, SubscriptionStatus::Live);
        assert_eq!(next(&mut new_rx).await.messages.len(), 1);
        assert_eq!(bridge.active_key(), Some(&key));
        assert_eq!(source.listener_count(&key.realtime_path()), 1);

        source.push(&key.realtime_path(), "m2", record("u2", "second", 2_000));
        assert_eq!(next(&mut new_rx).await.messages.len(), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(old_rx.try_recv().is_err());

        bridge.unsubscribe().await;
    }

    /// Yields one snapshot, then ends.
    struct FiniteSource(RealtimeSnapshot);

    #[async_trait::async_trait]
    impl RealtimeSource for FiniteSource {
        async fn listen(
            &self,
            _path: &str,
        ) -> Result<BoxStream<'static, Result<RealtimeSnapshot>>> {
            Ok(stream::iter(vec![Ok(self.0.clone())]).boxed())
        }
    }

    #[tokio::test]
    async fn test_stream_end_reports_degraded() {
        let mut snapshot = RealtimeSnapshot::new();
        snapshot.insert("m1".to_string(), record("u1", "only", 1_000));
        let health = RealtimeHealth::default();
        let mut bridge = RealtimeBridge::new(Arc::new(FiniteSource(snapshot)), health.clone());
        let (handler, mut rx) = recorder();

        let key = ConversationKey::group("g1");
        assert_eq!(bridge.subscribe(key.clone(), handler).await, SubscriptionStatus::Live);

        let first = next(&mut rx).await;
        assert!(!first.degraded);
        assert_eq!(first.messages.len(), 1);

        let last = next(&mut rx).await;
        assert!(last.degraded);
        assert!(last.messages.is_empty());
        assert_eq!(last.key, key);
        assert!(health.is_degraded());

        for _ in 0..100 {
            if bridge.active_key().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(bridge.active_key().is_none());
        bridge.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_unavailable_source_reports_degraded() {
        let health = RealtimeHealth::default();
        let mut bridge = RealtimeBridge::new(Arc::new(UnavailableRealtimeSource), health.clone());
        let (handler, mut rx) = recorder();

        let status = bridge.subscribe(ConversationKey::group("g1"), handler).await;
        assert_eq!(status, SubscriptionStatus::Degraded);
        assert!(health.is_degraded());

        let update = next(&mut rx).await;
        assert!(update.degraded);
        assert!(update.messages.is_empty());
        assert!(bridge.active_key().is_none());
    }

    #[tokio::test]
    async fn test_stream_error_degrades_then_recovers() {
        let source = Arc::new(LocalRealtimeSource::new());
        let key = ConversationKey::group("g2");
        let health = RealtimeHealth::default();
        let mut bridge = RealtimeBridge::new(source.clone(), health.clone());
        let (handler, mut rx) = recorder();

        bridge.subscribe(key.clone(), handler).await;
        next(&mut rx).await;

        source.interrupt(&key.realtime_path(), "connection reset");
        assert!(next(&mut rx).await.degraded);
        assert!(health.is_degraded());

        source.push(&key.realtime_path(), "m1", record("u1", "back", 7));
        let update = next(&mut rx).await;
        assert!(!update.degraded);
        assert_eq!(update.messages.len(), 1);
        assert!(!health.is_degraded());

        bridge.unsubscribe().await;
    }
}
