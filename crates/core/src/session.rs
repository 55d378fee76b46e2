//! Bounded in-memory conversation windows.
//!
//! Each key owns a fixed-size FIFO of turns. The map itself is sharded by
//! key: a map-level `RwLock` guards membership only, and every entry
//! carries its own locks so different keys never contend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::config::SessionScope;
use crate::domain::business::BusinessId;
use crate::domain::chat::{ChatId, Turn};

pub const DEFAULT_WINDOW: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn for_business(business_id: &BusinessId) -> Self {
        Self(business_id.0.clone())
    }

    pub fn for_chat(business_id: &BusinessId, chat_id: &ChatId) -> Self {
        Self(format!("{}/{}", business_id.0, chat_id.0))
    }

    pub fn resolve(
        scope: SessionScope,
        business_id: &BusinessId,
        chat_id: Option<&ChatId>,
    ) -> Self {
        match (scope, chat_id) {
            (SessionScope::Chat, Some(chat_id)) => Self::for_chat(business_id, chat_id),
            _ => Self::for_business(business_id),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Held for the duration of one request/response exchange on a key.
pub type ExchangeGuard = OwnedMutexGuard<()>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Appends a turn, dropping the oldest turns beyond the window.
    async fn append(&self, key: &SessionKey, turn: Turn);

    /// Current window in order. Empty for unknown keys.
    async fn snapshot(&self, key: &SessionKey) -> Vec<Turn>;

    /// Serializes whole exchanges on one key. Appends made while holding
    /// the guard are never interleaved with another exchange on that key.
    async fn exchange_lock(&self, key: &SessionKey) -> ExchangeGuard;

    /// Drops sessions untouched for longer than `max_idle` that nobody is
    /// currently using. Returns how many were dropped.
    async fn evict_idle(&self, max_idle: Duration) -> usize;

    async fn session_count(&self) -> usize;
}

struct SessionLog {
    turns: VecDeque<Turn>,
    last_touched: Instant,
}

struct SessionEntry {
    exchange: Arc<Mutex<()>>,
    log: Mutex<SessionLog>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            exchange: Arc::new(Mutex::new(())),
            log: Mutex::new(SessionLog { turns: VecDeque::new(), last_touched: Instant::now() }),
        }
    }
}

pub struct InMemorySessionStore {
    window: usize,
    sessions: RwLock<HashMap<SessionKey, Arc<SessionEntry>>>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl InMemorySessionStore {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), sessions: RwLock::new(HashMap::new()) }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    async fn entry(&self, key: &SessionKey) -> Arc<SessionEntry> {
        if let Some(entry) = self.sessions.read().await.get(key) {
            return Arc::clone(entry);
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(key.clone()).or_insert_with(|| Arc::new(SessionEntry::new())))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(&self, key: &SessionKey, turn: Turn) {
        let entry = self.entry(key).await;
        let mut log = entry.log.lock().await;
        log.turns.push_back(turn);
        while log.turns.len() > self.window {
            log.turns.pop_front();
        }
        log.last_touched = Instant::now();
    }

    async fn snapshot(&self, key: &SessionKey) -> Vec<Turn> {
        let entry = match self.sessions.read().await.get(key) {
            Some(entry) => Arc::clone(entry),
            None => return Vec::new(),
        };
        let log = entry.log.lock().await;
        log.turns.iter().cloned().collect()
    }

    async fn exchange_lock(&self, key: &SessionKey) -> ExchangeGuard {
        let entry = self.entry(key).await;
        let exchange = Arc::clone(&entry.exchange);
        drop(entry);
        exchange.lock_owned().await
    }

    async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            // Anyone holding a clone of the entry or its exchange lock is mid-request.
            if Arc::strong_count(entry) > 1 || Arc::strong_count(&entry.exchange) > 1 {
                return true;
            }
            match entry.log.try_lock() {
                Ok(log) => log.last_touched.elapsed() <= max_idle,
                Err(_) => true,
            }
        });
        before - sessions.len()
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::SessionScope;
    use crate::domain::business::BusinessId;
    use crate::domain::chat::{ChatId, Turn};

    use super::{InMemorySessionStore, SessionKey, SessionStore};

    fn key(id: &str) -> SessionKey {
        SessionKey::for_business(&BusinessId(id.to_string()))
    }

    #[tokio::test]
    async fn window_keeps_last_turns_in_order() {
        let store = InMemorySessionStore::new(10);
        let key = key("B1");

        for index in 0..25 {
            store.append(&key, Turn::user(format!("message {index}"))).await;
        }

        let snapshot = store.snapshot(&key).await;
        assert_eq!(snapshot.len(), 10);
        let expected = (15..25).map(|index| format!("message {index}")).collect::<Vec<_>>();
        let actual = snapshot.into_iter().map(|turn| turn.content).collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn unknown_key_has_empty_snapshot_and_is_not_created() {
        let store = InMemorySessionStore::default();

        assert!(store.snapshot(&key("missing")).await.is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let store = InMemorySessionStore::default();
        store.append(&key("B1"), Turn::user("one")).await;
        store.append(&key("B2"), Turn::user("two")).await;

        assert_eq!(store.snapshot(&key("B1")).await, vec![Turn::user("one")]);
        assert_eq!(store.snapshot(&key("B2")).await, vec![Turn::user("two")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_on_one_key_are_not_lost() {
        let store = Arc::new(InMemorySessionStore::new(500));
        let key = key("B1");

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                for index in 0..25 {
                    store.append(&key, Turn::user(format!("{worker}-{index}"))).await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("append task");
        }

        let snapshot = store.snapshot(&key).await;
        assert_eq!(snapshot.len(), 200);
        for worker in 0..8 {
            let positions = snapshot
                .iter()
                .filter(|turn| turn.content.starts_with(&format!("{worker}-")))
                .map(|turn| turn.content.clone())
                .collect::<Vec<_>>();
            let expected = (0..25).map(|index| format!("{worker}-{index}")).collect::<Vec<_>>();
            assert_eq!(positions, expected, "per-writer order must survive");
        }
    }

    #[tokio::test]
    async fn exchange_lock_serializes_full_exchanges() {
        let store = Arc::new(InMemorySessionStore::default());
        let key = key("B1");

        let guard = store.exchange_lock(&key).await;
        let contender = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = store.exchange_lock(&key).await;
                store.append(&key, Turn::user("second")).await;
            })
        };

        store.append(&key, Turn::user("first")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.append(&key, Turn::assistant("first reply")).await;
        drop(guard);
        contender.await.expect("contender");

        let contents =
            store.snapshot(&key).await.into_iter().map(|turn| turn.content).collect::<Vec<_>>();
        assert_eq!(contents, vec!["first", "first reply", "second"]);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let store = InMemorySessionStore::default();
        store.append(&key("B1"), Turn::user("hello")).await;
        store.append(&key("B2"), Turn::user("hello")).await;

        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(store.evict_idle(Duration::from_millis(5)).await, 2);
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn sessions_in_use_survive_eviction() {
        let store = InMemorySessionStore::default();
        store.append(&key("B1"), Turn::user("hello")).await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let guard = store.exchange_lock(&key("B1")).await;
        assert_eq!(store.evict_idle(Duration::from_millis(5)).await, 0);
        drop(guard);
        assert_eq!(store.evict_idle(Duration::from_millis(5)).await, 1);
    }

    #[test]
    fn chat_scope_keys_per_conversation_when_chat_id_is_known() {
        let business = BusinessId("B1".to_string());
        let chat = ChatId("c-9".to_string());

        assert_eq!(SessionKey::resolve(SessionScope::Business, &business, Some(&chat)).as_str(), "B1");
        assert_eq!(SessionKey::resolve(SessionScope::Chat, &business, Some(&chat)).as_str(), "B1/c-9");
        assert_eq!(SessionKey::resolve(SessionScope::Chat, &business, None).as_str(), "B1");
    }
}
