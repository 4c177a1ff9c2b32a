use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chat_api::{now_millis, UserProfile};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::backend::{PresenceBackend, Subscription, UsersCallback};
use crate::error::SyncResult;

pub const DEFAULT_ONLINE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Known users ordered by most recent activity.
pub struct OnlineRoster {
    users: Mutex<Vec<UserProfile>>,
    window: Duration,
}

impl OnlineRoster {
    pub fn new(window: Duration) -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            window,
        }
    }

    /// Replace the user list.
    pub fn update(&self, mut users: Vec<UserProfile>) {
        users.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        *self.users.lock() = users;
    }

    pub fn users(&self) -> Vec<UserProfile> {
        self.users.lock().clone()
    }

    /// Users whose last activity lies within the window before `now_ms`.
    pub fn online_ids_at(&self, now_ms: i64) -> HashSet<String> {
        let window = self.window.as_millis() as i64;
        self.users
            .lock()
            .iter()
            .filter(|u| now_ms - u.last_active < window)
            .map(|u| u.uid.clone())
            .collect()
    }

    pub fn online_ids(&self) -> HashSet<String> {
        self.online_ids_at(now_millis())
    }

    pub fn is_online(&self, uid: &str) -> bool {
        self.online_ids().contains(uid)
    }
}

/// Keeps an [`OnlineRoster`] fed from the backend user list.
pub struct PresenceWatcher {
    roster: Arc<OnlineRoster>,
    _subscription: Subscription,
}

impl PresenceWatcher {
    pub fn watch(backend: &dyn PresenceBackend, window: Duration) -> SyncResult<Self> {
        let roster = Arc::new(OnlineRoster::new(window));
        let sink = roster.clone();
        let callback: UsersCallback = Arc::new(move |users: Vec<UserProfile>| sink.update(users));
        let subscription = backend.subscribe_users(callback)?;
        Ok(Self {
            roster,
            _subscription: subscription,
        })
    }

    pub fn roster(&self) -> &OnlineRoster {
        &self.roster
    }
}

/// Refreshes the signed-in user's `last_active` on a fixed period so other
/// clients keep seeing them online. The first touch happens right away.
/// Stops when dropped.
pub struct PresenceHeartbeat {
    task: JoinHandle<()>,
}

impl PresenceHeartbeat {
    pub fn start(backend: Arc<dyn PresenceBackend>, uid: &str, every: Duration) -> Self {
        let uid = uid.to_string();
        let every = every.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match backend.touch_last_active(&uid).await {
                    Ok(()) => debug!(%uid, "presence heartbeat"),
                    Err(e) => warn!(%uid, error = %e, "presence heartbeat failed"),
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for PresenceHeartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryBackend;

    fn user(uid: &str, last_active: i64) -> UserProfile {
        UserProfile {
            uid: uid.into(),
            display_name: uid.to_uppercase(),
            email: format!("{uid}@example.com"),
            photo_url: None,
            created_at: 0,
            last_active,
        }
    }

    #[test]
    fn window_and_ordering() {
        let roster = OnlineRoster::new(DEFAULT_ONLINE_WINDOW);
        roster.update(vec![user("a", 10_000), user("b", 100_000), user("c", 45_000)]);
        let order: Vec<_> = roster.users().into_iter().map(|u| u.uid).collect();
        assert_eq!(order, ["b", "c", "a"]);
        let online = roster.online_ids_at(100_000);
        assert!(online.contains("b"));
        assert!(online.contains("c"));
        assert!(!online.contains("a"));
        // exactly one window old is offline
        assert!(!roster.online_ids_at(105_000).contains("c"));
    }

    #[tokio::test]
    async fn watcher_follows_backend() {
        let backend = InMemoryBackend::new();
        let watcher = PresenceWatcher::watch(&backend, DEFAULT_ONLINE_WINDOW).unwrap();
        assert!(watcher.roster().users().is_empty());
        backend.upsert_profile(user("u1", 0)).await.unwrap();
        assert!(!watcher.roster().is_online("u1"));
        backend.touch_last_active("u1").await.unwrap();
        assert!(watcher.roster().is_online("u1"));
        assert!(backend.touch_last_active("ghost").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_refreshes_last_active_until_dropped() {
        let backend = Arc::new(InMemoryBackend::new());
        let last_active = || backend.user("u1").map(|u| u.last_active);
        backend.upsert_profile(user("u1", 0)).await.unwrap();

        let heartbeat = PresenceHeartbeat::start(backend.clone(), "u1", DEFAULT_HEARTBEAT);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(last_active().unwrap() > 0);

        backend.upsert_profile(user("u1", 0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(last_active(), Some(0));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(last_active().unwrap() > 0);

        drop(heartbeat);
        backend.upsert_profile(user("u1", 0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(last_active(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_survives_backend_errors() {
        let backend = Arc::new(InMemoryBackend::new());
        let _heartbeat = PresenceHeartbeat::start(backend.clone(), "u1", DEFAULT_HEARTBEAT);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(backend.user("u1").is_none());

        backend.upsert_profile(user("u1", 0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(backend.user("u1").unwrap().last_active > 0);
    }
}
