use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_api::TypingState;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::backend::{Subscription, TypingBackend, TypingCallback};
use crate::error::SyncResult;

pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(2000);

struct Pending {
    seq: u64,
    last_sent: Instant,
    reset: JoinHandle<()>,
}

type PendingMap = HashMap<(String, String), Pending>;

/// Remove the entry for `key` if it still belongs to reset task `seq`.
/// Returns false when a newer keystroke replaced it.
fn take_if_current(pending: &Mutex<PendingMap>, key: &(String, String), seq: u64) -> bool {
    let mut guard = pending.lock();
    if guard.get(key).is_some_and(|p| p.seq == seq) {
        guard.remove(key);
        true
    } else {
        false
    }
}

/// Publishes the local user's typing flag. The flag is cleared again once
/// no keystroke arrived for `idle`.
pub struct TypingNotifier {
    backend: Arc<dyn TypingBackend>,
    idle: Duration,
    next_seq: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
}

impl TypingNotifier {
    pub fn new(backend: Arc<dyn TypingBackend>, idle: Duration) -> Self {
        Self {
            backend,
            idle,
            next_seq: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a keystroke. Without a signed-in user this does nothing.
    /// The `true` flag is re-sent at most every `idle / 2`; the reset timer is
    /// pushed back on every call.
    pub async fn start_typing(&self, room_id: &str, user_id: Option<&str>) -> SyncResult<()> {
        let Some(user_id) = user_id else {
            return Ok(());
        };
        let key = (room_id.to_string(), user_id.to_string());
        let now = Instant::now();
        let recently_sent = self
            .pending
            .lock()
            .get(&key)
            .is_some_and(|p| now.duration_since(p.last_sent) < self.idle / 2);
        if !recently_sent {
            self.backend.set_typing(room_id, user_id, true).await?;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let backend = self.backend.clone();
        let pending = self.pending.clone();
        let idle = self.idle;
        let task_key = key.clone();
        let reset = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if !take_if_current(&pending, &task_key, seq) {
                return;
            }
            let (room, user) = task_key;
            if let Err(e) = backend.set_typing(&room, &user, false).await {
                warn!(%room, %user, error = %e, "failed to clear typing flag");
            }
        });

        let mut guard = self.pending.lock();
        let last_sent = match guard.get(&key) {
            Some(p) if recently_sent => p.last_sent,
            _ => now,
        };
        let entry = Pending {
            seq,
            last_sent,
            reset,
        };
        if let Some(previous) = guard.insert(key, entry) {
            previous.reset.abort();
        }
        Ok(())
    }

    /// Clear the flag right away, e.g. after the message was sent.
    pub async fn stop_typing(&self, room_id: &str, user_id: &str) -> SyncResult<()> {
        let key = (room_id.to_string(), user_id.to_string());
        if let Some(previous) = self.pending.lock().remove(&key) {
            previous.reset.abort();
        }
        self.backend.set_typing(room_id, user_id, false).await?;
        Ok(())
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        for (_, pending) in self.pending.lock().drain() {
            pending.reset.abort();
        }
    }
}

/// Indicator text for `count` other users typing.
pub fn typing_label(count: usize) -> Option<&'static str> {
    match count {
        0 => None,
        1 => Some("Someone is typing..."),
        _ => Some("People are typing..."),
    }
}

/// Tracks who else is typing in a room.
pub struct TypingWatcher {
    others: Arc<Mutex<Vec<TypingState>>>,
    _subscription: Subscription,
}

impl TypingWatcher {
    /// Subscribe to typing states of `room_id`. States of `self_user` are
    /// ignored. `on_change` runs after every update.
    pub fn watch<F>(
        backend: &dyn TypingBackend,
        room_id: &str,
        self_user: Option<&str>,
        on_change: F,
    ) -> SyncResult<Self>
    where
        F: Fn(&[TypingState]) + Send + Sync + 'static,
    {
        let others = Arc::new(Mutex::new(Vec::new()));
        let sink = others.clone();
        let me = self_user.map(str::to_string);
        let callback: TypingCallback = Arc::new(move |states: Vec<TypingState>| {
            let filtered: Vec<TypingState> = states
                .into_iter()
                .filter(|s| s.is_typing && Some(&s.user_id) != me.as_ref())
                .collect();
            on_change(&filtered);
            *sink.lock() = filtered;
        });
        let subscription = backend.subscribe_typing(room_id, callback)?;
        Ok(Self {
            others,
            _subscription: subscription,
        })
    }

    pub fn typing_users(&self) -> Vec<TypingState> {
        self.others.lock().clone()
    }

    pub fn label(&self) -> Option<&'static str> {
        typing_label(self.others.lock().len())
    }
}
