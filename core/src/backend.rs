//! Seams to the hosted document, storage and presence services.
//!
//! Everything the client needs from the outside world goes through these
//! traits so the engine can run against the real service or the in-memory
//! implementation in [`crate::services::memory`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chat_api::{Cursor, Message, MessageBody, Page, Room, TypingState, UserProfile};
use parking_lot::Mutex;

use crate::error::BackendError;

pub type BackendResult<T> = Result<T, BackendError>;

/// Receives the latest window of messages of a room, ascending.
pub type BatchCallback = Arc<dyn Fn(Vec<Message>) + Send + Sync>;
/// Receives every typing state of a room that currently has `is_typing` set.
pub type TypingCallback = Arc<dyn Fn(Vec<TypingState>) + Send + Sync>;
/// Receives the full user list on every change.
pub type UsersCallback = Arc<dyn Fn(Vec<UserProfile>) + Send + Sync>;

/// Handle to a standing registration. Cancelling is idempotent and also
/// happens when the handle is dropped.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[async_trait]
pub trait MessageBackend: Send + Sync + 'static {
    /// Fetch up to `page_size` messages older than `cursor`, newest first.
    /// Without a cursor the most recent page is returned.
    async fn fetch_older_page(
        &self,
        room_id: &str,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> BackendResult<Page>;

    /// Register for the most recent `page_size` messages of a room. The
    /// callback may fire before this returns.
    fn subscribe_live_tail(
        &self,
        room_id: &str,
        page_size: usize,
        on_batch: BatchCallback,
    ) -> BackendResult<Subscription>;

    /// Store a new message. The backend assigns id and timestamp.
    async fn send_message(
        &self,
        room_id: &str,
        user_id: &str,
        body: MessageBody,
    ) -> BackendResult<String>;
}

#[async_trait]
pub trait RoomBackend: Send + Sync + 'static {
    async fn list_rooms(&self) -> BackendResult<Vec<Room>>;
    async fn create_room(&self, name: &str, created_by: &str) -> BackendResult<String>;
}

#[async_trait]
pub trait TypingBackend: Send + Sync + 'static {
    async fn set_typing(&self, room_id: &str, user_id: &str, is_typing: bool) -> BackendResult<()>;
    fn subscribe_typing(&self, room_id: &str, on_change: TypingCallback)
        -> BackendResult<Subscription>;
}

#[async_trait]
pub trait PresenceBackend: Send + Sync + 'static {
    async fn upsert_profile(&self, profile: UserProfile) -> BackendResult<()>;
    async fn touch_last_active(&self, uid: &str) -> BackendResult<()>;
    fn subscribe_users(&self, on_change: UsersCallback) -> BackendResult<Subscription>;
}

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store `data` under `path` and return a URL it can be fetched from.
    async fn upload(&self, path: &str, data: Bytes) -> BackendResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        drop(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
