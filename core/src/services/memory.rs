//! In-process implementation of every backend trait.
//!
//! Behaves like the hosted document store as far as the client can tell:
//! ids and timestamps are assigned on write, pagination walks newest first
//! with cursors, and standing subscriptions receive a fresh snapshot after
//! every change that concerns them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use chat_api::{
    now_millis, Cursor, Message, MessageBody, Page, RawMessage, Room, TypingState, UserProfile,
};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    BackendResult, BatchCallback, BlobStore, MessageBackend, PresenceBackend, RoomBackend,
    Subscription, TypingBackend, TypingCallback, UsersCallback,
};
use crate::error::BackendError;
use crate::services::fixture::Fixture;

struct Tail {
    room_id: String,
    page_size: usize,
    on_batch: BatchCallback,
}

#[derive(Default)]
struct Inner {
    rooms: Vec<Room>,
    messages: HashMap<String, Vec<Message>>,
    typing: HashMap<String, HashMap<String, TypingState>>,
    users: HashMap<String, UserProfile>,
    blobs: HashMap<String, Bytes>,
    tails: HashMap<u64, Tail>,
    typing_subs: HashMap<u64, (String, TypingCallback)>,
    user_subs: HashMap<u64, UsersCallback>,
    next_sub: u64,
    last_ts: i64,
    offline: bool,
}

impl Inner {
    fn check_online(&self) -> BackendResult<()> {
        if self.offline {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        Ok(())
    }

    fn next_sub_id(&mut self) -> u64 {
        self.next_sub += 1;
        self.next_sub
    }

    /// Server timestamp, strictly increasing across writes.
    fn server_time(&mut self) -> i64 {
        self.last_ts = now_millis().max(self.last_ts + 1);
        self.last_ts
    }

    fn latest(&self, room_id: &str, page_size: usize) -> Vec<Message> {
        let Some(all) = self.messages.get(room_id) else {
            return Vec::new();
        };
        let skip = all.len().saturating_sub(page_size);
        all[skip..].to_vec()
    }

    fn insert(&mut self, msg: Message) {
        let list = self.messages.entry(msg.room_id.clone()).or_default();
        list.retain(|m| m.id != msg.id);
        let pos = list.partition_point(|m| (m.created_at, &m.id) < (msg.created_at, &msg.id));
        list.insert(pos, msg);
    }

    fn tail_deliveries(&self, room_id: &str) -> Vec<(BatchCallback, Vec<Message>)> {
        self.tails
            .values()
            .filter(|t| t.room_id == room_id)
            .map(|t| (t.on_batch.clone(), self.latest(room_id, t.page_size)))
            .collect()
    }

    fn typing_snapshot(&self, room_id: &str) -> Vec<TypingState> {
        let mut states: Vec<TypingState> = self
            .typing
            .get(room_id)
            .map(|m| m.values().filter(|t| t.is_typing).cloned().collect())
            .unwrap_or_default();
        states.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        states
    }

    fn typing_deliveries(&self, room_id: &str) -> Vec<(TypingCallback, Vec<TypingState>)> {
        self.typing_subs
            .values()
            .filter(|(room, _)| room == room_id)
            .map(|(_, cb)| (cb.clone(), self.typing_snapshot(room_id)))
            .collect()
    }

    fn users_snapshot(&self) -> Vec<UserProfile> {
        let mut users: Vec<UserProfile> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.uid.cmp(&b.uid));
        users
    }

    fn user_deliveries(&self) -> Vec<(UsersCallback, Vec<UserProfile>)> {
        let users = self.users_snapshot();
        self.user_subs
            .values()
            .map(|cb| (cb.clone(), users.clone()))
            .collect()
    }
}

fn encode_cursor(msg: &Message) -> Cursor {
    Cursor::new(format!("{}:{}", msg.created_at, msg.id))
}

fn decode_cursor(cursor: &Cursor) -> BackendResult<(i64, String)> {
    let (ts, id) = cursor
        .as_str()
        .split_once(':')
        .ok_or_else(|| BackendError::Rejected(format!("malformed cursor '{cursor}'")))?;
    let ts = ts
        .parse::<i64>()
        .map_err(|_| BackendError::Rejected(format!("malformed cursor '{cursor}'")))?;
    Ok((ts, id.to_string()))
}

/// Shared, cloneable in-memory backend.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend preloaded with the contents of a fixture.
    pub fn from_fixture(fixture: Fixture) -> BackendResult<Self> {
        let backend = Self::new();
        {
            let mut inner = backend.inner.lock();
            inner.rooms = fixture.rooms;
            inner.rooms.sort_by_key(|r| r.created_at);
            for user in fixture.users {
                inner.users.insert(user.uid.clone(), user);
            }
            for raw in fixture.messages {
                let msg = Message::try_from(raw)?;
                inner.last_ts = inner.last_ts.max(msg.created_at);
                inner.insert(msg);
            }
        }
        Ok(backend)
    }

    /// Simulate losing the connection. Every call fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Store a message as-is, keeping its id and timestamp, and notify tails.
    pub fn insert_message(&self, msg: Message) {
        let room_id = msg.room_id.clone();
        let deliveries = {
            let mut inner = self.inner.lock();
            inner.insert(msg);
            inner.tail_deliveries(&room_id)
        };
        for (cb, batch) in deliveries {
            cb(batch);
        }
    }

    /// Convert a raw document and store it.
    pub fn insert_raw(&self, raw: RawMessage) -> BackendResult<()> {
        let msg = Message::try_from(raw)?;
        self.insert_message(msg);
        Ok(())
    }

    pub fn message_count(&self, room_id: &str) -> usize {
        self.inner
            .lock()
            .messages
            .get(room_id)
            .map(Vec::len)
            .unwrap_or_default()
    }

    pub fn live_tail_count(&self) -> usize {
        self.inner.lock().tails.len()
    }

    pub fn blob(&self, path: &str) -> Option<Bytes> {
        self.inner.lock().blobs.get(path).cloned()
    }

    pub fn user(&self, uid: &str) -> Option<UserProfile> {
        self.inner.lock().users.get(uid).cloned()
    }

    fn cancel_handle(&self, remove: impl FnOnce(&mut Inner) + Send + 'static) -> Subscription {
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                remove(&mut inner.lock());
            }
        })
    }
}

#[async_trait]
impl MessageBackend for InMemoryBackend {
    async fn fetch_older_page(
        &self,
        room_id: &str,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> BackendResult<Page> {
        let inner = self.inner.lock();
        inner.check_online()?;
        let before = cursor.map(decode_cursor).transpose()?;
        let items: Vec<Message> = inner
            .messages
            .get(room_id)
            .map(|all| {
                all.iter()
                    .rev()
                    .filter(|m| match &before {
                        Some((ts, id)) => (m.created_at, &m.id) < (*ts, id),
                        None => true,
                    })
                    .take(page_size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let next_cursor = items.last().map(encode_cursor);
        debug!(room = room_id, fetched = items.len(), "served page");
        Ok(Page::new(items, next_cursor))
    }

    fn subscribe_live_tail(
        &self,
        room_id: &str,
        page_size: usize,
        on_batch: BatchCallback,
    ) -> BackendResult<Subscription> {
        let (id, initial) = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            let id = inner.next_sub_id();
            inner.tails.insert(
                id,
                Tail {
                    room_id: room_id.to_string(),
                    page_size,
                    on_batch: on_batch.clone(),
                },
            );
            (id, inner.latest(room_id, page_size))
        };
        on_batch(initial);
        Ok(self.cancel_handle(move |inner| {
            inner.tails.remove(&id);
        }))
    }

    async fn send_message(
        &self,
        room_id: &str,
        user_id: &str,
        body: MessageBody,
    ) -> BackendResult<String> {
        let (id, deliveries) = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            let msg = Message {
                id: Uuid::new_v4().to_string(),
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                body,
                created_at: inner.server_time(),
            };
            let id = msg.id.clone();
            inner.insert(msg);
            (id, inner.tail_deliveries(room_id))
        };
        for (cb, batch) in deliveries {
            cb(batch);
        }
        Ok(id)
    }
}

#[async_trait]
impl RoomBackend for InMemoryBackend {
    async fn list_rooms(&self) -> BackendResult<Vec<Room>> {
        let inner = self.inner.lock();
        inner.check_online()?;
        Ok(inner.rooms.clone())
    }

    async fn create_room(&self, name: &str, created_by: &str) -> BackendResult<String> {
        let mut inner = self.inner.lock();
        inner.check_online()?;
        let room = Room {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: inner.server_time(),
            created_by: created_by.to_string(),
        };
        let id = room.id.clone();
        inner.rooms.push(room);
        Ok(id)
    }
}

#[async_trait]
impl TypingBackend for InMemoryBackend {
    async fn set_typing(&self, room_id: &str, user_id: &str, is_typing: bool) -> BackendResult<()> {
        let deliveries = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            let state = TypingState {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                is_typing,
                updated_at: now_millis(),
            };
            inner
                .typing
                .entry(room_id.to_string())
                .or_default()
                .insert(user_id.to_string(), state);
            inner.typing_deliveries(room_id)
        };
        for (cb, states) in deliveries {
            cb(states);
        }
        Ok(())
    }

    fn subscribe_typing(
        &self,
        room_id: &str,
        on_change: TypingCallback,
    ) -> BackendResult<Subscription> {
        let (id, initial) = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            let id = inner.next_sub_id();
            inner
                .typing_subs
                .insert(id, (room_id.to_string(), on_change.clone()));
            (id, inner.typing_snapshot(room_id))
        };
        on_change(initial);
        Ok(self.cancel_handle(move |inner| {
            inner.typing_subs.remove(&id);
        }))
    }
}

#[async_trait]
impl PresenceBackend for InMemoryBackend {
    async fn upsert_profile(&self, profile: UserProfile) -> BackendResult<()> {
        let deliveries = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            inner.users.insert(profile.uid.clone(), profile);
            inner.user_deliveries()
        };
        for (cb, users) in deliveries {
            cb(users);
        }
        Ok(())
    }

    async fn touch_last_active(&self, uid: &str) -> BackendResult<()> {
        let deliveries = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            let user = inner
                .users
                .get_mut(uid)
                .ok_or_else(|| BackendError::NotFound(format!("user '{uid}'")))?;
            user.last_active = now_millis();
            inner.user_deliveries()
        };
        for (cb, users) in deliveries {
            cb(users);
        }
        Ok(())
    }

    fn subscribe_users(&self, on_change: UsersCallback) -> BackendResult<Subscription> {
        let (id, initial) = {
            let mut inner = self.inner.lock();
            inner.check_online()?;
            let id = inner.next_sub_id();
            inner.user_subs.insert(id, on_change.clone());
            (id, inner.users_snapshot())
        };
        on_change(initial);
        Ok(self.cancel_handle(move |inner| {
            inner.user_subs.remove(&id);
        }))
    }
}

#[async_trait]
impl BlobStore for InMemoryBackend {
    async fn upload(&self, path: &str, data: Bytes) -> BackendResult<String> {
        let mut inner = self.inner.lock();
        inner.check_online()?;
        inner.blobs.insert(path.to_string(), data);
        Ok(format!("memory://{path}"))
    }
}
