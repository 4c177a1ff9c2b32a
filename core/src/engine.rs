//! Message synchronization for the active room.
//!
//! Two inputs feed one view: backward pagination pulled by the caller via
//! [`MessageSync::load_more`] and a live tail pushed by the backend. Both are
//! merged by id into a [`MessageView`]. Every activation gets a generation
//! number and results carrying an older generation are dropped.

use std::sync::Arc;
use std::time::Duration;

use chat_api::{Message, Page, DEFAULT_ROOM};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::backend::{BatchCallback, MessageBackend, Subscription};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::view::MessageView;

pub const DEFAULT_PAGE_SIZE: usize = 30;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Page size for pagination and window size of the live tail.
    pub page_size: usize,
    /// Upper bound for one page fetch.
    pub fetch_timeout: Duration,
    /// Room used when `activate` receives a blank id.
    pub default_room: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            default_room: DEFAULT_ROOM.into(),
        }
    }
}

/// What a call to [`MessageSync::load_more`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was fetched and merged.
    Loaded { fetched: usize, exhausted: bool },
    /// A fetch was already running or history is exhausted; nothing was requested.
    Skipped,
    /// The room changed while the page was in flight; the page was dropped.
    Discarded,
}

#[derive(Debug, Default)]
struct Activation {
    room_id: Option<String>,
    generation: u64,
    pages: Vec<Page>,
    view: MessageView,
    has_more: bool,
    loading: bool,
}

impl Activation {
    fn reset(&mut self, room_id: Option<String>) {
        self.generation = self.generation.wrapping_add(1);
        self.room_id = room_id;
        self.pages.clear();
        self.view.clear();
        self.has_more = true;
        self.loading = false;
    }
}

struct Shared {
    state: Mutex<Activation>,
    events: Mutex<EventBus>,
}

impl Shared {
    /// Callers hold the state lock, so events leave in generation order.
    fn publish(&self, events: Vec<SyncEvent>) {
        if events.is_empty() {
            return;
        }
        let mut bus = self.events.lock();
        for event in events {
            bus.publish(event);
        }
    }

    fn apply_live(&self, generation: u64, batch: Vec<Message>) {
        let mut st = self.state.lock();
        if st.generation != generation {
            debug!(generation, "dropping live batch of a stale activation");
            return;
        }
        let incoming = batch.len();
        if st.view.merge(batch) {
            debug!(generation, incoming, total = st.view.len(), "merged live batch");
            self.publish(vec![SyncEvent::ViewChanged {
                room_id: st.room_id.clone().unwrap_or_default(),
                generation,
                len: st.view.len(),
            }]);
        }
    }

    fn apply_page(&self, generation: u64, result: SyncResult<Page>) -> SyncResult<LoadOutcome> {
        let mut st = self.state.lock();
        if st.generation != generation {
            return Err(SyncError::StaleActivation);
        }
        st.loading = false;
        let page = result?;
        let room_id = st.room_id.clone().unwrap_or_default();
        let fetched = page.items.len();
        let exhausted = page.is_exhausted();
        let changed = st.view.merge(page.items.iter().cloned());
        st.pages.push(page);
        let mut events = Vec::new();
        if changed {
            events.push(SyncEvent::ViewChanged {
                room_id: room_id.clone(),
                generation,
                len: st.view.len(),
            });
        }
        if exhausted {
            st.has_more = false;
            events.push(SyncEvent::PaginationExhausted {
                room_id,
                generation,
            });
        }
        debug!(generation, fetched, exhausted, total = st.view.len(), "merged page");
        self.publish(events);
        Ok(LoadOutcome::Loaded { fetched, exhausted })
    }
}

/// Clears `loading` if a fetch ends without its result being applied, which
/// includes the caller dropping the `load_more` future.
struct LoadingGuard<'a> {
    shared: &'a Shared,
    generation: u64,
    armed: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = self.shared.state.lock();
        if st.generation == self.generation {
            st.loading = false;
        }
    }
}

/// Keeps the message list of the active room in sync with the backend.
pub struct MessageSync {
    backend: Arc<dyn MessageBackend>,
    options: SyncOptions,
    shared: Arc<Shared>,
    live: Mutex<Option<Subscription>>,
}

impl MessageSync {
    pub fn new(backend: Arc<dyn MessageBackend>, options: SyncOptions) -> Self {
        Self {
            backend,
            options: SyncOptions {
                page_size: options.page_size.max(1),
                ..options
            },
            shared: Arc::new(Shared {
                state: Mutex::new(Activation::default()),
                events: Mutex::new(EventBus::new()),
            }),
            live: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Bind the engine to `room_id`, dropping everything known about the
    /// previous room. Returns the generation of the new activation.
    pub fn activate(&self, room_id: &str) -> SyncResult<u64> {
        let room_id = match room_id.trim() {
            "" => self.options.default_room.clone(),
            id => id.to_string(),
        };
        let mut live = self.live.lock();
        if let Some(previous) = live.take() {
            previous.unsubscribe();
        }
        let generation = {
            let mut st = self.shared.state.lock();
            st.reset(Some(room_id.clone()));
            self.shared.publish(vec![SyncEvent::Activated {
                room_id: room_id.clone(),
                generation: st.generation,
            }]);
            st.generation
        };
        info!(room = %room_id, generation, "activated room");

        let shared = self.shared.clone();
        let on_batch: BatchCallback = Arc::new(move |batch: Vec<Message>| {
            shared.apply_live(generation, batch)
        });
        let subscription = self
            .backend
            .subscribe_live_tail(&room_id, self.options.page_size, on_batch)
            .map_err(|e| {
                warn!(room = %room_id, error = %e, "live subscription failed");
                SyncError::FetchFailed(e)
            })?;
        *live = Some(subscription);
        Ok(generation)
    }

    /// Fetch the next older page and merge it. A no-op while a fetch is
    /// running or once history is exhausted.
    pub async fn load_more(&self) -> SyncResult<LoadOutcome> {
        let (generation, room_id, cursor) = {
            let mut st = self.shared.state.lock();
            let Some(room_id) = st.room_id.clone() else {
                return Ok(LoadOutcome::Skipped);
            };
            if st.loading || !st.has_more {
                return Ok(LoadOutcome::Skipped);
            }
            st.loading = true;
            let cursor = st.pages.last().and_then(|p| p.next_cursor.clone());
            (st.generation, room_id, cursor)
        };
        let mut guard = LoadingGuard {
            shared: &self.shared,
            generation,
            armed: true,
        };

        let timeout = self.options.fetch_timeout;
        let fetch = self
            .backend
            .fetch_older_page(&room_id, self.options.page_size, cursor.as_ref());
        let result = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => {
                warn!(room = %room_id, error = %e, "page fetch failed");
                Err(SyncError::FetchFailed(e))
            }
            Err(_) => {
                warn!(room = %room_id, ?timeout, "page fetch timed out");
                Err(SyncError::Timeout(timeout))
            }
        };

        let applied = self.shared.apply_page(generation, result);
        guard.armed = false;
        match applied {
            Err(SyncError::StaleActivation) => {
                debug!(room = %room_id, generation, "discarding page of a stale activation");
                Ok(LoadOutcome::Discarded)
            }
            other => other,
        }
    }

    /// Snapshot of the merged view, oldest first.
    pub fn view(&self) -> Vec<Message> {
        self.shared.state.lock().view.items().to_vec()
    }

    pub fn has_more(&self) -> bool {
        self.shared.state.lock().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.lock().loading
    }

    pub fn room_id(&self) -> Option<String> {
        self.shared.state.lock().room_id.clone()
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    pub fn page_count(&self) -> usize {
        self.shared.state.lock().pages.len()
    }

    pub fn subscribe_events(&self) -> UnboundedReceiver<SyncEvent> {
        self.shared.events.lock().subscribe()
    }

    /// Cancel the live tail and forget the current room.
    pub fn dispose(&self) {
        if let Some(live) = self.live.lock().take() {
            live.unsubscribe();
        }
        let mut st = self.shared.state.lock();
        st.reset(None);
        st.has_more = false;
    }
}
