use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_api::{Cursor, Message, MessageBody, Page};
use chatcore::backend::{BackendResult, BatchCallback, MessageBackend, Subscription};
use chatcore::{
    BackendError, InMemoryBackend, LoadOutcome, MessageSync, SyncError, SyncEvent, SyncOptions,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Backend whose pages are queued by the test and whose fetches can be held
/// back until the test releases them.
#[derive(Default)]
struct ScriptedBackend {
    pages: Mutex<VecDeque<BackendResult<Page>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fetches: AtomicUsize,
    cursors: Mutex<Vec<Option<Cursor>>>,
    tails: Mutex<Vec<(String, BatchCallback)>>,
    unsubscribed: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    fn push_page(&self, page: BackendResult<Page>) {
        self.pages.lock().push_back(page);
    }

    /// Hold the next fetch until the returned sender fires or is dropped.
    fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    /// Deliver a batch through the most recent tail of `room_id`.
    fn deliver(&self, room_id: &str, batch: Vec<Message>) {
        let cb = self
            .tails
            .lock()
            .iter()
            .rev()
            .find(|(room, _)| room == room_id)
            .map(|(_, cb)| cb.clone())
            .expect("no tail for room");
        cb(batch);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBackend for ScriptedBackend {
    async fn fetch_older_page(
        &self,
        _room_id: &str,
        _page_size: usize,
        cursor: Option<&Cursor>,
    ) -> BackendResult<Page> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().push(cursor.cloned());
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.pages.lock().pop_front().unwrap_or_else(|| Ok(Page::empty()))
    }

    fn subscribe_live_tail(
        &self,
        room_id: &str,
        _page_size: usize,
        on_batch: BatchCallback,
    ) -> BackendResult<Subscription> {
        self.tails.lock().push((room_id.to_string(), on_batch));
        let counter = self.unsubscribed.clone();
        Ok(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn send_message(&self, _: &str, _: &str, _: MessageBody) -> BackendResult<String> {
        Err(BackendError::Rejected("read only".into()))
    }
}

fn msg(id: &str, at: i64) -> Message {
    Message::text(id, "general", "u1", format!("text {id}"), at)
}

fn ids(view: &[Message]) -> Vec<&str> {
    view.iter().map(|m| m.id.as_str()).collect()
}

fn page(items: Vec<Message>) -> Page {
    let cursor = items.last().map(|m| Cursor::new(m.id.clone()));
    Page::new(items, cursor)
}

fn engine(backend: &Arc<ScriptedBackend>) -> Arc<MessageSync> {
    Arc::new(MessageSync::new(backend.clone(), SyncOptions::default()))
}

#[tokio::test]
async fn live_then_older_page_merges_in_order() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("general").unwrap();
    backend.deliver("general", vec![msg("m1", 100), msg("m2", 200)]);
    backend.push_page(Ok(page(vec![msg("m0", 50)])));

    let outcome = sync.load_more().await.unwrap();
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            fetched: 1,
            exhausted: false
        }
    );
    assert_eq!(ids(&sync.view()), ["m0", "m1", "m2"]);
    assert!(sync.has_more());
    assert_eq!(sync.page_count(), 1);
}

#[tokio::test]
async fn empty_page_ends_pagination_for_the_activation() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("general").unwrap();
    backend.push_page(Ok(Page::empty()));

    assert_eq!(
        sync.load_more().await.unwrap(),
        LoadOutcome::Loaded {
            fetched: 0,
            exhausted: true
        }
    );
    assert!(!sync.has_more());
    assert_eq!(sync.load_more().await.unwrap(), LoadOutcome::Skipped);
    assert_eq!(backend.fetch_count(), 1);

    // live traffic does not reopen history
    backend.deliver("general", vec![msg("m5", 500)]);
    assert!(!sync.has_more());
    assert_eq!(sync.load_more().await.unwrap(), LoadOutcome::Skipped);
    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn cursor_of_last_page_is_used_for_next_fetch() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("general").unwrap();
    backend.push_page(Ok(page(vec![msg("m9", 90), msg("m8", 80)])));
    backend.push_page(Ok(page(vec![msg("m7", 70)])));
    sync.load_more().await.unwrap();
    sync.load_more().await.unwrap();
    let cursors = backend.cursors.lock().clone();
    assert_eq!(cursors, [None, Some(Cursor::new("m8"))]);
    assert_eq!(ids(&sync.view()), ["m7", "m8", "m9"]);
}

#[tokio::test]
async fn redelivered_message_replaces_previous_value() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("general").unwrap();
    backend.deliver("general", vec![msg("m1", 100), msg("m2", 200)]);
    backend.deliver(
        "general",
        vec![Message::text("m1", "general", "u1", "edited", 100), msg("m2", 200)],
    );
    let view = sync.view();
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].body.text(), Some("edited"));
}

#[tokio::test]
async fn same_batch_twice_changes_nothing() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    let mut events = sync.subscribe_events();
    sync.activate("general").unwrap();
    let batch = vec![msg("a", 3), msg("b", 1), msg("c", 3)];
    backend.deliver("general", batch.clone());
    let once = sync.view();
    backend.deliver("general", batch);
    assert_eq!(sync.view(), once);
    assert_eq!(ids(&once), ["b", "a", "c"]);

    assert!(matches!(events.try_recv().unwrap(), SyncEvent::Activated { .. }));
    assert!(matches!(
        events.try_recv().unwrap(),
        SyncEvent::ViewChanged { len: 3, .. }
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn room_switch_discards_pending_page() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("room-a").unwrap();
    backend.push_page(Ok(page(vec![msg("a1", 10)])));
    let release = backend.hold_next_fetch();

    let pending = tokio::spawn({
        let sync = sync.clone();
        async move { sync.load_more().await }
    });
    while backend.fetch_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(sync.is_loading());

    sync.activate("room-b").unwrap();
    assert!(!sync.is_loading());
    assert_eq!(backend.unsubscribed.load(Ordering::SeqCst), 1);
    backend.deliver("room-b", vec![msg("b1", 20)]);

    release.send(()).unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Discarded);
    assert_eq!(ids(&sync.view()), ["b1"]);
    assert_eq!(sync.room_id().as_deref(), Some("room-b"));
    assert!(sync.has_more());
    assert!(!sync.is_loading());
}

#[tokio::test]
async fn late_batch_from_previous_room_is_dropped() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("room-a").unwrap();
    sync.activate("room-b").unwrap();
    backend.deliver("room-a", vec![msg("a1", 10)]);
    assert!(sync.view().is_empty());
}

#[test]
fn events_arrive_in_generation_order() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    let mut events = sync.subscribe_events();
    sync.activate("room-a").unwrap();

    let feeder = std::thread::spawn({
        let backend = backend.clone();
        move || {
            for i in 0..2_000 {
                backend.deliver("room-a", vec![msg(&format!("x{i}"), i)]);
            }
        }
    });
    for _ in 0..200 {
        sync.activate("room-b").unwrap();
        sync.activate("room-a").unwrap();
    }
    feeder.join().unwrap();

    let mut highest = 0;
    while let Ok(event) = events.try_recv() {
        let generation = match event {
            SyncEvent::Activated { generation, .. }
            | SyncEvent::ViewChanged { generation, .. }
            | SyncEvent::PaginationExhausted { generation, .. } => generation,
        };
        assert!(generation >= highest, "{generation} after {highest}");
        highest = generation;
    }
    assert_eq!(highest, sync.generation());
}

#[tokio::test]
async fn failed_fetch_releases_loading() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("general").unwrap();
    backend.push_page(Err(BackendError::Unavailable("offline".into())));
    backend.push_page(Ok(page(vec![msg("m0", 50)])));

    let err = sync.load_more().await.unwrap_err();
    assert_eq!(
        err,
        SyncError::FetchFailed(BackendError::Unavailable("offline".into()))
    );
    assert!(!sync.is_loading());
    assert!(sync.has_more());

    assert!(matches!(
        sync.load_more().await.unwrap(),
        LoadOutcome::Loaded { fetched: 1, .. }
    ));
    assert_eq!(backend.fetch_count(), 2);
}

#[tokio::test]
async fn second_call_while_loading_is_skipped() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("general").unwrap();
    backend.push_page(Ok(page(vec![msg("m0", 50)])));
    let release = backend.hold_next_fetch();
    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.load_more().await }
    });
    while backend.fetch_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(sync.load_more().await.unwrap(), LoadOutcome::Skipped);
    release.send(()).unwrap();
    assert!(matches!(
        first.await.unwrap().unwrap(),
        LoadOutcome::Loaded { .. }
    ));
    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_times_out_and_can_be_retried() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = Arc::new(MessageSync::new(
        backend.clone(),
        SyncOptions {
            fetch_timeout: Duration::from_secs(1),
            ..Default::default()
        },
    ));
    sync.activate("general").unwrap();
    let _held = backend.hold_next_fetch();

    let err = sync.load_more().await.unwrap_err();
    assert_eq!(err, SyncError::Timeout(Duration::from_secs(1)));
    assert!(err.is_retriable());
    assert!(!sync.is_loading());

    backend.push_page(Ok(page(vec![msg("m0", 50)])));
    assert!(matches!(
        sync.load_more().await.unwrap(),
        LoadOutcome::Loaded { fetched: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn abandoned_load_does_not_block_later_calls() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    sync.activate("general").unwrap();
    let _held = backend.hold_next_fetch();
    let abandoned = tokio::time::timeout(Duration::from_millis(10), sync.load_more()).await;
    assert!(abandoned.is_err());
    assert!(!sync.is_loading());
}

#[tokio::test]
async fn blank_room_uses_default_and_dispose_unsubscribes() {
    let backend = Arc::new(ScriptedBackend::default());
    let sync = engine(&backend);
    assert_eq!(sync.load_more().await.unwrap(), LoadOutcome::Skipped);
    sync.activate("  ").unwrap();
    assert_eq!(sync.room_id().as_deref(), Some("general"));
    sync.dispose();
    assert_eq!(backend.unsubscribed.load(Ordering::SeqCst), 1);
    assert_eq!(sync.room_id(), None);
    assert_eq!(sync.load_more().await.unwrap(), LoadOutcome::Skipped);
}

#[tokio::test]
async fn full_history_against_in_memory_backend() {
    let backend = Arc::new(InMemoryBackend::new());
    for i in 0..75 {
        backend.insert_message(msg(&format!("m{i:03}"), 1_000 + i));
    }
    let sync = MessageSync::new(backend.clone(), SyncOptions::default());
    let mut events = sync.subscribe_events();
    sync.activate("general").unwrap();
    assert_eq!(sync.view().len(), 30);
    assert_eq!(sync.view()[0].id, "m045");

    let mut pages = 0;
    while let LoadOutcome::Loaded { exhausted, .. } = sync.load_more().await.unwrap() {
        pages += 1;
        if exhausted {
            break;
        }
    }
    // three full pages, then an empty one
    assert_eq!(pages, 4);
    assert!(!sync.has_more());
    let view = sync.view();
    assert_eq!(view.len(), 75);
    assert!(view.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    backend
        .send_message("general", "u2", MessageBody::Text("fresh".into()))
        .await
        .unwrap();
    let view = sync.view();
    assert_eq!(view.len(), 76);
    assert_eq!(view.last().unwrap().body.text(), Some("fresh"));

    let mut exhausted_seen = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SyncEvent::PaginationExhausted { .. }) {
            exhausted_seen = true;
        }
    }
    assert!(exhausted_seen);

    sync.activate("other").unwrap();
    assert_eq!(backend.live_tail_count(), 1);
    assert!(sync.view().is_empty());
}
