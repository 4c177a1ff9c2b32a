use std::sync::Arc;
use std::time::Duration;

use chat_api::Room;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::backend::RoomBackend;
use crate::error::{SyncError, SyncResult};

pub const DEFAULT_ROOMS_STALE: Duration = Duration::from_secs(60);

/// Room list with a short-lived cache in front of the backend.
pub struct RoomDirectory {
    backend: Arc<dyn RoomBackend>,
    stale_after: Duration,
    cached: Mutex<Option<(Instant, Vec<Room>)>>,
}

impl RoomDirectory {
    pub fn new(backend: Arc<dyn RoomBackend>, stale_after: Duration) -> Self {
        Self {
            backend,
            stale_after,
            cached: Mutex::new(None),
        }
    }

    /// All rooms, oldest first. Served from cache while it is fresh.
    pub async fn list(&self) -> SyncResult<Vec<Room>> {
        if let Some((at, rooms)) = self.cached.lock().as_ref() {
            if at.elapsed() < self.stale_after {
                return Ok(rooms.clone());
            }
        }
        let mut rooms = self.backend.list_rooms().await?;
        rooms.sort_by_key(|r| r.created_at);
        *self.cached.lock() = Some((Instant::now(), rooms.clone()));
        Ok(rooms)
    }

    /// Create a room and return its id.
    pub async fn create(&self, name: &str, created_by: &str) -> SyncResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidInput("room name is empty".into()));
        }
        let id = self.backend.create_room(name, created_by).await?;
        info!(room = %id, name, "created room");
        self.invalidate();
        Ok(id)
    }

    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}
