use std::sync::Arc;

use bytes::Bytes;
use chat_api::{now_millis, MessageBody, UserProfile};
use tracing::info;

use crate::backend::{BlobStore, MessageBackend, PresenceBackend};
use crate::error::{SyncError, SyncResult};

/// Upload path of a picture posted to a room.
pub fn room_image_path(room_id: &str, user_id: &str, at_ms: i64) -> String {
    format!("rooms/{room_id}/{user_id}_{at_ms}.jpg")
}

/// Upload path of a user's avatar.
pub fn avatar_path(uid: &str) -> String {
    format!("avatars/{uid}.jpg")
}

/// Writes new messages and uploads their attachments.
pub struct Outbox {
    messages: Arc<dyn MessageBackend>,
    blobs: Arc<dyn BlobStore>,
}

impl Outbox {
    pub fn new(messages: Arc<dyn MessageBackend>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { messages, blobs }
    }

    /// Send a text message. Surrounding whitespace is stripped and blank
    /// text is rejected.
    pub async fn send_text(&self, room_id: &str, user_id: &str, text: &str) -> SyncResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::InvalidInput("message text is empty".into()));
        }
        let id = self
            .messages
            .send_message(room_id, user_id, MessageBody::Text(text.to_string()))
            .await?;
        info!(room = room_id, message = %id, "sent text message");
        Ok(id)
    }

    /// Upload a picture and post it as an image message.
    pub async fn send_image(
        &self,
        room_id: &str,
        user_id: &str,
        data: Bytes,
    ) -> SyncResult<String> {
        if data.is_empty() {
            return Err(SyncError::InvalidInput("image is empty".into()));
        }
        let path = room_image_path(room_id, user_id, now_millis());
        let url = self.blobs.upload(&path, data).await?;
        let id = self
            .messages
            .send_message(room_id, user_id, MessageBody::Image { url })
            .await?;
        info!(room = room_id, message = %id, %path, "sent image message");
        Ok(id)
    }

    /// Upload a new avatar and return its URL.
    pub async fn upload_avatar(&self, uid: &str, data: Bytes) -> SyncResult<String> {
        if data.is_empty() {
            return Err(SyncError::InvalidInput("avatar is empty".into()));
        }
        Ok(self.blobs.upload(&avatar_path(uid), data).await?)
    }

    /// Upload a new avatar and store its URL on the user's profile.
    /// Returns the profile as written.
    pub async fn set_avatar(
        &self,
        presence: &dyn PresenceBackend,
        mut profile: UserProfile,
        data: Bytes,
    ) -> SyncResult<UserProfile> {
        let url = self.upload_avatar(&profile.uid, data).await?;
        profile.photo_url = Some(url);
        profile.last_active = now_millis();
        presence.upsert_profile(profile.clone()).await?;
        info!(uid = %profile.uid, "updated avatar");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryBackend;

    fn outbox() -> (Arc<InMemoryBackend>, Outbox) {
        let backend = Arc::new(InMemoryBackend::new());
        (backend.clone(), Outbox::new(backend.clone(), backend))
    }

    #[tokio::test]
    async fn text_is_trimmed_and_validated() {
        let (backend, outbox) = outbox();
        assert!(matches!(
            outbox.send_text("general", "u1", " \n ").await,
            Err(SyncError::InvalidInput(_))
        ));
        outbox.send_text("general", "u1", "  hello  ").await.unwrap();
        let page = backend.fetch_older_page("general", 10, None).await.unwrap();
        assert_eq!(page.items[0].body.text(), Some("hello"));
    }

    #[tokio::test]
    async fn image_is_uploaded_before_posting() {
        let (backend, outbox) = outbox();
        outbox
            .send_image("general", "u1", Bytes::from_static(b"jpeg"))
            .await
            .unwrap();
        let page = backend.fetch_older_page("general", 10, None).await.unwrap();
        let url = page.items[0].body.image_url().unwrap().to_string();
        let path = url.strip_prefix("memory://").unwrap();
        assert!(path.starts_with("rooms/general/u1_"));
        assert_eq!(backend.blob(path).unwrap(), Bytes::from_static(b"jpeg"));
    }

    #[tokio::test]
    async fn failed_upload_sends_nothing() {
        let (backend, outbox) = outbox();
        backend.set_offline(true);
        let err = outbox
            .send_image("general", "u1", Bytes::from_static(b"jpeg"))
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        backend.set_offline(false);
        assert_eq!(backend.message_count("general"), 0);
    }

    #[tokio::test]
    async fn avatar_path_is_per_user() {
        let (backend, outbox) = outbox();
        let url = outbox
            .upload_avatar("u1", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(url, "memory://avatars/u1.jpg");
        assert!(backend.blob("avatars/u1.jpg").is_some());
    }

    #[tokio::test]
    async fn avatar_url_lands_on_profile() {
        let (backend, outbox) = outbox();
        let profile = UserProfile {
            uid: "u1".into(),
            display_name: "Ana".into(),
            email: "ana@example.com".into(),
            photo_url: None,
            created_at: 1,
            last_active: 1,
        };
        let written = outbox
            .set_avatar(backend.as_ref(), profile, Bytes::from_static(b"png"))
            .await
            .unwrap();
        let stored = backend.user("u1").unwrap();
        assert_eq!(stored.photo_url.as_deref(), Some("memory://avatars/u1.jpg"));
        assert_eq!(stored.display_name, "Ana");
        assert!(stored.last_active > 1);
        assert_eq!(stored, written);

        assert!(matches!(
            outbox.set_avatar(backend.as_ref(), stored, Bytes::new()).await,
            Err(SyncError::InvalidInput(_))
        ));
    }
}
