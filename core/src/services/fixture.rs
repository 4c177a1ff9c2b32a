use std::path::Path;

use anyhow::{Context, Result};
use chat_api::{RawMessage, Room, UserProfile};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Snapshot of backend documents used to seed an in-memory backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

impl Fixture {
    /// Read a JSON fixture from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .await
            .with_context(|| format!("reading fixture {}", path.display()))?;
        let fixture = serde_json::from_slice(&bytes).context("invalid fixture")?;
        Ok(fixture)
    }

    /// Write the fixture as pretty JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes).await?;
        Ok(())
    }
}
