use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chat_api::{Message, MessageBody};
use clap::{CommandFactory, Parser};
use tracing::{info, warn};

use chatcore::{
    backend::BlobStore,
    cli::{Cli, Command},
    config::Config,
    presence::{PresenceHeartbeat, PresenceWatcher},
    rooms::RoomDirectory,
    services::{blobs::DiskBlobStore, fixture::Fixture, log},
    InMemoryBackend, LoadOutcome, MessageSync,
};

const MAX_RETRIES: u32 = 3;

fn render(msg: &Message) -> String {
    let body = match &msg.body {
        MessageBody::Text(text) => text.clone(),
        MessageBody::Image { url } => format!("[image] {url}"),
    };
    format!("{:>14} {:<12} {}", msg.created_at, msg.user_id, body)
}

async fn replay(
    cfg: &Config,
    fixture: Fixture,
    room: Option<String>,
    max_pages: Option<usize>,
    user: Option<String>,
) -> Result<()> {
    let backend = Arc::new(InMemoryBackend::from_fixture(fixture)?);
    let _heartbeat = user
        .as_deref()
        .map(|uid| PresenceHeartbeat::start(backend.clone(), uid, cfg.heartbeat));
    let presence = PresenceWatcher::watch(backend.as_ref(), cfg.online_window)?;
    let sync = MessageSync::new(backend.clone(), cfg.sync_options());
    sync.activate(room.as_deref().unwrap_or_default())?;
    let mut pages = 0;
    let mut retries = 0;
    while max_pages.map_or(true, |max| pages < max) {
        match sync.load_more().await {
            Ok(LoadOutcome::Loaded { exhausted, .. }) => {
                pages += 1;
                if exhausted {
                    break;
                }
            }
            Ok(LoadOutcome::Skipped | LoadOutcome::Discarded) => break,
            Err(e) if e.is_retriable() && retries < MAX_RETRIES => {
                retries += 1;
                warn!(error = %e, retries, "retrying page fetch");
            }
            Err(e) => return Err(e.into()),
        }
    }
    let view = sync.view();
    info!(pages, messages = view.len(), has_more = sync.has_more(), "replay finished");
    println!("room: {}", sync.room_id().unwrap_or_default());
    for msg in &view {
        println!("{}", render(msg));
    }
    println!("{} messages, more history: {}", view.len(), sync.has_more());
    let online = presence.roster().online_ids();
    info!(online = online.len(), "presence");
    sync.dispose();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    log::init(cfg.logging_enabled);

    let Some(command) = cli.command.clone() else {
        Cli::command().print_help()?;
        return Ok(());
    };
    match command {
        Command::Replay {
            fixture,
            room,
            max_pages,
            user,
        } => {
            let fixture = Fixture::load(&fixture).await?;
            replay(&cfg, fixture, room, max_pages, user).await?;
        }
        Command::Rooms { fixture } => {
            let fixture = Fixture::load(&fixture).await?;
            let backend = Arc::new(InMemoryBackend::from_fixture(fixture)?);
            let rooms = RoomDirectory::new(backend, cfg.rooms_stale).list().await?;
            for room in rooms {
                println!(
                    "{:<20} {:<20} {:>14} {}",
                    room.id, room.name, room.created_at, room.created_by
                );
            }
        }
        Command::Upload { file, path } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let store = DiskBlobStore::new(cfg.blob_dir());
            let url = store.upload(&path, Bytes::from(data)).await?;
            println!("{url}");
        }
        Command::Config => {
            println!("{cfg:#?}");
            if !cfg.backend.is_configured() {
                warn!("backend connection settings are incomplete");
            }
        }
    }
    Ok(())
}
