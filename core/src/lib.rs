pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod outbox;
pub mod presence;
pub mod rooms;
pub mod services;
pub mod typing;
pub mod view;

pub use engine::{LoadOutcome, MessageSync, SyncOptions};
pub use error::{BackendError, SyncError};
pub use events::SyncEvent;
pub use services::memory::InMemoryBackend;
