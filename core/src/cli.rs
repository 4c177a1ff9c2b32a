use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the chatcore client.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Override the page size used for history and the live window.
    #[arg(long, global = true)]
    pub page_size: Option<usize>,
    /// Enable or disable logging (true/false).
    #[arg(long, global = true)]
    pub logging: Option<bool>,
    /// Override the data directory.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open a room from a fixture, page through its history and print it.
    Replay {
        /// JSON fixture with rooms, messages and users.
        #[arg(long)]
        fixture: PathBuf,
        /// Room to open; the configured default room when omitted.
        #[arg(long)]
        room: Option<String>,
        /// Stop after this many pages.
        #[arg(long)]
        max_pages: Option<usize>,
        /// Act as this signed-in user: keep their presence fresh while replaying.
        #[arg(long)]
        user: Option<String>,
    },
    /// List the rooms of a fixture.
    Rooms {
        #[arg(long)]
        fixture: PathBuf,
    },
    /// Store a file in the local blob store and print its URL.
    Upload {
        file: PathBuf,
        /// Logical upload path, e.g. `avatars/<uid>.jpg`.
        #[arg(long)]
        path: String,
    },
    /// Print the resolved configuration.
    Config,
}
