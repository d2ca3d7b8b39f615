//! placemarkd: a social-bookmarking server.
//!
//! Clients talk a line-oriented, pipe-delimited text protocol over TCP:
//! - Accounts: REGISTER, LOGIN, LOGOUT
//! - Favorites: add, edit, delete, list
//! - Friends: requests, accept/reject, remove, list
//! - Tagging friends on favorites
//!
//! Storage is sqlite (or in-memory for tests); configuration comes from
//! CLI arguments or a TOML file.

mod accounts;
mod config;
mod framing;
mod handlers;
mod protocol;
mod server;
mod session;
mod store;

use accounts::AccountDirectory;
use config::{Backend, Config};
use server::Server;
use std::sync::Arc;
use store::{MemoryStore, SqliteStore, Store};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backend = ?config.backend,
        max_line = config.max_line,
        idle_timeout = config.idle_timeout,
        "Starting placemarkd server"
    );

    let store: Arc<dyn Store> = match config.backend {
        Backend::Sqlite => {
            if let Some(dir) = config.db_path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
            info!(path = %config.db_path.display(), "Opening sqlite database");
            Arc::new(SqliteStore::open(&config.db_path)?)
        }
        Backend::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let accounts = Arc::new(AccountDirectory::load(Arc::clone(&store))?);

    Server::new(config, store, accounts).run().await
}
