//! tokenq: token issuing and visitor interaction queue.
//!
//! Library crate shared by the `tokenq` binary and the integration tests
//! in `tests/`.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod id;
pub mod models;
pub mod queue;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod tokens;

use tokio_util::sync::CancellationToken;

use config::Config;
use queue::InteractionQueue;
use store::SharedStore;
use tokens::TokenBook;

/// Shared application state passed to handlers and CLI commands.
pub struct AppState {
    pub store: SharedStore,
    pub tokens: TokenBook,
    pub queue: InteractionQueue,
    pub config: Config,
    /// Root of every cancellable wait (long-polls, backoff sleeps).
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, store: SharedStore, shutdown: CancellationToken) -> Self {
        let tokens = TokenBook::new(
            store.clone(),
            config.tokens_db.clone(),
            config.token_retry(),
            config.max_page_size,
            shutdown.clone(),
        );
        let queue = InteractionQueue::new(
            store.clone(),
            config.interactions_db.clone(),
            config.queue_settings(),
            shutdown.clone(),
        );
        Self {
            store,
            tokens,
            queue,
            config,
            shutdown,
        }
    }

    /// Create both collections if they don't exist yet.
    pub async fn ensure_collections(&self) -> Result<(), store::StoreError> {
        self.store.ensure_collection(self.tokens.collection()).await?;
        self.store.ensure_collection(self.queue.collection()).await?;
        Ok(())
    }
}
