pub mod api;
pub mod config;
pub mod imap;
pub mod ingest;
pub mod mime;
pub mod progress;
pub mod search;
pub mod store;

use std::sync::Mutex;

use config::Config;
use progress::{FetchProgress, Progress, SearchProgress};
use store::{Store, StoreError, StoredEmail};

/// Process-wide shared state: the file store plus the two progress
/// singletons written by background tasks and polled by API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub fetch: std::sync::Arc<Progress<FetchProgress>>,
    pub search: std::sync::Arc<Progress<SearchProgress>>,
    /// Result set of the most recently completed search.
    pub search_results: Mutex<Vec<StoredEmail>>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let store = Store::open(&config.data_dir)?;
        Ok(Self {
            config,
            store,
            fetch: std::sync::Arc::new(Progress::new()),
            search: std::sync::Arc::new(Progress::new()),
            search_results: Mutex::new(Vec::new()),
        })
    }
}
