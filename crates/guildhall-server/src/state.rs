// Shared application state handed to every handler.

use std::sync::Arc;

use guildhall_core::config::Config;
use guildhall_core::db::blocking;
use guildhall_core::{Database, Page};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    /// Run a database operation off the async runtime.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> guildhall_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(blocking(&self.db, f).await?)
    }

    /// Pagination window from query values, clamped to the configured limits.
    pub fn page(&self, limit: Option<u32>, offset: Option<u32>) -> Page {
        Page::clamped(
            limit,
            offset,
            self.config.pagination.default_limit,
            self.config.pagination.max_limit,
        )
    }
}
