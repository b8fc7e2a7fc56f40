use crate::chat::feed::ChangeFeed;
use crate::config::AppConfig;
use crate::shared::utils::DbPool;
use std::sync::Arc;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub feed: Arc<ChangeFeed>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            feed: Arc::clone(&self.feed),
        }
    }
}
