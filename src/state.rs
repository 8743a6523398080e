use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::ai::{EmbeddingProvider, LlmProvider};
use crate::services::booking::SlotArbiter;
use crate::services::messaging::MessagingProvider;
use crate::services::retrieval::VectorIndex;

/// All service objects, constructed once at startup and passed by
/// reference into handlers. No module-level singletons.
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub llm: Box<dyn LlmProvider>,
    pub embedder: Box<dyn EmbeddingProvider>,
    pub index: Box<dyn VectorIndex>,
    pub messaging: Box<dyn MessagingProvider>,
    pub arbiter: SlotArbiter,
}
