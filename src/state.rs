//! Shared runtime state threaded through workers and the admin API.

use crate::context::ContextRegistry;
use crate::llm::LlmClient;
use crate::logbuf::LogBuffer;
use crate::stats::RequestStats;
use crate::store::Store;
use std::sync::Arc;

pub struct AppContext {
    pub store: Store,
    pub logs: LogBuffer,
    pub stats: Arc<RequestStats>,
    pub registry: ContextRegistry,
    pub llm: LlmClient,
}

impl AppContext {
    pub fn new(store: Store) -> Arc<Self> {
        let stats = Arc::new(RequestStats::new());
        Arc::new(Self {
            store,
            logs: LogBuffer::new(),
            stats: stats.clone(),
            registry: ContextRegistry::new(),
            llm: LlmClient::new(stats),
        })
    }
}
