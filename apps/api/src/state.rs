use std::sync::Arc;

use crate::generation::queue::WorkQueue;
use crate::generation::store::JobStore;
use crate::generation::streaming::StreamSessions;
use crate::llm_client::GenerationBackend;
use crate::scoring::ContentScorer;
use crate::voice::embedding::Embedder;
use crate::voice::service::VoiceProfileService;
use crate::voice::store::ProfileStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub profiles: VoiceProfileService,
    /// Generation capability used by streaming sessions and outline requests.
    pub llm: Arc<dyn GenerationBackend>,
    pub scorer: Arc<dyn ContentScorer>,
    pub streams: StreamSessions,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        profile_store: Arc<dyn ProfileStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn GenerationBackend>,
        scorer: Arc<dyn ContentScorer>,
    ) -> Self {
        let streams = StreamSessions::new(
            Arc::clone(&jobs),
            Arc::clone(&profile_store),
            Arc::clone(&llm),
            Arc::clone(&scorer),
        );
        Self {
            jobs,
            queue,
            profiles: VoiceProfileService::new(profile_store, embedder),
            llm,
            scorer,
            streams,
        }
    }
}
