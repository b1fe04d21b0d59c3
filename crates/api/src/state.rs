use std::sync::Arc;

use scribe_config::Settings;
use scribe_transcription::{Hotwords, TranscriptionEngine};

use crate::ws::storage::WsStorage;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: Arc<TranscriptionEngine>,
    pub hotwords: Arc<Hotwords>,
    pub ws_storage: Arc<WsStorage>,
}

impl AppState {
    /// `hotwords` should be the same list the engine's finalization pipeline
    /// reads, so a reload through the API reaches the corrector.
    pub fn new(settings: Settings, engine: Arc<TranscriptionEngine>, hotwords: Arc<Hotwords>) -> Self {
        Self {
            settings: Arc::new(settings),
            engine,
            hotwords,
            ws_storage: Arc::new(WsStorage::new()),
        }
    }
}
