use std::sync::Arc;

use crate::models::chunk::Chunk;
use crate::models::error::CaptureError;
use crate::models::event::{EventHub, SessionEvent};
use crate::traits::chunk_sink::ChunkSink;

/// Delivers completed chunks to the session's registered sinks.
///
/// The sink set is an immutable snapshot taken at session start. Ownership of
/// a chunk transfers here on emission; the router fans out read-only `Arc`
/// references. A failing sink is logged and reported as a non-fatal error
/// event; remaining sinks still receive the chunk.
pub struct ChunkSinkRouter {
    sinks: Vec<Arc<dyn ChunkSink>>,
    events: EventHub,
}

impl ChunkSinkRouter {
    pub fn new(sinks: Vec<Arc<dyn ChunkSink>>, events: EventHub) -> Self {
        Self { sinks, events }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn deliver(&self, chunk: Chunk) {
        let chunk_id = chunk.id;
        let kind = chunk.kind;
        let chunk = Arc::new(chunk);

        for sink in &self.sinks {
            if let Err(error) = sink.deliver(&chunk) {
                log::warn!("sink '{}' failed for chunk {}: {}", sink.name(), chunk_id, error);
                self.events.emit_error(&CaptureError::SinkFailure {
                    sink: sink.name().to_string(),
                    message: error.to_string(),
                });
            }
        }

        self.events.emit(SessionEvent::ChunkEmitted { chunk_id, kind });
    }
}
