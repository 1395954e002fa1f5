use std::sync::Arc;

use crate::models::chunk::Chunk;
use crate::models::error::CaptureError;

/// External consumer of completed chunks.
///
/// Sinks are registered before session start and are immutable for the
/// lifetime of a session. `deliver` runs on the per-stream worker thread; a
/// slow sink delays only its own stream's delivery, never the source
/// callback. Failures are isolated by the router: they are logged, reported
/// as non-fatal error events, and never affect other sinks or the
/// accumulator.
pub trait ChunkSink: Send + Sync {
    /// Stable name used in logs and sink-failure events.
    fn name(&self) -> &str;

    fn deliver(&self, chunk: &Arc<Chunk>) -> Result<(), CaptureError>;
}
