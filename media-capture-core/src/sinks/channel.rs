use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::models::chunk::Chunk;
use crate::models::error::CaptureError;
use crate::traits::chunk_sink::ChunkSink;

/// In-process handoff of completed chunks to a downstream consumer.
///
/// The bounded channel keeps the engine decoupled from a slow consumer:
/// delivery never blocks the worker thread. A full channel is reported as a
/// sink failure for that chunk and delivery continues with later chunks.
pub struct ChannelSink {
    tx: Sender<Arc<Chunk>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<Chunk>>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl ChunkSink for ChannelSink {
    fn name(&self) -> &str {
        "consumer-channel"
    }

    fn deliver(&self, chunk: &Arc<Chunk>) -> Result<(), CaptureError> {
        self.tx
            .try_send(Arc::clone(chunk))
            .map_err(|error| CaptureError::SinkFailure {
                sink: "consumer-channel".into(),
                message: match error {
                    TrySendError::Full(_) => "consumer lagging, chunk not delivered".into(),
                    TrySendError::Disconnected(_) => "consumer disconnected".into(),
                },
            })
    }
}
