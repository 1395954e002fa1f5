use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::chunk::{Chunk, ChunkEntry};
use crate::models::error::CaptureError;
use crate::models::media::{BufferFormat, StreamKind};
use crate::traits::chunk_sink::ChunkSink;

/// JSON sidecar written next to each debug chunk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub chunk_id: u64,
    pub kind: StreamKind,
    pub start_timestamp_ms: u64,
    pub duration_ms: u64,
    pub format: BufferFormat,
    pub payload_len: usize,
    pub index: Vec<ChunkEntry>,
    pub created_at: String,
}

impl ChunkManifest {
    fn for_chunk(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id,
            kind: chunk.kind,
            start_timestamp_ms: chunk.start_timestamp.as_millis() as u64,
            duration_ms: chunk.duration.as_millis() as u64,
            format: chunk.format,
            payload_len: chunk.payload.len(),
            index: chunk.index.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Side-effect sink persisting raw chunks for offline inspection.
///
/// File names are timestamp-ordered (`{start_ms:013}_{kind}_{id:06}.raw`) so
/// a directory listing reads in capture order per stream. A sidecar
/// `.json` manifest carries the chunk metadata. The `enabled` flag is shared
/// with the engine so `debug_save` can be toggled by a live reconfigure
/// without touching the session's sink set.
pub struct DebugFileSink {
    directory: PathBuf,
    enabled: Arc<AtomicBool>,
}

impl DebugFileSink {
    pub fn new(directory: PathBuf, enabled: Arc<AtomicBool>) -> Self {
        Self { directory, enabled }
    }

    fn file_stem(chunk: &Chunk) -> String {
        format!(
            "{:013}_{}_{:06}",
            chunk.start_timestamp.as_millis(),
            chunk.kind,
            chunk.id
        )
    }

    fn storage_error(message: String) -> CaptureError {
        CaptureError::SinkFailure {
            sink: "debug-file".into(),
            message,
        }
    }
}

impl ChunkSink for DebugFileSink {
    fn name(&self) -> &str {
        "debug-file"
    }

    fn deliver(&self, chunk: &Arc<Chunk>) -> Result<(), CaptureError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }

        fs::create_dir_all(&self.directory)
            .map_err(|e| Self::storage_error(format!("failed to create directory: {e}")))?;

        let stem = Self::file_stem(chunk);
        let raw_path = self.directory.join(format!("{stem}.raw"));
        fs::write(&raw_path, &chunk.payload)
            .map_err(|e| Self::storage_error(format!("failed to write payload: {e}")))?;

        let manifest = ChunkManifest::for_chunk(chunk);
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Self::storage_error(format!("failed to serialize manifest: {e}")))?;
        fs::write(self.directory.join(format!("{stem}.json")), json)
            .map_err(|e| Self::storage_error(format!("failed to write manifest: {e}")))?;

        Ok(())
    }
}
