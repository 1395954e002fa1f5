use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::chunk::{Chunk, ChunkEntry};
use crate::models::error::CaptureError;
use crate::models::media::{BufferFormat, RawBuffer, StreamKind};

/// One buffered position in the current window: a live buffer or a
/// backpressure gap standing in for a dropped one.
#[derive(Debug)]
enum Slot {
    Buffer(RawBuffer),
    Gap { sequence: u64, timestamp: Duration },
}

/// Per-stream window accumulator.
///
/// Buffers incoming `RawBuffer`s until the window's timestamp span reaches
/// the target duration, then closes the window into one immutable `Chunk`.
/// Duration is derived from buffer timestamps, not wall clock, so scheduling
/// jitter on the worker thread cannot shorten a chunk. Gap markers recorded
/// for dropped buffers advance the window clock too; a stream saturated by
/// backpressure still closes its windows on time.
///
/// Chunk ids come from a session-wide shared counter, so ids are monotonic
/// across all streams of one session.
pub struct ChunkAccumulator {
    kind: StreamKind,
    format: BufferFormat,
    target: Duration,
    pending_target: Option<Duration>,
    chunk_ids: Arc<AtomicU64>,
    slots: Vec<Slot>,
    window_start: Option<Duration>,
    last_timestamp: Option<Duration>,
    buffered_bytes: usize,
}

impl ChunkAccumulator {
    pub fn new(
        kind: StreamKind,
        format: BufferFormat,
        target: Duration,
        chunk_ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            kind,
            format,
            target,
            pending_target: None,
            chunk_ids,
            slots: Vec::new(),
            window_start: None,
            last_timestamp: None,
            buffered_bytes: 0,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Unflushed payload bytes held in the current window.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Change the window duration. Takes effect for windows that have not
    /// yet started; the in-progress window keeps its original target.
    pub fn set_target(&mut self, target: Duration) {
        if self.slots.is_empty() {
            self.target = target;
            self.pending_target = None;
        } else {
            self.pending_target = Some(target);
        }
    }

    /// Append a buffer to the current window.
    ///
    /// Returns `Ok(Some(chunk))` when this buffer closes the window. A format
    /// differing from the stream's fixed format is a fatal stream error:
    /// silent format drift would corrupt the chunk's metadata guarantees.
    pub fn push(&mut self, buffer: RawBuffer) -> Result<Option<Chunk>, CaptureError> {
        if buffer.format != self.format {
            return Err(CaptureError::FormatMismatch {
                kind: self.kind,
                sequence: buffer.sequence,
            });
        }

        let timestamp = buffer.timestamp;
        self.open_window_if_needed(timestamp);
        self.buffered_bytes += buffer.payload.len();
        self.slots.push(Slot::Buffer(buffer));
        Ok(self.close_if_elapsed(timestamp))
    }

    /// Record a buffer dropped by backpressure policy.
    ///
    /// The gap keeps sequence accounting intact and advances the window
    /// clock, so a window can close even while every new buffer is dropped.
    pub fn record_gap(&mut self, sequence: u64, timestamp: Duration) -> Option<Chunk> {
        self.open_window_if_needed(timestamp);
        self.slots.push(Slot::Gap {
            sequence,
            timestamp,
        });
        self.close_if_elapsed(timestamp)
    }

    /// Evict the oldest surviving buffer of the window, leaving a gap marker
    /// in its place. Returns the sequence and freed byte count, or `None` if
    /// nothing is left to evict.
    pub fn drop_oldest(&mut self) -> Option<(u64, usize)> {
        for slot in self.slots.iter_mut() {
            if let Slot::Buffer(buffer) = slot {
                let sequence = buffer.sequence;
                let timestamp = buffer.timestamp;
                let freed = buffer.payload.len();
                *slot = Slot::Gap {
                    sequence,
                    timestamp,
                };
                self.buffered_bytes -= freed;
                return Some((sequence, freed));
            }
        }
        None
    }

    /// Force-close a non-empty window regardless of elapsed duration.
    /// Used on stop, reconfigure, and source loss.
    pub fn flush(&mut self) -> Option<Chunk> {
        if self.slots.is_empty() {
            return None;
        }
        Some(self.close_window())
    }

    fn open_window_if_needed(&mut self, timestamp: Duration) {
        if self.slots.is_empty() {
            if let Some(target) = self.pending_target.take() {
                self.target = target;
            }
            self.window_start = Some(timestamp);
        }
        self.last_timestamp = Some(timestamp);
    }

    fn close_if_elapsed(&mut self, timestamp: Duration) -> Option<Chunk> {
        let start = self.window_start?;
        let span = timestamp.saturating_sub(start);
        if span >= self.target {
            Some(self.close_window())
        } else {
            None
        }
    }

    fn close_window(&mut self) -> Chunk {
        let start = self.window_start.take().unwrap_or_default();
        let end = self.last_timestamp.take().unwrap_or(start);

        let mut payload = Vec::with_capacity(self.buffered_bytes);
        let mut index = Vec::with_capacity(self.slots.len());
        for slot in self.slots.drain(..) {
            match slot {
                Slot::Buffer(buffer) => {
                    index.push(ChunkEntry::Buffer {
                        sequence: buffer.sequence,
                        timestamp: buffer.timestamp,
                        offset: payload.len(),
                        len: buffer.payload.len(),
                    });
                    payload.extend_from_slice(&buffer.payload);
                }
                Slot::Gap {
                    sequence,
                    timestamp,
                } => index.push(ChunkEntry::Gap {
                    sequence,
                    timestamp,
                }),
            }
        }
        self.buffered_bytes = 0;

        Chunk {
            id: self.chunk_ids.fetch_add(1, Ordering::SeqCst),
            kind: self.kind,
            start_timestamp: start,
            duration: end.saturating_sub(start),
            format: self.format,
            payload,
            index,
        }
    }
}
