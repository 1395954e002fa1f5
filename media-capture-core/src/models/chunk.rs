use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::media::{BufferFormat, StreamKind};

/// One entry in a chunk's buffer index.
///
/// `Gap` records a buffer that was dropped by backpressure policy: the
/// sequence number is preserved so within-stream numbering stays gap-free at
/// the accounting level even though the payload bytes are missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum ChunkEntry {
    Buffer {
        sequence: u64,
        #[serde(with = "duration_millis")]
        timestamp: Duration,
        /// Byte offset of this buffer's payload within `Chunk::payload`.
        offset: usize,
        len: usize,
    },
    Gap {
        sequence: u64,
        #[serde(with = "duration_millis")]
        timestamp: Duration,
    },
}

impl ChunkEntry {
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Buffer { sequence, .. } | Self::Gap { sequence, .. } => *sequence,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }
}

/// An immutable, time-bounded unit of captured media.
///
/// Produced exactly once per accumulation window per stream. `payload` is the
/// concatenation of all surviving buffer payloads in arrival order; `index`
/// locates each buffer (or gap) within it. Chunk ids are monotonically
/// increasing per session, shared across streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: u64,
    pub kind: StreamKind,
    /// Timestamp of the first buffer in the window, on the source clock.
    pub start_timestamp: Duration,
    pub duration: Duration,
    pub format: BufferFormat,
    pub payload: Vec<u8>,
    pub index: Vec<ChunkEntry>,
}

impl Chunk {
    /// Sequence number of the first index entry, if any.
    pub fn first_sequence(&self) -> Option<u64> {
        self.index.first().map(ChunkEntry::sequence)
    }

    /// Sequence number of the last index entry, if any.
    pub fn last_sequence(&self) -> Option<u64> {
        self.index.last().map(ChunkEntry::sequence)
    }

    /// Number of buffers dropped from this window by backpressure.
    pub fn gap_count(&self) -> usize {
        self.index.iter().filter(|e| e.is_gap()).count()
    }
}

/// Serialize `Duration` as integer milliseconds for the debug manifest.
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}
