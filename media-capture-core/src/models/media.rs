use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logical capture channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    SystemAudio,
    Microphone,
}

impl StreamKind {
    pub fn is_audio(self) -> bool {
        matches!(self, Self::SystemAudio | Self::Microphone)
    }

    /// Short stable name used in debug file names and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::SystemAudio => "system_audio",
            Self::Microphone => "microphone",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout of raw video buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Nv12,
    I420,
}

/// Sample encoding of raw audio buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    S16Le,
    F32Le,
}

/// Format of a raw video stream, fixed for the lifetime of one source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Bytes per row, including padding.
    pub stride: u32,
}

/// Format of a raw audio stream, fixed for the lifetime of one source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// Stream-specific format metadata carried by every buffer and chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BufferFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

/// One raw buffer delivered by a source adapter.
///
/// `timestamp` is an offset on the source's monotonic clock, not wall clock.
/// Sequence numbers start at 0 and are strictly increasing per adapter
/// instance. A buffer is moved into the accumulator on arrival and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    pub kind: StreamKind,
    pub sequence: u64,
    pub timestamp: Duration,
    pub format: BufferFormat,
    pub payload: Vec<u8>,
}

impl RawBuffer {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
