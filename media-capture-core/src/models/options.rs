use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// What the video source adapter should capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureTarget {
    FullDisplay,
    Window { id: String },
}

impl Default for CaptureTarget {
    fn default() -> Self {
        CaptureTarget::FullDisplay
    }
}

/// What to do with new buffers once the backpressure ceiling is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Discard the incoming buffer, keeping in-progress older data intact.
    DropNewest,
    /// Evict the oldest buffered data of the window to make room.
    DropOldest,
}

/// Configuration snapshot for a capture session.
///
/// The serde layout matches the UI command payload: snake_case fields, all
/// defaulted, internally tagged target enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Accumulation window length per stream in milliseconds.
    #[serde(default = "CaptureOptions::default_chunk_ms")]
    pub chunk_duration_ms: u64,

    /// Capture the microphone in addition to video and system audio.
    #[serde(default)]
    pub capture_mic: bool,

    /// Persist emitted chunks through the debug file sink.
    #[serde(default)]
    pub debug_save: bool,

    #[serde(default)]
    pub target: CaptureTarget,

    /// Backpressure ceiling: total unflushed bytes across all streams.
    #[serde(default = "CaptureOptions::default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,

    #[serde(default = "CaptureOptions::default_video_drop_policy")]
    pub video_drop_policy: DropPolicy,

    /// A tail of the byte budget is reserved for audio before this policy
    /// fires; gaps are more audible than late video frames.
    #[serde(default = "CaptureOptions::default_audio_drop_policy")]
    pub audio_drop_policy: DropPolicy,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            chunk_duration_ms: Self::default_chunk_ms(),
            capture_mic: false,
            debug_save: false,
            target: CaptureTarget::FullDisplay,
            max_buffered_bytes: Self::default_max_buffered_bytes(),
            video_drop_policy: Self::default_video_drop_policy(),
            audio_drop_policy: Self::default_audio_drop_policy(),
        }
    }
}

impl CaptureOptions {
    pub const fn default_chunk_ms() -> u64 {
        5_000
    }

    pub const fn default_max_buffered_bytes() -> usize {
        64 * 1024 * 1024
    }

    pub const fn default_video_drop_policy() -> DropPolicy {
        DropPolicy::DropNewest
    }

    pub const fn default_audio_drop_policy() -> DropPolicy {
        DropPolicy::DropOldest
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_duration_ms)
    }

    /// Rejects options before they take effect in `start` or `set_options`.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.chunk_duration_ms == 0 {
            return Err(CaptureError::ConfigurationInvalid(
                "chunk duration must be positive".into(),
            ));
        }
        if self.max_buffered_bytes == 0 {
            return Err(CaptureError::ConfigurationInvalid(
                "max buffered bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}
