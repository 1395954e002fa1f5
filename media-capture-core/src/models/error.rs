use thiserror::Error;

use super::media::StreamKind;

/// Errors that can occur during capture operations.
///
/// Recovery policy: acquisition failures and format mismatches end the
/// affected stream (and the session, if no streams remain) but never the
/// process; sink failures are swallowed at the router boundary and surfaced
/// as events only. Every fatal condition leaves the session in `Idle`, so
/// `start()` is always safe to retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission denied for {0} source")]
    PermissionDenied(StreamKind),

    #[error("{0} source unavailable")]
    SourceUnavailable(StreamKind),

    #[error("{0} source lost")]
    SourceLost(StreamKind),

    #[error("format mismatch on {kind} stream at sequence {sequence}")]
    FormatMismatch { kind: StreamKind, sequence: u64 },

    #[error("sink '{sink}' failed: {message}")]
    SinkFailure { sink: String, message: String },

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

impl CaptureError {
    /// Whether the error ends the whole session rather than one stream or
    /// one sink delivery.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::SourceUnavailable(_) | Self::ConfigurationInvalid(_)
        )
    }
}
