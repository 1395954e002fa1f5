use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::media::StreamKind;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserRequested,
    SourceLost,
}

/// Backpressure action actually taken on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropAction {
    DroppedNewest,
    DroppedOldest,
}

/// Serializable mirror of the `CaptureError` taxonomy for event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    SourceUnavailable,
    SourceLost,
    FormatMismatch,
    SinkFailure,
    ConfigurationInvalid,
}

impl From<&CaptureError> for ErrorKind {
    fn from(error: &CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied(_) => Self::PermissionDenied,
            CaptureError::SourceUnavailable(_) => Self::SourceUnavailable,
            CaptureError::SourceLost(_) => Self::SourceLost,
            CaptureError::FormatMismatch { .. } => Self::FormatMismatch,
            CaptureError::SinkFailure { .. } => Self::SinkFailure,
            CaptureError::ConfigurationInvalid(_) => Self::ConfigurationInvalid,
        }
    }
}

/// Lifecycle and error notifications surfaced to external observers.
///
/// Events are delivered in emission order on a single stream; within-stream
/// chunk events are ordered, cross-stream ordering is not guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started,
    Stopped { reason: StopReason },
    ChunkEmitted { chunk_id: u64, kind: StreamKind },
    SourceLost { kind: StreamKind },
    Error { kind: ErrorKind, message: String },
    BackpressureTriggered { kind: StreamKind, action: DropAction },
}

/// Fan-out point for `SessionEvent`s.
///
/// Cheap to clone into worker threads and callbacks. Emission never blocks;
/// if the subscriber is gone the event is discarded.
#[derive(Clone)]
pub struct EventHub {
    tx: Sender<SessionEvent>,
}

impl EventHub {
    pub fn new() -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_error(&self, error: &CaptureError) {
        self.emit(SessionEvent::Error {
            kind: ErrorKind::from(error),
            message: error.to_string(),
        });
    }
}
