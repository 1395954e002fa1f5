use std::sync::Arc;

use crate::models::error::CaptureError;
use crate::models::media::{BufferFormat, RawBuffer, StreamKind};
use crate::models::options::CaptureTarget;

/// Callback invoked when a raw buffer is available.
///
/// Fires on the source's producer thread (or a media-framework callback
/// thread the engine does not own). Implementations must not block: the
/// engine hands the buffer to a bounded queue and returns immediately.
pub type BufferCallback = Arc<dyn Fn(RawBuffer) + Send + Sync + 'static>;

/// Callback invoked once if the source terminates unexpectedly
/// (e.g., a captured window was closed). Not invoked on `stop()`.
pub type TerminationCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Interface for platform-specific live media sources.
///
/// Implemented by platform bindings (PipeWire/GStreamer screen cast, WASAPI
/// loopback, ...) and by the synthetic sources in `media-capture-sim`.
pub trait SourceProvider: Send + Sync {
    /// The logical channel this source feeds.
    fn kind(&self) -> StreamKind;

    /// Stream format, fixed for the lifetime of this provider instance.
    /// A format change requires acquiring a fresh provider.
    fn format(&self) -> BufferFormat;

    /// Start delivering buffers via `on_buffer`.
    ///
    /// `on_terminated` fires at most once if the source dies mid-capture.
    /// Both callbacks fire on a thread owned by the provider.
    fn start(
        &mut self,
        on_buffer: BufferCallback,
        on_terminated: TerminationCallback,
    ) -> Result<(), CaptureError>;

    /// Stop delivering buffers and release platform resources.
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Capability acquisition boundary backing the platform permission flow.
///
/// Acquisition may prompt the user; denial and unavailability are both fatal
/// to the acquisition and reported as typed errors. The engine never retries
/// internally — retry is the caller's decision through `start()`.
pub trait SourceFactory: Send + Sync {
    fn acquire_source(
        &self,
        kind: StreamKind,
        target: &CaptureTarget,
    ) -> Result<Box<dyn SourceProvider>, CaptureError>;
}
