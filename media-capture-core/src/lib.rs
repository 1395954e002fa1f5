//! # media-capture-core
//!
//! Capture-and-chunking engine for live display video and audio.
//!
//! Owns one or more live source pipelines, pulls raw timestamped buffers
//! from them, accumulates each stream independently into fixed-duration
//! chunks with synchronization metadata, applies backpressure policy when
//! the consumer cannot keep up, and exposes a start/stop/reconfigure
//! lifecycle with typed errors. Platform bindings implement the
//! `SourceProvider`/`SourceFactory` traits and plug in from the outside;
//! chunk consumers implement `ChunkSink`.
//!
//! ## Architecture
//!
//! ```text
//! media-capture-core (this crate)
//! ├── traits/       ← SourceProvider, SourceFactory, ChunkSink
//! ├── models/       ← RawBuffer, Chunk, CaptureOptions, SessionState, events, errors
//! ├── processing/   ← ChunkAccumulator, BackpressureGovernor
//! ├── session/      ← CaptureEngine, per-stream workers, runtime init token
//! └── sinks/        ← ChunkSinkRouter, DebugFileSink, ChannelSink
//! ```
//!
//! Data flow: source adapter → raw buffer → per-stream accumulator →
//! completed chunk → sink router → registered sinks. The producer callback
//! path is non-blocking end to end; sink latency never reaches the source.

pub mod models;
pub mod processing;
pub mod session;
pub mod sinks;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::chunk::{Chunk, ChunkEntry};
pub use models::error::CaptureError;
pub use models::event::{DropAction, ErrorKind, EventHub, SessionEvent, StopReason};
pub use models::media::{
    AudioFormat, BufferFormat, PixelFormat, RawBuffer, SampleFormat, StreamKind, VideoFormat,
};
pub use models::options::{CaptureOptions, CaptureTarget, DropPolicy};
pub use models::state::SessionState;
pub use processing::accumulator::ChunkAccumulator;
pub use processing::backpressure::{Admission, BackpressureGovernor};
pub use session::engine::CaptureEngine;
pub use session::runtime::CaptureRuntime;
pub use sinks::channel::ChannelSink;
pub use sinks::debug_file::{ChunkManifest, DebugFileSink};
pub use sinks::router::ChunkSinkRouter;
pub use traits::chunk_sink::ChunkSink;
pub use traits::source_provider::{
    BufferCallback, SourceFactory, SourceProvider, TerminationCallback,
};
