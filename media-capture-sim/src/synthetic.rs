//! Deterministic synthetic source providers.
//!
//! Buffers carry fabricated source-clock timestamps (`sequence * interval`),
//! so tests get exact window arithmetic without real-time waits. Optional
//! pacing sleeps between deliveries for wall-clock scenarios; optional
//! termination after N buffers simulates losing a captured window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use media_capture_core::{
    AudioFormat, BufferCallback, BufferFormat, CaptureError, PixelFormat, RawBuffer, SampleFormat,
    SourceProvider, StreamKind, TerminationCallback, VideoFormat,
};

/// Called once when the provider is released, for factory bookkeeping.
pub type ReleaseHook = Arc<dyn Fn(StreamKind) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub kind: StreamKind,
    pub format: BufferFormat,
    /// Timestamp spacing between consecutive buffers.
    pub buffer_interval: Duration,
    pub payload_len: usize,
    /// Real sleep between deliveries; `None` delivers flat-out.
    pub pacing: Option<Duration>,
    /// Deliver this many buffers, then go quiet with the source still alive.
    pub max_buffers: Option<u64>,
    /// Deliver this many buffers, then report unexpected termination.
    pub terminate_after: Option<u64>,
}

impl SyntheticConfig {
    pub fn video() -> Self {
        Self {
            kind: StreamKind::Video,
            format: BufferFormat::Video(VideoFormat {
                width: 640,
                height: 480,
                pixel_format: PixelFormat::Bgra,
                stride: 2_560,
            }),
            buffer_interval: Duration::from_millis(10),
            payload_len: 64,
            pacing: Some(Duration::from_millis(1)),
            max_buffers: None,
            terminate_after: None,
        }
    }

    pub fn system_audio() -> Self {
        Self {
            kind: StreamKind::SystemAudio,
            format: BufferFormat::Audio(AudioFormat {
                sample_rate: 48_000,
                channels: 2,
                sample_format: SampleFormat::F32Le,
            }),
            buffer_interval: Duration::from_millis(10),
            payload_len: 64,
            pacing: Some(Duration::from_millis(1)),
            max_buffers: None,
            terminate_after: None,
        }
    }

    pub fn microphone() -> Self {
        Self {
            kind: StreamKind::Microphone,
            format: BufferFormat::Audio(AudioFormat {
                sample_rate: 48_000,
                channels: 1,
                sample_format: SampleFormat::F32Le,
            }),
            ..Self::system_audio()
        }
    }

    /// A source that produces nothing but stays alive.
    pub fn silent(kind: StreamKind) -> Self {
        let base = match kind {
            StreamKind::Video => Self::video(),
            StreamKind::SystemAudio => Self::system_audio(),
            StreamKind::Microphone => Self::microphone(),
        };
        Self {
            max_buffers: Some(0),
            ..base
        }
    }
}

/// Thread-driven synthetic source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    on_release: Option<ReleaseHook>,
    released: AtomicBool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            on_release: None,
            released: AtomicBool::new(false),
        }
    }

    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.on_release = Some(hook);
        self
    }

    fn notify_released(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(hook) = &self.on_release {
            hook(self.config.kind);
        }
    }
}

impl SourceProvider for SyntheticSource {
    fn kind(&self) -> StreamKind {
        self.config.kind
    }

    fn format(&self) -> BufferFormat {
        self.config.format
    }

    fn start(
        &mut self,
        on_buffer: BufferCallback,
        on_terminated: TerminationCallback,
    ) -> Result<(), CaptureError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::ConfigurationInvalid(
                "synthetic source already running".into(),
            ));
        }

        let config = self.config.clone();
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name(format!("synthetic-{}", config.kind))
            .spawn(move || {
                producer_loop(config, running, on_buffer, on_terminated);
            })
            .map_err(|e| {
                CaptureError::ConfigurationInvalid(format!("failed to spawn producer: {e}"))
            })?;

        log::debug!("synthetic {} source started", self.config.kind);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        log::debug!("synthetic {} source released", self.config.kind);
        self.notify_released();
        Ok(())
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify_released();
    }
}

fn producer_loop(
    config: SyntheticConfig,
    running: Arc<AtomicBool>,
    on_buffer: BufferCallback,
    on_terminated: TerminationCallback,
) {
    let mut sequence: u64 = 0;
    while running.load(Ordering::SeqCst) {
        if let Some(limit) = config.terminate_after {
            if sequence >= limit {
                running.store(false, Ordering::SeqCst);
                on_terminated();
                return;
            }
        }
        if let Some(limit) = config.max_buffers {
            if sequence >= limit {
                // Source stays alive but quiet until stopped.
                thread::sleep(Duration::from_millis(1));
                continue;
            }
        }

        on_buffer(RawBuffer {
            kind: config.kind,
            sequence,
            timestamp: config.buffer_interval * sequence as u32,
            format: config.format,
            payload: vec![(sequence % 251) as u8; config.payload_len],
        });
        sequence += 1;

        if let Some(pacing) = config.pacing {
            thread::sleep(pacing);
        }
    }
}

/// A source whose release overruns any reasonable grace period. Exercises
/// the engine's bounded-stop guarantee.
pub struct StallingSource {
    config: SyntheticConfig,
    stall: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl StallingSource {
    pub fn new(config: SyntheticConfig, stall: Duration) -> Self {
        Self {
            config,
            stall,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }
}

impl SourceProvider for StallingSource {
    fn kind(&self) -> StreamKind {
        self.config.kind
    }

    fn format(&self) -> BufferFormat {
        self.config.format
    }

    fn start(
        &mut self,
        on_buffer: BufferCallback,
        on_terminated: TerminationCallback,
    ) -> Result<(), CaptureError> {
        self.running.store(true, Ordering::SeqCst);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name(format!("stalling-{}", config.kind))
            .spawn(move || {
                producer_loop(config, running, on_buffer, on_terminated);
            })
            .map_err(|e| {
                CaptureError::ConfigurationInvalid(format!("failed to spawn producer: {e}"))
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        thread::sleep(self.stall);
        Ok(())
    }
}
