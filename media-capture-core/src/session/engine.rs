use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::error::CaptureError;
use crate::models::event::{EventHub, SessionEvent, StopReason};
use crate::models::media::StreamKind;
use crate::models::options::CaptureOptions;
use crate::models::state::SessionState;
use crate::processing::backpressure::BackpressureGovernor;
use crate::sinks::debug_file::DebugFileSink;
use crate::sinks::router::ChunkSinkRouter;
use crate::traits::chunk_sink::ChunkSink;
use crate::traits::source_provider::{SourceFactory, SourceProvider};

use super::runtime::CaptureRuntime;
use super::stream::{release_provider, StreamWorker};

/// How long `stop()` waits for each worker and source release before
/// abandoning the handle.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

enum SupervisorMessage {
    Lost(StreamKind),
    Shutdown,
}

/// Everything owned by one running session. Constructed by `start`, consumed
/// by `stop` — exactly one exists at a time, never aliased.
struct ActiveSession {
    id: Uuid,
    options: CaptureOptions,
    governor: Arc<BackpressureGovernor>,
    router: Arc<ChunkSinkRouter>,
    chunk_ids: Arc<AtomicU64>,
    streams: Arc<Mutex<HashMap<StreamKind, StreamWorker>>>,
    supervisor_tx: Sender<SupervisorMessage>,
    supervisor: Option<thread::JoinHandle<()>>,
}

impl ActiveSession {
    fn shutdown(mut self, grace: Duration) {
        let workers: Vec<StreamWorker> = {
            let mut streams = self.streams.lock();
            streams.drain().map(|(_, worker)| worker).collect()
        };
        for worker in workers {
            worker.shutdown(grace);
        }

        let _ = self.supervisor_tx.send(SupervisorMessage::Shutdown);
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
        log::debug!("session {} shut down", self.id);
    }
}

/// The engine behind the UI/command boundary: `start`, `stop`,
/// `set_options`, `status`, plus the ordered event stream.
///
/// Owns at most one `ActiveSession`; `start` while active is rejected, and
/// any fatal failure lands back in `Idle` so `start` is always a safe retry.
/// Sinks are registered while idle and snapshotted into the session's router
/// at `start`.
pub struct CaptureEngine {
    factory: Arc<dyn SourceFactory>,
    sinks: Mutex<Vec<Arc<dyn ChunkSink>>>,
    debug_enabled: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    stored_options: Mutex<CaptureOptions>,
    events: EventHub,
    events_rx: Receiver<SessionEvent>,
    session: Mutex<Option<ActiveSession>>,
    grace: Duration,
}

impl CaptureEngine {
    pub fn new(_runtime: CaptureRuntime, factory: Arc<dyn SourceFactory>) -> Self {
        let (events, events_rx) = EventHub::new();
        Self {
            factory,
            sinks: Mutex::new(Vec::new()),
            debug_enabled: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            stored_options: Mutex::new(CaptureOptions::default()),
            events,
            events_rx,
            session: Mutex::new(None),
            grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Override the cooperative-shutdown grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Subscribe to the session event stream. Events arrive in emission
    /// order; intended for a single consumer.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    pub fn status(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn options(&self) -> CaptureOptions {
        self.stored_options.lock().clone()
    }

    /// Register a sink for future sessions. Only valid while idle: the sink
    /// set is immutable for the lifetime of a session.
    pub fn add_sink(&self, sink: Arc<dyn ChunkSink>) -> Result<(), CaptureError> {
        if self.status().is_active() {
            return Err(CaptureError::ConfigurationInvalid(
                "sinks can only be registered while idle".into(),
            ));
        }
        self.sinks.lock().push(sink);
        Ok(())
    }

    /// Register the debug file sink, wired to the `debug_save` option so a
    /// live reconfigure can toggle it.
    pub fn add_debug_sink(&self, directory: PathBuf) -> Result<(), CaptureError> {
        self.add_sink(Arc::new(DebugFileSink::new(
            directory,
            Arc::clone(&self.debug_enabled),
        )))
    }

    /// Start a capture session. Valid only from `Idle`.
    ///
    /// Acquires video and system audio always, the microphone only when
    /// `capture_mic` is set. Acquisition may block on a platform permission
    /// prompt, so it runs without holding the session slot: `stop()` stays
    /// responsive and can abort the attempt while it is in `Requesting`. If
    /// any required source fails to acquire, the ones already granted are
    /// released, one error event is emitted, and the engine returns to
    /// `Idle` without emitting any chunks.
    pub fn start(&self, options: CaptureOptions) -> Result<(), CaptureError> {
        options.validate()?;

        {
            let mut session_slot = self.session.lock();
            self.reap_defunct_session(&mut session_slot);
            if session_slot.is_some() || !self.status().is_idle() {
                return Err(CaptureError::ConfigurationInvalid(
                    "capture already running".into(),
                ));
            }
            self.set_state(SessionState::Requesting);
        }
        self.debug_enabled
            .store(options.debug_save, Ordering::SeqCst);

        let mut required = vec![StreamKind::Video, StreamKind::SystemAudio];
        if options.capture_mic {
            required.push(StreamKind::Microphone);
        }

        let mut providers: VecDeque<Box<dyn SourceProvider>> = VecDeque::new();
        let mut failure: Option<CaptureError> = None;
        for kind in required {
            match self.factory.acquire_source(kind, &options.target) {
                Ok(provider) => providers.push_back(provider),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        let mut session_slot = self.session.lock();
        if session_slot.is_some() || self.status() != SessionState::Requesting {
            // A stop arrived while acquisition was in flight: hand back
            // every grant and report the aborted start.
            drop(session_slot);
            for granted in providers {
                release_provider(granted.kind(), granted, self.grace);
            }
            return Err(CaptureError::ConfigurationInvalid(
                "capture stopped during source acquisition".into(),
            ));
        }
        if let Some(error) = failure {
            self.set_state(SessionState::Idle);
            drop(session_slot);
            for granted in providers {
                release_provider(granted.kind(), granted, self.grace);
            }
            self.events.emit_error(&error);
            return Err(error);
        }

        let session = match self.build_session(options.clone(), providers) {
            Ok(session) => session,
            Err(error) => {
                self.set_state(SessionState::Idle);
                self.events.emit_error(&error);
                return Err(error);
            }
        };

        log::debug!("session {} started", session.id);
        *session_slot = Some(session);
        *self.stored_options.lock() = options;
        self.set_state(SessionState::Running);
        self.events.emit(SessionEvent::Started);
        Ok(())
    }

    /// Stop the active session, flushing each stream's partial window as a
    /// final chunk. Stopping during acquisition aborts the pending `start`,
    /// which releases its grants. Idempotent: stopping an idle engine is a
    /// no-op.
    pub fn stop(&self) -> Result<(), CaptureError> {
        {
            // A start() blocked in acquisition holds no session yet; flipping
            // the state out of `Requesting` tells it to abort.
            let mut state = self.state.lock();
            if *state == SessionState::Requesting {
                *state = SessionState::Idle;
                self.events.emit(SessionEvent::Stopped {
                    reason: StopReason::UserRequested,
                });
                return Ok(());
            }
        }

        let mut session_slot = self.session.lock();
        let Some(session) = session_slot.take() else {
            return Ok(());
        };

        // A session that already stopped itself (all sources lost) only
        // needs its supervisor reaped; `Stopped` was emitted back then.
        if !self.status().is_active() {
            session.shutdown(self.grace);
            return Ok(());
        }

        self.set_state(SessionState::Stopping);
        session.shutdown(self.grace);
        self.set_state(SessionState::Idle);
        self.events.emit(SessionEvent::Stopped {
            reason: StopReason::UserRequested,
        });
        Ok(())
    }

    /// Apply new options.
    ///
    /// While running this is a live reconfigure: mic toggling and target
    /// changes restart only the affected stream; chunk-duration changes
    /// apply to windows that have not yet started; ceiling and drop-policy
    /// changes apply immediately. While idle the options are stored for the
    /// next `start`. A failed acquisition during reconfigure leaves the
    /// already-running streams untouched.
    pub fn set_options(&self, options: CaptureOptions) -> Result<(), CaptureError> {
        options.validate()?;

        let mut session_slot = self.session.lock();
        self.reap_defunct_session(&mut session_slot);

        let Some(session) = session_slot.as_mut() else {
            *self.stored_options.lock() = options;
            return Ok(());
        };

        if !self.status().is_running() {
            return Err(CaptureError::ConfigurationInvalid(
                "can only reconfigure a running session".into(),
            ));
        }

        self.set_state(SessionState::Reconfiguring);
        let result = self.apply_reconfigure(session, options);
        self.set_state(SessionState::Running);
        result
    }

    fn apply_reconfigure(
        &self,
        session: &mut ActiveSession,
        options: CaptureOptions,
    ) -> Result<(), CaptureError> {
        let previous = session.options.clone();

        session.governor.set_ceiling(options.max_buffered_bytes);
        session
            .governor
            .set_policies(options.video_drop_policy, options.audio_drop_policy);
        self.debug_enabled
            .store(options.debug_save, Ordering::SeqCst);

        if options.chunk_duration_ms != previous.chunk_duration_ms {
            let target = options.chunk_duration();
            for worker in session.streams.lock().values() {
                worker.set_chunk_duration(target);
            }
        }

        if options.target != previous.target {
            self.restart_stream(session, StreamKind::Video, &options)?;
        }

        if options.capture_mic && !previous.capture_mic {
            self.attach_stream(session, StreamKind::Microphone, &options)?;
        } else if !options.capture_mic && previous.capture_mic {
            let worker = session.streams.lock().remove(&StreamKind::Microphone);
            if let Some(worker) = worker {
                worker.shutdown(self.grace);
            }
        }

        session.options = options.clone();
        *self.stored_options.lock() = options;
        Ok(())
    }

    /// Acquire and start a new stream. On failure the session keeps running
    /// with its existing streams; the error is reported and returned.
    fn attach_stream(
        &self,
        session: &ActiveSession,
        kind: StreamKind,
        options: &CaptureOptions,
    ) -> Result<(), CaptureError> {
        let provider = match self.factory.acquire_source(kind, &options.target) {
            Ok(provider) => provider,
            Err(error) => {
                self.events.emit_error(&error);
                return Err(error);
            }
        };

        let worker = StreamWorker::spawn(
            provider,
            options.chunk_duration(),
            Arc::clone(&session.governor),
            Arc::clone(&session.router),
            self.events.clone(),
            Arc::clone(&session.chunk_ids),
            lost_notifier(&session.supervisor_tx),
        )
        .map_err(|error| {
            self.events.emit_error(&error);
            error
        })?;

        session.streams.lock().insert(kind, worker);
        Ok(())
    }

    /// Replace one stream's adapter (e.g., target change): the new source is
    /// acquired first so failure leaves the old stream running.
    fn restart_stream(
        &self,
        session: &ActiveSession,
        kind: StreamKind,
        options: &CaptureOptions,
    ) -> Result<(), CaptureError> {
        let provider = match self.factory.acquire_source(kind, &options.target) {
            Ok(provider) => provider,
            Err(error) => {
                self.events.emit_error(&error);
                return Err(error);
            }
        };

        let old = session.streams.lock().remove(&kind);
        if let Some(worker) = old {
            worker.shutdown(self.grace);
        }

        let worker = StreamWorker::spawn(
            provider,
            options.chunk_duration(),
            Arc::clone(&session.governor),
            Arc::clone(&session.router),
            self.events.clone(),
            Arc::clone(&session.chunk_ids),
            lost_notifier(&session.supervisor_tx),
        )
        .map_err(|error| {
            self.events.emit_error(&error);
            error
        })?;

        session.streams.lock().insert(kind, worker);
        Ok(())
    }

    fn build_session(
        &self,
        options: CaptureOptions,
        mut providers: VecDeque<Box<dyn SourceProvider>>,
    ) -> Result<ActiveSession, CaptureError> {
        let governor = Arc::new(BackpressureGovernor::new(
            options.max_buffered_bytes,
            options.video_drop_policy,
            options.audio_drop_policy,
        ));
        let router = Arc::new(ChunkSinkRouter::new(
            self.sinks.lock().clone(),
            self.events.clone(),
        ));
        let chunk_ids = Arc::new(AtomicU64::new(0));
        let streams = Arc::new(Mutex::new(HashMap::new()));
        let (supervisor_tx, supervisor_rx) = unbounded::<SupervisorMessage>();
        let target = options.chunk_duration();

        while let Some(provider) = providers.pop_front() {
            let kind = provider.kind();
            match StreamWorker::spawn(
                provider,
                target,
                Arc::clone(&governor),
                Arc::clone(&router),
                self.events.clone(),
                Arc::clone(&chunk_ids),
                lost_notifier(&supervisor_tx),
            ) {
                Ok(worker) => {
                    streams.lock().insert(kind, worker);
                }
                Err(error) => {
                    for remaining in providers {
                        release_provider(remaining.kind(), remaining, self.grace);
                    }
                    let started: Vec<StreamWorker> =
                        streams.lock().drain().map(|(_, w)| w).collect();
                    for worker in started {
                        worker.shutdown(self.grace);
                    }
                    return Err(error);
                }
            }
        }

        let supervisor = {
            let streams = Arc::clone(&streams);
            let state = Arc::clone(&self.state);
            let events = self.events.clone();
            let grace = self.grace;
            thread::Builder::new()
                .name("capture-supervisor".into())
                .spawn(move || supervisor_loop(supervisor_rx, streams, state, events, grace))
                .map_err(|e| {
                    CaptureError::ConfigurationInvalid(format!(
                        "failed to spawn supervisor thread: {e}"
                    ))
                })?
        };

        Ok(ActiveSession {
            id: Uuid::new_v4(),
            options,
            governor,
            router,
            chunk_ids,
            streams,
            supervisor_tx,
            supervisor: Some(supervisor),
        })
    }

    /// Clear out a session that stopped itself (all sources lost) so the
    /// engine can start fresh.
    fn reap_defunct_session(&self, session_slot: &mut Option<ActiveSession>) {
        if session_slot.is_some() && self.status().is_idle() {
            if let Some(session) = session_slot.take() {
                session.shutdown(self.grace);
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.shutdown(self.grace);
        }
    }
}

/// Closure handed to workers and termination callbacks for loss reports.
fn lost_notifier(
    supervisor_tx: &Sender<SupervisorMessage>,
) -> Arc<dyn Fn(StreamKind) + Send + Sync> {
    let tx = supervisor_tx.clone();
    Arc::new(move |kind| {
        let _ = tx.send(SupervisorMessage::Lost(kind));
    })
}

/// Reacts to mid-session source loss: the lost stream is flushed and
/// removed, and the session stops itself when no streams remain.
fn supervisor_loop(
    rx: Receiver<SupervisorMessage>,
    streams: Arc<Mutex<HashMap<StreamKind, StreamWorker>>>,
    state: Arc<Mutex<SessionState>>,
    events: EventHub,
    grace: Duration,
) {
    while let Ok(message) = rx.recv() {
        match message {
            SupervisorMessage::Lost(kind) => {
                let worker = streams.lock().remove(&kind);
                let Some(worker) = worker else {
                    continue; // already torn down by stop or reconfigure
                };
                log::warn!("{kind} source lost mid-session");
                worker.shutdown(grace);
                events.emit(SessionEvent::SourceLost { kind });

                if streams.lock().is_empty() {
                    *state.lock() = SessionState::Idle;
                    events.emit(SessionEvent::Stopped {
                        reason: StopReason::SourceLost,
                    });
                }
            }
            SupervisorMessage::Shutdown => break,
        }
    }
}
