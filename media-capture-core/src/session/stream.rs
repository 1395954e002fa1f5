use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};

use crate::models::chunk::Chunk;
use crate::models::error::CaptureError;
use crate::models::event::{DropAction, EventHub, SessionEvent};
use crate::models::media::{RawBuffer, StreamKind};
use crate::processing::accumulator::ChunkAccumulator;
use crate::processing::backpressure::{Admission, BackpressureGovernor};
use crate::sinks::router::ChunkSinkRouter;
use crate::traits::source_provider::{BufferCallback, SourceProvider, TerminationCallback};

/// Depth of the producer → worker handoff queue, in buffers. The queue only
/// covers scheduling jitter; sustained imbalance is the governor's job.
const BUFFER_QUEUE_DEPTH: usize = 64;

enum WorkerCommand {
    SetChunkDuration(Duration),
    /// A buffer was discarded at the enqueue point because the handoff queue
    /// was full; the worker records the gap in the current window.
    EnqueueDropped { sequence: u64, timestamp: Duration },
    Stop,
}

/// One running stream: a started source provider, the bounded handoff queue
/// its callback feeds, and the worker thread that accumulates windows and
/// delivers chunks.
///
/// The provider callback never blocks: `try_send` into the bounded queue, or
/// an immediate drop with a gap notice when the queue is full. Window closing
/// and sink delivery happen on the worker thread, so sink latency cannot
/// propagate back into the media source.
pub(crate) struct StreamWorker {
    kind: StreamKind,
    provider: Option<Box<dyn SourceProvider>>,
    ctrl_tx: Sender<WorkerCommand>,
    done_rx: Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamWorker {
    pub(crate) fn spawn(
        mut provider: Box<dyn SourceProvider>,
        target: Duration,
        governor: Arc<BackpressureGovernor>,
        router: Arc<ChunkSinkRouter>,
        events: EventHub,
        chunk_ids: Arc<AtomicU64>,
        on_lost: Arc<dyn Fn(StreamKind) + Send + Sync>,
    ) -> Result<Self, CaptureError> {
        let kind = provider.kind();
        let accumulator = ChunkAccumulator::new(kind, provider.format(), target, chunk_ids);

        let (buf_tx, buf_rx) = bounded::<RawBuffer>(BUFFER_QUEUE_DEPTH);
        let (ctrl_tx, ctrl_rx) = unbounded::<WorkerCommand>();
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = {
            let governor = Arc::clone(&governor);
            let router = Arc::clone(&router);
            let events = events.clone();
            let on_lost = Arc::clone(&on_lost);
            thread::Builder::new()
                .name(format!("stream-worker-{kind}"))
                .spawn(move || {
                    worker_loop(
                        kind,
                        accumulator,
                        buf_rx,
                        ctrl_rx,
                        governor,
                        router,
                        events,
                        on_lost,
                    );
                    let _ = done_tx.send(());
                })
                .map_err(|e| {
                    CaptureError::ConfigurationInvalid(format!(
                        "failed to spawn {kind} worker thread: {e}"
                    ))
                })?
        };

        let on_buffer: BufferCallback = {
            let ctrl = ctrl_tx.clone();
            let events = events.clone();
            Arc::new(move |buffer: RawBuffer| match buf_tx.try_send(buffer) {
                Ok(()) => {}
                // Queue full: the incoming buffer is discarded on the spot.
                // Nothing can be evicted at the enqueue point, so this path
                // is drop-newest for every stream regardless of its
                // configured policy; drop-oldest only applies once buffers
                // have reached the accumulator.
                Err(TrySendError::Full(buffer)) => {
                    let _ = ctrl.send(WorkerCommand::EnqueueDropped {
                        sequence: buffer.sequence,
                        timestamp: buffer.timestamp,
                    });
                    events.emit(SessionEvent::BackpressureTriggered {
                        kind,
                        action: DropAction::DroppedNewest,
                    });
                }
                Err(TrySendError::Disconnected(_)) => {}
            })
        };

        let on_terminated: TerminationCallback = {
            let on_lost = Arc::clone(&on_lost);
            Arc::new(move || on_lost(kind))
        };

        if let Err(error) = provider.start(on_buffer, on_terminated) {
            let _ = ctrl_tx.send(WorkerCommand::Stop);
            if handle.join().is_err() {
                log::error!("{kind} worker thread panicked during rollback");
            }
            return Err(error);
        }

        Ok(Self {
            kind,
            provider: Some(provider),
            ctrl_tx,
            done_rx,
            handle: Some(handle),
        })
    }

    pub(crate) fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Applies to windows that have not yet started.
    pub(crate) fn set_chunk_duration(&self, target: Duration) {
        let _ = self.ctrl_tx.send(WorkerCommand::SetChunkDuration(target));
    }

    /// Cooperative, bounded shutdown: flush the partial window, then release
    /// the source adapter. If either step overruns the grace period the
    /// handle is abandoned with a warning instead of hanging the caller.
    pub(crate) fn shutdown(mut self, grace: Duration) {
        let _ = self.ctrl_tx.send(WorkerCommand::Stop);
        match self.done_rx.recv_timeout(grace) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => {
                log::warn!(
                    "{} worker did not stop within {:?}; abandoning thread",
                    self.kind,
                    grace
                );
                self.handle.take();
            }
        }

        if let Some(provider) = self.provider.take() {
            release_provider(self.kind, provider, grace);
        }
    }
}

/// Release a source adapter without trusting it to return promptly. After
/// the grace period the handle is leaked and logged rather than blocking
/// stop indefinitely.
pub(crate) fn release_provider(
    kind: StreamKind,
    mut provider: Box<dyn SourceProvider>,
    grace: Duration,
) {
    let (done_tx, done_rx) = bounded::<()>(1);
    let spawned = thread::Builder::new()
        .name(format!("source-release-{kind}"))
        .spawn(move || {
            if let Err(error) = provider.stop() {
                log::warn!("{kind} source reported an error on release: {error}");
            }
            let _ = done_tx.send(());
        });

    match spawned {
        Ok(handle) => match done_rx.recv_timeout(grace) {
            Ok(()) => {
                let _ = handle.join();
            }
            Err(_) => {
                log::warn!("{kind} source did not release within {grace:?}; leaking handle");
            }
        },
        Err(error) => {
            log::error!("failed to spawn release thread for {kind} source: {error}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    kind: StreamKind,
    mut accumulator: ChunkAccumulator,
    buf_rx: Receiver<RawBuffer>,
    ctrl_rx: Receiver<WorkerCommand>,
    governor: Arc<BackpressureGovernor>,
    router: Arc<ChunkSinkRouter>,
    events: EventHub,
    on_lost: Arc<dyn Fn(StreamKind) + Send + Sync>,
) {
    loop {
        select! {
            recv(ctrl_rx) -> command => match command {
                Ok(WorkerCommand::SetChunkDuration(target)) => accumulator.set_target(target),
                Ok(WorkerCommand::EnqueueDropped { sequence, timestamp }) => {
                    if let Some(chunk) = accumulator.record_gap(sequence, timestamp) {
                        emit_chunk(&governor, &router, chunk);
                    }
                }
                Ok(WorkerCommand::Stop) | Err(_) => break,
            },
            recv(buf_rx) -> buffer => match buffer {
                Ok(buffer) => {
                    if let Err(fatal) =
                        handle_buffer(kind, &mut accumulator, &governor, &router, &events, buffer)
                    {
                        log::error!("{kind} stream ended: {fatal}");
                        events.emit_error(&fatal);
                        on_lost(kind);
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }

    // Drain whatever the producer managed to enqueue before shutdown, then
    // flush the partial window as a final (possibly short) chunk.
    while let Ok(buffer) = buf_rx.try_recv() {
        match handle_buffer(kind, &mut accumulator, &governor, &router, &events, buffer) {
            Ok(()) => {}
            Err(error) => {
                log::warn!("{kind} buffer discarded during drain: {error}");
                break;
            }
        }
    }
    if let Some(chunk) = accumulator.flush() {
        emit_chunk(&governor, &router, chunk);
    }
}

fn handle_buffer(
    kind: StreamKind,
    accumulator: &mut ChunkAccumulator,
    governor: &BackpressureGovernor,
    router: &ChunkSinkRouter,
    events: &EventHub,
    buffer: RawBuffer,
) -> Result<(), CaptureError> {
    match governor.admit(kind, buffer.payload.len()) {
        Admission::Admit => {
            if let Some(chunk) = accumulator.push(buffer)? {
                emit_chunk(governor, router, chunk);
            }
        }
        Admission::Drop(DropAction::DroppedNewest) => {
            events.emit(SessionEvent::BackpressureTriggered {
                kind,
                action: DropAction::DroppedNewest,
            });
            if let Some(chunk) = accumulator.record_gap(buffer.sequence, buffer.timestamp) {
                emit_chunk(governor, router, chunk);
            }
        }
        Admission::Drop(DropAction::DroppedOldest) => {
            events.emit(SessionEvent::BackpressureTriggered {
                kind,
                action: DropAction::DroppedOldest,
            });
            let len = buffer.payload.len();
            let mut admitted = false;
            while let Some((_, freed)) = accumulator.drop_oldest() {
                governor.release(freed);
                if governor.admit(kind, len) == Admission::Admit {
                    admitted = true;
                    break;
                }
            }
            if admitted {
                if let Some(chunk) = accumulator.push(buffer)? {
                    emit_chunk(governor, router, chunk);
                }
            } else {
                // Another stream holds the whole budget; nothing left to
                // evict here, so the incoming buffer becomes the gap.
                if let Some(chunk) = accumulator.record_gap(buffer.sequence, buffer.timestamp) {
                    emit_chunk(governor, router, chunk);
                }
            }
        }
    }
    Ok(())
}

fn emit_chunk(governor: &BackpressureGovernor, router: &ChunkSinkRouter, chunk: Chunk) {
    governor.release(chunk.payload.len());
    router.deliver(chunk);
}
