//! End-to-end session scenarios driven through the simulation backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use media_capture_core::{
    CaptureEngine, CaptureError, CaptureOptions, CaptureRuntime, CaptureTarget, ChannelSink, Chunk,
    ChunkEntry, DropAction, ErrorKind, SessionEvent, SessionState, SourceFactory, SourceProvider,
    StopReason, StreamKind,
};
use media_capture_sim::{SimSourceFactory, SourceScript, SyntheticConfig};

const TIMEOUT: Duration = Duration::from_secs(5);

fn engine_with(
    factory: &Arc<SimSourceFactory>,
) -> (CaptureEngine, Receiver<SessionEvent>, Receiver<Arc<Chunk>>) {
    let runtime = CaptureRuntime::init().unwrap();
    let engine = CaptureEngine::new(runtime, factory.clone());
    let events = engine.events();
    let (sink, chunks) = ChannelSink::new(256);
    engine.add_sink(Arc::new(sink)).unwrap();
    (engine, events, chunks)
}

fn short_window_options() -> CaptureOptions {
    CaptureOptions {
        chunk_duration_ms: 100,
        ..Default::default()
    }
}

/// Receive chunks until one of the wanted kind arrives.
fn recv_chunk_of(rx: &Receiver<Arc<Chunk>>, kind: StreamKind) -> Arc<Chunk> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("no {kind} chunk within {TIMEOUT:?}"));
        let chunk = rx
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("no {kind} chunk within {TIMEOUT:?}"));
        if chunk.kind == kind {
            return chunk;
        }
    }
}

fn wait_for_event<F: Fn(&SessionEvent) -> bool>(rx: &Receiver<SessionEvent>, matches: F) {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("expected event did not arrive within {TIMEOUT:?}"));
        let event = rx
            .recv_timeout(remaining)
            .expect("event stream closed before expected event");
        if matches(&event) {
            return;
        }
    }
}

fn wait_for_state(engine: &CaptureEngine, state: SessionState) {
    let deadline = Instant::now() + TIMEOUT;
    while engine.status() != state {
        assert!(
            Instant::now() < deadline,
            "engine did not reach {state:?} (currently {:?})",
            engine.status()
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn assert_gap_free(chunk: &Chunk) {
    let first = chunk.first_sequence().expect("chunk has entries");
    let sequences: Vec<u64> = chunk.index.iter().map(ChunkEntry::sequence).collect();
    let expected: Vec<u64> = (first..first + sequences.len() as u64).collect();
    assert_eq!(sequences, expected, "sequences not consecutive");
    assert_eq!(chunk.gap_count(), 0);
}

#[test]
fn full_lifecycle_produces_chunks_for_each_stream() {
    let factory = Arc::new(SimSourceFactory::granting_defaults());
    let (engine, events, chunks) = engine_with(&factory);

    engine.start(short_window_options()).unwrap();
    assert_eq!(engine.status(), SessionState::Running);
    wait_for_event(&events, |e| matches!(e, SessionEvent::Started));

    let video = recv_chunk_of(&chunks, StreamKind::Video);
    assert_eq!(video.first_sequence(), Some(0));
    assert!(video.duration >= Duration::from_millis(100));
    assert_gap_free(&video);
    assert_eq!(video.payload.len(), video.index.len() * 64);

    let audio = recv_chunk_of(&chunks, StreamKind::SystemAudio);
    assert!(audio.duration >= Duration::from_millis(100));
    assert_gap_free(&audio);

    wait_for_event(&events, |e| matches!(e, SessionEvent::ChunkEmitted { .. }));

    engine.stop().unwrap();
    assert_eq!(engine.status(), SessionState::Idle);
    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::Stopped {
                reason: StopReason::UserRequested
            }
        )
    });

    // Both granted sources were handed back.
    let released = factory.released();
    assert!(released.contains(&StreamKind::Video));
    assert!(released.contains(&StreamKind::SystemAudio));
}

#[test]
fn mic_denied_at_start_releases_granted_sources() {
    let factory = Arc::new(SimSourceFactory::granting_defaults());
    factory.script(StreamKind::Microphone, SourceScript::Deny);
    let (engine, events, chunks) = engine_with(&factory);

    let options = CaptureOptions {
        capture_mic: true,
        ..short_window_options()
    };
    let error = engine.start(options).unwrap_err();
    assert!(matches!(
        error,
        CaptureError::PermissionDenied(StreamKind::Microphone)
    ));
    assert_eq!(engine.status(), SessionState::Idle);

    // Video and system audio had already been granted and must come back.
    assert_eq!(factory.release_count(StreamKind::Video), 1);
    assert_eq!(factory.release_count(StreamKind::SystemAudio), 1);

    // Exactly one error event, nothing else, and no chunks.
    let emitted: Vec<SessionEvent> = events.try_iter().collect();
    assert_eq!(emitted.len(), 1);
    assert!(matches!(
        emitted[0],
        SessionEvent::Error {
            kind: ErrorKind::PermissionDenied,
            ..
        }
    ));
    assert!(chunks.try_recv().is_err());

    // The failure left the engine in a state where start is a safe retry.
    engine.start(short_window_options()).unwrap();
    assert_eq!(engine.status(), SessionState::Running);
    engine.stop().unwrap();
}

#[test]
fn windows_close_on_timestamp_span_with_contiguous_sequences() {
    let factory = Arc::new(SimSourceFactory::new());
    factory.script(
        StreamKind::Video,
        SourceScript::Grant(SyntheticConfig {
            pacing: None,
            max_buffers: Some(25),
            ..SyntheticConfig::video()
        }),
    );
    factory.script(
        StreamKind::SystemAudio,
        SourceScript::Grant(SyntheticConfig::silent(StreamKind::SystemAudio)),
    );
    let (engine, _events, chunks) = engine_with(&factory);

    engine.start(short_window_options()).unwrap();

    // 10ms spacing against a 100ms window: the buffer at 100ms closes the
    // first window, the one at 210ms the second.
    let first = recv_chunk_of(&chunks, StreamKind::Video);
    assert_eq!(first.first_sequence(), Some(0));
    assert_eq!(first.last_sequence(), Some(10));
    assert_eq!(first.duration, Duration::from_millis(100));
    assert_gap_free(&first);

    let second = recv_chunk_of(&chunks, StreamKind::Video);
    assert_eq!(second.first_sequence(), Some(11));
    assert_eq!(second.last_sequence(), Some(21));
    assert_eq!(second.start_timestamp, Duration::from_millis(110));
    assert_gap_free(&second);
    assert!(second.id > first.id);

    // Stop flushes the partial window as a final short chunk.
    engine.stop().unwrap();
    let last = recv_chunk_of(&chunks, StreamKind::Video);
    assert_eq!(last.first_sequence(), Some(22));
    assert_eq!(last.last_sequence(), Some(24));
    assert!(last.duration < Duration::from_millis(100));
    assert_gap_free(&last);

    // The silent audio stream had nothing buffered, so no audio chunk.
    assert!(chunks.try_recv().is_err());
}

#[test]
fn reconfigure_toggles_microphone_without_disturbing_other_streams() {
    let factory = Arc::new(SimSourceFactory::granting_defaults());
    factory.script(
        StreamKind::Microphone,
        SourceScript::Grant(SyntheticConfig::microphone()),
    );
    let (engine, _events, chunks) = engine_with(&factory);

    engine.start(short_window_options()).unwrap();
    let before = recv_chunk_of(&chunks, StreamKind::Video);

    let options = CaptureOptions {
        capture_mic: true,
        ..short_window_options()
    };
    engine.set_options(options.clone()).unwrap();
    assert_eq!(engine.status(), SessionState::Running);
    assert!(factory.acquired().contains(&StreamKind::Microphone));

    // Mic chunks start flowing; video was not interrupted, so its sequence
    // numbering continues right where the pre-reconfigure chunk ended.
    recv_chunk_of(&chunks, StreamKind::Microphone);
    let after = recv_chunk_of(&chunks, StreamKind::Video);
    assert!(after.first_sequence() > before.last_sequence());
    assert_gap_free(&after);

    // Toggle the mic back off: only its source is released.
    engine
        .set_options(CaptureOptions {
            capture_mic: false,
            ..options
        })
        .unwrap();
    assert_eq!(engine.status(), SessionState::Running);
    assert_eq!(factory.release_count(StreamKind::Microphone), 1);
    assert_eq!(factory.release_count(StreamKind::Video), 0);

    recv_chunk_of(&chunks, StreamKind::Video);
    engine.stop().unwrap();
}

#[test]
fn reconfigure_acquisition_failure_keeps_session_running() {
    let factory = Arc::new(SimSourceFactory::granting_defaults());
    factory.script(StreamKind::Microphone, SourceScript::Deny);
    let (engine, events, chunks) = engine_with(&factory);

    engine.start(short_window_options()).unwrap();
    recv_chunk_of(&chunks, StreamKind::Video);

    let error = engine
        .set_options(CaptureOptions {
            capture_mic: true,
            ..short_window_options()
        })
        .unwrap_err();
    assert!(matches!(
        error,
        CaptureError::PermissionDenied(StreamKind::Microphone)
    ));
    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::Error {
                kind: ErrorKind::PermissionDenied,
                ..
            }
        )
    });

    // Existing streams keep producing.
    assert_eq!(engine.status(), SessionState::Running);
    recv_chunk_of(&chunks, StreamKind::Video);
    recv_chunk_of(&chunks, StreamKind::SystemAudio);
    engine.stop().unwrap();
}

#[test]
fn losing_one_source_keeps_the_rest_of_the_session_alive() {
    let factory = Arc::new(SimSourceFactory::new());
    factory.script(
        StreamKind::Video,
        SourceScript::Grant(SyntheticConfig {
            terminate_after: Some(5),
            ..SyntheticConfig::video()
        }),
    );
    factory.script(
        StreamKind::SystemAudio,
        SourceScript::Grant(SyntheticConfig::system_audio()),
    );
    let (engine, events, chunks) = engine_with(&factory);

    engine.start(short_window_options()).unwrap();
    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::SourceLost {
                kind: StreamKind::Video
            }
        )
    });

    // The surviving audio stream continues.
    assert_eq!(engine.status(), SessionState::Running);
    recv_chunk_of(&chunks, StreamKind::SystemAudio);

    engine.stop().unwrap();
    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::Stopped {
                reason: StopReason::UserRequested
            }
        )
    });
}

#[test]
fn losing_every_source_stops_the_session() {
    let factory = Arc::new(SimSourceFactory::new());
    factory.script(
        StreamKind::Video,
        SourceScript::Grant(SyntheticConfig {
            terminate_after: Some(3),
            ..SyntheticConfig::video()
        }),
    );
    factory.script(
        StreamKind::SystemAudio,
        SourceScript::Grant(SyntheticConfig {
            terminate_after: Some(3),
            ..SyntheticConfig::system_audio()
        }),
    );
    let (engine, events, _chunks) = engine_with(&factory);

    engine.start(short_window_options()).unwrap();
    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::Stopped {
                reason: StopReason::SourceLost
            }
        )
    });
    wait_for_state(&engine, SessionState::Idle);

    // A fresh start works after the self-stop.
    factory.script(
        StreamKind::Video,
        SourceScript::Grant(SyntheticConfig::video()),
    );
    factory.script(
        StreamKind::SystemAudio,
        SourceScript::Grant(SyntheticConfig::system_audio()),
    );
    engine.start(short_window_options()).unwrap();
    assert_eq!(engine.status(), SessionState::Running);
    engine.stop().unwrap();
}

#[test]
fn backpressure_records_gap_markers_and_still_closes_windows() {
    let factory = Arc::new(SimSourceFactory::new());
    factory.script(
        StreamKind::Video,
        SourceScript::Grant(SyntheticConfig {
            payload_len: 1_000,
            pacing: None,
            max_buffers: Some(21),
            ..SyntheticConfig::video()
        }),
    );
    factory.script(
        StreamKind::SystemAudio,
        SourceScript::Grant(SyntheticConfig::silent(StreamKind::SystemAudio)),
    );
    let (engine, events, chunks) = engine_with(&factory);

    // Video's byte budget (the ceiling minus the audio reserve) admits four
    // 1000-byte buffers; the rest of the 200ms window is dropped, but gap
    // markers keep the clock moving so it closes on time.
    engine
        .start(CaptureOptions {
            chunk_duration_ms: 200,
            max_buffered_bytes: 5_000,
            ..Default::default()
        })
        .unwrap();

    let chunk = recv_chunk_of(&chunks, StreamKind::Video);
    assert_eq!(chunk.first_sequence(), Some(0));
    assert_eq!(chunk.last_sequence(), Some(20));
    assert!(chunk.duration >= Duration::from_millis(200));
    assert!(chunk.gap_count() > 0);
    assert_eq!(chunk.index.len(), 21);
    assert_eq!(chunk.payload.len(), 4_000);

    // Every index position is accounted for even though payloads were shed.
    let sequences: Vec<u64> = chunk.index.iter().map(ChunkEntry::sequence).collect();
    assert_eq!(sequences, (0..=20).collect::<Vec<_>>());

    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::BackpressureTriggered {
                kind: StreamKind::Video,
                action: DropAction::DroppedNewest,
            }
        )
    });

    engine.stop().unwrap();
}

#[test]
fn stop_is_bounded_even_when_a_source_release_stalls() {
    let factory = Arc::new(SimSourceFactory::new());
    factory.script(
        StreamKind::Video,
        SourceScript::GrantStalling {
            config: SyntheticConfig::silent(StreamKind::Video),
            stall: Duration::from_secs(30),
        },
    );
    factory.script(
        StreamKind::SystemAudio,
        SourceScript::Grant(SyntheticConfig::silent(StreamKind::SystemAudio)),
    );

    let runtime = CaptureRuntime::init().unwrap();
    let engine = CaptureEngine::new(runtime, factory.clone())
        .with_grace_period(Duration::from_millis(100));

    engine.start(short_window_options()).unwrap();

    let begin = Instant::now();
    engine.stop().unwrap();
    assert!(
        begin.elapsed() < Duration::from_secs(2),
        "stop took {:?} despite the grace period",
        begin.elapsed()
    );
    assert_eq!(engine.status(), SessionState::Idle);
}

#[test]
fn stop_aborts_a_start_blocked_in_acquisition() {
    // Wraps the scripted factory with a simulated permission prompt on the
    // system-audio acquisition: it parks until the test lets it proceed.
    struct PromptGate {
        inner: Arc<SimSourceFactory>,
        entered: Sender<()>,
        proceed: Receiver<()>,
    }

    impl SourceFactory for PromptGate {
        fn acquire_source(
            &self,
            kind: StreamKind,
            target: &CaptureTarget,
        ) -> Result<Box<dyn SourceProvider>, CaptureError> {
            if kind == StreamKind::SystemAudio {
                let _ = self.entered.send(());
                let _ = self.proceed.recv();
            }
            self.inner.acquire_source(kind, target)
        }
    }

    let sim = Arc::new(SimSourceFactory::granting_defaults());
    let (entered_tx, entered_rx) = bounded(1);
    let (proceed_tx, proceed_rx) = bounded(1);
    let factory = Arc::new(PromptGate {
        inner: Arc::clone(&sim),
        entered: entered_tx,
        proceed: proceed_rx,
    });

    let runtime = CaptureRuntime::init().unwrap();
    let engine = Arc::new(CaptureEngine::new(runtime, factory));
    let events = engine.events();

    let starter = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.start(CaptureOptions::default()))
    };

    entered_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(engine.status(), SessionState::Requesting);

    // Stop must not wait for the prompt to resolve.
    let begin = Instant::now();
    engine.stop().unwrap();
    assert!(
        begin.elapsed() < Duration::from_secs(1),
        "stop blocked on acquisition for {:?}",
        begin.elapsed()
    );
    assert_eq!(engine.status(), SessionState::Idle);
    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::Stopped {
                reason: StopReason::UserRequested
            }
        )
    });

    // Let the prompt resolve; the aborted start hands back every grant.
    proceed_tx.send(()).unwrap();
    assert!(starter.join().unwrap().is_err());
    assert_eq!(sim.release_count(StreamKind::Video), 1);
    assert_eq!(sim.release_count(StreamKind::SystemAudio), 1);
}

#[test]
fn failing_sink_does_not_block_other_sinks() {
    struct BrokenSink;

    impl media_capture_core::ChunkSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        fn deliver(&self, _chunk: &Arc<Chunk>) -> Result<(), CaptureError> {
            Err(CaptureError::SinkFailure {
                sink: "broken".into(),
                message: "disk full".into(),
            })
        }
    }

    let factory = Arc::new(SimSourceFactory::granting_defaults());
    let runtime = CaptureRuntime::init().unwrap();
    let engine = CaptureEngine::new(runtime, factory.clone());
    let events = engine.events();
    engine.add_sink(Arc::new(BrokenSink)).unwrap();
    let (sink, chunks) = ChannelSink::new(256);
    engine.add_sink(Arc::new(sink)).unwrap();

    engine.start(short_window_options()).unwrap();

    // The healthy sink keeps receiving chunks; every failure surfaces as a
    // non-fatal error event and the session stays up.
    recv_chunk_of(&chunks, StreamKind::Video);
    wait_for_event(&events, |e| {
        matches!(
            e,
            SessionEvent::Error {
                kind: ErrorKind::SinkFailure,
                ..
            }
        )
    });
    assert_eq!(engine.status(), SessionState::Running);
    engine.stop().unwrap();
}

#[test]
fn lifecycle_guards() {
    let factory = Arc::new(SimSourceFactory::granting_defaults());
    let (engine, _events, _chunks) = engine_with(&factory);

    // Stopping an idle engine is a no-op.
    engine.stop().unwrap();

    // Options set while idle are stored for the next start.
    let options = CaptureOptions {
        chunk_duration_ms: 250,
        ..Default::default()
    };
    engine.set_options(options.clone()).unwrap();
    assert_eq!(engine.options(), options);

    engine.start(options).unwrap();

    // A second start and sink registration are rejected while running.
    assert!(engine.start(short_window_options()).is_err());
    let (sink, _rx) = ChannelSink::new(4);
    assert!(engine.add_sink(Arc::new(sink)).is_err());

    engine.stop().unwrap();
    engine.stop().unwrap();
}
