//! Scripted source factory for driving the engine in tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use media_capture_core::{
    CaptureError, CaptureTarget, SourceFactory, SourceProvider, StreamKind,
};

use crate::synthetic::{StallingSource, SyntheticConfig, SyntheticSource};

/// What `acquire_source` does for a given stream kind.
#[derive(Clone)]
pub enum SourceScript {
    Grant(SyntheticConfig),
    /// Grant a source whose release blocks for `stall` before returning.
    GrantStalling { config: SyntheticConfig, stall: Duration },
    Deny,
    Unavailable,
}

/// Factory with per-kind scripted outcomes and acquisition/release logs, so
/// tests can assert that granted sources are handed back on failure paths.
pub struct SimSourceFactory {
    scripts: Mutex<HashMap<StreamKind, SourceScript>>,
    acquired: Arc<Mutex<Vec<StreamKind>>>,
    released: Arc<Mutex<Vec<StreamKind>>>,
    targets: Mutex<Vec<CaptureTarget>>,
}

impl SimSourceFactory {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            acquired: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(Vec::new())),
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Grants video and system audio with default synthetic configs.
    pub fn granting_defaults() -> Self {
        let factory = Self::new();
        factory.script(StreamKind::Video, SourceScript::Grant(SyntheticConfig::video()));
        factory.script(
            StreamKind::SystemAudio,
            SourceScript::Grant(SyntheticConfig::system_audio()),
        );
        factory
    }

    pub fn script(&self, kind: StreamKind, script: SourceScript) {
        self.scripts.lock().insert(kind, script);
    }

    /// Kinds acquired so far, in acquisition order. Repeat acquisitions of
    /// the same kind appear once per acquisition.
    pub fn acquired(&self) -> Vec<StreamKind> {
        self.acquired.lock().clone()
    }

    /// Kinds whose providers have been released back (stopped or dropped).
    pub fn released(&self) -> Vec<StreamKind> {
        self.released.lock().clone()
    }

    pub fn release_count(&self, kind: StreamKind) -> usize {
        self.released.lock().iter().filter(|k| **k == kind).count()
    }

    /// Targets passed to `acquire_source`, in order.
    pub fn requested_targets(&self) -> Vec<CaptureTarget> {
        self.targets.lock().clone()
    }
}

impl Default for SimSourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceFactory for SimSourceFactory {
    fn acquire_source(
        &self,
        kind: StreamKind,
        target: &CaptureTarget,
    ) -> Result<Box<dyn SourceProvider>, CaptureError> {
        self.targets.lock().push(target.clone());
        let script = self.scripts.lock().get(&kind).cloned();
        match script {
            Some(SourceScript::Grant(config)) => {
                self.acquired.lock().push(kind);
                let released = Arc::clone(&self.released);
                let source = SyntheticSource::new(config)
                    .with_release_hook(Arc::new(move |k| released.lock().push(k)));
                Ok(Box::new(source))
            }
            Some(SourceScript::GrantStalling { config, stall }) => {
                self.acquired.lock().push(kind);
                Ok(Box::new(StallingSource::new(config, stall)))
            }
            Some(SourceScript::Deny) => Err(CaptureError::PermissionDenied(kind)),
            Some(SourceScript::Unavailable) | None => {
                Err(CaptureError::SourceUnavailable(kind))
            }
        }
    }
}
