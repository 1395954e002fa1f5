use once_cell::sync::OnceCell;

use crate::models::error::CaptureError;

static RUNTIME: OnceCell<()> = OnceCell::new();

/// Proof that process-wide media stack initialization has run.
///
/// Platform backends typically sit on a media framework that must be
/// initialized exactly once per process (the GStreamer `init()` pattern).
/// Instead of ambient global state, that fact is carried as this token:
/// `CaptureEngine` construction requires one, and `init()` is idempotent so
/// any number of call sites may race to create it.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRuntime {
    _private: (),
}

impl CaptureRuntime {
    pub fn init() -> Result<Self, CaptureError> {
        RUNTIME.get_or_try_init(|| {
            log::debug!("media capture runtime initialized");
            Ok::<(), CaptureError>(())
        })?;
        Ok(Self { _private: () })
    }
}
