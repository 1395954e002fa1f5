use serde::{Deserialize, Serialize};

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → requesting → running → stopping → idle
///                        ↕
///                  reconfiguring
/// ```
/// Any state can fall back to `idle` on a fatal error, so `start()` is always
/// a valid retry after failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    Running,
    Reconfiguring,
    Stopping,
}

impl SessionState {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether a session currently owns source adapters.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Whether `stop()` is accepted in this state.
    pub fn can_stop(self) -> bool {
        matches!(self, Self::Requesting | Self::Running | Self::Reconfiguring)
    }
}
