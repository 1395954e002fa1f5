use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::models::event::DropAction;
use crate::models::media::StreamKind;
use crate::models::options::DropPolicy;

/// Verdict for one buffer at the admission point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Drop(DropAction),
}

/// Shared byte-budget policy across all accumulators of one session.
///
/// Tracks the total unflushed bytes held across streams against a ceiling.
/// Admission never lets the total exceed the ceiling; once the budget runs
/// out the per-kind drop policy fires instead of blocking, so the producer
/// callback path never stalls OS-level capture. A small tail of the budget
/// is reserved for audio: video admission stops slightly below the ceiling,
/// because audio gaps are more audible than a late video frame.
pub struct BackpressureGovernor {
    ceiling: AtomicUsize,
    total: AtomicUsize,
    policies: Mutex<Policies>,
}

#[derive(Debug, Clone, Copy)]
struct Policies {
    video: DropPolicy,
    audio: DropPolicy,
}

/// Fraction of the ceiling reserved for audio streams. Video admission
/// stops at `ceiling - ceiling / AUDIO_RESERVE_DIVISOR`.
const AUDIO_RESERVE_DIVISOR: usize = 16;

impl BackpressureGovernor {
    pub fn new(ceiling: usize, video: DropPolicy, audio: DropPolicy) -> Self {
        Self {
            ceiling: AtomicUsize::new(ceiling),
            total: AtomicUsize::new(0),
            policies: Mutex::new(Policies { video, audio }),
        }
    }

    /// Admit-and-charge for one buffer, atomically against the ceiling.
    ///
    /// On `Admit` the buffer's bytes are already charged; the caller must
    /// `release` them once the window holding the buffer is flushed or the
    /// buffer is evicted.
    pub fn admit(&self, kind: StreamKind, len: usize) -> Admission {
        let allowance = self.allowance(kind);
        let admitted = self
            .total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                let next = total.checked_add(len)?;
                (next <= allowance).then_some(next)
            })
            .is_ok();

        if admitted {
            Admission::Admit
        } else {
            Admission::Drop(self.action_for(kind))
        }
    }

    /// Return bytes to the budget after a flush, chunk close, or eviction.
    pub fn release(&self, len: usize) {
        let _ = self
            .total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                Some(total.saturating_sub(len))
            });
    }

    /// Total bytes currently held, unflushed, across all streams.
    pub fn buffered_total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::SeqCst)
    }

    /// Live reconfiguration of the ceiling. A lowered ceiling does not evict
    /// already-buffered data; it only tightens future admissions.
    pub fn set_ceiling(&self, ceiling: usize) {
        self.ceiling.store(ceiling, Ordering::SeqCst);
    }

    pub fn set_policies(&self, video: DropPolicy, audio: DropPolicy) {
        *self.policies.lock() = Policies { video, audio };
    }

    /// The drop action the configured policy prescribes for this kind.
    pub fn action_for(&self, kind: StreamKind) -> DropAction {
        let policies = self.policies.lock();
        let policy = if kind.is_audio() {
            policies.audio
        } else {
            policies.video
        };
        match policy {
            DropPolicy::DropNewest => DropAction::DroppedNewest,
            DropPolicy::DropOldest => DropAction::DroppedOldest,
        }
    }

    fn allowance(&self, kind: StreamKind) -> usize {
        let ceiling = self.ceiling();
        if kind.is_audio() {
            ceiling
        } else {
            ceiling - ceiling / AUDIO_RESERVE_DIVISOR
        }
    }
}
