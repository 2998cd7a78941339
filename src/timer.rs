//! Timer handles (spec §4.5, §9 "Timer handles").
//!
//! A timer is an opaque, idempotently-cancellable token. We represent one as
//! a spawned sleep task; cancelling aborts the task. Because `abort` cannot
//! interrupt a future that has already resumed past its last await point,
//! every timer body is guarded by an epoch check at the call site (see
//! `pending.rs` / `stream.rs`) rather than relying on abort alone for
//! correctness. Abort is the opportunistic optimization spec §4.5 allows
//! for, not the source of truth.

/// A single armed timer. Dropping or clearing it aborts the underlying task.
pub struct TimerSlot(Option<tokio::task::JoinHandle<()>>);

impl TimerSlot {
    pub fn empty() -> Self {
        TimerSlot(None)
    }

    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }

    /// Cancel whatever timer is currently held, if any. Idempotent.
    pub fn clear(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }

    /// Replace the held timer, cancelling any previous one first.
    pub fn set(&mut self, handle: tokio::task::JoinHandle<()>) {
        self.clear();
        self.0 = Some(handle);
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.clear();
    }
}
