use tokio::task::JoinHandle;

/// The single live debounce timer.
///
/// Arming a new timer aborts the previous one before it can fire, so at most
/// one timer is ever live. Aborting cannot stop a task that is already past
/// its sleep, so every timer is armed with a sequence number and must claim
/// it through [`fire`](Self::fire) before acting; replacing or cancelling the
/// timer invalidates the number.
#[derive(Debug, Default)]
pub(crate) struct PendingTimer {
    handle: Option<JoinHandle<()>>,
    armed: u64,
}

impl PendingTimer {
    /// Replaces the live timer with the one `spawn` starts, passing it the
    /// sequence number it must present to [`fire`](Self::fire). Returns
    /// `true` if an unfired timer was cancelled.
    pub(crate) fn arm(&mut self, spawn: impl FnOnce(u64) -> JoinHandle<()>) -> bool {
        let cancelled = self.cancel();
        self.handle = Some(spawn(self.armed));
        cancelled
    }

    /// Cancels the live timer, if any. Returns `true` if it had not fired yet.
    pub(crate) fn cancel(&mut self) -> bool {
        self.armed = self.armed.wrapping_add(1);
        match self.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Claims the expiry of the timer armed as `seq`. Returns `false` if that
    /// timer was replaced or cancelled in the meantime.
    pub(crate) fn fire(&mut self, seq: u64) -> bool {
        if seq != self.armed {
            return false;
        }
        self.armed = self.armed.wrapping_add(1);
        self.handle = None;
        true
    }

    pub(crate) fn is_live(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for PendingTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
