use portable_atomic::{AtomicU64, Ordering};

/// Monotonic counter identifying the most recently issued viewport query.
///
/// Only the issuing path advances it; response handlers only compare against
/// it.
#[derive(Debug, Default)]
pub struct QueryGeneration {
    current: AtomicU64,
}

impl QueryGeneration {
    pub const fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Advances to the next generation and returns it. The first generation
    /// is `1`.
    pub(crate) fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}
