//! Cooperative interruption of a training run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag, checked by the training loops before every batch.
///
/// Cloning shares the flag, so a signal handler or another thread can hold
/// one copy while the loop holds another.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag (e.g. one set from a signal handler).
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();
        assert!(!interrupt.is_triggered());

        handle.trigger();
        assert!(interrupt.is_triggered());

        interrupt.reset();
        assert!(!handle.is_triggered());
    }

    #[test]
    fn test_from_flag() {
        let flag = Arc::new(AtomicBool::new(true));
        assert!(Interrupt::from_flag(flag).is_triggered());
    }
}
