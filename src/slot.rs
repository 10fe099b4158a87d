//! Single-owner resource slots.
//!
//! The microphone, the active recording, and the active playback sound
//! are each owned by exactly one holder at a time. A slot hands out at
//! most one guard; a second acquisition is rejected rather than
//! displacing the current holder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ResourceSlot {
    busy: Arc<AtomicBool>,
    name: &'static str,
}

impl ResourceSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            name,
        }
    }

    /// Acquire the slot, or `None` if it is already held.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("acquired {} slot", self.name);
            Some(SlotGuard {
                busy: self.busy.clone(),
                name: self.name,
            })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the slot when dropped. Guards may be moved into completion
/// callbacks so that release tracks the end of the underlying operation.
#[derive(Debug)]
pub struct SlotGuard {
    busy: Arc<AtomicBool>,
    name: &'static str,
}

impl SlotGuard {
    pub fn release(self) {}
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        debug!("released {} slot", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_acquisition_is_rejected() {
        let slot = ResourceSlot::new("playback");
        let guard = slot.try_acquire().expect("first acquire");
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn guard_releases_from_a_callback() {
        let slot = ResourceSlot::new("recording");
        let guard = slot.try_acquire().unwrap();
        let done: Box<dyn FnOnce() + Send> = Box::new(move || guard.release());
        assert!(slot.is_busy());
        done();
        assert!(!slot.is_busy());
    }
}
