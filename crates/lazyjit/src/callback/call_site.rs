use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An atomically patchable function-pointer slot.
///
/// Stubs load their target from the slot on every call, so redirecting a
/// function is a single atomic store. The slot lives in its own allocation and
/// its address is baked into generated code; it must outlive every stub.
#[derive(Debug)]
pub struct CallSite {
    target: AtomicU64,
}

impl CallSite {
    pub fn new(initial: u64) -> Arc<Self> {
        Arc::new(Self {
            target: AtomicU64::new(initial),
        })
    }

    /// Address of the slot itself, as embedded in stub code.
    pub fn slot_address(&self) -> u64 {
        &self.target as *const AtomicU64 as usize as u64
    }

    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Acquire)
    }

    pub fn set_target(&self, address: u64) {
        self.target.store(address, Ordering::Release);
    }
}
