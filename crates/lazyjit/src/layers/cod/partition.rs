//! One independently compiled group of functions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use lazyjit_core::{JitError, JitResult};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::callback::CallSite;
use crate::layers::{JitLayer, LazyEmittingLayer, LazyHandle};

/// Lifecycle of a partition. Only ever moves forward, except that a failed
/// compile drops back to `Stubbed` so the next call retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartitionState {
    Stubbed = 0,
    Compiling = 1,
    Resolved = 2,
}

impl PartitionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PartitionState::Stubbed,
            1 => PartitionState::Compiling,
            _ => PartitionState::Resolved,
        }
    }
}

/// A function of the partition and the call site its stub jumps through.
pub(crate) struct PartitionMember {
    pub mangled: String,
    pub call_site: Arc<CallSite>,
}

pub(crate) struct Partition {
    name: String,
    lazy: LazyHandle,
    members: Vec<PartitionMember>,
    state: AtomicU8,
    wait_lock: Mutex<()>,
    resolved_cv: Condvar,
    resolved: OnceLock<HashMap<String, u64>>,
}

impl Partition {
    pub fn new(name: String, lazy: LazyHandle, members: Vec<PartitionMember>) -> Self {
        Self {
            name,
            lazy,
            members,
            state: AtomicU8::new(PartitionState::Stubbed as u8),
            wait_lock: Mutex::new(()),
            resolved_cv: Condvar::new(),
            resolved: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PartitionState {
        PartitionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Compiled address of `mangled`, once the partition is resolved.
    ///
    /// Never blocks: a partition still compiling reports nothing.
    pub fn resolved_address(&self, mangled: &str) -> Option<u64> {
        if self.state() != PartitionState::Resolved {
            return None;
        }
        self.resolved.get()?.get(mangled).copied()
    }

    /// Compiles the partition if nobody has, waiting out a concurrent compile.
    ///
    /// Exactly one caller performs the compile; the rest block until it
    /// finishes and then observe its result.
    pub fn materialize(&self, lazy: &LazyEmittingLayer) -> JitResult<&HashMap<String, u64>> {
        loop {
            match self.state.compare_exchange(
                PartitionState::Stubbed as u8,
                PartitionState::Compiling as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(raw) if PartitionState::from_u8(raw) == PartitionState::Resolved => {
                    return self.addresses();
                }
                Err(_) => {
                    let mut guard = self.wait_lock.lock();
                    while self.state() == PartitionState::Compiling {
                        self.resolved_cv.wait(&mut guard);
                    }
                }
            }
        }

        let outcome = self.compile(lazy);
        {
            let _guard = self.wait_lock.lock();
            let next = match &outcome {
                Ok(_) => PartitionState::Resolved,
                Err(_) => PartitionState::Stubbed,
            };
            if let Ok(addresses) = outcome.as_ref() {
                let _ = self.resolved.set(addresses.clone());
            }
            self.state.store(next as u8, Ordering::Release);
        }
        self.resolved_cv.notify_all();

        match outcome {
            Ok(_) => {
                debug!(
                    event = "partition_compiled",
                    partition = %self.name,
                    functions = self.members.len(),
                );
                self.addresses()
            }
            Err(err) => {
                debug!(partition = %self.name, error = %err, "partition compile failed");
                Err(err)
            }
        }
    }

    fn addresses(&self) -> JitResult<&HashMap<String, u64>> {
        self.resolved.get().ok_or_else(|| {
            JitError::Internal(format!("partition '{}' resolved without addresses", self.name))
        })
    }

    /// Emits the partition unit and patches every member's call site.
    fn compile(&self, lazy: &LazyEmittingLayer) -> JitResult<HashMap<String, u64>> {
        let mut addresses = HashMap::with_capacity(self.members.len());
        for member in &self.members {
            let address = lazy
                .find_symbol_in(self.lazy, &member.mangled, false)?
                .address()
                .ok_or_else(|| {
                    JitError::Internal(format!(
                        "partition '{}' did not define '{}'",
                        self.name, member.mangled
                    ))
                })?;
            addresses.insert(member.mangled.clone(), address);
        }
        // Patch only once every member is linked.
        for member in &self.members {
            if let Some(&address) = addresses.get(&member.mangled) {
                member.call_site.set_target(address);
            }
        }
        Ok(addresses)
    }
}
