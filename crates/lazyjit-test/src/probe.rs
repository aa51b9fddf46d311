//! Instrumentation for observing what the engine compiles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::Duration;

use cranelift_jit::JITModule;
use lazyjit::{CodeGenerator, CraneliftCodeGen, ObjectCode};
use lazyjit_core::{CompilationUnit, JitResult, Mangler};
use parking_lot::Mutex;

/// Suffix of skeleton units generated by the compile-on-demand layer.
pub const SKELETON_SUFFIX: &str = "$stubs";

/// Wraps [`CraneliftCodeGen`] and counts compiles per unit name.
///
/// With a delay set, every non-skeleton compile sleeps first, widening the
/// window in which concurrent callers can race.
#[derive(Debug, Default)]
pub struct CountingCodeGen {
    inner: CraneliftCodeGen,
    counts: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl CountingCodeGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Compiles of the unit named exactly `unit`.
    pub fn count(&self, unit: &str) -> usize {
        self.counts.lock().get(unit).copied().unwrap_or(0)
    }

    /// Compiles of partition units, skeletons excluded.
    pub fn partition_compiles(&self) -> usize {
        self.counts
            .lock()
            .iter()
            .filter(|(name, _)| !name.ends_with(SKELETON_SUFFIX))
            .map(|(_, n)| n)
            .sum()
    }

    /// Every unit compiled so far, sorted.
    pub fn compiled_units(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counts.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl CodeGenerator for CountingCodeGen {
    fn compile(
        &self,
        unit: &CompilationUnit,
        mangler: &Mangler,
        module: &mut JITModule,
    ) -> JitResult<ObjectCode> {
        *self.counts.lock().entry(unit.name.clone()).or_default() += 1;
        if let Some(delay) = self.delay {
            if !unit.name.ends_with(SKELETON_SUFFIX) {
                thread::sleep(delay);
            }
        }
        self.inner.compile(unit, mangler, module)
    }
}

/// A heap-pinned i64 that JIT code can reach as an override data symbol.
#[derive(Debug, Default)]
pub struct ProbeCell(Box<AtomicI64>);

impl ProbeCell {
    pub fn new(value: i64) -> Self {
        Self(Box::new(AtomicI64::new(value)))
    }

    /// Address to register with `EngineBuilder::runtime_override`.
    pub fn as_ptr(&self) -> *const u8 {
        &*self.0 as *const AtomicI64 as *const u8
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::SeqCst);
    }
}
