//! Runtime overrides: symbols the engine itself supplies to JIT code.
//!
//! Consulted after JIT-defined symbols and before the host process, so
//! generated code registering exit-time cleanups reaches the engine's own
//! registry rather than the process's `atexit` machinery.

use std::collections::HashMap;

use lazyjit_core::{Mangler, Symbol, SymbolFlags};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::callback::take_trampoline_error;

/// Data symbol identifying the engine's cleanup registry.
pub const DSO_HANDLE: &str = "__dso_handle";
/// `int __cxa_atexit(void (*fn)(void *), void *arg, void *dso)`.
pub const CXA_ATEXIT: &str = "__cxa_atexit";

#[derive(Debug, Clone, Copy)]
struct AtExitEntry {
    function: u64,
    arg: u64,
}

#[derive(Debug, Default)]
struct AtExitList {
    entries: Mutex<Vec<AtExitEntry>>,
}

/// Fixed table of engine-provided symbols plus the cleanup registry they feed.
#[derive(Debug)]
pub struct RuntimeOverrides {
    table: HashMap<String, Symbol>,
    // Boxed so the address handed out as `__dso_handle` never moves.
    at_exit: Box<AtExitList>,
}

impl RuntimeOverrides {
    pub fn new(mangler: &Mangler) -> Self {
        let at_exit = Box::<AtExitList>::default();
        let dso_handle = &*at_exit as *const AtExitList as usize as u64;
        let mut table = HashMap::new();
        table.insert(
            mangler.mangle(DSO_HANDLE),
            Symbol::new(dso_handle, SymbolFlags::EXPORTED | SymbolFlags::OVERRIDE),
        );
        table.insert(
            mangler.mangle(CXA_ATEXIT),
            Symbol::new(
                cxa_atexit_override as *const () as usize as u64,
                SymbolFlags::EXPORTED | SymbolFlags::OVERRIDE | SymbolFlags::CALLABLE,
            ),
        );
        Self { table, at_exit }
    }

    /// Adds or replaces an override for the logical name `name`.
    pub fn insert(&mut self, mangler: &Mangler, name: &str, address: u64) {
        self.table.insert(
            mangler.mangle(name),
            Symbol::new(address, SymbolFlags::EXPORTED | SymbolFlags::OVERRIDE),
        );
    }

    /// Looks up a mangled name.
    pub fn search(&self, mangled: &str) -> Symbol {
        self.table.get(mangled).copied().unwrap_or_default()
    }

    pub fn dso_handle(&self) -> u64 {
        &*self.at_exit as *const AtExitList as usize as u64
    }

    /// Cleanups registered through `__cxa_atexit` and not yet run.
    pub fn pending_cleanups(&self) -> usize {
        self.at_exit.entries.lock().len()
    }

    /// Drops cleanups registered after the first `len`, unrun.
    ///
    /// Used when a unit's constructors fail: their cleanups may point into
    /// code that is removed with the unit.
    pub(crate) fn discard_cleanups_after(&self, len: usize) {
        let mut entries = self.at_exit.entries.lock();
        if entries.len() > len {
            debug!(discarded = entries.len() - len, "discarding cleanups of failed unit");
            entries.truncate(len);
        }
    }

    /// Runs registered cleanups in reverse registration order.
    ///
    /// Each cleanup runs at most once; a second call finds the list empty.
    pub fn run_destructors(&self) {
        let entries = std::mem::take(&mut *self.at_exit.entries.lock());
        if entries.is_empty() {
            return;
        }
        debug!(cleanups = entries.len(), "running exit-time cleanups");
        for entry in entries.into_iter().rev() {
            // SAFETY: registered through `__cxa_atexit` by generated code; every
            // generated function takes i64 parameters and returns i64.
            let cleanup: extern "C" fn(u64) -> i64 =
                unsafe { std::mem::transmute(entry.function as usize as *const u8) };
            cleanup(entry.arg);
            if let Some(err) = take_trampoline_error() {
                warn!(error = %err, "exit-time cleanup failed to compile");
            }
        }
    }
}

extern "C" fn cxa_atexit_override(function: u64, arg: u64, dso: u64) -> i64 {
    if function == 0 || dso == 0 {
        return -1;
    }
    // SAFETY: generated code passes the address `__dso_handle` resolved to,
    // which is the boxed registry owned by the live `RuntimeOverrides`.
    let list = unsafe { &*(dso as usize as *const AtExitList) };
    list.entries.lock().push(AtExitEntry { function, arg });
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_overrides_are_mangled() {
        let mangler = Mangler::with_prefix('_');
        let overrides = RuntimeOverrides::new(&mangler);
        assert!(overrides.search("___cxa_atexit").is_resolved());
        assert_eq!(
            overrides.search("___dso_handle").address(),
            Some(overrides.dso_handle())
        );
        assert!(!overrides.search("__cxa_atexit").is_resolved());
    }

    #[test]
    fn atexit_rejects_null_handle() {
        assert_eq!(cxa_atexit_override(1, 0, 0), -1);
    }

    extern "C" fn bump(cell: u64) -> i64 {
        // SAFETY: tests pass the address of a live i64.
        let cell = unsafe { &mut *(cell as usize as *mut i64) };
        *cell = *cell * 10 + 1;
        0
    }

    extern "C" fn bump_two(cell: u64) -> i64 {
        // SAFETY: as above.
        let cell = unsafe { &mut *(cell as usize as *mut i64) };
        *cell = *cell * 10 + 2;
        0
    }

    #[test]
    fn cleanups_run_once_in_reverse() {
        let overrides = RuntimeOverrides::new(&Mangler::undecorated());
        let mut cell: i64 = 0;
        let cell_addr = &mut cell as *mut i64 as usize as u64;
        let dso = overrides.dso_handle();
        assert_eq!(cxa_atexit_override(bump as *const () as usize as u64, cell_addr, dso), 0);
        assert_eq!(cxa_atexit_override(bump_two as *const () as usize as u64, cell_addr, dso), 0);
        assert_eq!(overrides.pending_cleanups(), 2);

        overrides.run_destructors();
        overrides.run_destructors();
        assert_eq!(cell, 21);
        assert_eq!(overrides.pending_cleanups(), 0);
    }

    #[test]
    fn discarded_cleanups_never_run() {
        let overrides = RuntimeOverrides::new(&Mangler::undecorated());
        let mut cell: i64 = 0;
        let cell_addr = &mut cell as *mut i64 as usize as u64;
        let dso = overrides.dso_handle();
        cxa_atexit_override(bump as *const () as usize as u64, cell_addr, dso);
        let mark = overrides.pending_cleanups();
        cxa_atexit_override(bump_two as *const () as usize as u64, cell_addr, dso);

        overrides.discard_cleanups_after(mark);
        overrides.discard_cleanups_after(mark);
        assert_eq!(overrides.pending_cleanups(), 1);
        overrides.run_destructors();
        assert_eq!(cell, 1);
    }

    #[test]
    fn insert_replaces_builtin() {
        let mangler = Mangler::undecorated();
        let mut overrides = RuntimeOverrides::new(&mangler);
        overrides.insert(&mangler, CXA_ATEXIT, 0x1000);
        let sym = overrides.search(CXA_ATEXIT);
        assert_eq!(sym.address(), Some(0x1000));
        assert!(sym.flags().contains(SymbolFlags::OVERRIDE));
    }
}
