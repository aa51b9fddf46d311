use lazyjit_core::JitResult;
use tracing::debug;

use crate::callback::take_trampoline_error;
use crate::layers::JitLayer;

/// Runs a list of static initializers or finalizers found in one unit.
///
/// Names are mangled; each must resolve to a nullary function in the unit
/// behind `handle`.
pub struct CtorDtorRunner<L: JitLayer> {
    names: Vec<String>,
    handle: L::Handle,
}

impl<L: JitLayer> CtorDtorRunner<L> {
    pub fn new(names: Vec<String>, handle: L::Handle) -> Self {
        Self { names, handle }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn handle(&self) -> L::Handle {
        self.handle
    }

    /// Resolves and calls every function in list order, stopping at the
    /// first one that cannot be resolved or fails to compile.
    pub fn run_via_layer(&self, layer: &L) -> JitResult<()> {
        for name in &self.names {
            let address = layer.find_symbol_in(self.handle, name, false)?.require(name)?;
            // SAFETY: validated units only list nullary functions here, and
            // every generated function returns i64.
            let init: extern "C" fn() -> i64 =
                unsafe { std::mem::transmute(address as usize as *const u8) };
            let _ = take_trampoline_error();
            init();
            if let Some(err) = take_trampoline_error() {
                return Err(err);
            }
            debug!(event = "static_init_run", function = %name, handle = ?self.handle);
        }
        Ok(())
    }
}
